// 该文件是 Xunjian （巡检） 项目的一部分。
// src/main.rs - xunjian-detect 命令行入口
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

mod args;

use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Local;
use clap::Parser;
use serde_json::{Value, json};
use tracing::info;
use url::Url;

use xunjian::{
  FromUrl,
  error::DetectError,
  model::{ClassNames, OnnxEngine, OnnxEngineBuilder},
  report::RunReport,
  task::DetectionPipeline,
};

fn engine_from_args(args: &args::Args) -> Result<OnnxEngine> {
  let mut builder = match Url::parse(&args.model) {
    Ok(url) if url.scheme() == "onnx" => OnnxEngineBuilder::from_url(&url)?,
    _ => OnnxEngineBuilder::new(&args.model),
  };
  if let Some(path) = &args.names {
    let names = ClassNames::from_file(path)
      .with_context(|| format!("无法读取类别名称文件: {}", path.display()))?;
    builder = builder.names(names);
  }
  Ok(builder.build())
}

/// `{success, message, timestamp, data}` 格式的响应
fn response(success: bool, message: &str, data: Option<Value>) -> Value {
  let mut body = json!({
    "success": success,
    "message": message,
    "timestamp": Local::now().format("%Y-%m-%dT%H:%M:%S%.6f").to_string(),
  });
  if let Some(data) = data {
    body["data"] = data;
  }
  body
}

fn report_data(report: &RunReport) -> Value {
  json!({
    "run_dir": report.run_dir.display().to_string(),
    "files": report
      .files
      .iter()
      .map(|p| p.display().to_string())
      .collect::<Vec<_>>(),
    "frames": report.frames,
    "detections": report.detections,
  })
}

fn detect(pipeline: &DetectionPipeline<OnnxEngine>, source: &str) -> Result<RunReport, DetectError> {
  pipeline.initialize()?;
  pipeline.run(source)
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = args::Args::parse();

  info!("模型文件路径: {}", args.model);
  info!("输入来源: {}", args.source);
  info!("结果目录: {}", args.results.display());

  let pipeline = DetectionPipeline::new(engine_from_args(&args)?, args.pipeline_config());

  if let Some(hours) = args.prune_hours {
    let removed = pipeline
      .allocator()
      .prune_older_than(Duration::from_secs(hours * 3600))
      .context("清理过期运行目录失败")?;
    info!("已清理 {} 个过期运行目录", removed.len());
  }

  let result = detect(&pipeline, &args.source);
  if args.json {
    let body = match &result {
      Ok(report) => response(true, "检测完成", Some(report_data(report))),
      Err(e) => response(false, &e.to_string(), None),
    };
    println!("{}", serde_json::to_string_pretty(&body)?);
  }

  let report = result?;
  if report.is_empty() {
    info!("没有写出任何结果");
  }
  for file in &report.files {
    info!("输出文件: {}", file.display());
  }
  Ok(())
}
