// 该文件是 Xunjian （巡检） 项目的一部分。
// src/args.rs - 命令行参数
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

use std::path::PathBuf;

use clap::Parser;
use xunjian::config::{
  DEFAULT_DOWNLOAD_DIR, DEFAULT_RESULTS_ROOT, DEFAULT_RUN_NAME, DetectOptions, PipelineConfig,
};

/// 巡检目标检测参数配置
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// ONNX 模型路径，或 `onnx:///path/model.onnx?stride=32&output=output0`
  #[arg(long, value_name = "MODEL")]
  pub model: String,

  /// 输入来源
  /// 支持格式:
  /// - 图片/视频文件、目录、通配符（如 `data/*.jpg`）
  /// - 摄像头编号（如 `0`）或 `.streams` 列表文件
  /// - rtsp/rtmp/http(s) 地址
  /// - `screen [n] [left top width height]`
  #[arg(long, value_name = "SOURCE")]
  pub source: String,

  /// 结果根目录
  #[arg(long, default_value = DEFAULT_RESULTS_ROOT, value_name = "DIR")]
  pub results: PathBuf,

  /// 运行目录名前缀
  #[arg(long, default_value = DEFAULT_RUN_NAME, value_name = "NAME")]
  pub name: String,

  /// 远程文件下载缓存目录
  #[arg(long, default_value = DEFAULT_DOWNLOAD_DIR, value_name = "DIR")]
  pub download_dir: PathBuf,

  /// 类别名称文件，每行一个
  #[arg(long, value_name = "FILE")]
  pub names: Option<PathBuf>,

  /// 置信度阈值 (0.0 - 1.0)
  #[arg(long, default_value = "0.25", value_name = "THRESHOLD")]
  pub conf: f32,

  /// NMS IOU 阈值 (0.0 - 1.0)
  #[arg(long, default_value = "0.45", value_name = "THRESHOLD")]
  pub iou: f32,

  /// 每帧最多保留的检测框数
  #[arg(long, default_value = "1000", value_name = "COUNT")]
  pub max_det: usize,

  /// 只保留这些类别编号
  #[arg(long, num_args = 1.., value_name = "CLASS")]
  pub classes: Option<Vec<usize>>,

  /// 跨类别做 NMS
  #[arg(long)]
  pub agnostic_nms: bool,

  /// 推理尺寸：一个值表示正方形，两个值为 高 宽
  #[arg(long, num_args = 1..=2, default_values_t = [640u32], value_name = "PIXELS")]
  pub imgsz: Vec<u32>,

  /// 推理设备，如 `cpu` 或 `0`
  #[arg(long, default_value = "", value_name = "DEVICE")]
  pub device: String,

  /// 半精度推理
  #[arg(long)]
  pub half: bool,

  #[arg(long)]
  pub hide_labels: bool,

  #[arg(long)]
  pub hide_conf: bool,

  /// 视频抽帧间隔
  #[arg(long, default_value = "1", value_name = "STRIDE")]
  pub vid_stride: usize,

  /// 边框线宽，0 表示按图像尺寸推算
  #[arg(long, default_value = "3", value_name = "PIXELS")]
  pub line_thickness: u32,

  /// 最多处理的批次数
  #[arg(long, value_name = "COUNT")]
  pub max_frames: Option<usize>,

  /// 来源未报告帧率时使用的帧率
  #[arg(long, default_value = "30", value_name = "FPS")]
  pub fps: f64,

  /// 标签字体文件
  #[arg(long, value_name = "FILE")]
  pub font: Option<PathBuf>,

  /// 以 JSON 格式输出结果
  #[arg(long)]
  pub json: bool,

  /// 检测前删除超过指定小时数的运行目录
  #[arg(long, value_name = "HOURS")]
  pub prune_hours: Option<u64>,
}

impl Args {
  pub fn image_size(&self) -> (u32, u32) {
    match self.imgsz.as_slice() {
      [h, w, ..] => (*h, *w),
      [s] => (*s, *s),
      [] => (640, 640),
    }
  }

  pub fn detect_options(&self) -> DetectOptions {
    let (h, w) = self.image_size();
    let mut options = DetectOptions::default()
      .with_confidence(self.conf)
      .with_iou(self.iou)
      .with_max_detections(self.max_det)
      .with_agnostic(self.agnostic_nms)
      .with_image_size(h, w)
      .with_frame_stride(self.vid_stride)
      .with_max_frames(self.max_frames)
      .with_device(self.device.as_str());
    if let Some(classes) = &self.classes {
      options = options.with_classes(classes.iter().copied());
    }
    options.half_precision = self.half;
    options.hide_labels = self.hide_labels;
    options.hide_confidence = self.hide_conf;
    options.line_thickness = self.line_thickness;
    options
  }

  pub fn pipeline_config(&self) -> PipelineConfig {
    PipelineConfig::default()
      .with_results_root(&self.results)
      .with_run_name(self.name.clone())
      .with_download_dir(&self.download_dir)
      .with_default_fps(self.fps)
      .with_font_path(self.font.as_ref())
      .with_options(self.detect_options())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn defaults_map_to_pipeline_defaults() {
    let args = Args::parse_from(["xunjian-detect", "--model", "m.onnx", "--source", "0"]);
    assert_eq!(args.detect_options(), DetectOptions::default());
    let config = args.pipeline_config();
    assert_eq!(config.results_root, PathBuf::from(DEFAULT_RESULTS_ROOT));
    assert_eq!(config.run_name, DEFAULT_RUN_NAME);
  }

  #[test]
  fn image_size_and_classes() {
    let args = Args::parse_from([
      "xunjian-detect",
      "--model",
      "m.onnx",
      "--source",
      "a.jpg",
      "--imgsz",
      "480",
      "640",
      "--classes",
      "0",
      "2",
      "--hide-conf",
    ]);
    let options = args.detect_options();
    assert_eq!(options.image_size, (480, 640));
    assert_eq!(options.class_filter, Some([0, 2].into_iter().collect()));
    assert!(options.hide_confidence);
  }
}
