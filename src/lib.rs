// 该文件是 Xunjian （巡检） 项目的一部分。
// src/lib.rs - 库主文件
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

//! # 巡检：批量媒体目标检测流水线
//!
//! 给定一个图像、视频、目录、通配符、直播流或屏幕截图来源，
//! 流水线会识别来源类型、逐帧推理、过滤检测框、绘制标注，
//! 并把结果写入一个新分配的运行目录。
//!
//! ```no_run
//! use xunjian::{config::PipelineConfig, task::DetectionPipeline};
//! # fn demo<E: xunjian::model::InferenceEngine + Send>(engine: E) -> Result<(), xunjian::error::DetectError> {
//! let pipeline = DetectionPipeline::new(engine, PipelineConfig::default());
//! pipeline.initialize()?;
//! let run_dir = pipeline.detect("data/cat.jpg")?;
//! println!("结果保存在 {}", run_dir.display());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod fetch;
pub mod frame;
pub mod input;
pub mod model;
pub mod output;
pub mod postprocess;
pub mod report;
pub mod run_dir;
pub mod source;
pub mod task;

pub trait FromUrl {
  type Error;
  fn from_url(url: &url::Url) -> Result<Self, Self::Error>
  where
    Self: Sized;
}
