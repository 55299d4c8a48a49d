// 该文件是 Xunjian （巡检） 项目的一部分。
// src/config.rs - 检测参数与流水线配置
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

use std::{collections::BTreeSet, path::PathBuf};

use thiserror::Error;

/// 默认结果根目录
pub const DEFAULT_RESULTS_ROOT: &str = "static/images";
/// 默认运行目录名称
pub const DEFAULT_RUN_NAME: &str = "exp";
/// 默认下载缓存目录
pub const DEFAULT_DOWNLOAD_DIR: &str = "uploads/downloads";
/// 捕获信息缺失时使用的帧率
pub const DEFAULT_FPS: f64 = 30.0;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
  #[error("置信度阈值必须在 (0, 1) 之间, 实际为 {0}")]
  ConfidenceOutOfRange(f32),
  #[error("IoU 阈值必须在 (0, 1) 之间, 实际为 {0}")]
  IouOutOfRange(f32),
  #[error("最大检测数必须大于 0")]
  ZeroMaxDetections,
  #[error("视频帧步长必须不小于 1")]
  ZeroFrameStride,
  #[error("推理尺寸必须大于 0, 实际为 {0}x{1}")]
  EmptyImageSize(u32, u32),
  #[error("默认帧率必须为正数, 实际为 {0}")]
  InvalidFps(f64),
}

/// 单次检测的参数集合
#[derive(Debug, Clone, PartialEq)]
pub struct DetectOptions {
  pub confidence_threshold: f32,
  pub iou_threshold: f32,
  pub max_detections: usize,
  /// 仅保留这些类别，`None` 表示全部
  pub class_filter: Option<BTreeSet<usize>>,
  pub agnostic_suppression: bool,
  /// 推理尺寸 (高, 宽)
  pub image_size: (u32, u32),
  /// 推理设备，如 `cpu` 或 `0`；空串表示由引擎决定
  pub device_selector: String,
  pub half_precision: bool,
  pub hide_labels: bool,
  pub hide_confidence: bool,
  pub frame_stride: usize,
  /// 边框线宽，0 表示按图像尺寸推算
  pub line_thickness: u32,
  /// 最多处理的批次数，`None` 或 0 表示不限
  pub max_frames: Option<usize>,
}

impl Default for DetectOptions {
  fn default() -> Self {
    Self {
      confidence_threshold: 0.25,
      iou_threshold: 0.45,
      max_detections: 1000,
      class_filter: None,
      agnostic_suppression: false,
      image_size: (640, 640),
      device_selector: String::new(),
      half_precision: false,
      hide_labels: false,
      hide_confidence: false,
      frame_stride: 1,
      line_thickness: 3,
      max_frames: None,
    }
  }
}

impl DetectOptions {
  pub fn with_confidence(mut self, threshold: f32) -> Self {
    self.confidence_threshold = threshold;
    self
  }

  pub fn with_iou(mut self, threshold: f32) -> Self {
    self.iou_threshold = threshold;
    self
  }

  pub fn with_max_detections(mut self, max_detections: usize) -> Self {
    self.max_detections = max_detections;
    self
  }

  pub fn with_classes<I: IntoIterator<Item = usize>>(mut self, classes: I) -> Self {
    self.class_filter = Some(classes.into_iter().collect());
    self
  }

  pub fn with_agnostic(mut self, agnostic: bool) -> Self {
    self.agnostic_suppression = agnostic;
    self
  }

  pub fn with_image_size(mut self, height: u32, width: u32) -> Self {
    self.image_size = (height, width);
    self
  }

  pub fn with_frame_stride(mut self, stride: usize) -> Self {
    self.frame_stride = stride;
    self
  }

  pub fn with_device<S: Into<String>>(mut self, device: S) -> Self {
    self.device_selector = device.into();
    self
  }

  pub fn with_max_frames(mut self, max_frames: Option<usize>) -> Self {
    self.max_frames = max_frames;
    self
  }

  pub fn validate(&self) -> Result<(), ConfigError> {
    if !(self.confidence_threshold > 0.0 && self.confidence_threshold < 1.0) {
      return Err(ConfigError::ConfidenceOutOfRange(self.confidence_threshold));
    }
    if !(self.iou_threshold > 0.0 && self.iou_threshold < 1.0) {
      return Err(ConfigError::IouOutOfRange(self.iou_threshold));
    }
    if self.max_detections == 0 {
      return Err(ConfigError::ZeroMaxDetections);
    }
    if self.frame_stride == 0 {
      return Err(ConfigError::ZeroFrameStride);
    }
    let (h, w) = self.image_size;
    if h == 0 || w == 0 {
      return Err(ConfigError::EmptyImageSize(h, w));
    }
    Ok(())
  }
}

/// 流水线级别的配置，跨多次 `detect()` 调用保持不变
#[derive(Debug, Clone)]
pub struct PipelineConfig {
  pub results_root: PathBuf,
  pub run_name: String,
  pub download_dir: PathBuf,
  pub default_fps: f64,
  pub font_path: Option<PathBuf>,
  pub options: DetectOptions,
}

impl Default for PipelineConfig {
  fn default() -> Self {
    Self {
      results_root: PathBuf::from(DEFAULT_RESULTS_ROOT),
      run_name: DEFAULT_RUN_NAME.to_string(),
      download_dir: PathBuf::from(DEFAULT_DOWNLOAD_DIR),
      default_fps: DEFAULT_FPS,
      font_path: None,
      options: DetectOptions::default(),
    }
  }
}

impl PipelineConfig {
  pub fn with_results_root<P: Into<PathBuf>>(mut self, root: P) -> Self {
    self.results_root = root.into();
    self
  }

  pub fn with_run_name<S: Into<String>>(mut self, name: S) -> Self {
    self.run_name = name.into();
    self
  }

  pub fn with_download_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
    self.download_dir = dir.into();
    self
  }

  pub fn with_default_fps(mut self, fps: f64) -> Self {
    self.default_fps = fps;
    self
  }

  pub fn with_font_path<P: Into<PathBuf>>(mut self, path: Option<P>) -> Self {
    self.font_path = path.map(Into::into);
    self
  }

  pub fn with_options(mut self, options: DetectOptions) -> Self {
    self.options = options;
    self
  }

  pub fn validate(&self) -> Result<(), ConfigError> {
    if !(self.default_fps.is_finite() && self.default_fps > 0.0) {
      return Err(ConfigError::InvalidFps(self.default_fps));
    }
    self.options.validate()
  }
}
