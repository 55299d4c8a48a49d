// 该文件是 Xunjian （巡检） 项目的一部分。
// src/input.rs - 帧来源
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

//! # 帧来源
//!
//! 根据来源类型选择读取器，把图像、视频、直播流或屏幕截图统一为
//! [`FrameBatch`] 序列。视频解码通过 [`MediaBackend`] 注入，
//! 默认实现在启用 `gstreamer_media` 特性时使用 GStreamer。

use std::sync::Arc;

use image::RgbImage;
use thiserror::Error;

use crate::{
  frame::{CaptureInfo, FrameBatch, FrameError, Letterbox},
  source::{Modality, SourceDescriptor},
};

mod file_sequence;
mod read_image_file;
mod screen_capture;
mod stream_set;

pub use self::file_sequence::{FileSequence, MediaEntry, list_media, wildcard_match};
pub use self::read_image_file::{ImageFileInputError, decode_image};
pub use self::screen_capture::{ScreenCapture, ScreenRegion};
pub use self::stream_set::{StreamSet, StreamTarget, read_stream_list, unique_names};

#[cfg(feature = "gstreamer_media")]
mod gstreamer_input;
#[cfg(feature = "gstreamer_media")]
pub use self::gstreamer_input::{
  GStreamerBackend, GStreamerCapture, GStreamerInputError, GStreamerInputPipelineBuilder,
};

#[derive(Error, Debug)]
pub enum InputError {
  #[error("图像文件读取错误: {0}")]
  ImageFileInputError(#[from] ImageFileInputError),
  #[cfg(feature = "gstreamer_media")]
  #[error("GStreamer input error: {0}")]
  GStreamerInputError(#[from] GStreamerInputError),
  #[error("预处理失败: {0}")]
  FrameError(#[from] FrameError),
  #[error("没有找到可读取的图像或视频: {0}")]
  NoMedia(String),
  #[error("无法读取目录 {path}: {source}")]
  ListingError {
    path: String,
    source: std::io::Error,
  },
  #[error("流列表为空: {0}")]
  EmptyStreamList(String),
  #[error("无效的流地址: '{0}'")]
  InvalidStream(String),
  #[error("无效的屏幕参数: '{0}'")]
  InvalidScreen(String),
  #[error("URI scheme mismatch: {0}")]
  SchemeMismatch(String),
  #[error("未启用视频解码后端, 无法读取 {0}")]
  BackendUnavailable(String),
  #[error("解码失败 {location}: {message}")]
  DecodeError { location: String, message: String },
}

/// 逐帧解码的视频或直播来源
pub trait VideoDecoder: Send {
  /// 最近一次解码得到的捕获信息
  fn capture(&self) -> CaptureInfo;

  /// `Ok(None)` 表示来源正常结束
  fn next_frame(&mut self) -> Result<Option<RgbImage>, InputError>;
}

/// 打开视频、直播流和屏幕的后端
pub trait MediaBackend: Send + Sync {
  fn open_video(&self, location: &str) -> Result<Box<dyn VideoDecoder>, InputError>;

  fn open_stream(&self, target: &StreamTarget) -> Result<Box<dyn VideoDecoder>, InputError>;

  fn open_screen(&self, region: &ScreenRegion) -> Result<Box<dyn VideoDecoder>, InputError>;
}

/// 未启用任何解码后端时使用，所有打开操作都失败
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableBackend;

impl MediaBackend for UnavailableBackend {
  fn open_video(&self, location: &str) -> Result<Box<dyn VideoDecoder>, InputError> {
    Err(InputError::BackendUnavailable(location.to_string()))
  }

  fn open_stream(&self, target: &StreamTarget) -> Result<Box<dyn VideoDecoder>, InputError> {
    Err(InputError::BackendUnavailable(target.to_string()))
  }

  fn open_screen(&self, region: &ScreenRegion) -> Result<Box<dyn VideoDecoder>, InputError> {
    Err(InputError::BackendUnavailable(region.to_string()))
  }
}

pub fn default_media_backend() -> Arc<dyn MediaBackend> {
  #[cfg(feature = "gstreamer_media")]
  {
    Arc::new(GStreamerBackend)
  }
  #[cfg(not(feature = "gstreamer_media"))]
  {
    Arc::new(UnavailableBackend)
  }
}

/// 读取器共享的预处理参数
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameSourceOptions {
  pub letterbox: Letterbox,
  /// 每输出一帧后跳过 `frame_stride - 1` 帧
  pub frame_stride: usize,
}

pub trait FrameSource: Iterator<Item = Result<FrameBatch, InputError>> {
  /// 每个批次包含的记录数
  fn stream_count(&self) -> usize;
}

pub enum InputWrapper {
  Files(FileSequence),
  Streams(StreamSet),
  Screen(ScreenCapture),
}

impl Iterator for InputWrapper {
  type Item = Result<FrameBatch, InputError>;

  fn next(&mut self) -> Option<Self::Item> {
    match self {
      InputWrapper::Files(files) => files.next(),
      InputWrapper::Streams(streams) => streams.next(),
      InputWrapper::Screen(screen) => screen.next(),
    }
  }
}

impl FrameSource for InputWrapper {
  fn stream_count(&self) -> usize {
    match self {
      InputWrapper::Files(files) => files.stream_count(),
      InputWrapper::Streams(streams) => streams.stream_count(),
      InputWrapper::Screen(screen) => screen.stream_count(),
    }
  }
}

/// 按来源类型创建读取器
///
/// `location` 是解析后的位置：远程文件已下载时为本地路径，否则为原始地址。
pub fn create_frame_source(
  descriptor: &SourceDescriptor,
  location: &str,
  options: FrameSourceOptions,
  backend: Arc<dyn MediaBackend>,
) -> Result<InputWrapper, InputError> {
  let modality = descriptor
    .modality()
    .ok_or_else(|| InputError::NoMedia(descriptor.raw().to_string()))?;

  match modality {
    Modality::Image | Modality::Video | Modality::UrlFile | Modality::Batch => {
      let entries = list_media(location)?;
      Ok(InputWrapper::Files(FileSequence::new(
        entries, options, backend,
      )))
    }
    Modality::Stream => Ok(InputWrapper::Streams(StreamSet::open(
      location, options, backend,
    )?)),
    Modality::Screenshot => {
      let region: ScreenRegion = location.parse()?;
      Ok(InputWrapper::Screen(ScreenCapture::open(
        region, options, backend,
      )?))
    }
  }
}


#[cfg(test)]
mod tests {
  use super::{testing::*, *};
  use crate::{frame::SourceMode, source::classify};

  #[test]
  fn unavailable_backend_reports_location() {
    let err = UnavailableBackend.open_video("clip.mp4").err().unwrap();
    assert!(matches!(err, InputError::BackendUnavailable(ref s) if s == "clip.mp4"));
  }

  #[test]
  fn invalid_descriptor_is_rejected() {
    let descriptor = classify("notes.txt");
    let result = create_frame_source(
      &descriptor,
      "notes.txt",
      options(1),
      Arc::new(UnavailableBackend),
    );
    assert!(matches!(result, Err(InputError::NoMedia(_))));
  }

  #[test]
  fn webcam_source_yields_stream_records() {
    let descriptor = classify("0");
    let backend = Arc::new(SyntheticBackend::new(2, (48, 32)));
    let mut source = create_frame_source(&descriptor, "0", options(1), backend).unwrap();
    assert_eq!(source.stream_count(), 1);
    let batch = source.next().unwrap().unwrap();
    assert_eq!(batch.records[0].mode, SourceMode::Stream);
    assert_eq!(batch.records[0].name, "0");
    assert!(source.next().unwrap().is_ok());
    assert!(source.next().is_none());
  }

  #[test]
  fn screenshot_source_uses_screen_backend() {
    let descriptor = classify("screen 1");
    let backend = Arc::new(SyntheticBackend::new(1, (40, 30)));
    let mut source =
      create_frame_source(&descriptor, "screen 1", options(1), backend.clone()).unwrap();
    let batch = source.next().unwrap().unwrap();
    assert_eq!(batch.records[0].name, "screen1");
    assert_eq!(backend.opened.lock().unwrap().as_slice(), ["screen 1"]);
  }
}
