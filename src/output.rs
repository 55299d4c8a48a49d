// 该文件是 Xunjian （巡检） 项目的一部分。
// src/output.rs - 结果输出
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

//! # 结果输出
//!
//! [`OutputSink`] 按流编号维护视频写入状态：
//!
//! - 图像模式：每帧直接写成 `<run_dir>/<name>`；
//! - 视频 / 流模式：首帧打开编码器，同一路径继续追加，
//!   路径变化时先关闭旧编码器再打开新的；
//! - [`OutputSink::finish`] 关闭全部编码器。

use std::{
  collections::{BTreeMap, HashMap, btree_map::Entry},
  path::{Path, PathBuf},
  sync::Arc,
};

use image::{RgbImage, imageops::FilterType};
use thiserror::Error;
use tracing::{info, warn};

use crate::{
  frame::{FrameRecord, SourceMode},
  source::MediaKind,
};

pub mod draw;

mod save_image_file;
pub use self::save_image_file::{SaveImageFileError, save_image};

#[cfg(feature = "gstreamer_media")]
mod gstreamer_video_output;
#[cfg(feature = "gstreamer_media")]
pub use self::gstreamer_video_output::{
  GStreamerEncoderFactory, GStreamerVideoEncoder, GStreamerVideoOutputError,
};

const VIDEO_EXTENSION: &str = "mp4";

/// 视频输出文件名：去掉已有的视频扩展名后加 `.mp4`
fn video_file_name(name: &str) -> String {
  let path = Path::new(name);
  let has_video_extension = path
    .extension()
    .and_then(|ext| ext.to_str())
    .and_then(MediaKind::from_extension)
    == Some(MediaKind::Video);
  match path.file_stem().and_then(|stem| stem.to_str()) {
    Some(stem) if has_video_extension => format!("{}.{}", stem, VIDEO_EXTENSION),
    _ => format!("{}.{}", name, VIDEO_EXTENSION),
  }
}

#[derive(Error, Debug)]
pub enum OutputError {
  #[error("保存图像文件错误: {0}")]
  SaveImageFileError(#[from] SaveImageFileError),
  #[cfg(feature = "gstreamer_media")]
  #[error("GStreamer 视频输出错误: {0}")]
  GStreamerVideoOutputError(#[from] GStreamerVideoOutputError),
  #[error("视频编码错误 {path}: {message}")]
  EncoderError { path: PathBuf, message: String },
  #[error("未启用视频编码后端, 无法写入 {0}")]
  EncoderUnavailable(PathBuf),
}

/// 编码器参数
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VideoSettings {
  pub fps: f64,
  pub width: u32,
  pub height: u32,
}

impl VideoSettings {
  /// 优先使用捕获信息，缺失时退回默认帧率与帧自身尺寸
  pub fn for_record(record: &FrameRecord, frame: &RgbImage, default_fps: f64) -> Self {
    let capture = record.capture.as_ref();
    let fps = capture
      .and_then(|c| c.fps)
      .filter(|fps| fps.is_finite() && *fps > 0.0)
      .unwrap_or(default_fps);
    let (width, height) = match capture {
      Some(c) if c.width > 0 && c.height > 0 => (c.width, c.height),
      _ => (frame.width(), frame.height()),
    };
    Self { fps, width, height }
  }
}

pub trait VideoEncoder: Send {
  fn write_frame(&mut self, frame: &RgbImage) -> Result<(), OutputError>;
  /// 写完文件尾，返回写入的帧数
  fn finish(self: Box<Self>) -> Result<u64, OutputError>;
}

pub trait EncoderFactory: Send + Sync {
  fn open(&self, path: &Path, settings: VideoSettings) -> Result<Box<dyn VideoEncoder>, OutputError>;
}

/// 未编译任何视频后端时使用
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableEncoderFactory;

impl EncoderFactory for UnavailableEncoderFactory {
  fn open(&self, path: &Path, _settings: VideoSettings) -> Result<Box<dyn VideoEncoder>, OutputError> {
    Err(OutputError::EncoderUnavailable(path.to_path_buf()))
  }
}

pub fn default_encoder_factory() -> Arc<dyn EncoderFactory> {
  #[cfg(feature = "gstreamer_media")]
  {
    Arc::new(GStreamerEncoderFactory)
  }
  #[cfg(not(feature = "gstreamer_media"))]
  {
    Arc::new(UnavailableEncoderFactory)
  }
}

struct VideoWriter {
  path: PathBuf,
  settings: VideoSettings,
  encoder: Box<dyn VideoEncoder>,
}

impl VideoWriter {
  fn close(self) -> Result<(), OutputError> {
    let frames = self.encoder.finish()?;
    info!("视频写入完成: {} ({} 帧)", self.path.display(), frames);
    Ok(())
  }
}

/// 把渲染后的帧持久化到运行目录
pub struct OutputSink {
  run_dir: PathBuf,
  default_fps: f64,
  factory: Arc<dyn EncoderFactory>,
  writers: BTreeMap<usize, VideoWriter>,
  /// 记录名到视频文件的分配，同一运行内互不重复
  video_paths: HashMap<String, PathBuf>,
  written: Vec<PathBuf>,
}

impl OutputSink {
  pub fn new<P: Into<PathBuf>>(run_dir: P, default_fps: f64, factory: Arc<dyn EncoderFactory>) -> Self {
    Self {
      run_dir: run_dir.into(),
      default_fps,
      factory,
      writers: BTreeMap::new(),
      video_paths: HashMap::new(),
      written: Vec::new(),
    }
  }

  pub fn run_dir(&self) -> &Path {
    &self.run_dir
  }

  /// 当前打开的编码器数量
  pub fn open_writers(&self) -> usize {
    self.writers.len()
  }

  pub fn writer_path(&self, stream_index: usize) -> Option<&Path> {
    self.writers.get(&stream_index).map(|w| w.path.as_path())
  }

  /// 该记录对应的输出路径
  pub fn target_path(&self, record: &FrameRecord) -> PathBuf {
    match record.mode {
      SourceMode::Image => self.run_dir.join(&record.name),
      SourceMode::Video | SourceMode::Stream => match self.video_paths.get(&record.name) {
        Some(path) => path.clone(),
        None => self.free_video_path(&record.name),
      },
    }
  }

  /// 为新的记录名挑一个未被占用的视频文件，冲突时追加 `_<n>`
  fn free_video_path(&self, name: &str) -> PathBuf {
    let file_name = video_file_name(name);
    let taken = |path: &Path| self.video_paths.values().any(|p| p == path);
    let candidate = self.run_dir.join(&file_name);
    if !taken(&candidate) {
      return candidate;
    }
    let stem = Path::new(&file_name)
      .file_stem()
      .map(|stem| stem.to_string_lossy().into_owned())
      .unwrap_or_default();
    let mut n = 1;
    loop {
      let candidate = self
        .run_dir
        .join(format!("{}_{}.{}", stem, n, VIDEO_EXTENSION));
      if !taken(&candidate) {
        return candidate;
      }
      n += 1;
    }
  }

  fn remember(written: &mut Vec<PathBuf>, path: &Path) {
    if !written.iter().any(|p| p == path) {
      written.push(path.to_path_buf());
    }
  }

  /// 写出一帧，返回目标文件路径
  pub fn persist(&mut self, record: &FrameRecord, rendered: &RgbImage) -> Result<PathBuf, OutputError> {
    let path = self.target_path(record);
    if record.mode == SourceMode::Image {
      save_image(&path, rendered)?;
      Self::remember(&mut self.written, &path);
      return Ok(path);
    }

    let index = record.stream_index;
    if self.writers.get(&index).is_some_and(|w| w.path != path)
      && let Some(previous) = self.writers.remove(&index)
    {
      previous.close()?;
    }

    let writer = match self.writers.entry(index) {
      Entry::Occupied(entry) => entry.into_mut(),
      Entry::Vacant(entry) => {
        let settings = VideoSettings::for_record(record, rendered, self.default_fps);
        let encoder = self.factory.open(&path, settings)?;
        self
          .video_paths
          .entry(record.name.clone())
          .or_insert_with(|| path.clone());
        Self::remember(&mut self.written, &path);
        entry.insert(VideoWriter {
          path: path.clone(),
          settings,
          encoder,
        })
      }
    };

    let (width, height) = (writer.settings.width, writer.settings.height);
    if (rendered.width(), rendered.height()) == (width, height) {
      writer.encoder.write_frame(rendered)?;
    } else {
      let resized = image::imageops::resize(rendered, width, height, FilterType::Triangle);
      writer.encoder.write_frame(&resized)?;
    }
    Ok(path)
  }

  /// 关闭所有编码器，返回写出的文件
  pub fn finish(mut self) -> Result<Vec<PathBuf>, OutputError> {
    let writers = std::mem::take(&mut self.writers);
    let mut first_error = None;
    for (_, writer) in writers {
      if let Err(e) = writer.close()
        && first_error.is_none()
      {
        first_error = Some(e);
      }
    }
    match first_error {
      Some(e) => Err(e),
      None => Ok(std::mem::take(&mut self.written)),
    }
  }
}

impl Drop for OutputSink {
  fn drop(&mut self) {
    for (_, writer) in std::mem::take(&mut self.writers) {
      let path = writer.path.clone();
      if let Err(e) = writer.close() {
        warn!("关闭视频写入器失败 {}: {}", path.display(), e);
      }
    }
  }
}
