// 该文件是 Xunjian （巡检） 项目的一部分。
// src/input/gstreamer_input.rs - GStreamer 视频解码
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

//! # GStreamer 视频解码
//!
//! 用 `appsink` 取出 RGB 帧，支持：
//!
//! - 本地或远程视频文件（`uridecodebin`）
//! - 摄像头（`v4l2src`）
//! - RTSP/RTMP/HTTP 直播流
//! - 屏幕截图（`ximagesrc` / `avfvideosrc` / `d3d11screencapturesrc`）
//!
//! ## 系统依赖
//!
//! **Ubuntu/Debian:**
//! ```bash
//! sudo apt-get install libgstreamer1.0-dev libgstreamer-plugins-base1.0-dev
//! ```
//!
//! **macOS:**
//! ```bash
//! brew install gstreamer
//! ```
//!
//! ## Pipeline Builder
//!
//! ```no_run
//! use xunjian::input::{GStreamerInputPipelineBuilder, VideoDecoder};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut capture = GStreamerInputPipelineBuilder::new()
//!     .uri("file:///data/clip.mp4")
//!     .build()?;
//! while let Some(frame) = capture.next_frame()? {
//!     println!("帧: {}x{}", frame.width(), frame.height());
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## 安全性注意
//!
//! 地址会拼接进管道描述。处理不可信输入时应先校验地址。

use std::path::{Path, PathBuf};

use gstreamer::{self as gst, prelude::*};
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use image::RgbImage;
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use super::{InputError, MediaBackend, ScreenRegion, StreamTarget, VideoDecoder};
use crate::frame::CaptureInfo;

/// 等待新样本的轮询间隔
const PULL_TIMEOUT_MS: u64 = 100;

/// GStreamer 输入错误类型
#[derive(Error, Debug)]
pub enum GStreamerInputError {
  /// GStreamer 库错误
  #[error("GStreamer error: {0}")]
  GStreamerError(#[from] gst::glib::Error),
  /// GStreamer 布尔操作错误
  #[error("GStreamer boolean error: {0}")]
  GStreamerBoolError(#[from] gst::glib::BoolError),
  /// 无法获取 appsink 元素
  #[error("Failed to get appsink element")]
  AppSinkNotFound,
  /// 无法转换元素为 appsink
  #[error("Failed to convert element to appsink")]
  AppSinkConversionFailed,
  /// 无法从 caps 获取视频信息
  #[error("Failed to get video info from caps")]
  VideoInfoError,
  /// 不支持的视频格式
  #[error("Unsupported video format")]
  UnsupportedFormat,
  /// 管道错误
  #[error("Pipeline error: {0}")]
  PipelineError(String),
  /// 缓冲区大小不匹配
  #[error("Buffer size mismatch: expected {expected} bytes, got {actual} bytes")]
  BufferSizeMismatch { expected: usize, actual: usize },
  /// 状态改变错误
  #[error("State change error: {0}")]
  StateChangeError(#[from] gst::StateChangeError),
  /// 本地路径无法转换为 file URI
  #[error("Invalid file path: {0}")]
  InvalidPath(PathBuf),
}

pub enum GStreamerInputBuilderItem {
  UriSource(String),
  CameraSource { device: PathBuf },
  ScreenSource(ScreenRegion),
  TargetFormat { format: String },
}

impl GStreamerInputBuilderItem {
  fn to_pipeline(&self) -> String {
    match self {
      GStreamerInputBuilderItem::UriSource(uri) => format!("uridecodebin uri=\"{}\"", uri),
      GStreamerInputBuilderItem::CameraSource { device } => {
        if cfg!(target_os = "linux") {
          format!("v4l2src device={}", device.display())
        } else {
          "autovideosrc".to_string()
        }
      }
      GStreamerInputBuilderItem::ScreenSource(region) => screen_pipeline(region),
      GStreamerInputBuilderItem::TargetFormat { format } => {
        format!("videoconvert ! video/x-raw,format={}", format)
      }
    }
  }
}

fn screen_pipeline(region: &ScreenRegion) -> String {
  if cfg!(target_os = "macos") {
    format!(
      "avfvideosrc capture-screen=true device-index={}",
      region.screen
    )
  } else if cfg!(target_os = "windows") {
    format!("d3d11screencapturesrc monitor-index={} ! d3d11download", region.screen)
  } else {
    let mut desc = format!("ximagesrc screen-num={} use-damage=false", region.screen);
    if let (Some(w), Some(h)) = (region.width, region.height) {
      let left = region.left.unwrap_or(0).max(0) as u32;
      let top = region.top.unwrap_or(0).max(0) as u32;
      desc.push_str(&format!(
        " startx={} starty={} endx={} endy={}",
        left,
        top,
        left + w - 1,
        top + h - 1
      ));
    }
    desc
  }
}

/// GStreamer 输入管道构建器
#[derive(Default)]
pub struct GStreamerInputPipelineBuilder {
  items: Vec<GStreamerInputBuilderItem>,
  live: bool,
}

impl GStreamerInputPipelineBuilder {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn uri<S: Into<String>>(mut self, uri: S) -> Self {
    self.items.push(GStreamerInputBuilderItem::UriSource(uri.into()));
    self
  }

  pub fn camera<P: Into<PathBuf>>(mut self, device: P) -> Self {
    self.items.push(GStreamerInputBuilderItem::CameraSource {
      device: device.into(),
    });
    self.live = true;
    self
  }

  pub fn screen(mut self, region: ScreenRegion) -> Self {
    self.items.push(GStreamerInputBuilderItem::ScreenSource(region));
    self.live = true;
    self
  }

  /// 直播来源只保留最新的帧
  pub fn live(mut self, live: bool) -> Self {
    self.live = live;
    self
  }

  pub fn target_format<S: Into<String>>(mut self, format: S) -> Self {
    self.items.push(GStreamerInputBuilderItem::TargetFormat {
      format: format.into(),
    });
    self
  }

  fn description(&self) -> String {
    let mut parts: Vec<String> = self
      .items
      .iter()
      .map(GStreamerInputBuilderItem::to_pipeline)
      .collect();
    if !self
      .items
      .iter()
      .any(|item| matches!(item, GStreamerInputBuilderItem::TargetFormat { .. }))
    {
      parts.push(GStreamerInputBuilderItem::TargetFormat {
        format: "RGB".to_string(),
      }
      .to_pipeline());
    }
    let sink = if self.live {
      "appsink name=sink sync=false max-buffers=1 drop=true"
    } else {
      "appsink name=sink sync=false max-buffers=4"
    };
    parts.push(sink.to_string());
    parts.join(" ! ")
  }

  pub fn build(self) -> Result<GStreamerCapture, GStreamerInputError> {
    gst::init()?;

    let description = self.description();
    info!("GStreamer pipeline description: {}", description);

    let pipeline = gst::parse::launch(&description)?
      .downcast::<gst::Pipeline>()
      .map_err(|_| GStreamerInputError::PipelineError("Failed to create pipeline".to_string()))?;

    let appsink = pipeline
      .by_name("sink")
      .ok_or(GStreamerInputError::AppSinkNotFound)?
      .downcast::<gst_app::AppSink>()
      .map_err(|_| GStreamerInputError::AppSinkConversionFailed)?;

    pipeline.set_state(gst::State::Playing)?;

    Ok(GStreamerCapture {
      pipeline,
      appsink,
      capture: CaptureInfo {
        fps: None,
        width: 0,
        height: 0,
        frames: None,
      },
      duration_checked: false,
    })
  }
}

/// 基于 appsink 的解码器
pub struct GStreamerCapture {
  pipeline: gst::Pipeline,
  appsink: gst_app::AppSink,
  capture: CaptureInfo,
  duration_checked: bool,
}

impl Drop for GStreamerCapture {
  fn drop(&mut self) {
    if let Err(e) = self.pipeline.set_state(gst::State::Null) {
      warn!("Failed to stop GStreamer pipeline: {}", e);
    }
  }
}

impl GStreamerCapture {
  /// 总线上的错误；EOS 返回 `Ok(true)`
  fn poll_bus(&self) -> Result<bool, GStreamerInputError> {
    let Some(bus) = self.pipeline.bus() else {
      return Ok(false);
    };
    while let Some(message) = bus.pop_filtered(&[gst::MessageType::Error, gst::MessageType::Eos]) {
      match message.view() {
        gst::MessageView::Error(err) => {
          return Err(GStreamerInputError::PipelineError(format!(
            "{} ({:?})",
            err.error(),
            err.debug()
          )));
        }
        gst::MessageView::Eos(_) => return Ok(true),
        _ => {}
      }
    }
    Ok(false)
  }

  /// 首帧之后查询时长，估算总帧数
  fn estimate_frames(&mut self) {
    if self.duration_checked {
      return;
    }
    self.duration_checked = true;
    let Some(fps) = self.capture.fps else {
      return;
    };
    if let Some(duration) = self.pipeline.query_duration::<gst::ClockTime>() {
      let frames = (duration.nseconds() as f64 / 1e9 * fps).round() as u64;
      debug!("视频时长 {} 约 {} 帧", duration, frames);
      self.capture.frames = Some(frames);
    }
  }

  fn pull(&mut self) -> Result<Option<RgbImage>, GStreamerInputError> {
    loop {
      if let Some(sample) = self
        .appsink
        .try_pull_sample(gst::ClockTime::from_mseconds(PULL_TIMEOUT_MS))
      {
        let (image, info) = convert_sample(&sample)?;
        self.capture.width = info.width();
        self.capture.height = info.height();
        let fps = info.fps();
        if fps.numer() > 0 && fps.denom() > 0 {
          self.capture.fps = Some(fps.numer() as f64 / fps.denom() as f64);
        }
        self.estimate_frames();
        return Ok(Some(image));
      }
      if self.appsink.is_eos() || self.poll_bus()? {
        return Ok(None);
      }
    }
  }
}

impl VideoDecoder for GStreamerCapture {
  fn capture(&self) -> CaptureInfo {
    self.capture
  }

  fn next_frame(&mut self) -> Result<Option<RgbImage>, InputError> {
    Ok(self.pull()?)
  }
}

/// 按行拷贝，去掉 GStreamer 的行对齐填充
fn convert_sample(
  sample: &gst::Sample,
) -> Result<(RgbImage, gst_video::VideoInfo), GStreamerInputError> {
  let buffer = sample
    .buffer()
    .ok_or_else(|| GStreamerInputError::PipelineError("No buffer in sample".to_string()))?;
  let caps = sample
    .caps()
    .ok_or_else(|| GStreamerInputError::PipelineError("No caps in sample".to_string()))?;

  let video_info =
    gst_video::VideoInfo::from_caps(caps).map_err(|_| GStreamerInputError::VideoInfoError)?;

  let width = video_info.width() as usize;
  let height = video_info.height() as usize;
  let stride = video_info.stride()[0] as usize;
  let row = width * 3;

  let map = buffer.map_readable().map_err(|e| {
    GStreamerInputError::PipelineError(format!("Failed to map buffer for reading: {}", e))
  })?;
  let data = map.as_slice();

  let expected_size = stride * (height.saturating_sub(1)) + row;
  if data.len() < expected_size {
    return Err(GStreamerInputError::BufferSizeMismatch {
      expected: expected_size,
      actual: data.len(),
    });
  }

  let bgr = match video_info.format() {
    gst_video::VideoFormat::Rgb => false,
    gst_video::VideoFormat::Bgr => true,
    _ => return Err(GStreamerInputError::UnsupportedFormat),
  };

  let mut pixels = Vec::with_capacity(row * height);
  for y in 0..height {
    let line = &data[y * stride..y * stride + row];
    if bgr {
      for px in line.chunks_exact(3) {
        pixels.extend_from_slice(&[px[2], px[1], px[0]]);
      }
    } else {
      pixels.extend_from_slice(line);
    }
  }

  let image = RgbImage::from_raw(width as u32, height as u32, pixels).ok_or(
    GStreamerInputError::BufferSizeMismatch {
      expected: row * height,
      actual: data.len(),
    },
  )?;
  Ok((image, video_info))
}

fn file_uri(location: &str) -> Result<String, GStreamerInputError> {
  if location.contains("://") {
    return Ok(location.to_string());
  }
  let path = Path::new(location);
  let absolute = if path.is_absolute() {
    path.to_path_buf()
  } else {
    std::env::current_dir()
      .map(|cwd| cwd.join(path))
      .map_err(|_| GStreamerInputError::InvalidPath(path.to_path_buf()))?
  };
  Url::from_file_path(&absolute)
    .map(String::from)
    .map_err(|_| GStreamerInputError::InvalidPath(absolute))
}

/// 默认的 GStreamer 后端
#[derive(Debug, Default, Clone, Copy)]
pub struct GStreamerBackend;

impl MediaBackend for GStreamerBackend {
  fn open_video(&self, location: &str) -> Result<Box<dyn VideoDecoder>, InputError> {
    let capture = GStreamerInputPipelineBuilder::new()
      .uri(file_uri(location)?)
      .live(false)
      .build()?;
    Ok(Box::new(capture))
  }

  fn open_stream(&self, target: &StreamTarget) -> Result<Box<dyn VideoDecoder>, InputError> {
    let builder = match target {
      StreamTarget::Network(address) => GStreamerInputPipelineBuilder::new()
        .uri(address.as_str())
        .live(true),
      StreamTarget::Camera(_) | StreamTarget::Device(_) => {
        let device = target
          .device_path()
          .ok_or_else(|| InputError::InvalidStream(target.to_string()))?;
        GStreamerInputPipelineBuilder::new().camera(device)
      }
    };
    Ok(Box::new(builder.build()?))
  }

  fn open_screen(&self, region: &ScreenRegion) -> Result<Box<dyn VideoDecoder>, InputError> {
    if !region.is_full_screen() && !cfg!(target_os = "linux") {
      warn!("当前平台不支持截取屏幕区域, 将截取整个屏幕: {}", region);
    }
    let capture = GStreamerInputPipelineBuilder::new().screen(*region).build()?;
    Ok(Box::new(capture))
  }
}
