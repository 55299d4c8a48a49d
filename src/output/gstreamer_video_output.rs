// 该文件是 Xunjian （巡检） 项目的一部分。
// src/output/gstreamer_video_output.rs - GStreamer 视频文件编码
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

//! # GStreamer 视频文件编码
//!
//! 把标注后的 RGB 帧编码为 MP4 文件。按可用性依次选择
//! `x264enc`、`openh264enc`、`avenc_mpeg4`。
//!
//! ## 系统依赖
//!
//! **Ubuntu/Debian:**
//! ```bash
//! sudo apt-get install libgstreamer1.0-dev libgstreamer-plugins-base1.0-dev \
//!   gstreamer1.0-plugins-good gstreamer1.0-plugins-ugly
//! ```

use std::path::{Path, PathBuf};

use gstreamer::{self as gst, prelude::*};
use gstreamer_app as gst_app;
use image::RgbImage;
use thiserror::Error;
use tracing::{info, warn};

use crate::output::{EncoderFactory, OutputError, VideoEncoder, VideoSettings};

/// 等待 EOS 写完文件尾的最长时间
const EOS_TIMEOUT_SECONDS: u64 = 30;

/// 候选编码器：(元素名, 管道片段)
const ENCODERS: [(&str, &str); 3] = [
  ("x264enc", "x264enc speed-preset=fast tune=zerolatency ! h264parse"),
  ("openh264enc", "openh264enc ! h264parse"),
  ("avenc_mpeg4", "avenc_mpeg4 ! mpeg4videoparse"),
];

/// GStreamer 视频输出错误类型
#[derive(Error, Debug)]
pub enum GStreamerVideoOutputError {
  /// GStreamer 库错误
  #[error("GStreamer error: {0}")]
  GStreamerError(#[from] gst::glib::Error),
  /// GStreamer 布尔操作错误
  #[error("GStreamer boolean error: {0}")]
  GStreamerBoolError(#[from] gst::glib::BoolError),
  /// 无法获取 appsrc 元素
  #[error("Failed to get appsrc element")]
  AppSrcNotFound,
  /// 无法转换元素为 appsrc
  #[error("Failed to convert element to appsrc")]
  AppSrcConversionFailed,
  /// 没有可用的视频编码器插件
  #[error("No video encoder available (tried x264enc, openh264enc, avenc_mpeg4)")]
  EncoderUnavailable,
  /// 管道错误
  #[error("Pipeline error: {0}")]
  PipelineError(String),
  /// 状态改变错误
  #[error("State change error: {0}")]
  StateChangeError(#[from] gst::StateChangeError),
}

fn encoder_fragment() -> Result<&'static str, GStreamerVideoOutputError> {
  ENCODERS
    .iter()
    .find(|(name, _)| gst::ElementFactory::find(name).is_some())
    .map(|(_, fragment)| *fragment)
    .ok_or(GStreamerVideoOutputError::EncoderUnavailable)
}

/// 打开 [`GStreamerVideoEncoder`] 的工厂
#[derive(Debug, Default, Clone, Copy)]
pub struct GStreamerEncoderFactory;

impl EncoderFactory for GStreamerEncoderFactory {
  fn open(&self, path: &Path, settings: VideoSettings) -> Result<Box<dyn VideoEncoder>, OutputError> {
    let encoder = GStreamerVideoEncoder::open(path, settings)?;
    Ok(Box::new(encoder))
  }
}

/// appsrc → 编码 → mp4mux → filesink
pub struct GStreamerVideoEncoder {
  pipeline: gst::Pipeline,
  appsrc: gst_app::AppSrc,
  path: PathBuf,
  settings: VideoSettings,
  frame_count: u64,
  finished: bool,
}

impl GStreamerVideoEncoder {
  pub fn open(path: &Path, settings: VideoSettings) -> Result<Self, GStreamerVideoOutputError> {
    gst::init()?;

    let fragment = encoder_fragment()?;
    // I420 需要偶数尺寸
    let even_width = (settings.width & !1).max(2);
    let even_height = (settings.height & !1).max(2);
    let pipeline_desc = format!(
      "appsrc name=src ! videoconvert ! videoscale ! \
       video/x-raw,format=I420,width={},height={} ! {} ! mp4mux ! filesink name=sink",
      even_width, even_height, fragment
    );
    info!("Creating video output pipeline: {}", pipeline_desc);

    let pipeline = gst::parse::launch(&pipeline_desc)?
      .downcast::<gst::Pipeline>()
      .map_err(|_| {
        GStreamerVideoOutputError::PipelineError("Failed to create pipeline".to_string())
      })?;

    let filesink = pipeline.by_name("sink").ok_or_else(|| {
      GStreamerVideoOutputError::PipelineError("Failed to get filesink".to_string())
    })?;
    filesink.set_property("location", path.to_string_lossy().as_ref());

    let appsrc = pipeline
      .by_name("src")
      .ok_or(GStreamerVideoOutputError::AppSrcNotFound)?
      .downcast::<gst_app::AppSrc>()
      .map_err(|_| GStreamerVideoOutputError::AppSrcConversionFailed)?;

    let caps = gst::Caps::builder("video/x-raw")
      .field("format", "RGB")
      .field("width", settings.width as i32)
      .field("height", settings.height as i32)
      .field(
        "framerate",
        gst::Fraction::new((settings.fps * 1000.0).round() as i32, 1000),
      )
      .build();
    appsrc.set_caps(Some(&caps));
    appsrc.set_format(gst::Format::Time);

    pipeline.set_state(gst::State::Playing)?;

    info!(
      "Video output initialized: {}x{} @ {:.2} fps -> {}",
      settings.width,
      settings.height,
      settings.fps,
      path.display()
    );

    Ok(Self {
      pipeline,
      appsrc,
      path: path.to_path_buf(),
      settings,
      frame_count: 0,
      finished: false,
    })
  }

  fn push_frame(&mut self, image: &RgbImage) -> Result<(), GStreamerVideoOutputError> {
    let width = self.settings.width as usize;
    let height = self.settings.height as usize;
    let row = width * 3;
    // GStreamer 的 RGB 行按 4 字节对齐
    let stride = (row + 3) & !3;
    let data = if stride == row {
      image.as_raw().clone()
    } else {
      let mut padded = vec![0u8; stride * height];
      for (dst, src) in padded.chunks_exact_mut(stride).zip(image.as_raw().chunks_exact(row)) {
        dst[..row].copy_from_slice(src);
      }
      padded
    };

    let mut buffer = gst::Buffer::from_mut_slice(data);
    let frame_ns = 1_000_000_000.0 / self.settings.fps;
    {
      let buffer_ref = buffer.make_mut();
      buffer_ref.set_pts(gst::ClockTime::from_nseconds(
        (self.frame_count as f64 * frame_ns) as u64,
      ));
      buffer_ref.set_duration(gst::ClockTime::from_nseconds(frame_ns as u64));
    }

    self.appsrc.push_buffer(buffer).map_err(|e| {
      GStreamerVideoOutputError::PipelineError(format!("Failed to push buffer: {:?}", e))
    })?;
    self.frame_count += 1;
    Ok(())
  }

  fn close(&mut self) -> Result<(), GStreamerVideoOutputError> {
    if self.finished {
      return Ok(());
    }
    self.finished = true;

    self.appsrc.end_of_stream().map_err(|e| {
      GStreamerVideoOutputError::PipelineError(format!("Failed to send EOS: {:?}", e))
    })?;

    let mut result = Ok(());
    if let Some(bus) = self.pipeline.bus() {
      let message = bus.timed_pop_filtered(
        gst::ClockTime::from_seconds(EOS_TIMEOUT_SECONDS),
        &[gst::MessageType::Eos, gst::MessageType::Error],
      );
      match message.as_ref().map(|m| m.view()) {
        Some(gst::MessageView::Error(err)) => {
          result = Err(GStreamerVideoOutputError::PipelineError(err.error().to_string()));
        }
        Some(_) => {}
        None => warn!("等待视频文件收尾超时: {}", self.path.display()),
      }
    }

    self.pipeline.set_state(gst::State::Null)?;
    info!(
      "Video output closed. Total frames written: {}",
      self.frame_count
    );
    result
  }
}

impl VideoEncoder for GStreamerVideoEncoder {
  fn write_frame(&mut self, frame: &RgbImage) -> Result<(), OutputError> {
    Ok(self.push_frame(frame)?)
  }

  fn finish(mut self: Box<Self>) -> Result<u64, OutputError> {
    self.close()?;
    Ok(self.frame_count)
  }
}

impl Drop for GStreamerVideoEncoder {
  fn drop(&mut self) {
    if let Err(e) = self.close() {
      warn!("Failed to stop GStreamer video output pipeline: {}", e);
    }
  }
}
