// 该文件是 Xunjian （巡检） 项目的一部分。
// src/frame.rs - 帧记录与预处理
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

use image::{RgbImage, imageops::FilterType};
use thiserror::Error;

const RGB_CHANNELS: usize = 3;
/// letterbox 填充灰度
pub const LETTERBOX_FILL: u8 = 114;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
  #[error("批次为空")]
  EmptyBatch,
  #[error("批次内帧尺寸不一致: 期望 {expected:?}, 实际 {actual:?}")]
  ShapeMismatch {
    expected: (usize, usize),
    actual: (usize, usize),
  },
}

/// CHW 排列的 u8 RGB 帧，尺寸在运行时确定
#[derive(Debug, Clone, PartialEq)]
pub struct RgbNchwFrame {
  height: usize,
  width: usize,
  data: Box<[u8]>,
}

impl RgbNchwFrame {
  pub fn zeros(height: usize, width: usize) -> Self {
    Self {
      height,
      width,
      data: vec![0u8; RGB_CHANNELS * height * width].into_boxed_slice(),
    }
  }

  pub fn from_rgb_image(image: &RgbImage) -> Self {
    let (width, height) = (image.width() as usize, image.height() as usize);
    let plane_size = width * height;
    let mut data = vec![0u8; plane_size * RGB_CHANNELS];

    for (idx, pixel) in image.pixels().enumerate() {
      data[idx] = pixel[0];
      data[plane_size + idx] = pixel[1];
      data[2 * plane_size + idx] = pixel[2];
    }

    Self {
      height,
      width,
      data: data.into_boxed_slice(),
    }
  }

  pub fn height(&self) -> usize {
    self.height
  }

  pub fn width(&self) -> usize {
    self.width
  }

  pub fn channels(&self) -> usize {
    RGB_CHANNELS
  }

  pub fn as_nchw(&self) -> &[u8] {
    &self.data
  }
}

/// letterbox 预处理参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Letterbox {
  /// 目标尺寸 (高, 宽)
  pub size: (u32, u32),
  pub stride: u32,
  /// 仅填充到 stride 的整数倍
  pub auto: bool,
}

impl Letterbox {
  pub fn new(size: (u32, u32), stride: u32, auto: bool) -> Self {
    Self { size, stride, auto }
  }

  /// 等比缩放后用灰色填充，返回填充后的图像
  pub fn resize(&self, image: &RgbImage) -> RgbImage {
    let (w, h) = (image.width() as f32, image.height() as f32);
    let (new_h, new_w) = (self.size.0 as f32, self.size.1 as f32);
    let r = (new_h / h).min(new_w / w);

    let unpad_w = ((w * r).round() as u32).max(1);
    let unpad_h = ((h * r).round() as u32).max(1);
    let mut dw = new_w - unpad_w as f32;
    let mut dh = new_h - unpad_h as f32;
    if self.auto && self.stride > 0 {
      dw = dw.rem_euclid(self.stride as f32);
      dh = dh.rem_euclid(self.stride as f32);
    }
    dw /= 2.0;
    dh /= 2.0;

    let top = (dh - 0.1).round().max(0.0) as u32;
    let bottom = (dh + 0.1).round().max(0.0) as u32;
    let left = (dw - 0.1).round().max(0.0) as u32;
    let right = (dw + 0.1).round().max(0.0) as u32;

    let mut canvas = RgbImage::from_pixel(
      unpad_w + left + right,
      unpad_h + top + bottom,
      image::Rgb([LETTERBOX_FILL; 3]),
    );
    if (unpad_w, unpad_h) == (image.width(), image.height()) {
      image::imageops::replace(&mut canvas, image, left as i64, top as i64);
    } else {
      let resized = image::imageops::resize(image, unpad_w, unpad_h, FilterType::Triangle);
      image::imageops::replace(&mut canvas, &resized, left as i64, top as i64);
    }
    canvas
  }

  pub fn apply(&self, image: &RgbImage) -> RgbNchwFrame {
    RgbNchwFrame::from_rgb_image(&self.resize(image))
  }
}

/// 归一化到 [0, 1] 的 f32 NCHW 张量
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
  shape: [usize; 4],
  data: Vec<f32>,
}

impl Tensor {
  pub fn zeros(shape: [usize; 4]) -> Self {
    Self {
      shape,
      data: vec![0.0; shape.iter().product()],
    }
  }

  pub fn from_frames<'a, I>(frames: I) -> Result<Self, FrameError>
  where
    I: IntoIterator<Item = &'a RgbNchwFrame>,
  {
    let mut shape: Option<(usize, usize)> = None;
    let mut batch = 0;
    let mut data = Vec::new();
    for frame in frames {
      let actual = (frame.height(), frame.width());
      match shape {
        None => shape = Some(actual),
        Some(expected) if expected != actual => {
          return Err(FrameError::ShapeMismatch { expected, actual });
        }
        Some(_) => {}
      }
      data.extend(frame.as_nchw().iter().map(|&v| v as f32 / 255.0));
      batch += 1;
    }
    let (h, w) = shape.ok_or(FrameError::EmptyBatch)?;
    Ok(Self {
      shape: [batch, RGB_CHANNELS, h, w],
      data,
    })
  }

  pub fn shape(&self) -> [usize; 4] {
    self.shape
  }

  pub fn batch(&self) -> usize {
    self.shape[0]
  }

  /// (高, 宽)
  pub fn spatial(&self) -> (usize, usize) {
    (self.shape[2], self.shape[3])
  }

  pub fn data(&self) -> &[f32] {
    &self.data
  }
}

/// 解码器报告的捕获信息
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CaptureInfo {
  pub fps: Option<f64>,
  pub width: u32,
  pub height: u32,
  pub frames: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceMode {
  Image,
  Video,
  Stream,
}

/// 帧在来源中的位置
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FramePosition {
  /// 文件序号，从 1 开始
  pub item: usize,
  pub items: usize,
  /// 视频内已解码的帧号，从 1 开始
  pub frame: Option<u64>,
  pub frames: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct FrameRecord {
  pub stream_index: usize,
  /// 来源标识（文件路径或流地址）
  pub path: String,
  /// 输出文件名
  pub name: String,
  pub tensor: RgbNchwFrame,
  pub image: RgbImage,
  pub capture: Option<CaptureInfo>,
  pub mode: SourceMode,
  pub position: FramePosition,
}

/// 帧读取器一次迭代产生的记录
#[derive(Debug, Clone, Default)]
pub struct FrameBatch {
  pub records: Vec<FrameRecord>,
}

impl FrameBatch {
  pub fn single(record: FrameRecord) -> Self {
    Self {
      records: vec![record],
    }
  }

  pub fn len(&self) -> usize {
    self.records.len()
  }

  pub fn is_empty(&self) -> bool {
    self.records.is_empty()
  }
}
