// 该文件是 Xunjian （巡检） 项目的一部分。
// src/output/draw.rs - 检测结果标注
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

use std::path::Path;

use ab_glyph::{FontArc, PxScale};
use image::{Rgb, RgbImage};
use imageproc::{
  drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size},
  rect::Rect,
};
use tracing::{debug, warn};

use crate::{config::DetectOptions, model::ClassNames, postprocess::Detection};

/// 未配置字体时依次尝试的系统字体
const SYSTEM_FONT_CANDIDATES: [&str; 5] = [
  "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
  "/usr/share/fonts/dejavu/DejaVuSans.ttf",
  "/usr/share/fonts/TTF/DejaVuSans.ttf",
  "/System/Library/Fonts/Supplemental/Arial.ttf",
  "C:\\Windows\\Fonts\\arial.ttf",
];

const TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);
const MIN_FONT_SIZE: f32 = 12.0;

/// 按类别编号循环使用的调色板
pub const PALETTE: [[u8; 3]; 20] = [
  [0xFF, 0x38, 0x38],
  [0xFF, 0x9D, 0x97],
  [0xFF, 0x70, 0x1F],
  [0xFF, 0xB2, 0x1D],
  [0xCF, 0xD2, 0x31],
  [0x48, 0xF9, 0x0A],
  [0x92, 0xCC, 0x17],
  [0x3D, 0xDB, 0x86],
  [0x1A, 0x93, 0x34],
  [0x00, 0xD4, 0xBB],
  [0x2C, 0x99, 0xA8],
  [0x00, 0xC2, 0xFF],
  [0x34, 0x45, 0x93],
  [0x64, 0x73, 0xFF],
  [0x00, 0x18, 0xEC],
  [0x84, 0x38, 0xFF],
  [0x52, 0x00, 0x85],
  [0xCB, 0x38, 0xFF],
  [0xFF, 0x95, 0xC8],
  [0xFF, 0x37, 0xC7],
];

pub fn class_color(class_id: usize) -> Rgb<u8> {
  Rgb(PALETTE[class_id % PALETTE.len()])
}

/// 标注样式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnnotateStyle {
  /// 0 表示按图像尺寸推算
  pub line_thickness: u32,
  pub hide_labels: bool,
  pub hide_confidence: bool,
}

impl From<&DetectOptions> for AnnotateStyle {
  fn from(options: &DetectOptions) -> Self {
    Self {
      line_thickness: options.line_thickness,
      hide_labels: options.hide_labels,
      hide_confidence: options.hide_confidence,
    }
  }
}

impl AnnotateStyle {
  pub fn line_width(&self, width: u32, height: u32) -> u32 {
    if self.line_thickness > 0 {
      self.line_thickness
    } else {
      (((width + height) as f32 / 2.0 * 0.003).round() as u32).max(2)
    }
  }

  /// `None` 表示不绘制标签
  pub fn label(&self, detection: &Detection, names: &ClassNames) -> Option<String> {
    if self.hide_labels {
      return None;
    }
    let name = names.name(detection.class_id);
    if self.hide_confidence {
      Some(name.into_owned())
    } else {
      Some(format!("{} {:.2}", name, detection.confidence))
    }
  }
}

/// 从指定路径或系统目录加载字体
pub fn load_font(path: Option<&Path>) -> Option<FontArc> {
  let candidates = path
    .into_iter()
    .map(Path::to_path_buf)
    .chain(SYSTEM_FONT_CANDIDATES.iter().map(Into::into));

  for candidate in candidates {
    let Ok(bytes) = std::fs::read(&candidate) else {
      continue;
    };
    match FontArc::try_from_vec(bytes) {
      Ok(font) => {
        debug!("使用字体: {}", candidate.display());
        return Some(font);
      }
      Err(e) => warn!("无法解析字体 {}: {}", candidate.display(), e),
    }
  }
  warn!("没有可用字体, 标签将只绘制色块");
  None
}

/// 把检测框和标签画到帧的副本上
#[derive(Clone, Default)]
pub struct Annotator {
  font: Option<FontArc>,
}

impl Annotator {
  pub fn new(font: Option<FontArc>) -> Self {
    Self { font }
  }

  pub fn with_font_path(path: Option<&Path>) -> Self {
    Self::new(load_font(path))
  }

  pub fn has_font(&self) -> bool {
    self.font.is_some()
  }

  pub fn render(
    &self,
    frame: &RgbImage,
    detections: &[Detection],
    names: &ClassNames,
    style: &AnnotateStyle,
  ) -> RgbImage {
    let mut canvas = frame.clone();
    let line_width = style.line_width(canvas.width(), canvas.height());
    let font_size = (((canvas.width() + canvas.height()) as f32 / 2.0 * 0.035).round())
      .max(MIN_FONT_SIZE);

    // 低置信度的先画，高置信度的覆盖在上面
    for det in detections.iter().rev() {
      let color = class_color(det.class_id);
      let Some(rect) = box_rect(&canvas, det) else {
        continue;
      };
      draw_box(&mut canvas, rect, color, line_width);
      if let Some(label) = style.label(det, names) {
        self.draw_label(&mut canvas, rect, &label, color, font_size);
      }
    }
    canvas
  }

  fn draw_label(&self, image: &mut RgbImage, rect: Rect, label: &str, color: Rgb<u8>, size: f32) {
    let scale = PxScale::from(size);
    let (text_w, text_h) = match &self.font {
      Some(font) => text_size(scale, font, label),
      None => ((label.chars().count() as f32 * size * 0.6) as u32, size as u32),
    };
    let pad = 2;
    let tab_w = (text_w + 2 * pad).min(image.width());
    let tab_h = text_h + 2 * pad;

    // 框上方放得下就放在外侧，否则放在框内
    let tab_y = if rect.top() - tab_h as i32 >= 0 {
      rect.top() - tab_h as i32
    } else {
      rect.top()
    };
    let tab_x = rect.left().min(image.width() as i32 - tab_w as i32).max(0);

    draw_filled_rect_mut(image, Rect::at(tab_x, tab_y).of_size(tab_w, tab_h), color);
    if let Some(font) = &self.font {
      draw_text_mut(
        image,
        TEXT_COLOR,
        tab_x + pad as i32,
        tab_y + pad as i32,
        scale,
        font,
        label,
      );
    }
  }
}

fn box_rect(image: &RgbImage, det: &Detection) -> Option<Rect> {
  let max_x = image.width() as i32 - 1;
  let max_y = image.height() as i32 - 1;
  let x1 = (det.bbox[0] as i32).clamp(0, max_x);
  let y1 = (det.bbox[1] as i32).clamp(0, max_y);
  let x2 = (det.bbox[2] as i32).clamp(0, max_x);
  let y2 = (det.bbox[3] as i32).clamp(0, max_y);
  if x1 >= x2 || y1 >= y2 {
    return None;
  }
  Some(Rect::at(x1, y1).of_size((x2 - x1 + 1) as u32, (y2 - y1 + 1) as u32))
}

fn draw_box(image: &mut RgbImage, rect: Rect, color: Rgb<u8>, line_width: u32) {
  for t in 0..line_width {
    let inset = t as i32;
    let (w, h) = (rect.width() as i32 - 2 * inset, rect.height() as i32 - 2 * inset);
    if w <= 0 || h <= 0 {
      break;
    }
    let inner = Rect::at(rect.left() + inset, rect.top() + inset).of_size(w as u32, h as u32);
    draw_hollow_rect_mut(image, inner, color);
  }
}
