// 该文件是 Xunjian （巡检） 项目的一部分。
// src/report.rs - 运行日志与统计
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

use std::{
  fmt,
  path::{Path, PathBuf},
  time::Duration,
};

use crate::{
  frame::{FrameRecord, SourceMode},
  model::ClassNames,
  postprocess::ClassCounts,
};

/// 每帧一行的诊断日志
pub struct FrameLog<'a> {
  pub record: &'a FrameRecord,
  pub counts: &'a ClassCounts,
  pub names: &'a ClassNames,
  /// 推理输入的 (高, 宽)
  pub input_size: (usize, usize),
  pub inference: Duration,
}

impl fmt::Display for FrameLog<'_> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let record = self.record;
    let position = &record.position;
    match record.mode {
      SourceMode::Image => write!(
        f,
        "image {}/{} {}: ",
        position.item, position.items, record.path
      )?,
      SourceMode::Video => {
        write!(f, "video {}/{} ", position.item, position.items)?;
        match (position.frame, position.frames) {
          (Some(frame), Some(frames)) => write!(f, "({}/{}) ", frame, frames)?,
          (Some(frame), None) => write!(f, "({}) ", frame)?,
          _ => {}
        }
        write!(f, "{}: ", record.path)?;
      }
      SourceMode::Stream => write!(f, "{}: ", record.stream_index)?,
    }

    write!(f, "{}x{} ", self.input_size.0, self.input_size.1)?;
    if self.counts.is_empty() {
      f.write_str("(no detections), ")?;
    }
    for (class_id, n) in self.counts.iter() {
      let plural = if n > 1 { "s" } else { "" };
      write!(f, "{} {}{}, ", n, self.names.name(class_id), plural)?;
    }
    write!(f, "{:.1}ms", millis(self.inference))
  }
}

fn millis(d: Duration) -> f64 {
  d.as_secs_f64() * 1e3
}

/// 三个阶段的累计耗时
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StageTimings {
  pub preprocess: Duration,
  pub inference: Duration,
  pub suppression: Duration,
  /// 已处理的帧数
  pub images: usize,
}

impl StageTimings {
  pub fn record(&mut self, preprocess: Duration, inference: Duration, suppression: Duration, images: usize) {
    self.preprocess += preprocess;
    self.inference += inference;
    self.suppression += suppression;
    self.images += images;
  }

  /// 每帧平均耗时（毫秒）：预处理、推理、NMS
  pub fn per_image_ms(&self) -> (f64, f64, f64) {
    if self.images == 0 {
      return (0.0, 0.0, 0.0);
    }
    let n = self.images as f64;
    (
      millis(self.preprocess) / n,
      millis(self.inference) / n,
      millis(self.suppression) / n,
    )
  }
}

/// 运行结束时的速度汇总
pub struct SpeedSummary<'a> {
  pub timings: &'a StageTimings,
  pub shape: [usize; 4],
}

impl fmt::Display for SpeedSummary<'_> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let (pre, infer, nms) = self.timings.per_image_ms();
    let [b, c, h, w] = self.shape;
    write!(
      f,
      "Speed: {:.1}ms pre-process, {:.1}ms inference, {:.1}ms NMS per image at shape ({}, {}, {}, {})",
      pre, infer, nms, b, c, h, w
    )
  }
}

/// 一次检测的结构化结果
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
  pub run_dir: PathBuf,
  /// 写出的文件，按首次写入排序
  pub files: Vec<PathBuf>,
  /// 处理过的帧数
  pub frames: usize,
  pub detections: usize,
  pub timings: StageTimings,
  pub input_shape: [usize; 4],
}

impl RunReport {
  pub fn run_dir(&self) -> &Path {
    &self.run_dir
  }

  /// 没有写出任何文件；这不是错误
  pub fn is_empty(&self) -> bool {
    self.files.is_empty()
  }

  pub fn speed(&self) -> SpeedSummary<'_> {
    SpeedSummary {
      timings: &self.timings,
      shape: self.input_shape,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    frame::{FramePosition, RgbNchwFrame},
    postprocess::Detection,
  };

  fn record(mode: SourceMode, position: FramePosition) -> FrameRecord {
    FrameRecord {
      stream_index: 1,
      path: "/p/cat.jpg".into(),
      name: "cat.jpg".into(),
      tensor: RgbNchwFrame::zeros(2, 2),
      image: image::RgbImage::new(2, 2),
      capture: None,
      mode,
      position,
    }
  }

  fn det(class_id: usize) -> Detection {
    Detection {
      bbox: [0.0, 0.0, 1.0, 1.0],
      confidence: 0.9,
      class_id,
    }
  }

  #[test]
  fn image_line_lists_counts() {
    let record = record(
      SourceMode::Image,
      FramePosition {
        item: 1,
        items: 3,
        ..Default::default()
      },
    );
    let counts = ClassCounts::from_detections(&[det(0), det(15), det(0)]);
    let line = FrameLog {
      record: &record,
      counts: &counts,
      names: &ClassNames::coco(),
      input_size: (640, 480),
      inference: Duration::from_micros(12_345),
    };
    assert_eq!(
      line.to_string(),
      "image 1/3 /p/cat.jpg: 640x480 2 persons, 1 cat, 12.3ms"
    );
  }

  #[test]
  fn video_and_stream_lines() {
    let counts = ClassCounts::from_detections(&[]);
    let names = ClassNames::coco();
    let video = record(
      SourceMode::Video,
      FramePosition {
        item: 2,
        items: 2,
        frame: Some(5),
        frames: Some(90),
      },
    );
    let line = FrameLog {
      record: &video,
      counts: &counts,
      names: &names,
      input_size: (384, 640),
      inference: Duration::from_millis(8),
    };
    assert_eq!(
      line.to_string(),
      "video 2/2 (5/90) /p/cat.jpg: 384x640 (no detections), 8.0ms"
    );

    let stream = record(SourceMode::Stream, FramePosition::default());
    let line = FrameLog {
      record: &stream,
      counts: &counts,
      names: &names,
      input_size: (480, 640),
      inference: Duration::from_millis(3),
    };
    assert_eq!(line.to_string(), "1: 480x640 (no detections), 3.0ms");
  }

  #[test]
  fn speed_summary_averages_per_image() {
    let mut timings = StageTimings::default();
    timings.record(
      Duration::from_millis(2),
      Duration::from_millis(20),
      Duration::from_millis(1),
      1,
    );
    timings.record(
      Duration::from_millis(4),
      Duration::from_millis(10),
      Duration::from_millis(3),
      1,
    );
    let summary = SpeedSummary {
      timings: &timings,
      shape: [1, 3, 640, 640],
    };
    assert_eq!(
      summary.to_string(),
      "Speed: 3.0ms pre-process, 15.0ms inference, 2.0ms NMS per image at shape (1, 3, 640, 640)"
    );
    assert_eq!(StageTimings::default().per_image_ms(), (0.0, 0.0, 0.0));
  }
}
