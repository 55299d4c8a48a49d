// 该文件是 Xunjian （巡检） 项目的一部分。
// src/postprocess.rs - 置信度过滤、非极大值抑制与坐标还原
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

use std::collections::{BTreeMap, BTreeSet};

use crate::{config::DetectOptions, model::Candidates};

/// 参与 NMS 的最大候选数
pub const MAX_NMS: usize = 30_000;

/// 原图坐标系下的检测结果
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
  /// [x1, y1, x2, y2]
  pub bbox: [f32; 4],
  pub confidence: f32,
  pub class_id: usize,
}

/// 抑制参数
#[derive(Debug, Clone, PartialEq)]
pub struct Suppression {
  pub confidence_threshold: f32,
  pub iou_threshold: f32,
  pub class_filter: Option<BTreeSet<usize>>,
  pub agnostic: bool,
  pub max_detections: usize,
}

impl From<&DetectOptions> for Suppression {
  fn from(options: &DetectOptions) -> Self {
    Self {
      confidence_threshold: options.confidence_threshold,
      iou_threshold: options.iou_threshold,
      class_filter: options.class_filter.clone(),
      agnostic: options.agnostic_suppression,
      max_detections: options.max_detections,
    }
  }
}

impl Suppression {
  pub fn apply(&self, candidates: &Candidates) -> Vec<Detection> {
    suppress(candidates, self)
  }
}

/// 两个 xyxy 框的交并比
pub fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
  let x1 = a[0].max(b[0]);
  let y1 = a[1].max(b[1]);
  let x2 = a[2].min(b[2]);
  let y2 = a[3].min(b[3]);

  let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
  let area_a = (a[2] - a[0]).max(0.0) * (a[3] - a[1]).max(0.0);
  let area_b = (b[2] - b[0]).max(0.0) * (b[3] - b[1]).max(0.0);
  let union = area_a + area_b - intersection;

  if union > 0.0 {
    intersection / union
  } else {
    0.0
  }
}

fn xywh_to_xyxy(row: &[f32]) -> [f32; 4] {
  let (cx, cy, w, h) = (row[0], row[1], row[2], row[3]);
  [cx - w / 2.0, cy - h / 2.0, cx + w / 2.0, cy + h / 2.0]
}

/// 单张图像的置信度过滤与贪心 NMS
///
/// 置信度为 objectness 与最佳类别分数之积。结果按置信度降序排列。
pub fn suppress(candidates: &Candidates, params: &Suppression) -> Vec<Detection> {
  let threshold = params.confidence_threshold;

  let mut detections: Vec<Detection> = candidates
    .rows()
    .filter(|row| row[4] >= threshold)
    .filter_map(|row| {
      let objectness = row[4];
      let (class_id, class_score) = row[5..]
        .iter()
        .copied()
        .enumerate()
        .fold((0, f32::NEG_INFINITY), |best, (i, score)| {
          if score > best.1 { (i, score) } else { best }
        });
      let confidence = objectness * class_score;
      if !(confidence >= threshold) {
        return None;
      }
      if let Some(filter) = &params.class_filter
        && !filter.contains(&class_id)
      {
        return None;
      }
      Some(Detection {
        bbox: xywh_to_xyxy(row),
        confidence,
        class_id,
      })
    })
    .collect();

  // 按置信度降序排序
  detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
  detections.truncate(MAX_NMS);

  let mut kept: Vec<Detection> = Vec::new();
  for det in detections {
    if kept.len() >= params.max_detections {
      break;
    }
    let overlapped = kept.iter().any(|k| {
      (params.agnostic || k.class_id == det.class_id)
        && iou(&k.bbox, &det.bbox) > params.iou_threshold
    });
    if !overlapped {
      kept.push(det);
    }
  }
  kept
}

/// 把推理尺寸 (高, 宽) 下的检测框还原到原图尺寸 (高, 宽)
///
/// 撤销 letterbox 的缩放和填充，裁剪到图像边界后取整。
pub fn rescale(detections: &mut [Detection], from: (usize, usize), to: (u32, u32)) {
  let (from_h, from_w) = (from.0 as f32, from.1 as f32);
  let (to_h, to_w) = (to.0 as f32, to.1 as f32);
  let gain = (from_h / to_h).min(from_w / to_w);
  let pad_x = ((from_w - to_w * gain) / 2.0 - 0.1).round();
  let pad_y = ((from_h - to_h * gain) / 2.0 - 0.1).round();

  for det in detections.iter_mut() {
    let [x1, y1, x2, y2] = det.bbox;
    det.bbox = [
      ((x1 - pad_x) / gain).clamp(0.0, to_w).round(),
      ((y1 - pad_y) / gain).clamp(0.0, to_h).round(),
      ((x2 - pad_x) / gain).clamp(0.0, to_w).round(),
      ((y2 - pad_y) / gain).clamp(0.0, to_h).round(),
    ];
  }
}

/// 每个类别的检测数量，仅用于日志汇总
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassCounts(BTreeMap<usize, usize>);

impl ClassCounts {
  pub fn from_detections(detections: &[Detection]) -> Self {
    let mut counts = BTreeMap::new();
    for det in detections {
      *counts.entry(det.class_id).or_insert(0) += 1;
    }
    Self(counts)
  }

  pub fn iter(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
    self.0.iter().map(|(&class_id, &count)| (class_id, count))
  }

  pub fn total(&self) -> usize {
    self.0.values().sum()
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn params() -> Suppression {
    Suppression::from(&DetectOptions::default())
  }

  fn row(cx: f32, cy: f32, w: f32, h: f32, obj: f32, classes: &[f32]) -> Vec<f32> {
    let mut row = vec![cx, cy, w, h, obj];
    row.extend_from_slice(classes);
    row
  }

  #[test]
  fn overlapping_same_class_boxes_are_suppressed() {
    let candidates = Candidates::from_rows(
      7,
      [
        row(50.0, 50.0, 20.0, 20.0, 0.9, &[0.9, 0.1]),
        row(51.0, 51.0, 20.0, 20.0, 0.8, &[0.9, 0.1]),
        row(150.0, 150.0, 20.0, 20.0, 0.7, &[0.9, 0.1]),
      ],
    )
    .unwrap();
    let dets = suppress(&candidates, &params());
    assert_eq!(dets.len(), 2);
    assert!((dets[0].confidence - 0.81).abs() < 1e-6);
    assert_eq!(dets[0].bbox, [40.0, 40.0, 60.0, 60.0]);
    assert!(dets[0].confidence >= dets[1].confidence);
  }

  #[test]
  fn different_classes_survive_unless_agnostic() {
    let candidates = Candidates::from_rows(
      7,
      [
        row(50.0, 50.0, 20.0, 20.0, 0.9, &[0.9, 0.1]),
        row(50.0, 50.0, 20.0, 20.0, 0.9, &[0.1, 0.8]),
      ],
    )
    .unwrap();
    assert_eq!(suppress(&candidates, &params()).len(), 2);

    let agnostic = Suppression {
      agnostic: true,
      ..params()
    };
    let dets = suppress(&candidates, &agnostic);
    assert_eq!(dets.len(), 1);
    assert_eq!(dets[0].class_id, 0);
  }

  #[test]
  fn low_confidence_and_filtered_classes_are_removed() {
    let candidates = Candidates::from_rows(
      7,
      [
        // 0.5 * 0.4 = 0.2 < 0.25
        row(10.0, 10.0, 4.0, 4.0, 0.5, &[0.4, 0.0]),
        row(80.0, 80.0, 4.0, 4.0, 0.9, &[0.0, 0.9]),
        row(40.0, 40.0, 4.0, 4.0, 0.9, &[0.9, 0.0]),
      ],
    )
    .unwrap();
    let dets = suppress(&candidates, &params());
    assert_eq!(dets.len(), 2);

    let only_one = Suppression {
      class_filter: Some([1].into_iter().collect()),
      ..params()
    };
    let dets = suppress(&candidates, &only_one);
    assert_eq!(dets.len(), 1);
    assert_eq!(dets[0].class_id, 1);
  }

  #[test]
  fn max_detections_keeps_highest_confidence() {
    let rows = (0..10).map(|i| {
      let obj = 0.5 + i as f32 * 0.05;
      row(20.0 * i as f32 + 5.0, 5.0, 4.0, 4.0, obj, &[1.0, 0.0])
    });
    let candidates = Candidates::from_rows(7, rows).unwrap();
    let capped = Suppression {
      max_detections: 3,
      ..params()
    };
    let dets = suppress(&candidates, &capped);
    assert_eq!(dets.len(), 3);
    assert!((dets[0].confidence - 0.95).abs() < 1e-6);
  }

  #[test]
  fn rescale_identity_for_equal_shapes() {
    let mut dets = vec![Detection {
      bbox: [10.0, 20.0, 110.0, 220.0],
      confidence: 0.9,
      class_id: 3,
    }];
    let before = dets.clone();
    rescale(&mut dets, (480, 640), (480, 640));
    assert_eq!(dets, before);
  }

  #[test]
  fn rescale_undoes_letterbox() {
    // 1280x720 缩放到 640x360, 上下各填充 140
    let mut dets = vec![Detection {
      bbox: [100.0, 190.0, 300.0, 290.0],
      confidence: 0.9,
      class_id: 0,
    }];
    rescale(&mut dets, (640, 640), (720, 1280));
    assert_eq!(dets[0].bbox, [200.0, 100.0, 600.0, 300.0]);

    let mut outside = vec![Detection {
      bbox: [-50.0, 100.0, 700.0, 700.0],
      confidence: 0.5,
      class_id: 0,
    }];
    rescale(&mut outside, (640, 640), (720, 1280));
    assert_eq!(outside[0].bbox, [0.0, 0.0, 1280.0, 720.0]);
  }

  #[test]
  fn class_counts_group_by_class() {
    let det = |class_id| Detection {
      bbox: [0.0; 4],
      confidence: 0.5,
      class_id,
    };
    let counts = ClassCounts::from_detections(&[det(2), det(0), det(2)]);
    assert_eq!(counts.iter().collect::<Vec<_>>(), vec![(0, 1), (2, 2)]);
    assert_eq!(counts.total(), 3);
  }
}
