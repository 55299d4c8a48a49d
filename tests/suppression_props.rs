// 该文件是 Xunjian （巡检） 项目的一部分。
// tests/suppression_props.rs - 候选框抑制的性质测试
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

use proptest::prelude::*;
use xunjian::{
  model::Candidates,
  postprocess::{Detection, Suppression, iou, rescale, suppress},
};

const NUM_CLASSES: usize = 3;

fn candidate_row() -> impl Strategy<Value = Vec<f32>> {
  (
    0.0f32..640.0,
    0.0f32..640.0,
    1.0f32..200.0,
    1.0f32..200.0,
    0.0f32..=1.0,
    prop::collection::vec(0.0f32..=1.0, NUM_CLASSES),
  )
    .prop_map(|(cx, cy, w, h, obj, classes)| {
      let mut row = vec![cx, cy, w, h, obj];
      row.extend(classes);
      row
    })
}

fn candidates() -> impl Strategy<Value = Candidates> {
  prop::collection::vec(candidate_row(), 0..120)
    .prop_map(|rows| Candidates::from_rows(5 + NUM_CLASSES, rows).unwrap())
}

fn params() -> impl Strategy<Value = Suppression> {
  (
    0.05f32..0.95,
    0.1f32..0.9,
    1usize..50,
    any::<bool>(),
    prop::option::of(prop::collection::btree_set(0usize..NUM_CLASSES, 1..NUM_CLASSES)),
  )
    .prop_map(
      |(confidence_threshold, iou_threshold, max_detections, agnostic, class_filter)| Suppression {
        confidence_threshold,
        iou_threshold,
        class_filter,
        agnostic,
        max_detections,
      },
    )
}

fn integer_box() -> impl Strategy<Value = [f32; 4]> {
  (0u32..600, 0u32..600, 1u32..40, 1u32..40).prop_map(|(x, y, w, h)| {
    [x as f32, y as f32, (x + w) as f32, (y + h) as f32]
  })
}

proptest! {
  #[test]
  fn kept_detections_pass_thresholds(candidates in candidates(), params in params()) {
    let kept = suppress(&candidates, &params);
    prop_assert!(kept.len() <= params.max_detections);
    for det in &kept {
      prop_assert!(det.confidence >= params.confidence_threshold);
      prop_assert!(det.class_id < NUM_CLASSES);
      if let Some(filter) = &params.class_filter {
        prop_assert!(filter.contains(&det.class_id));
      }
    }
  }

  #[test]
  fn kept_detections_do_not_overlap(candidates in candidates(), params in params()) {
    let kept = suppress(&candidates, &params);
    for (i, a) in kept.iter().enumerate() {
      for b in &kept[i + 1..] {
        if params.agnostic || a.class_id == b.class_id {
          prop_assert!(iou(&a.bbox, &b.bbox) <= params.iou_threshold);
        }
      }
    }
  }

  #[test]
  fn kept_detections_are_sorted(candidates in candidates(), params in params()) {
    let kept = suppress(&candidates, &params);
    prop_assert!(kept.windows(2).all(|w| w[0].confidence >= w[1].confidence));
  }

  #[test]
  fn rescale_is_identity_for_equal_shapes(boxes in prop::collection::vec(integer_box(), 1..20)) {
    let mut detections: Vec<Detection> = boxes
      .iter()
      .map(|&bbox| Detection { bbox, confidence: 0.5, class_id: 0 })
      .collect();
    rescale(&mut detections, (640, 640), (640, 640));
    for (det, original) in detections.iter().zip(&boxes) {
      prop_assert_eq!(&det.bbox, original);
    }
  }
}
