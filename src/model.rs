// 该文件是 Xunjian （巡检） 项目的一部分。
// src/model.rs - 推理引擎接口
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

use std::{borrow::Cow, path::Path};

use thiserror::Error;

use crate::frame::Tensor;

#[cfg(feature = "onnx_engine")]
mod onnx;
#[cfg(feature = "onnx_engine")]
pub use self::onnx::{OnnxEngine, OnnxEngineBuilder, OnnxEngineError};

/// COCO 数据集类别名称
pub const COCO_CLASSES: [&str; 80] = [
  "person",
  "bicycle",
  "car",
  "motorcycle",
  "airplane",
  "bus",
  "train",
  "truck",
  "boat",
  "traffic light",
  "fire hydrant",
  "stop sign",
  "parking meter",
  "bench",
  "bird",
  "cat",
  "dog",
  "horse",
  "sheep",
  "cow",
  "elephant",
  "bear",
  "zebra",
  "giraffe",
  "backpack",
  "umbrella",
  "handbag",
  "tie",
  "suitcase",
  "frisbee",
  "skis",
  "snowboard",
  "sports ball",
  "kite",
  "baseball bat",
  "baseball glove",
  "skateboard",
  "surfboard",
  "tennis racket",
  "bottle",
  "wine glass",
  "cup",
  "fork",
  "knife",
  "spoon",
  "bowl",
  "banana",
  "apple",
  "sandwich",
  "orange",
  "broccoli",
  "carrot",
  "hot dog",
  "pizza",
  "donut",
  "cake",
  "chair",
  "couch",
  "potted plant",
  "bed",
  "dining table",
  "toilet",
  "tv",
  "laptop",
  "mouse",
  "remote",
  "keyboard",
  "cell phone",
  "microwave",
  "oven",
  "toaster",
  "sink",
  "refrigerator",
  "book",
  "clock",
  "vase",
  "scissors",
  "teddy bear",
  "hair drier",
  "toothbrush",
];

/// 类别编号到名称的映射
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassNames(Vec<String>);

impl Default for ClassNames {
  fn default() -> Self {
    Self::coco()
  }
}

impl ClassNames {
  pub fn new<I, S>(names: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    Self(names.into_iter().map(Into::into).collect())
  }

  pub fn coco() -> Self {
    Self::new(COCO_CLASSES)
  }

  /// 每行一个类别名，忽略空行
  pub fn from_file(path: &Path) -> std::io::Result<Self> {
    let content = std::fs::read_to_string(path)?;
    Ok(Self::new(
      content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty()),
    ))
  }

  pub fn name(&self, class_id: usize) -> Cow<'_, str> {
    match self.0.get(class_id) {
      Some(name) => Cow::Borrowed(name.as_str()),
      None => Cow::Owned(format!("class{}", class_id)),
    }
  }

  pub fn len(&self) -> usize {
    self.0.len()
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }
}

/// `load()` 返回的模型元数据
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelInfo {
  /// 最大下采样倍数
  pub stride: u32,
  pub names: ClassNames,
  /// 模型接受任意尺寸输入时，letterbox 只需填充到 stride 的整数倍
  pub dynamic_shape: bool,
}

impl Default for ModelInfo {
  fn default() -> Self {
    Self {
      stride: 32,
      names: ClassNames::coco(),
      dynamic_shape: false,
    }
  }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InferOptions {
  pub half_precision: bool,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PredictionError {
  #[error("预测行长度 {0} 过短, 至少需要 6")]
  RowTooShort(usize),
  #[error("预测数据长度 {len} 不能被行长度 {row_len} 整除")]
  RaggedRows { len: usize, row_len: usize },
  #[error("预测张量形状无效: {0:?}")]
  BadShape(Vec<usize>),
}

/// 单张图像的候选框，每行为 `[cx, cy, w, h, obj, cls_0, cls_1, ...]`
#[derive(Debug, Clone, PartialEq)]
pub struct Candidates {
  row_len: usize,
  data: Vec<f32>,
}

impl Candidates {
  pub fn new(row_len: usize, data: Vec<f32>) -> Result<Self, PredictionError> {
    if row_len < 6 {
      return Err(PredictionError::RowTooShort(row_len));
    }
    if data.len() % row_len != 0 {
      return Err(PredictionError::RaggedRows {
        len: data.len(),
        row_len,
      });
    }
    Ok(Self { row_len, data })
  }

  pub fn from_rows<I: IntoIterator<Item = Vec<f32>>>(
    row_len: usize,
    rows: I,
  ) -> Result<Self, PredictionError> {
    Self::new(row_len, rows.into_iter().flatten().collect())
  }

  pub fn empty(num_classes: usize) -> Self {
    Self {
      row_len: num_classes + 5,
      data: Vec::new(),
    }
  }

  pub fn rows(&self) -> std::slice::ChunksExact<'_, f32> {
    self.data.chunks_exact(self.row_len)
  }

  pub fn num_classes(&self) -> usize {
    self.row_len - 5
  }

  pub fn len(&self) -> usize {
    self.data.len() / self.row_len
  }

  pub fn is_empty(&self) -> bool {
    self.data.is_empty()
  }
}

/// 一个批次的原始预测，与输入批次一一对应
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RawPredictions {
  pub images: Vec<Candidates>,
}

impl RawPredictions {
  /// 由 `[batch, candidates, row_len]` 形状的连续数据构造
  pub fn from_batched(shape: &[usize], data: &[f32]) -> Result<Self, PredictionError> {
    let [batch, count, row_len] = shape else {
      return Err(PredictionError::BadShape(shape.to_vec()));
    };
    let per_image = count * row_len;
    if data.len() != batch * per_image {
      return Err(PredictionError::BadShape(shape.to_vec()));
    }
    let images = (0..*batch)
      .map(|i| Candidates::new(*row_len, data[i * per_image..(i + 1) * per_image].to_vec()))
      .collect::<Result<Vec<_>, _>>()?;
    Ok(Self { images })
  }

  pub fn len(&self) -> usize {
    self.images.len()
  }

  pub fn is_empty(&self) -> bool {
    self.images.is_empty()
  }
}

/// 外部推理引擎
///
/// 同一实例上的调用不会并发发生，流水线持有引擎的互斥锁。
pub trait InferenceEngine {
  type Error: std::error::Error + Send + Sync + 'static;

  /// 选择推理设备，在 [`load`](InferenceEngine::load) 之前调用
  fn select_device(&mut self, _device: &str) {}

  /// 加载权重，返回模型元数据
  fn load(&mut self) -> Result<ModelInfo, Self::Error>;

  /// 以给定形状做一次空推理
  fn warmup(&mut self, shape: [usize; 4]) -> Result<(), Self::Error> {
    self
      .infer(&Tensor::zeros(shape), &InferOptions::default())
      .map(|_| ())
  }

  fn infer(
    &mut self,
    batch: &Tensor,
    options: &InferOptions,
  ) -> Result<RawPredictions, Self::Error>;
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn class_names_fall_back_to_index() {
    let names = ClassNames::coco();
    assert_eq!(names.len(), 80);
    assert_eq!(names.name(0), "person");
    assert_eq!(names.name(15), "cat");
    assert_eq!(names.name(200), "class200");
  }

  #[test]
  fn class_names_from_file_skip_blank_lines() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("names.txt");
    std::fs::write(&path, "crack\n\n rust \nleak\n").unwrap();
    let names = ClassNames::from_file(&path).unwrap();
    assert_eq!(names, ClassNames::new(["crack", "rust", "leak"]));
  }

  #[test]
  fn batched_predictions_split_per_image() {
    let row = [10.0, 10.0, 4.0, 4.0, 0.9, 0.8, 0.1];
    let data: Vec<f32> = row.iter().chain(row.iter()).copied().collect();
    let raw = RawPredictions::from_batched(&[2, 1, 7], &data).unwrap();
    assert_eq!(raw.len(), 2);
    assert_eq!(raw.images[0].num_classes(), 2);
    assert_eq!(raw.images[1].rows().next().unwrap(), &row);

    assert!(RawPredictions::from_batched(&[2, 7], &data).is_err());
    assert!(RawPredictions::from_batched(&[3, 1, 7], &data).is_err());
  }

  #[test]
  fn candidates_validate_row_layout() {
    assert_eq!(
      Candidates::new(4, vec![0.0; 8]),
      Err(PredictionError::RowTooShort(4))
    );
    assert!(matches!(
      Candidates::new(6, vec![0.0; 7]),
      Err(PredictionError::RaggedRows { .. })
    ));
  }
}
