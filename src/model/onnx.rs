// 该文件是 Xunjian （巡检） 项目的一部分。
// src/model/onnx.rs - ONNX Runtime 推理引擎
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

//! # ONNX 推理引擎
//!
//! 加载 YOLOv5 风格导出的 ONNX 模型，输出形状为
//! `[batch, candidates, 5 + classes]`。只使用 CPU 执行。

use std::path::{Path, PathBuf};

use ort::{
  session::{Session, builder::GraphOptimizationLevel},
  value::{Tensor as OrtTensor, Value},
};
use thiserror::Error;
use tracing::{info, warn};
use url::Url;

use crate::{
  FromUrl,
  frame::Tensor,
  model::{ClassNames, InferOptions, InferenceEngine, ModelInfo, PredictionError, RawPredictions},
};

const DEFAULT_OUTPUT_NAME: &str = "output0";
const DEFAULT_STRIDE: u32 = 32;

#[derive(Error, Debug)]
pub enum OnnxEngineError {
  #[error("读取模型文件失败 {path}: {source}")]
  ReadModel {
    path: PathBuf,
    source: std::io::Error,
  },
  #[error("ONNX Runtime 会话错误: {0}")]
  Session(String),
  #[error("模型尚未加载")]
  NotLoaded,
  #[error("模型输出中缺少 '{0}'")]
  MissingOutput(String),
  #[error("模型输出格式错误: {0}")]
  Prediction(#[from] PredictionError),
  #[error("URL 方案不匹配: {0}")]
  SchemeMismatch(String),
}

/// `OnnxEngine` 构建器
#[derive(Debug, Clone)]
pub struct OnnxEngineBuilder {
  model_path: PathBuf,
  names: ClassNames,
  stride: u32,
  output_name: String,
  device: String,
}

impl OnnxEngineBuilder {
  pub fn new<P: Into<PathBuf>>(model_path: P) -> Self {
    Self {
      model_path: model_path.into(),
      names: ClassNames::coco(),
      stride: DEFAULT_STRIDE,
      output_name: DEFAULT_OUTPUT_NAME.to_string(),
      device: String::new(),
    }
  }

  pub fn names(mut self, names: ClassNames) -> Self {
    self.names = names;
    self
  }

  pub fn stride(mut self, stride: u32) -> Self {
    self.stride = stride;
    self
  }

  pub fn output_name<S: Into<String>>(mut self, name: S) -> Self {
    self.output_name = name.into();
    self
  }

  pub fn device<S: Into<String>>(mut self, device: S) -> Self {
    self.device = device.into();
    self
  }

  pub fn build(self) -> OnnxEngine {
    OnnxEngine {
      config: self,
      session: None,
    }
  }
}

/// `onnx:///path/to/model.onnx?stride=32&output=output0`
impl FromUrl for OnnxEngineBuilder {
  type Error = OnnxEngineError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != "onnx" {
      return Err(OnnxEngineError::SchemeMismatch(url.scheme().to_string()));
    }
    let mut builder = Self::new(url.path());
    for (key, value) in url.query_pairs() {
      match key.as_ref() {
        "stride" => {
          if let Ok(stride) = value.parse() {
            builder = builder.stride(stride);
          }
        }
        "output" => builder = builder.output_name(value.as_ref()),
        "device" => builder = builder.device(value.as_ref()),
        _ => warn!("忽略未知的模型参数: {}={}", key, value),
      }
    }
    Ok(builder)
  }
}

pub struct OnnxEngine {
  config: OnnxEngineBuilder,
  session: Option<Session>,
}

impl OnnxEngine {
  pub fn model_path(&self) -> &Path {
    &self.config.model_path
  }

  fn create_session(&self) -> Result<Session, OnnxEngineError> {
    let path = &self.config.model_path;
    let model_bytes = std::fs::read(path).map_err(|source| OnnxEngineError::ReadModel {
      path: path.clone(),
      source,
    })?;

    let device = self.config.device.trim();
    if !device.is_empty() && !device.eq_ignore_ascii_case("cpu") {
      warn!("设备 '{}' 不可用, 使用 CPU 推理", device);
    }

    Session::builder()
      .map_err(|e| OnnxEngineError::Session(e.to_string()))?
      .with_optimization_level(GraphOptimizationLevel::Level3)
      .map_err(|e| OnnxEngineError::Session(e.to_string()))?
      .commit_from_memory(&model_bytes)
      .map_err(|e| OnnxEngineError::Session(e.to_string()))
  }
}

impl InferenceEngine for OnnxEngine {
  type Error = OnnxEngineError;

  fn select_device(&mut self, device: &str) {
    self.config.device = device.to_string();
  }

  fn load(&mut self) -> Result<ModelInfo, Self::Error> {
    let session = self.create_session()?;
    info!("模型加载完成: {}", self.config.model_path.display());
    self.session = Some(session);
    Ok(ModelInfo {
      stride: self.config.stride,
      names: self.config.names.clone(),
      dynamic_shape: false,
    })
  }

  fn infer(
    &mut self,
    batch: &Tensor,
    options: &InferOptions,
  ) -> Result<RawPredictions, Self::Error> {
    if options.half_precision {
      warn!("ONNX 引擎不支持半精度输入, 使用 f32");
    }
    let session = self.session.as_mut().ok_or(OnnxEngineError::NotLoaded)?;

    let shape = batch.shape().to_vec();
    let input = OrtTensor::from_array((shape, batch.data().to_vec().into_boxed_slice()))
      .map(Value::from)
      .map_err(|e| OnnxEngineError::Session(e.to_string()))?;

    let outputs = session
      .run(ort::inputs![input])
      .map_err(|e| OnnxEngineError::Session(e.to_string()))?;
    let output = outputs
      .get(self.config.output_name.as_str())
      .ok_or_else(|| OnnxEngineError::MissingOutput(self.config.output_name.clone()))?;
    let (shape, data) = output
      .try_extract_tensor::<f32>()
      .map_err(|e| OnnxEngineError::Session(e.to_string()))?;

    let dims: Vec<usize> = shape.iter().map(|&d| d.max(0) as usize).collect();
    Ok(RawPredictions::from_batched(&dims, data)?)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn builder_from_url_reads_query() {
    let url = Url::parse("onnx:///models/yolov5s.onnx?stride=64&output=output").unwrap();
    let builder = OnnxEngineBuilder::from_url(&url).unwrap();
    assert_eq!(builder.model_path, PathBuf::from("/models/yolov5s.onnx"));
    assert_eq!(builder.stride, 64);
    assert_eq!(builder.output_name, "output");

    let url = Url::parse("file:///models/yolov5s.onnx").unwrap();
    assert!(OnnxEngineBuilder::from_url(&url).is_err());
  }

  #[test]
  fn infer_before_load_fails() {
    let mut engine = OnnxEngineBuilder::new("missing.onnx").build();
    let err = engine
      .infer(&Tensor::zeros([1, 3, 32, 32]), &InferOptions::default())
      .unwrap_err();
    assert!(matches!(err, OnnxEngineError::NotLoaded));
  }

  #[test]
  fn load_missing_file_fails() {
    let mut engine = OnnxEngineBuilder::new("/nonexistent/model.onnx").build();
    assert!(matches!(
      engine.load(),
      Err(OnnxEngineError::ReadModel { .. })
    ));
  }
}
