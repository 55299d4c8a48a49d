// 该文件是 Xunjian （巡检） 项目的一部分。
// src/task.rs - 检测流水线
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

//! # 检测流水线
//!
//! [`DetectionPipeline`] 分两个阶段使用：先 [`initialize`](DetectionPipeline::initialize)
//! 加载模型，再对任意来源调用 [`detect`](DetectionPipeline::detect)。
//! 每次检测写入一个新分配的运行目录。

use std::{
  path::PathBuf,
  sync::{Arc, Mutex, MutexGuard, RwLock},
  time::Instant,
};

use tracing::{info, warn};

use crate::{
  config::PipelineConfig,
  error::DetectError,
  fetch::{self, ResolvedSource},
  frame::{Letterbox, Tensor},
  input::{
    FrameSource, FrameSourceOptions, InputError, MediaBackend, create_frame_source,
    default_media_backend,
  },
  model::{InferOptions, InferenceEngine, ModelInfo},
  output::{
    EncoderFactory, OutputSink, default_encoder_factory,
    draw::{AnnotateStyle, Annotator},
  },
  postprocess::{ClassCounts, Suppression, rescale},
  report::{FrameLog, RunReport, StageTimings},
  run_dir::RunDirectoryAllocator,
  source::{Modality, classify},
};

/// 把尺寸向上取整到 stride 的整数倍
pub fn round_up_to_stride(size: u32, stride: u32) -> u32 {
  let stride = stride.max(1);
  size.div_ceil(stride) * stride
}

pub struct DetectionPipeline<E: InferenceEngine> {
  engine: Mutex<E>,
  model: RwLock<Option<ModelInfo>>,
  config: PipelineConfig,
  allocator: RunDirectoryAllocator,
  encoders: Arc<dyn EncoderFactory>,
  backend: Arc<dyn MediaBackend>,
  annotator: Annotator,
}

impl<E: InferenceEngine> DetectionPipeline<E> {
  pub fn new(engine: E, config: PipelineConfig) -> Self {
    let allocator = RunDirectoryAllocator::new(&config.results_root, config.run_name.clone());
    let annotator = Annotator::with_font_path(config.font_path.as_deref());
    Self {
      engine: Mutex::new(engine),
      model: RwLock::new(None),
      config,
      allocator,
      encoders: default_encoder_factory(),
      backend: default_media_backend(),
      annotator,
    }
  }

  pub fn with_encoder_factory(mut self, encoders: Arc<dyn EncoderFactory>) -> Self {
    self.encoders = encoders;
    self
  }

  pub fn with_media_backend(mut self, backend: Arc<dyn MediaBackend>) -> Self {
    self.backend = backend;
    self
  }

  pub fn config(&self) -> &PipelineConfig {
    &self.config
  }

  pub fn allocator(&self) -> &RunDirectoryAllocator {
    &self.allocator
  }

  /// 已加载模型的元数据；未初始化时为 `None`
  pub fn model_info(&self) -> Option<ModelInfo> {
    self.model.read().ok().and_then(|model| model.clone())
  }

  pub fn is_initialized(&self) -> bool {
    self.model_info().is_some()
  }

  fn lock_engine(&self) -> Result<MutexGuard<'_, E>, DetectError> {
    self
      .engine
      .lock()
      .map_err(|_| DetectError::Inference("推理引擎锁已损坏".to_string()))
  }

  /// 加载模型；失败后可以再次调用重试
  pub fn initialize(&self) -> Result<ModelInfo, DetectError> {
    let info = {
      let mut engine = self
        .engine
        .lock()
        .map_err(|_| DetectError::ModelLoad("推理引擎锁已损坏".to_string()))?;
      let device = self.config.options.device_selector.trim();
      if !device.is_empty() {
        engine.select_device(device);
      }
      engine
        .load()
        .map_err(|e| DetectError::ModelLoad(e.to_string()))?
    };
    info!(
      "模型加载完成: stride {}, {} 个类别",
      info.stride,
      info.names.len()
    );
    let mut model = self
      .model
      .write()
      .map_err(|_| DetectError::ModelLoad("模型状态锁已损坏".to_string()))?;
    *model = Some(info.clone());
    Ok(info)
  }

  /// 推理尺寸 (高, 宽)，各自向上取整到 stride 的整数倍
  fn inference_size(&self, model: &ModelInfo) -> (u32, u32) {
    let (h, w) = self.config.options.image_size;
    let rounded = (
      round_up_to_stride(h, model.stride),
      round_up_to_stride(w, model.stride),
    );
    if rounded != (h, w) {
      warn!(
        "推理尺寸 {}x{} 不是 stride {} 的整数倍, 调整为 {}x{}",
        h, w, model.stride, rounded.0, rounded.1
      );
    }
    rounded
  }

  fn source_options(&self, model: &ModelInfo, image_size: (u32, u32)) -> FrameSourceOptions {
    FrameSourceOptions {
      letterbox: Letterbox::new(image_size, model.stride, model.dynamic_shape),
      frame_stride: self.config.options.frame_stride,
    }
  }

  fn require_model(&self) -> Result<ModelInfo, DetectError> {
    self.model_info().ok_or(DetectError::ModelNotInitialized)
  }

  /// 检测并返回运行目录
  pub fn detect(&self, source: &str) -> Result<PathBuf, DetectError> {
    self.run(source).map(|report| report.run_dir)
  }

  /// 检测并返回结构化结果
  pub fn run(&self, source: &str) -> Result<RunReport, DetectError> {
    self.config.validate()?;
    let descriptor = classify(source);
    if !descriptor.is_valid() {
      warn!("无法识别的输入来源: '{}'", source);
      return Err(DetectError::InvalidSource(source.to_string()));
    }
    let model = self.require_model()?;

    let run_dir = self.allocator.allocate().map_err(DetectError::RunDirectory)?;
    info!(
      "开始检测 {} ({:?}), 结果目录: {}",
      source,
      descriptor.modality(),
      run_dir.display()
    );

    let location = if descriptor.modality() == Some(Modality::UrlFile) {
      match fetch::resolve(source, &self.config.download_dir)? {
        ResolvedSource::Local(path) => path.to_string_lossy().into_owned(),
        ResolvedSource::Uri(uri) => uri,
      }
    } else {
      source.to_string()
    };

    let image_size = self.inference_size(&model);
    let frames = create_frame_source(
      &descriptor,
      &location,
      self.source_options(&model, image_size),
      self.backend.clone(),
    )?;
    let warmup_batch = if descriptor.webcam {
      frames.stream_count()
    } else {
      1
    };
    self.process(run_dir, frames, &model, image_size, warmup_batch)
  }

  /// 对调用方构造的帧来源做检测
  pub fn detect_frames<S: FrameSource>(&self, frames: S) -> Result<RunReport, DetectError> {
    self.config.validate()?;
    let model = self.require_model()?;
    let run_dir = self.allocator.allocate().map_err(DetectError::RunDirectory)?;
    let warmup_batch = frames.stream_count().max(1);
    let image_size = self.inference_size(&model);
    self.process(run_dir, frames, &model, image_size, warmup_batch)
  }

  fn process<S: FrameSource>(
    &self,
    run_dir: PathBuf,
    frames: S,
    model: &ModelInfo,
    (h, w): (u32, u32),
    warmup_batch: usize,
  ) -> Result<RunReport, DetectError> {
    let options = &self.config.options;
    let warmup_shape = [warmup_batch, 3, h as usize, w as usize];
    self
      .lock_engine()?
      .warmup(warmup_shape)
      .map_err(|e| DetectError::Inference(e.to_string()))?;

    let suppression = Suppression::from(options);
    let style = AnnotateStyle::from(options);
    let infer_options = InferOptions {
      half_precision: options.half_precision,
    };
    let mut sink = OutputSink::new(&run_dir, self.config.default_fps, self.encoders.clone());
    let mut timings = StageTimings::default();
    let mut input_shape = warmup_shape;
    let (mut frame_count, mut detection_count, mut batch_count) = (0usize, 0usize, 0usize);

    for batch in frames {
      let batch = batch?;
      if batch.is_empty() {
        continue;
      }
      batch_count += 1;

      let started = Instant::now();
      let tensor =
        Tensor::from_frames(batch.records.iter().map(|r| &r.tensor)).map_err(InputError::from)?;
      let preprocessed = Instant::now();
      let predictions = self
        .lock_engine()?
        .infer(&tensor, &infer_options)
        .map_err(|e| DetectError::Inference(e.to_string()))?;
      let inferred = Instant::now();
      if predictions.len() != batch.len() {
        return Err(DetectError::Inference(format!(
          "预测数量 {} 与批次大小 {} 不一致",
          predictions.len(),
          batch.len()
        )));
      }
      let suppressed: Vec<_> = predictions
        .images
        .iter()
        .map(|candidates| suppression.apply(candidates))
        .collect();
      let finished = Instant::now();
      timings.record(
        preprocessed - started,
        inferred - preprocessed,
        finished - inferred,
        batch.len(),
      );

      input_shape = tensor.shape();
      let spatial = tensor.spatial();
      for (record, mut detections) in batch.records.iter().zip(suppressed) {
        rescale(
          &mut detections,
          spatial,
          (record.image.height(), record.image.width()),
        );
        let counts = ClassCounts::from_detections(&detections);
        info!(
          "{}",
          FrameLog {
            record,
            counts: &counts,
            names: &model.names,
            input_size: spatial,
            inference: inferred - preprocessed,
          }
        );
        let rendered = self
          .annotator
          .render(&record.image, &detections, &model.names, &style);
        sink.persist(record, &rendered)?;
        frame_count += 1;
        detection_count += detections.len();
      }

      if options.max_frames.is_some_and(|n| n > 0 && batch_count >= n) {
        info!("达到指定帧数 {}, 停止读取", batch_count);
        break;
      }
    }

    let files = sink.finish()?;
    let report = RunReport {
      run_dir,
      files,
      frames: frame_count,
      detections: detection_count,
      timings,
      input_shape,
    };
    info!("{}", report.speed());
    if report.is_empty() {
      warn!("没有写出任何结果: {}", report.run_dir.display());
    }
    info!("结果保存在 {}", report.run_dir.display());
    Ok(report)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn sizes_round_up_to_stride() {
    assert_eq!(round_up_to_stride(640, 32), 640);
    assert_eq!(round_up_to_stride(641, 32), 672);
    assert_eq!(round_up_to_stride(1, 32), 32);
    assert_eq!(round_up_to_stride(100, 0), 100);
  }
}
