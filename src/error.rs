// 该文件是 Xunjian （巡检） 项目的一部分。
// src/error.rs - 流水线错误类型
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

use thiserror::Error;

use crate::{config::ConfigError, fetch::FetchError, input::InputError, output::OutputError};

/// 调用方关心的粗粒度失败类别
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
  InvalidSource,
  ModelLoad,
  Decode,
  Write,
}

#[derive(Error, Debug)]
pub enum DetectError {
  #[error("无效的输入来源: '{0}'")]
  InvalidSource(String),
  #[error("参数错误: {0}")]
  Config(#[from] ConfigError),
  #[error("模型加载失败: {0}")]
  ModelLoad(String),
  #[error("模型尚未初始化, 请先调用 initialize()")]
  ModelNotInitialized,
  #[error("下载失败: {0}")]
  Fetch(#[from] FetchError),
  #[error("读取帧失败: {0}")]
  Decode(#[from] InputError),
  #[error("推理失败: {0}")]
  Inference(String),
  #[error("写入结果失败: {0}")]
  Write(#[from] OutputError),
  #[error("创建运行目录失败: {0}")]
  RunDirectory(std::io::Error),
}

impl DetectError {
  pub fn kind(&self) -> FailureKind {
    match self {
      DetectError::InvalidSource(_) | DetectError::Config(_) => FailureKind::InvalidSource,
      DetectError::ModelLoad(_) | DetectError::ModelNotInitialized => FailureKind::ModelLoad,
      DetectError::Fetch(_) | DetectError::Decode(_) | DetectError::Inference(_) => {
        FailureKind::Decode
      }
      DetectError::Write(_) | DetectError::RunDirectory(_) => FailureKind::Write,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn kinds_group_variants() {
    assert_eq!(
      DetectError::InvalidSource("x.txt".into()).kind(),
      FailureKind::InvalidSource
    );
    assert_eq!(DetectError::ModelNotInitialized.kind(), FailureKind::ModelLoad);
    assert_eq!(
      DetectError::Inference("shape".into()).kind(),
      FailureKind::Decode
    );
    let io = std::io::Error::other("disk full");
    assert_eq!(DetectError::RunDirectory(io).kind(), FailureKind::Write);
  }

  #[test]
  fn messages_are_readable() {
    let msg = DetectError::InvalidSource("notes.txt".into()).to_string();
    assert!(msg.contains("notes.txt"));
  }
}
