// 该文件是 Xunjian （巡检） 项目的一部分。
// src/input/read_image_file.rs - 读取图像文件
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

use std::path::{Path, PathBuf};

use image::{ImageReader, RgbImage};
use thiserror::Error;
use tracing::error;

#[derive(Error, Debug)]
pub enum ImageFileInputError {
  #[error("I/O 错误 {path}: {source}")]
  IoError {
    path: PathBuf,
    source: std::io::Error,
  },
  #[error("图像解码错误 {path}: {source}")]
  ImageLoadError {
    path: PathBuf,
    source: image::ImageError,
  },
}

/// 解码为 RGB 图像，格式按文件内容推断
pub fn decode_image(path: &Path) -> Result<RgbImage, ImageFileInputError> {
  let reader = ImageReader::open(path)
    .and_then(ImageReader::with_guessed_format)
    .map_err(|source| ImageFileInputError::IoError {
      path: path.to_path_buf(),
      source,
    })?;

  let image = reader.decode().map_err(|source| {
    error!("无法解码图像 {}: {}", path.display(), source);
    ImageFileInputError::ImageLoadError {
      path: path.to_path_buf(),
      source,
    }
  })?;
  Ok(image.into_rgb8())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn decodes_to_rgb() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("gray.png");
    image::GrayImage::from_pixel(5, 3, image::Luma([200]))
      .save(&path)
      .unwrap();
    let rgb = decode_image(&path).unwrap();
    assert_eq!(rgb.dimensions(), (5, 3));
    assert_eq!(rgb.get_pixel(0, 0), &image::Rgb([200, 200, 200]));
  }

  #[test]
  fn missing_and_corrupt_files_fail() {
    let dir = tempfile::tempdir().unwrap();
    let missing = decode_image(&dir.path().join("none.jpg")).unwrap_err();
    assert!(matches!(missing, ImageFileInputError::IoError { .. }));

    let corrupt = dir.path().join("broken.jpg");
    std::fs::write(&corrupt, b"not an image").unwrap();
    let err = decode_image(&corrupt).unwrap_err();
    assert!(matches!(err, ImageFileInputError::ImageLoadError { .. }));
  }
}
