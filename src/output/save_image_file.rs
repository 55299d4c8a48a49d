// 该文件是 Xunjian （巡检） 项目的一部分。
// src/output/save_image_file.rs - 保存标注图像
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

use image::RgbImage;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum SaveImageFileError {
  #[error("I/O 错误 {path}: {source}")]
  IoError {
    path: PathBuf,
    source: std::io::Error,
  },
  #[error("图像编码错误 {path}: {source}")]
  ImageError {
    path: PathBuf,
    source: image::ImageError,
  },
}

/// 按扩展名推断格式写出图像，必要时创建父目录
pub fn save_image(path: &Path, image: &RgbImage) -> Result<(), SaveImageFileError> {
  if let Some(parent) = path.parent()
    && !parent.as_os_str().is_empty()
  {
    std::fs::create_dir_all(parent).map_err(|source| SaveImageFileError::IoError {
      path: parent.to_path_buf(),
      source,
    })?;
  }

  image
    .save(path)
    .map_err(|source| SaveImageFileError::ImageError {
      path: path.to_path_buf(),
      source,
    })?;

  debug!("保存图像到文件: {}", path.display());
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn saves_with_original_extension() {
    let dir = tempfile::tempdir().unwrap();
    let image = RgbImage::from_pixel(8, 6, image::Rgb([1, 2, 3]));
    for name in ["a.png", "b.jpg", "nested/c.bmp"] {
      let path = dir.path().join(name);
      save_image(&path, &image).unwrap();
      let decoded = image::open(&path).unwrap();
      assert_eq!((decoded.width(), decoded.height()), (8, 6));
    }
  }

  #[test]
  fn unknown_extension_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let image = RgbImage::new(2, 2);
    let err = save_image(&dir.path().join("x.unknownext"), &image).unwrap_err();
    assert!(matches!(err, SaveImageFileError::ImageError { .. }));
  }
}
