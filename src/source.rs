// 该文件是 Xunjian （巡检） 项目的一部分。
// src/source.rs - 输入来源分类
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

//! # 来源分类
//!
//! 根据来源字符串决定使用哪一种帧读取器。分类只做字符串检查
//! 以及文件系统元数据查询，不会打开文件或网络连接。

use std::path::Path;

/// 支持的图像扩展名
pub const IMG_FORMATS: [&str; 7] = ["bmp", "jpeg", "jpg", "png", "tif", "tiff", "webp"];
/// 支持的视频扩展名
pub const VID_FORMATS: [&str; 11] = [
  "asf", "avi", "gif", "m4v", "mkv", "mov", "mp4", "mpeg", "mpg", "ts", "wmv",
];

const URL_PREFIXES: [&str; 4] = ["rtsp://", "rtmp://", "http://", "https://"];
const STREAMS_SUFFIX: &str = ".streams";
const SCREEN_PREFIX: &str = "screen";

/// 来源模态，决定帧读取器的种类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Modality {
  Image,
  Video,
  UrlFile,
  Stream,
  Screenshot,
  /// 目录或通配符
  Batch,
}

/// 单个文件的媒体种类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
  Image,
  Video,
}

impl MediaKind {
  pub fn from_extension(ext: &str) -> Option<Self> {
    let ext = ext.to_ascii_lowercase();
    if IMG_FORMATS.contains(&ext.as_str()) {
      Some(MediaKind::Image)
    } else if VID_FORMATS.contains(&ext.as_str()) {
      Some(MediaKind::Video)
    } else {
      None
    }
  }

  pub fn of_path(path: &Path) -> Option<Self> {
    path
      .extension()
      .and_then(|ext| ext.to_str())
      .and_then(Self::from_extension)
  }
}

/// 分类结果，构造后不可变
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDescriptor {
  raw: String,
  modality: Option<Modality>,
  pub is_file: bool,
  pub is_url: bool,
  pub webcam: bool,
  pub screenshot: bool,
  pub batch: bool,
}

impl SourceDescriptor {
  pub fn raw(&self) -> &str {
    &self.raw
  }

  /// 无效来源返回 `None`
  pub fn modality(&self) -> Option<Modality> {
    self.modality
  }

  pub fn is_valid(&self) -> bool {
    self.modality.is_some()
  }

  /// 文件类来源的媒体种类（URL 文件按 URL 路径的扩展名判断）
  pub fn media_kind(&self) -> Option<MediaKind> {
    extension_of(&self.raw, self.is_url)
      .as_deref()
      .and_then(MediaKind::from_extension)
  }
}

fn is_numeric(source: &str) -> bool {
  !source.is_empty() && source.chars().all(|c| c.is_ascii_digit())
}

fn extension_of(source: &str, is_url: bool) -> Option<String> {
  if is_url {
    let url = url::Url::parse(source).ok()?;
    let last = url.path().rsplit('/').next()?.to_string();
    return Path::new(&last)
      .extension()
      .and_then(|ext| ext.to_str())
      .map(str::to_string);
  }
  Path::new(source)
    .extension()
    .and_then(|ext| ext.to_str())
    .map(str::to_string)
}

fn is_wildcard(source: &str) -> bool {
  Path::new(source)
    .file_name()
    .and_then(|name| name.to_str())
    .is_some_and(|name| name.contains('*') || name.contains('?'))
}

/// 对来源字符串分类
pub fn classify(source: &str) -> SourceDescriptor {
  let lower = source.to_ascii_lowercase();
  let is_url = URL_PREFIXES.iter().any(|prefix| lower.starts_with(prefix));
  let is_file = extension_of(source, is_url)
    .as_deref()
    .and_then(MediaKind::from_extension)
    .is_some();
  let webcam = is_numeric(source) || lower.ends_with(STREAMS_SUFFIX) || (is_url && !is_file);
  let screenshot = !is_file && lower.starts_with(SCREEN_PREFIX);
  let wildcard = !is_url && is_wildcard(source);
  let batch = wildcard || (!is_url && !source.is_empty() && Path::new(source).is_dir());

  let modality = if webcam {
    Some(Modality::Stream)
  } else if screenshot {
    Some(Modality::Screenshot)
  } else if is_url && is_file {
    Some(Modality::UrlFile)
  } else if wildcard {
    Some(Modality::Batch)
  } else if is_file {
    match MediaKind::of_path(Path::new(source)) {
      Some(MediaKind::Image) => Some(Modality::Image),
      Some(MediaKind::Video) => Some(Modality::Video),
      None => None,
    }
  } else if batch {
    Some(Modality::Batch)
  } else {
    None
  };

  SourceDescriptor {
    raw: source.to_string(),
    modality,
    is_file,
    is_url,
    webcam,
    screenshot,
    batch,
  }
}
