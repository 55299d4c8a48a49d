// 该文件是 Xunjian （巡检） 项目的一部分。
// src/fetch.rs - URL 文件下载缓存
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

use thiserror::Error;
use tracing::info;
use url::Url;

#[derive(Error, Debug)]
pub enum FetchError {
  #[error("无效的 URL: {0}")]
  InvalidUrl(#[from] url::ParseError),
  #[error("无法从 URL 推断文件名: {0}")]
  NoFileName(String),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[cfg(feature = "remote_fetch")]
  #[error("HTTP 请求失败: {0}")]
  HttpError(#[from] reqwest::Error),
  #[error("下载内容为空: {0}")]
  EmptyBody(String),
  #[error("未启用 remote_fetch 特性, 无法下载: {0}")]
  Disabled(String),
}

/// URL 文件来源解析后的位置
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedSource {
  /// 已下载到本地缓存
  Local(PathBuf),
  /// 由解码器直接打开的流式 URI（rtsp、rtmp）
  Uri(String),
}

/// 取 URL 路径最后一段并做百分号解码
pub fn file_name_from_url(url: &Url) -> Result<String, FetchError> {
  let last = url
    .path_segments()
    .and_then(|mut segments| segments.rfind(|s| !s.is_empty()))
    .ok_or_else(|| FetchError::NoFileName(url.to_string()))?;
  let decoded =
    urlencoding::decode(last).map_err(|_| FetchError::NoFileName(url.to_string()))?;
  let name = decoded
    .rsplit('/')
    .next()
    .and_then(|name| name.split('?').next())
    .unwrap_or_default();
  if name.is_empty() {
    return Err(FetchError::NoFileName(url.to_string()));
  }
  Ok(name.to_string())
}

pub fn resolve(source: &str, download_dir: &Path) -> Result<ResolvedSource, FetchError> {
  let url = Url::parse(source)?;
  match url.scheme() {
    "http" | "https" => download(&url, download_dir).map(ResolvedSource::Local),
    _ => Ok(ResolvedSource::Uri(source.to_string())),
  }
}

/// 下载到缓存目录；同名文件已存在时直接复用
pub fn download(url: &Url, download_dir: &Path) -> Result<PathBuf, FetchError> {
  let target = download_dir.join(file_name_from_url(url)?);
  if target.is_file() {
    info!("在本地找到 {}: {}", url, target.display());
    return Ok(target);
  }
  std::fs::create_dir_all(download_dir)?;
  fetch_into(url, &target)?;
  Ok(target)
}

#[cfg(feature = "remote_fetch")]
fn fetch_into(url: &Url, target: &Path) -> Result<(), FetchError> {
  info!("正在下载 {} 到 {}", url, target.display());
  let response = reqwest::blocking::get(url.as_str())?.error_for_status()?;
  let bytes = response.bytes()?;
  if bytes.is_empty() {
    return Err(FetchError::EmptyBody(url.to_string()));
  }

  let mut partial = target.as_os_str().to_owned();
  partial.push(".part");
  let partial = PathBuf::from(partial);
  std::fs::write(&partial, &bytes)?;
  std::fs::rename(&partial, target)?;
  info!("下载完成: {} ({} 字节)", target.display(), bytes.len());
  Ok(())
}

#[cfg(not(feature = "remote_fetch"))]
fn fetch_into(url: &Url, _target: &Path) -> Result<(), FetchError> {
  Err(FetchError::Disabled(url.to_string()))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn file_name_is_decoded_last_segment() {
    let url = Url::parse("https://example.com/media/my%20bus.jpg?sig=abc").unwrap();
    assert_eq!(file_name_from_url(&url).unwrap(), "my bus.jpg");

    let url = Url::parse("https://example.com/a/b/clip.mp4/").unwrap();
    assert_eq!(file_name_from_url(&url).unwrap(), "clip.mp4");

    let url = Url::parse("https://example.com/").unwrap();
    assert!(matches!(
      file_name_from_url(&url),
      Err(FetchError::NoFileName(_))
    ));
  }

  #[test]
  fn cached_file_is_reused() {
    let dir = tempfile::tempdir().unwrap();
    let cached = dir.path().join("bus.jpg");
    std::fs::write(&cached, b"cached").unwrap();

    let resolved = resolve("https://example.invalid/img/bus.jpg", dir.path()).unwrap();
    assert_eq!(resolved, ResolvedSource::Local(cached));
  }

  #[test]
  fn streaming_urls_are_not_downloaded() {
    let dir = tempfile::tempdir().unwrap();
    let resolved = resolve("rtsp://camera.local/record.mp4", dir.path()).unwrap();
    assert_eq!(
      resolved,
      ResolvedSource::Uri("rtsp://camera.local/record.mp4".to_string())
    );
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
  }
}
