// 该文件是 Xunjian （巡检） 项目的一部分。
// src/input/file_sequence.rs - 图像与视频文件序列
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

use std::{
  path::{Path, PathBuf},
  sync::Arc,
};

use tracing::{debug, info};

use super::{FrameSource, FrameSourceOptions, InputError, MediaBackend, VideoDecoder, decode_image};
use crate::{
  frame::{FrameBatch, FramePosition, FrameRecord, SourceMode},
  source::MediaKind,
};

/// 序列中的一个文件
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaEntry {
  /// 本地路径或远程地址
  pub location: String,
  pub kind: MediaKind,
}

impl MediaEntry {
  /// 输出文件名：位置的最后一段
  pub fn file_name(&self) -> String {
    let trimmed = self.location.trim_end_matches('/');
    let last = if trimmed.contains("://") {
      trimmed
        .split(['?', '#'])
        .next()
        .unwrap_or(trimmed)
        .rsplit('/')
        .next()
    } else {
      Path::new(trimmed).file_name().and_then(|name| name.to_str())
    };
    last.unwrap_or("media").to_string()
  }
}

/// `*` 匹配任意长度，`?` 匹配单个字符
pub fn wildcard_match(pattern: &str, name: &str) -> bool {
  let pattern: Vec<char> = pattern.chars().collect();
  let name: Vec<char> = name.chars().collect();
  let (mut p, mut n) = (0, 0);
  let mut backtrack: Option<(usize, usize)> = None;

  while n < name.len() {
    match pattern.get(p) {
      Some('*') => {
        backtrack = Some((p, n));
        p += 1;
      }
      Some(&c) if c == '?' || c == name[n] => {
        p += 1;
        n += 1;
      }
      _ => match backtrack {
        Some((star, matched)) => {
          p = star + 1;
          n = matched + 1;
          backtrack = Some((star, matched + 1));
        }
        None => return false,
      },
    }
  }
  pattern[p..].iter().all(|&c| c == '*')
}

fn read_sorted_dir(dir: &Path) -> Result<Vec<PathBuf>, InputError> {
  let listing_error = |source| InputError::ListingError {
    path: dir.display().to_string(),
    source,
  };
  let mut paths = Vec::new();
  for entry in std::fs::read_dir(dir).map_err(listing_error)? {
    let entry = entry.map_err(listing_error)?;
    if entry.file_type().map_err(listing_error)?.is_file() {
      paths.push(entry.path());
    }
  }
  paths.sort();
  Ok(paths)
}

fn entries_of(paths: Vec<PathBuf>) -> Vec<MediaEntry> {
  paths
    .into_iter()
    .filter_map(|path| {
      let kind = MediaKind::of_path(&path)?;
      Some(MediaEntry {
        location: path.to_string_lossy().into_owned(),
        kind,
      })
    })
    .collect()
}

/// 展开文件、目录或通配符，按文件名排序；图像在前，视频在后
pub fn list_media(location: &str) -> Result<Vec<MediaEntry>, InputError> {
  if location.contains("://") {
    let kind = crate::source::classify(location)
      .media_kind()
      .ok_or_else(|| InputError::NoMedia(location.to_string()))?;
    return Ok(vec![MediaEntry {
      location: location.to_string(),
      kind,
    }]);
  }

  let path = Path::new(location);
  let pattern = path
    .file_name()
    .and_then(|name| name.to_str())
    .filter(|name| name.contains('*') || name.contains('?'));

  let mut entries = if let Some(pattern) = pattern {
    let parent = match path.parent() {
      Some(parent) if !parent.as_os_str().is_empty() => parent,
      _ => Path::new("."),
    };
    let matched = read_sorted_dir(parent)?
      .into_iter()
      .filter(|p| {
        p.file_name()
          .and_then(|name| name.to_str())
          .is_some_and(|name| wildcard_match(pattern, name))
      })
      .collect();
    entries_of(matched)
  } else if path.is_dir() {
    entries_of(read_sorted_dir(path)?)
  } else if path.is_file() {
    entries_of(vec![path.to_path_buf()])
  } else {
    return Err(InputError::NoMedia(format!("{} 不存在", location)));
  };

  if entries.is_empty() {
    return Err(InputError::NoMedia(location.to_string()));
  }
  entries.sort_by_key(|entry| entry.kind == MediaKind::Video);
  debug!("展开 {} 得到 {} 个文件", location, entries.len());
  Ok(entries)
}

struct ActiveVideo {
  entry: MediaEntry,
  decoder: Box<dyn VideoDecoder>,
  /// 已解码的帧数
  decoded: u64,
  exhausted: bool,
}

impl ActiveVideo {
  /// 取下一帧并跳过 `stride - 1` 帧，返回帧与其帧号
  fn advance(&mut self, stride: usize) -> Result<Option<(image::RgbImage, u64)>, InputError> {
    if self.exhausted {
      return Ok(None);
    }
    let Some(frame) = self.decoder.next_frame()? else {
      self.exhausted = true;
      return Ok(None);
    };
    self.decoded += 1;
    let frame_number = self.decoded;

    for _ in 1..stride {
      if self.decoder.next_frame()?.is_some() {
        self.decoded += 1;
      } else {
        self.exhausted = true;
        break;
      }
    }
    Ok(Some((frame, frame_number)))
  }
}

/// 依次读取图像和视频文件，每批一条记录
pub struct FileSequence {
  entries: Vec<MediaEntry>,
  cursor: usize,
  active: Option<ActiveVideo>,
  options: FrameSourceOptions,
  backend: Arc<dyn MediaBackend>,
  failed: bool,
}

impl FileSequence {
  pub fn new(
    entries: Vec<MediaEntry>,
    options: FrameSourceOptions,
    backend: Arc<dyn MediaBackend>,
  ) -> Self {
    Self {
      entries,
      cursor: 0,
      active: None,
      options,
      backend,
      failed: false,
    }
  }

  pub fn entries(&self) -> &[MediaEntry] {
    &self.entries
  }

  fn read_image(&self, entry: &MediaEntry) -> Result<FrameBatch, InputError> {
    let image = decode_image(Path::new(&entry.location))?;
    let tensor = self.options.letterbox.apply(&image);
    Ok(FrameBatch::single(FrameRecord {
      stream_index: 0,
      path: entry.location.clone(),
      name: entry.file_name(),
      tensor,
      image,
      capture: None,
      mode: SourceMode::Image,
      position: FramePosition {
        item: self.cursor,
        items: self.entries.len(),
        frame: None,
        frames: None,
      },
    }))
  }

  fn next_video_frame(&mut self) -> Option<Result<FrameBatch, InputError>> {
    let stride = self.options.frame_stride.max(1);
    let active = self.active.as_mut()?;
    match active.advance(stride) {
      Ok(Some((image, frame_number))) => {
        let capture = active.decoder.capture();
        Some(Ok(FrameBatch::single(FrameRecord {
          stream_index: 0,
          path: active.entry.location.clone(),
          name: active.entry.file_name(),
          tensor: self.options.letterbox.apply(&image),
          image,
          capture: Some(capture),
          mode: SourceMode::Video,
          position: FramePosition {
            item: self.cursor,
            items: self.entries.len(),
            frame: Some(frame_number),
            frames: capture.frames,
          },
        })))
      }
      Ok(None) => {
        info!(
          "视频读取结束: {} (共解码 {} 帧)",
          active.entry.location, active.decoded
        );
        self.active = None;
        None
      }
      Err(e) => {
        self.active = None;
        Some(Err(e))
      }
    }
  }
}

impl Iterator for FileSequence {
  type Item = Result<FrameBatch, InputError>;

  fn next(&mut self) -> Option<Self::Item> {
    if self.failed {
      return None;
    }
    let item = loop {
      if self.active.is_some() {
        if let Some(item) = self.next_video_frame() {
          break item;
        }
        continue;
      }

      let entry = self.entries.get(self.cursor)?.clone();
      self.cursor += 1;
      match entry.kind {
        MediaKind::Image => break self.read_image(&entry),
        MediaKind::Video => match self.backend.open_video(&entry.location) {
          Ok(decoder) => {
            info!("打开视频: {}", entry.location);
            self.active = Some(ActiveVideo {
              entry,
              decoder,
              decoded: 0,
              exhausted: false,
            });
          }
          Err(e) => break Err(e),
        },
      }
    };
    self.failed = item.is_err();
    Some(item)
  }
}

impl FrameSource for FileSequence {
  fn stream_count(&self) -> usize {
    1
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::input::testing::{SyntheticBackend, options};

  fn write_png(dir: &Path, name: &str, size: (u32, u32)) {
    image::RgbImage::from_pixel(size.0, size.1, image::Rgb([9, 9, 9]))
      .save(dir.join(name))
      .unwrap();
  }

  #[test]
  fn wildcard_patterns() {
    assert!(wildcard_match("*.jpg", "cat.jpg"));
    assert!(wildcard_match("img_??.png", "img_01.png"));
    assert!(!wildcard_match("img_??.png", "img_1.png"));
    assert!(wildcard_match("*a*b*", "xxaybzz"));
    assert!(!wildcard_match("*.jpg", "cat.jpeg"));
    assert!(wildcard_match("*", ""));
  }

  #[test]
  fn file_names_from_paths_and_urls() {
    let local = MediaEntry {
      location: "/data/in/cat.jpg".into(),
      kind: MediaKind::Image,
    };
    assert_eq!(local.file_name(), "cat.jpg");
    let remote = MediaEntry {
      location: "rtsp://cam.local/live/clip.mp4?token=1".into(),
      kind: MediaKind::Video,
    };
    assert_eq!(remote.file_name(), "clip.mp4");
  }

  #[test]
  fn directory_listing_is_sorted_and_filtered() {
    let dir = tempfile::tempdir().unwrap();
    for name in ["b.png", "a.png", "c.mp4", "notes.txt"] {
      std::fs::write(dir.path().join(name), b"x").unwrap();
    }
    let entries = list_media(dir.path().to_str().unwrap()).unwrap();
    let names: Vec<_> = entries.iter().map(MediaEntry::file_name).collect();
    assert_eq!(names, ["a.png", "b.png", "c.mp4"]);
    assert_eq!(entries[2].kind, MediaKind::Video);
  }

  #[test]
  fn glob_listing_matches_file_names() {
    let dir = tempfile::tempdir().unwrap();
    for name in ["x1.jpg", "x2.jpg", "y.jpg"] {
      std::fs::write(dir.path().join(name), b"x").unwrap();
    }
    let glob = dir.path().join("x*.jpg");
    let entries = list_media(glob.to_str().unwrap()).unwrap();
    assert_eq!(entries.len(), 2);
  }

  #[test]
  fn empty_and_missing_listings_fail() {
    let dir = tempfile::tempdir().unwrap();
    assert!(matches!(
      list_media(dir.path().to_str().unwrap()),
      Err(InputError::NoMedia(_))
    ));
    let missing = dir.path().join("gone.png");
    assert!(matches!(
      list_media(missing.to_str().unwrap()),
      Err(InputError::NoMedia(_))
    ));
  }

  #[test]
  fn images_then_video_frames_with_stride() {
    let dir = tempfile::tempdir().unwrap();
    write_png(dir.path(), "a.png", (20, 10));
    std::fs::write(dir.path().join("clip.mp4"), b"fake").unwrap();

    let entries = list_media(dir.path().to_str().unwrap()).unwrap();
    let backend = Arc::new(SyntheticBackend::new(7, (32, 24)));
    let sequence = FileSequence::new(entries, options(3), backend);
    let batches: Vec<_> = sequence.map(|b| b.unwrap()).collect();

    assert_eq!(batches.len(), 1 + 3);
    let image = &batches[0].records[0];
    assert_eq!(image.mode, SourceMode::Image);
    assert_eq!(image.position.item, 1);
    assert_eq!(image.image.dimensions(), (20, 10));

    let frames: Vec<_> = batches[1..]
      .iter()
      .map(|b| b.records[0].position.frame.unwrap())
      .collect();
    assert_eq!(frames, [1, 4, 7]);
    assert!(batches[1..].iter().all(|b| b.records[0].name == "clip.mp4"));
    assert_eq!(batches[1].records[0].position.frames, Some(7));
  }

  #[test]
  fn decode_failure_stops_sequence() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("a.png"), b"broken").unwrap();
    write_png(dir.path(), "b.png", (4, 4));
    let entries = list_media(dir.path().to_str().unwrap()).unwrap();
    let mut sequence = FileSequence::new(entries, options(1), Arc::new(SyntheticBackend::new(0, (2, 2))));
    assert!(sequence.next().unwrap().is_err());
    assert!(sequence.next().is_none());
  }

  #[test]
  fn empty_video_yields_nothing() {
    let entries = vec![MediaEntry {
      location: "empty.mp4".into(),
      kind: MediaKind::Video,
    }];
    let mut sequence = FileSequence::new(entries, options(1), Arc::new(SyntheticBackend::new(0, (8, 8))));
    assert!(sequence.next().is_none());
  }
}
