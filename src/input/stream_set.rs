// 该文件是 Xunjian （巡检） 项目的一部分。
// src/input/stream_set.rs - 摄像头与网络直播流
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

//! # 直播流
//!
//! 来源可以是摄像头编号、设备路径、网络地址，或每行一个地址的
//! `.streams` 列表文件。每次迭代从所有流各取一帧组成一个批次，
//! 任意一路结束时整个集合结束。

use std::{
  collections::HashMap,
  fmt,
  path::{Path, PathBuf},
  sync::Arc,
};

use tracing::{info, warn};
use url::Url;

use super::{FrameSource, FrameSourceOptions, InputError, MediaBackend, VideoDecoder};
use crate::{
  FromUrl,
  frame::{CaptureInfo, FrameBatch, FramePosition, FrameRecord, Letterbox, SourceMode},
};

const STREAMS_SUFFIX: &str = ".streams";
const NETWORK_SCHEMES: [&str; 4] = ["rtsp", "rtmp", "http", "https"];
const DEVICE_SCHEMES: [&str; 2] = ["v4l2", "file"];

/// 单路直播来源
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamTarget {
  /// 本地摄像头编号
  Camera(u32),
  /// 设备文件，如 `/dev/video2`
  Device(PathBuf),
  Network(String),
}

impl FromUrl for StreamTarget {
  type Error = InputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    let scheme = url.scheme();
    if NETWORK_SCHEMES.contains(&scheme) {
      Ok(StreamTarget::Network(url.to_string()))
    } else if DEVICE_SCHEMES.contains(&scheme) && !url.path().is_empty() {
      Ok(StreamTarget::Device(PathBuf::from(url.path())))
    } else {
      Err(InputError::SchemeMismatch(url.to_string()))
    }
  }
}

impl StreamTarget {
  pub fn parse(line: &str) -> Result<Self, InputError> {
    let line = line.trim();
    if !line.is_empty() && line.chars().all(|c| c.is_ascii_digit()) {
      return line
        .parse()
        .map(StreamTarget::Camera)
        .map_err(|_| InputError::InvalidStream(line.to_string()));
    }
    if line.starts_with("/dev/") {
      return Ok(StreamTarget::Device(PathBuf::from(line)));
    }
    let url = Url::parse(line).map_err(|_| InputError::InvalidStream(line.to_string()))?;
    Self::from_url(&url)
  }

  /// 输出文件名（不含扩展名）
  pub fn output_stem(&self) -> String {
    match self {
      StreamTarget::Camera(index) => index.to_string(),
      StreamTarget::Device(path) => path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("device")
        .to_string(),
      StreamTarget::Network(address) => Url::parse(address)
        .ok()
        .and_then(|url| {
          let segment = url
            .path_segments()
            .and_then(|segments| segments.filter(|s| !s.is_empty()).last().map(str::to_string));
          segment.or_else(|| url.host_str().map(str::to_string))
        })
        .unwrap_or_else(|| "stream".to_string()),
    }
  }

  /// 摄像头的设备路径
  pub fn device_path(&self) -> Option<PathBuf> {
    match self {
      StreamTarget::Camera(index) => Some(PathBuf::from(format!("/dev/video{}", index))),
      StreamTarget::Device(path) => Some(path.clone()),
      StreamTarget::Network(_) => None,
    }
  }
}

impl fmt::Display for StreamTarget {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      StreamTarget::Camera(index) => write!(f, "{}", index),
      StreamTarget::Device(path) => write!(f, "{}", path.display()),
      StreamTarget::Network(address) => f.write_str(address),
    }
  }
}

/// 读取 `.streams` 列表，或把单个地址当作一路流
pub fn read_stream_list(location: &str) -> Result<Vec<StreamTarget>, InputError> {
  let path = Path::new(location);
  if !location.ends_with(STREAMS_SUFFIX) || !path.is_file() {
    return Ok(vec![StreamTarget::parse(location)?]);
  }

  let content = std::fs::read_to_string(path).map_err(|source| InputError::ListingError {
    path: location.to_string(),
    source,
  })?;
  let targets = content
    .lines()
    .map(str::trim)
    .filter(|line| !line.is_empty())
    .map(StreamTarget::parse)
    .collect::<Result<Vec<_>, _>>()?;
  if targets.is_empty() {
    return Err(InputError::EmptyStreamList(location.to_string()));
  }
  Ok(targets)
}

/// 重复的名字追加 `_<序号>` 后缀
pub fn unique_names(targets: &[StreamTarget]) -> Vec<String> {
  let stems: Vec<String> = targets.iter().map(StreamTarget::output_stem).collect();
  let mut counts: HashMap<&str, usize> = HashMap::new();
  for stem in &stems {
    *counts.entry(stem.as_str()).or_default() += 1;
  }
  stems
    .iter()
    .enumerate()
    .map(|(index, stem)| {
      if counts[stem.as_str()] > 1 {
        format!("{}_{}", stem, index)
      } else {
        stem.clone()
      }
    })
    .collect()
}

#[cfg(feature = "v4l_probe")]
fn probe_device(path: &Path) -> Option<CaptureInfo> {
  use v4l::video::Capture;

  let device = v4l::Device::with_path(path).ok()?;
  let format = device.format().ok()?;
  let fps = device.params().ok().and_then(|params| {
    let interval = params.interval;
    (interval.numerator > 0).then(|| interval.denominator as f64 / interval.numerator as f64)
  });
  Some(CaptureInfo {
    fps,
    width: format.width,
    height: format.height,
    frames: None,
  })
}

#[cfg(not(feature = "v4l_probe"))]
fn probe_device(_path: &Path) -> Option<CaptureInfo> {
  None
}

struct LiveStream {
  target: StreamTarget,
  name: String,
  decoder: Box<dyn VideoDecoder>,
  /// 设备自报的帧率，解码器未给出时使用
  probed_fps: Option<f64>,
  /// 打开时预读的第一帧
  pending: Option<image::RgbImage>,
}

impl LiveStream {
  fn capture(&self) -> CaptureInfo {
    let mut capture = self.decoder.capture();
    if capture.fps.is_none() {
      capture.fps = self.probed_fps;
    }
    capture
  }
}

pub struct StreamSet {
  streams: Vec<LiveStream>,
  letterbox: Letterbox,
  stride: usize,
  emitted: u64,
}

impl StreamSet {
  pub fn open(
    location: &str,
    options: FrameSourceOptions,
    backend: Arc<dyn MediaBackend>,
  ) -> Result<Self, InputError> {
    let targets = read_stream_list(location)?;
    let names = unique_names(&targets);

    let mut streams = Vec::with_capacity(targets.len());
    for (target, name) in targets.into_iter().zip(names) {
      let probed_fps = target
        .device_path()
        .and_then(|path| probe_device(&path))
        .and_then(|info| info.fps);
      let mut decoder = backend.open_stream(&target)?;
      let pending = decoder.next_frame()?;
      match &pending {
        Some(frame) => info!(
          "打开直播流 {}: {} ({}x{})",
          name,
          target,
          frame.width(),
          frame.height()
        ),
        None => warn!("直播流 {} 没有读到任何帧: {}", name, target),
      }
      streams.push(LiveStream {
        target,
        name,
        decoder,
        probed_fps,
        pending,
      });
    }

    // 解码器在取到第一帧前未必知道分辨率，按预读的帧比较
    let mut letterbox = options.letterbox;
    let mut shapes = streams
      .iter()
      .filter_map(|s| s.pending.as_ref().map(|f| f.dimensions()));
    let first = shapes.next();
    let same_shape = shapes.all(|shape| Some(shape) == first);
    if !same_shape {
      warn!("各路流的分辨率不同, 将按固定尺寸 letterbox; 相同尺寸的流性能更好");
      letterbox.auto = false;
    }

    Ok(Self {
      streams,
      letterbox,
      stride: options.frame_stride.max(1),
      emitted: 0,
    })
  }

  /// 是否按 stride 对齐的最小尺寸 letterbox
  pub fn letterbox_auto(&self) -> bool {
    self.letterbox.auto
  }

  pub fn names(&self) -> Vec<&str> {
    self.streams.iter().map(|s| s.name.as_str()).collect()
  }

  fn grab(stream: &mut LiveStream, stride: usize) -> Result<Option<image::RgbImage>, InputError> {
    let frame = match stream.pending.take() {
      Some(frame) => frame,
      None => match stream.decoder.next_frame()? {
        Some(frame) => frame,
        None => return Ok(None),
      },
    };
    for _ in 1..stride {
      if stream.decoder.next_frame()?.is_none() {
        break;
      }
    }
    Ok(Some(frame))
  }
}

impl Iterator for StreamSet {
  type Item = Result<FrameBatch, InputError>;

  fn next(&mut self) -> Option<Self::Item> {
    let count = self.streams.len();
    let mut records = Vec::with_capacity(count);
    self.emitted += 1;

    for (index, stream) in self.streams.iter_mut().enumerate() {
      let frame = match Self::grab(stream, self.stride) {
        Ok(Some(frame)) => frame,
        Ok(None) => {
          info!("直播流已结束: {}", stream.target);
          return None;
        }
        Err(e) => return Some(Err(e)),
      };
      records.push(FrameRecord {
        stream_index: index,
        path: stream.target.to_string(),
        name: stream.name.clone(),
        tensor: self.letterbox.apply(&frame),
        image: frame,
        capture: Some(stream.capture()),
        mode: SourceMode::Stream,
        position: FramePosition {
          item: index + 1,
          items: count,
          frame: Some(self.emitted),
          frames: None,
        },
      });
    }
    Some(Ok(FrameBatch { records }))
  }
}

impl FrameSource for StreamSet {
  fn stream_count(&self) -> usize {
    self.streams.len()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::input::testing::{SyntheticBackend, options};

  #[test]
  fn parses_targets() {
    assert_eq!(StreamTarget::parse("0").unwrap(), StreamTarget::Camera(0));
    assert_eq!(
      StreamTarget::parse("/dev/video2").unwrap(),
      StreamTarget::Device("/dev/video2".into())
    );
    assert_eq!(
      StreamTarget::parse("v4l2:///dev/video1").unwrap(),
      StreamTarget::Device("/dev/video1".into())
    );
    assert!(matches!(
      StreamTarget::parse("rtsp://10.0.0.2:554/live").unwrap(),
      StreamTarget::Network(_)
    ));
    assert!(matches!(
      StreamTarget::parse("ftp://host/x"),
      Err(InputError::SchemeMismatch(_))
    ));
    assert!(matches!(
      StreamTarget::parse("not a stream"),
      Err(InputError::InvalidStream(_))
    ));
  }

  #[test]
  fn output_stems() {
    assert_eq!(StreamTarget::Camera(3).output_stem(), "3");
    assert_eq!(
      StreamTarget::parse("rtsp://cam.local/live/front/").unwrap().output_stem(),
      "front"
    );
    assert_eq!(
      StreamTarget::parse("rtmp://cam.local").unwrap().output_stem(),
      "cam.local"
    );
  }

  #[test]
  fn duplicate_names_get_index_suffix() {
    let targets = vec![
      StreamTarget::parse("rtsp://a/live").unwrap(),
      StreamTarget::parse("rtsp://b/live").unwrap(),
      StreamTarget::Camera(0),
    ];
    assert_eq!(unique_names(&targets), ["live_0", "live_1", "0"]);
  }

  #[test]
  fn stream_list_file() {
    let dir = tempfile::tempdir().unwrap();
    let list = dir.path().join("cams.streams");
    std::fs::write(&list, "0\n\n  rtsp://host/a  \n").unwrap();
    let targets = read_stream_list(list.to_str().unwrap()).unwrap();
    assert_eq!(targets.len(), 2);

    let empty = dir.path().join("empty.streams");
    std::fs::write(&empty, "\n \n").unwrap();
    assert!(matches!(
      read_stream_list(empty.to_str().unwrap()),
      Err(InputError::EmptyStreamList(_))
    ));
  }

  #[test]
  fn batches_hold_one_record_per_stream() {
    let dir = tempfile::tempdir().unwrap();
    let list = dir.path().join("two.streams");
    std::fs::write(&list, "rtsp://a/x\nrtsp://b/y\n").unwrap();
    let backend = Arc::new(SyntheticBackend::new(4, (32, 32)));
    let set = StreamSet::open(list.to_str().unwrap(), options(2), backend).unwrap();
    assert_eq!(set.stream_count(), 2);
    assert_eq!(set.names(), ["x", "y"]);

    let batches: Vec<_> = set.map(|b| b.unwrap()).collect();
    assert_eq!(batches.len(), 2);
    assert_eq!(batches[0].len(), 2);
    assert_eq!(batches[1].records[1].stream_index, 1);
    assert_eq!(batches[1].records[0].position.frame, Some(2));
  }

  /// 打开时报告 0x0，取帧后才有真实尺寸的解码器
  struct LateSizeDecoder {
    size: (u32, u32),
    remaining: u64,
  }

  impl VideoDecoder for LateSizeDecoder {
    fn capture(&self) -> CaptureInfo {
      CaptureInfo {
        fps: None,
        width: 0,
        height: 0,
        frames: None,
      }
    }

    fn next_frame(&mut self) -> Result<Option<image::RgbImage>, InputError> {
      if self.remaining == 0 {
        return Ok(None);
      }
      self.remaining -= 1;
      Ok(Some(image::RgbImage::new(self.size.0, self.size.1)))
    }
  }

  struct MixedSizeBackend {
    sizes: Vec<(u32, u32)>,
    opened: std::sync::Mutex<usize>,
  }

  impl MediaBackend for MixedSizeBackend {
    fn open_video(&self, location: &str) -> Result<Box<dyn VideoDecoder>, InputError> {
      Err(InputError::BackendUnavailable(location.to_string()))
    }

    fn open_stream(&self, _target: &StreamTarget) -> Result<Box<dyn VideoDecoder>, InputError> {
      let mut opened = self.opened.lock().unwrap();
      let size = self.sizes[*opened % self.sizes.len()];
      *opened += 1;
      Ok(Box::new(LateSizeDecoder { size, remaining: 3 }))
    }

    fn open_screen(
      &self,
      region: &crate::input::ScreenRegion,
    ) -> Result<Box<dyn VideoDecoder>, InputError> {
      Err(InputError::BackendUnavailable(region.to_string()))
    }
  }

  fn mixed_set(sizes: Vec<(u32, u32)>) -> StreamSet {
    let dir = tempfile::tempdir().unwrap();
    let list = dir.path().join("mixed.streams");
    std::fs::write(&list, "rtsp://a/x\nrtsp://b/y\n").unwrap();
    let backend = Arc::new(MixedSizeBackend {
      sizes,
      opened: std::sync::Mutex::new(0),
    });
    StreamSet::open(list.to_str().unwrap(), options(1), backend).unwrap()
  }

  #[test]
  fn different_sizes_fall_back_to_fixed_letterbox() {
    let set = mixed_set(vec![(64, 48), (40, 96)]);
    assert!(!set.letterbox_auto());

    let batches: Vec<_> = set.map(|b| b.unwrap()).collect();
    assert_eq!(batches.len(), 3);
    for batch in &batches {
      let shapes: Vec<_> = batch
        .records
        .iter()
        .map(|r| (r.tensor.height(), r.tensor.width()))
        .collect();
      assert_eq!(shapes, [(64, 64), (64, 64)]);
    }
  }

  #[test]
  fn equal_sizes_keep_auto_letterbox() {
    let set = mixed_set(vec![(64, 48)]);
    assert!(set.letterbox_auto());
    assert_eq!(set.count(), 3);
  }
}
