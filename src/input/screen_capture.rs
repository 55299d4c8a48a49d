// 该文件是 Xunjian （巡检） 项目的一部分。
// src/input/screen_capture.rs - 屏幕截图来源
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

use std::{fmt, str::FromStr, sync::Arc};

use tracing::info;

use super::{FrameSource, FrameSourceOptions, InputError, MediaBackend, VideoDecoder};
use crate::frame::{FrameBatch, FramePosition, FrameRecord, Letterbox, SourceMode};

/// 截图区域
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ScreenRegion {
  pub screen: u32,
  pub left: Option<i32>,
  pub top: Option<i32>,
  pub width: Option<u32>,
  pub height: Option<u32>,
}

impl ScreenRegion {
  pub fn is_full_screen(&self) -> bool {
    self.width.is_none() || self.height.is_none()
  }
}

/// 支持 `screen`、`screen <n>`、`screen <left> <top> <width> <height>`
/// 以及 `screen <n> <left> <top> <width> <height>`
impl FromStr for ScreenRegion {
  type Err = InputError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let invalid = || InputError::InvalidScreen(s.to_string());
    let mut tokens = s.split_whitespace();
    if !tokens
      .next()
      .is_some_and(|head| head.eq_ignore_ascii_case("screen"))
    {
      return Err(invalid());
    }
    let params: Vec<i64> = tokens
      .map(|t| t.parse::<i64>().map_err(|_| invalid()))
      .collect::<Result<_, _>>()?;

    let screen = |v: i64| u32::try_from(v).map_err(|_| invalid());
    let coord = |v: i64| i32::try_from(v).map_err(|_| invalid());
    let extent = |v: i64| u32::try_from(v).ok().filter(|&e| e > 0).ok_or_else(invalid);

    match params.as_slice() {
      [] => Ok(Self::default()),
      [n] => Ok(Self {
        screen: screen(*n)?,
        ..Self::default()
      }),
      [l, t, w, h] => Ok(Self {
        screen: 0,
        left: Some(coord(*l)?),
        top: Some(coord(*t)?),
        width: Some(extent(*w)?),
        height: Some(extent(*h)?),
      }),
      [n, l, t, w, h] => Ok(Self {
        screen: screen(*n)?,
        left: Some(coord(*l)?),
        top: Some(coord(*t)?),
        width: Some(extent(*w)?),
        height: Some(extent(*h)?),
      }),
      _ => Err(invalid()),
    }
  }
}

impl fmt::Display for ScreenRegion {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "screen {}", self.screen)?;
    if let (Some(w), Some(h)) = (self.width, self.height) {
      write!(
        f,
        " {} {} {} {}",
        self.left.unwrap_or(0),
        self.top.unwrap_or(0),
        w,
        h
      )?;
    }
    Ok(())
  }
}

pub struct ScreenCapture {
  region: ScreenRegion,
  decoder: Box<dyn VideoDecoder>,
  letterbox: Letterbox,
  stride: usize,
  emitted: u64,
}

impl ScreenCapture {
  pub fn open(
    region: ScreenRegion,
    options: FrameSourceOptions,
    backend: Arc<dyn MediaBackend>,
  ) -> Result<Self, InputError> {
    let decoder = backend.open_screen(&region)?;
    info!("开始截取屏幕: {}", region);
    Ok(Self {
      region,
      decoder,
      letterbox: options.letterbox,
      stride: options.frame_stride.max(1),
      emitted: 0,
    })
  }

  pub fn region(&self) -> &ScreenRegion {
    &self.region
  }

  fn name(&self) -> String {
    format!("screen{}", self.region.screen)
  }
}

impl Iterator for ScreenCapture {
  type Item = Result<FrameBatch, InputError>;

  fn next(&mut self) -> Option<Self::Item> {
    let frame = match self.decoder.next_frame() {
      Ok(Some(frame)) => frame,
      Ok(None) => return None,
      Err(e) => return Some(Err(e)),
    };
    for _ in 1..self.stride {
      match self.decoder.next_frame() {
        Ok(Some(_)) => {}
        Ok(None) => break,
        Err(e) => return Some(Err(e)),
      }
    }
    self.emitted += 1;

    let mut capture = self.decoder.capture();
    // 截屏没有固有帧率
    capture.fps = None;
    Some(Ok(FrameBatch::single(FrameRecord {
      stream_index: 0,
      path: self.region.to_string(),
      name: self.name(),
      tensor: self.letterbox.apply(&frame),
      image: frame,
      capture: Some(capture),
      mode: SourceMode::Stream,
      position: FramePosition {
        item: 1,
        items: 1,
        frame: Some(self.emitted),
        frames: None,
      },
    })))
  }
}

impl FrameSource for ScreenCapture {
  fn stream_count(&self) -> usize {
    1
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parses_screen_arguments() {
    assert_eq!("screen".parse::<ScreenRegion>().unwrap(), ScreenRegion::default());
    assert_eq!("screen 2".parse::<ScreenRegion>().unwrap().screen, 2);

    let region: ScreenRegion = "screen 10 20 640 480".parse().unwrap();
    assert_eq!(region.screen, 0);
    assert_eq!((region.left, region.top), (Some(10), Some(20)));
    assert_eq!((region.width, region.height), (Some(640), Some(480)));

    let region: ScreenRegion = "screen 1 0 0 800 600".parse().unwrap();
    assert_eq!(region.screen, 1);
    assert!(!region.is_full_screen());
    assert_eq!(region.to_string(), "screen 1 0 0 800 600");
  }

  #[test]
  fn rejects_bad_screen_arguments() {
    for bad in ["screen 1 2", "screen a", "screen 0 0 0 0 100", "monitor 1", "screen -1"] {
      assert!(
        matches!(bad.parse::<ScreenRegion>(), Err(InputError::InvalidScreen(_))),
        "{bad}"
      );
    }
  }
}
