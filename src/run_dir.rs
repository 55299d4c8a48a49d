// 该文件是 Xunjian （巡检） 项目的一部分。
// src/run_dir.rs - 运行目录分配
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
  io::{self, ErrorKind},
  path::{Path, PathBuf},
  time::{Duration, SystemTime},
};

use chrono::{DateTime, Local};
use tracing::{debug, info};

const MAX_SUFFIX: u32 = 9999;

/// 为每次检测分配 `exp`, `exp2`, `exp3`, ... 形式的新目录
///
/// 目录通过 `create_dir` 原子创建，并发调用不会拿到同一个目录。
#[derive(Debug, Clone)]
pub struct RunDirectoryAllocator {
  root: PathBuf,
  name: String,
}

impl RunDirectoryAllocator {
  pub fn new<P: Into<PathBuf>, S: Into<String>>(root: P, name: S) -> Self {
    Self {
      root: root.into(),
      name: name.into(),
    }
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  fn candidate(&self, n: u32) -> PathBuf {
    if n <= 1 {
      self.root.join(&self.name)
    } else {
      self.root.join(format!("{}{}", self.name, n))
    }
  }

  pub fn allocate(&self) -> io::Result<PathBuf> {
    std::fs::create_dir_all(&self.root)?;
    for n in 1..=MAX_SUFFIX {
      let candidate = self.candidate(n);
      match std::fs::create_dir(&candidate) {
        Ok(()) => {
          debug!("分配运行目录: {}", candidate.display());
          return Ok(candidate);
        }
        Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
        Err(e) => return Err(e),
      }
    }
    Err(io::Error::other(format!(
      "{} 下的运行目录编号已用尽",
      self.root.display()
    )))
  }

  fn is_run_dir_name(&self, file_name: &str) -> bool {
    file_name
      .strip_prefix(self.name.as_str())
      .is_some_and(|suffix| suffix.chars().all(|c| c.is_ascii_digit()))
  }

  /// 删除修改时间早于 `max_age` 之前的运行目录，返回被删除的目录
  pub fn prune_older_than(&self, max_age: Duration) -> io::Result<Vec<PathBuf>> {
    let mut removed = Vec::new();
    if !self.root.is_dir() {
      return Ok(removed);
    }
    let cutoff = SystemTime::now()
      .checked_sub(max_age)
      .unwrap_or(SystemTime::UNIX_EPOCH);

    for entry in std::fs::read_dir(&self.root)? {
      let entry = entry?;
      let file_name = entry.file_name();
      let Some(file_name) = file_name.to_str() else {
        continue;
      };
      let metadata = entry.metadata()?;
      if !metadata.is_dir() || !self.is_run_dir_name(file_name) {
        continue;
      }
      let modified = metadata.modified()?;
      if modified <= cutoff {
        let path = entry.path();
        std::fs::remove_dir_all(&path)?;
        let modified: DateTime<Local> = modified.into();
        info!(
          "清理过期运行目录: {} (修改于 {})",
          path.display(),
          modified.format("%Y-%m-%d %H:%M:%S")
        );
        removed.push(path);
      }
    }
    Ok(removed)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::collections::HashSet;

  #[test]
  fn sequential_allocation_increments_suffix() {
    let root = tempfile::tempdir().unwrap();
    let allocator = RunDirectoryAllocator::new(root.path().join("runs"), "exp");
    let first = allocator.allocate().unwrap();
    let second = allocator.allocate().unwrap();
    let third = allocator.allocate().unwrap();
    assert_eq!(first, root.path().join("runs/exp"));
    assert_eq!(second, root.path().join("runs/exp2"));
    assert_eq!(third, root.path().join("runs/exp3"));
    assert!(third.is_dir());
  }

  #[test]
  fn gaps_are_filled_first() {
    let root = tempfile::tempdir().unwrap();
    std::fs::create_dir(root.path().join("exp")).unwrap();
    std::fs::create_dir(root.path().join("exp3")).unwrap();
    let allocator = RunDirectoryAllocator::new(root.path(), "exp");
    assert_eq!(allocator.allocate().unwrap(), root.path().join("exp2"));
    assert_eq!(allocator.allocate().unwrap(), root.path().join("exp4"));
  }

  #[test]
  fn concurrent_allocation_never_collides() {
    let root = tempfile::tempdir().unwrap();
    let allocator = RunDirectoryAllocator::new(root.path(), "exp");
    let dirs: Vec<PathBuf> = std::thread::scope(|scope| {
      let handles: Vec<_> = (0..8)
        .map(|_| scope.spawn(|| allocator.allocate().unwrap()))
        .collect();
      handles.into_iter().map(|h| h.join().unwrap()).collect()
    });
    let unique: HashSet<_> = dirs.iter().collect();
    assert_eq!(unique.len(), 8);
  }

  #[test]
  fn prune_only_touches_run_directories() {
    let root = tempfile::tempdir().unwrap();
    let allocator = RunDirectoryAllocator::new(root.path(), "exp");
    allocator.allocate().unwrap();
    allocator.allocate().unwrap();
    std::fs::create_dir(root.path().join("keep")).unwrap();
    std::fs::create_dir(root.path().join("expert")).unwrap();

    let removed = allocator.prune_older_than(Duration::ZERO).unwrap();
    assert_eq!(removed.len(), 2);
    assert!(root.path().join("keep").is_dir());
    assert!(root.path().join("expert").is_dir());

    allocator.allocate().unwrap();
    let removed = allocator
      .prune_older_than(Duration::from_secs(3600))
      .unwrap();
    assert!(removed.is_empty());
  }
}
