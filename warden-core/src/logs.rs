//! Per-daemon log files with bounded rotation
//!
//! Each daemon's stdout/stderr is redirected into an append-only file
//! at `<log_root>/<app>/<daemon>.log`. There is no resident process to
//! rotate on a timer, so rotation happens when a handle is opened for a
//! new spawn: a live segment over the size or age threshold is shifted
//! to `.log.1`, existing segments shift up, and segments beyond the
//! keep count are pruned.
//!
//! Logging faults are best-effort by contract: the supervisor falls
//! back to null redirection rather than refusing to start a daemon.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tracing::{debug, warn};

use crate::config::SupervisorConfig;
use crate::state::DaemonKey;

/// Read at most this much from the end of a log file when tailing.
const TAIL_CHUNK_BYTES: u64 = 64 * 1024;

#[derive(Debug, Clone)]
pub struct LogManager {
    root: PathBuf,
    max_size: u64,
    max_age: Duration,
    keep_segments: u32,
}

impl LogManager {
    pub fn new(root: impl Into<PathBuf>, config: &SupervisorConfig) -> Self {
        Self {
            root: root.into(),
            max_size: config.log_max_size,
            max_age: config.log_max_age,
            keep_segments: config.log_keep_segments,
        }
    }

    /// Path of the live log segment for a daemon.
    pub fn log_path(&self, key: &DaemonKey) -> PathBuf {
        self.root.join(&key.app).join(format!("{}.log", key.daemon))
    }

    /// Open an append handle for a fresh spawn, rotating first if the
    /// live segment is over the size or age threshold.
    pub fn open_for_write(&self, key: &DaemonKey) -> std::io::Result<File> {
        let path = self.log_path(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        if let Err(e) = self.maybe_rotate(&path) {
            // Rotation failure must not block the daemon.
            warn!("Log rotation for {} failed: {}", key, e);
        }
        OpenOptions::new().create(true).append(true).open(path)
    }

    /// Last `lines` lines of the live segment, reading at most the
    /// trailing 64 KiB. A missing log file is an empty history.
    pub fn tail(&self, key: &DaemonKey, lines: usize) -> std::io::Result<Vec<String>> {
        let path = self.log_path(key);
        if !path.exists() {
            return Ok(Vec::new());
        }

        let mut file = File::open(&path)?;
        let size = file.seek(SeekFrom::End(0))?;
        let read_size = size.min(TAIL_CHUNK_BYTES);
        file.seek(SeekFrom::End(-(read_size as i64)))?;

        let mut chunk = Vec::with_capacity(read_size as usize);
        file.read_to_end(&mut chunk)?;
        let text = String::from_utf8_lossy(&chunk);

        let mut all: Vec<String> = text.lines().map(str::to_string).collect();
        // The first line may be cut mid-way when the chunk starts inside
        // the file.
        if read_size < size && !all.is_empty() {
            all.remove(0);
        }
        let skip = all.len().saturating_sub(lines);
        Ok(all.split_off(skip))
    }

    fn maybe_rotate(&self, path: &Path) -> std::io::Result<()> {
        let Ok(meta) = fs::metadata(path) else {
            return Ok(()); // no live segment yet
        };

        let over_size = meta.len() >= self.max_size;
        let over_age = segment_age(&meta).is_some_and(|age| age >= self.max_age);
        if !over_size && !over_age {
            return Ok(());
        }

        debug!(
            "Rotating log {:?} (size {} bytes, over_size={}, over_age={})",
            path,
            meta.len(),
            over_size,
            over_age
        );

        // Shift segments up, pruning the oldest.
        let segment = |n: u32| PathBuf::from(format!("{}.{}", path.display(), n));
        let last = segment(self.keep_segments);
        if last.exists() {
            fs::remove_file(&last)?;
        }
        for n in (1..self.keep_segments).rev() {
            let from = segment(n);
            if from.exists() {
                fs::rename(&from, segment(n + 1))?;
            }
        }
        if self.keep_segments > 0 {
            fs::rename(path, segment(1))?;
        } else {
            fs::remove_file(path)?;
        }
        Ok(())
    }
}

/// Age of the live segment, preferring creation time where the
/// filesystem records it.
fn segment_age(meta: &fs::Metadata) -> Option<Duration> {
    let reference = meta.created().or_else(|_| meta.modified()).ok()?;
    SystemTime::now().duration_since(reference).ok()
}
