//! Shard Store - Multi-Process Snapshot Files
//!
//! Each process writes its current snapshot of a job to
//! `<dir>/<job>/<pid>.json` using atomic writes (write to a tmp file,
//! then rename), so readers always see either the old or the new
//! snapshot. Renders merge every process's shard.
//!
//! Shards of processes that are no longer running are deleted when
//! encountered, and a process clears its own shards on graceful shutdown.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::domain::metric::MetricSet;

const SHARD_EXTENSION: &str = "json";

/// On-disk shard.
#[derive(Debug, Serialize, Deserialize)]
struct Shard {
    job: String,
    pid: u32,
    metrics: MetricSet,
}

/// Per-process snapshot files under a shared directory.
#[derive(Debug, Clone)]
pub struct ShardStore {
    /// Shared shard directory.
    root: PathBuf,
    /// This process's id.
    pid: u32,
    /// Whether a writer pid is still running.
    alive: fn(u32) -> bool,
}

/// Whether process `pid` is still running.
#[cfg(unix)]
pub fn process_alive(pid: u32) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    // EPERM still means the process exists.
    !matches!(kill(Pid::from_raw(raw), None::<Signal>), Err(Errno::ESRCH))
}

/// Whether process `pid` is still running.
#[cfg(not(unix))]
pub fn process_alive(_pid: u32) -> bool {
    true
}

impl ShardStore {
    /// Open the shard directory, creating it if needed.
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        Self::with_pid(root, std::process::id())
    }

    /// Open with an explicit process id.
    pub fn with_pid(root: impl AsRef<Path>, pid: u32) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)
            .with_context(|| format!("Failed to create shard directory: {}", root.display()))?;
        Ok(Self {
            root,
            pid,
            alive: process_alive,
        })
    }

    /// Replace the writer liveness check.
    pub fn with_liveness(mut self, alive: fn(u32) -> bool) -> Self {
        self.alive = alive;
        self
    }

    fn job_dir(&self, job_id: &str) -> PathBuf {
        self.root.join(URL_SAFE_NO_PAD.encode(job_id))
    }

    fn own_path(&self, job_id: &str) -> PathBuf {
        self.job_dir(job_id)
            .join(format!("{}.{SHARD_EXTENSION}", self.pid))
    }

    /// Write this process's snapshot of `job_id` atomically.
    pub fn write(&self, job_id: &str, metrics: &MetricSet) -> Result<()> {
        let dir = self.job_dir(job_id);
        fs::create_dir_all(&dir).context("Failed to create job shard directory")?;

        let shard = Shard {
            job: job_id.to_string(),
            pid: self.pid,
            metrics: metrics.clone(),
        };
        let json = serde_json::to_vec(&shard).context("Failed to serialize shard")?;

        let path = self.own_path(job_id);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json).context("Failed to write tmp shard file")?;
        fs::rename(&tmp, &path).context("Failed to rename shard file")?;

        debug!(job = job_id, path = %path.display(), "Shard written");
        Ok(())
    }

    /// Remove this process's shard of `job_id`, and the job directory
    /// once no process has a shard left.
    pub fn remove(&self, job_id: &str) -> Result<()> {
        let path = self.own_path(job_id);
        if path.exists() {
            fs::remove_file(&path).context("Failed to remove shard file")?;
        }
        // Fails while other processes still hold shards.
        let _ = fs::remove_dir(self.job_dir(job_id));
        Ok(())
    }

    /// Delete every shard written by `pid`. Returns how many were removed.
    pub fn mark_process_dead(&self, pid: u32) -> Result<usize> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e).context("Failed to list shard directory"),
        };

        let mut removed = 0;
        for dir in entries.filter_map(|entry| entry.ok()).map(|entry| entry.path()) {
            let path = dir.join(format!("{pid}.{SHARD_EXTENSION}"));
            if path.exists() {
                fs::remove_file(&path)
                    .with_context(|| format!("Failed to remove shard file: {}", path.display()))?;
                removed += 1;
                let _ = fs::remove_dir(&dir);
            }
        }
        debug!(pid, removed, "Process shards removed");
        Ok(removed)
    }

    /// Delete every shard this process wrote.
    pub fn clear(&self) -> Result<usize> {
        self.mark_process_dead(self.pid)
    }

    /// Snapshots of `job_id` written by other processes, ordered by pid.
    pub fn read_others(&self, job_id: &str) -> Vec<MetricSet> {
        self.read_dir(&self.job_dir(job_id), true)
    }

    /// Every job id with at least one shard.
    pub fn job_ids(&self) -> Vec<String> {
        let Ok(entries) = fs::read_dir(&self.root) else {
            return Vec::new();
        };
        let mut ids: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().is_dir())
            .filter_map(|entry| {
                let name = entry.file_name();
                let bytes = URL_SAFE_NO_PAD.decode(name.to_str()?).ok()?;
                String::from_utf8(bytes).ok()
            })
            .collect();
        ids.sort();
        ids
    }

    /// Every snapshot of `job_id`, this process's first.
    pub fn read_all(&self, job_id: &str) -> Vec<MetricSet> {
        let mut sets = Vec::new();
        if let Some(own) = self.read_file(&self.own_path(job_id)) {
            sets.push(own);
        }
        sets.extend(self.read_others(job_id));
        sets
    }

    fn read_dir(&self, dir: &Path, skip_own: bool) -> Vec<MetricSet> {
        let Ok(entries) = fs::read_dir(dir) else {
            return Vec::new();
        };
        let mut shards: Vec<(u32, PathBuf)> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.extension().and_then(|e| e.to_str()) == Some(SHARD_EXTENSION))
            .filter_map(|path| {
                let pid = path.file_stem()?.to_str()?.parse().ok()?;
                Some((pid, path))
            })
            .filter(|(pid, _)| !skip_own || *pid != self.pid)
            .filter(|(pid, path)| {
                if *pid == self.pid || (self.alive)(*pid) {
                    return true;
                }
                match fs::remove_file(path) {
                    Ok(()) => debug!(pid, path = %path.display(), "Removed shard of dead process"),
                    Err(e) => warn!(pid, path = %path.display(), error = %e, "Failed to remove stale shard"),
                }
                false
            })
            .collect();
        shards.sort_by_key(|(pid, _)| *pid);

        shards
            .iter()
            .filter_map(|(_, path)| self.read_file(path))
            .collect()
    }

    fn read_file(&self, path: &Path) -> Option<MetricSet> {
        let bytes = fs::read(path).ok()?;
        match serde_json::from_slice::<Shard>(&bytes) {
            Ok(shard) => Some(shard.metrics),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Skipping unreadable shard");
                None
            }
        }
    }
}
