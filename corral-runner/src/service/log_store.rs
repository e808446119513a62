//! Job log store
//!
//! Log chunks are appended to one file per job as they arrive, so a job's
//! output is never held in memory. Each job file rotates once at
//! `max_job_bytes`, and old files are pruned by age and count.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::backoff::sleep_or_cancel;
use crate::error::Result;

#[derive(Debug, Clone)]
pub struct LogStoreConfig {
    /// Size at which a job's log rotates to `<job>.log.1`
    pub max_job_bytes: u64,
    /// Files older than this are pruned
    pub max_age: Duration,
    /// Max log files kept, oldest pruned first
    pub max_files: usize,
}

impl Default for LogStoreConfig {
    fn default() -> Self {
        Self {
            max_job_bytes: 8 * 1024 * 1024,
            max_age: Duration::from_secs(7 * 24 * 3600),
            max_files: 200,
        }
    }
}

pub struct LogStore {
    dir: PathBuf,
    config: LogStoreConfig,
}

impl LogStore {
    pub fn new(dir: impl Into<PathBuf>, config: LogStoreConfig) -> Self {
        Self {
            dir: dir.into(),
            config,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the job's current log file; this is the result's log_ref
    pub fn log_path(&self, job_id: Uuid) -> PathBuf {
        self.dir.join(format!("{}.log", job_id))
    }

    /// Opens (or continues) the log of `job_id`
    pub async fn open(&self, job_id: Uuid) -> Result<JobLogWriter> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let path = self.log_path(job_id);
        let file = open_append(&path).await?;
        let written = file.metadata().await?.len();

        Ok(JobLogWriter {
            path,
            file,
            written,
            max_bytes: self.config.max_job_bytes,
            rotations: 0,
        })
    }

    /// Removes files past `max_age`, then the oldest beyond `max_files`.
    /// Returns how many were removed.
    pub async fn prune(&self) -> Result<usize> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let meta = entry.metadata().await?;
            if meta.is_file() {
                let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
                files.push((entry.path(), modified));
            }
        }

        let now = SystemTime::now();
        let mut removed = 0;

        // oldest first
        files.sort_by_key(|(_, modified)| *modified);
        let excess = files.len().saturating_sub(self.config.max_files);

        for (index, (path, modified)) in files.iter().enumerate() {
            let expired = now
                .duration_since(*modified)
                .is_ok_and(|age| age > self.config.max_age);

            if expired || index < excess {
                match tokio::fs::remove_file(path).await {
                    Ok(()) => removed += 1,
                    Err(e) => warn!("Failed to prune {}: {}", path.display(), e),
                }
            }
        }

        if removed > 0 {
            info!("Pruned {} job log file(s)", removed);
        }
        Ok(removed)
    }

    /// Prunes every `interval` until `shutdown` fires
    pub async fn run_pruner(self: Arc<Self>, interval: Duration, shutdown: CancellationToken) {
        loop {
            if let Err(e) = self.prune().await {
                warn!("Log pruning failed: {}", e);
            }
            if !sleep_or_cancel(interval, &shutdown).await {
                break;
            }
        }
        debug!("Log pruner stopped");
    }
}

async fn open_append(path: &Path) -> Result<File> {
    Ok(OpenOptions::new().create(true).append(true).open(path).await?)
}

/// Appends one job's chunks to its log file
pub struct JobLogWriter {
    path: PathBuf,
    file: File,
    written: u64,
    max_bytes: u64,
    rotations: u32,
}

impl JobLogWriter {
    pub async fn append(&mut self, chunk: &[u8]) -> Result<()> {
        if self.written > 0 && self.written + chunk.len() as u64 > self.max_bytes {
            self.rotate().await?;
        }

        self.file.write_all(chunk).await?;
        self.written += chunk.len() as u64;
        Ok(())
    }

    async fn rotate(&mut self) -> Result<()> {
        self.file.flush().await?;

        let rotated = self.path.with_extension("log.1");
        tokio::fs::rename(&self.path, &rotated).await?;
        self.file = open_append(&self.path).await?;
        self.written = 0;
        self.rotations += 1;

        debug!("Rotated {} (rotation {})", self.path.display(), self.rotations);
        Ok(())
    }

    pub fn rotations(&self) -> u32 {
        self.rotations
    }

    /// Flushes and returns the log_ref
    pub async fn finish(mut self) -> Result<String> {
        self.file.flush().await?;
        self.file.sync_data().await?;
        Ok(self.path.display().to_string())
    }
}
