//! Request audit log
//!
//! Every gateway outcome becomes one [`LogEntry`] appended to a [`LogSink`].
//! The file sink writes JSON lines to `<log_dir>/requests-<date>.log`, one
//! file per UTC day.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::Mutex;
use serde::Serialize;

use crate::error::{ErrorCategory, Result};

/// One request outcome
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub request_id: String,
    pub client_key: String,
    pub operation: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_id: Option<String>,
    /// `None` on success
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorCategory>,
    pub latency_ms: u64,
}

/// Append-only destination for request entries
pub trait LogSink: Send + Sync {
    fn append(&self, entry: &LogEntry) -> Result<()>;
}

/// Writes entries as JSON lines, rolling over at UTC midnight
pub struct JsonLinesSink {
    dir: PathBuf,
    current: Mutex<Option<(NaiveDate, File)>>,
}

impl JsonLinesSink {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            current: Mutex::new(None),
        })
    }

    fn path_for(&self, day: NaiveDate) -> PathBuf {
        self.dir.join(format!("requests-{}.log", day.format("%Y-%m-%d")))
    }
}

impl LogSink for JsonLinesSink {
    fn append(&self, entry: &LogEntry) -> Result<()> {
        let mut line = serde_json::to_vec(entry)?;
        line.push(b'\n');

        let day = entry.timestamp.date_naive();
        let mut current = self.current.lock();
        let stale = !matches!(current.as_ref(), Some((open_day, _)) if *open_day == day);
        if stale {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(self.path_for(day))?;
            *current = Some((day, file));
        }
        if let Some((_, file)) = current.as_mut() {
            file.write_all(&line)?;
        }
        Ok(())
    }
}

/// Forwards entries to `tracing` under the `vigil::audit` target
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn append(&self, entry: &LogEntry) -> Result<()> {
        match entry.error {
            None => tracing::info!(
                target: "vigil::audit",
                request_id = %entry.request_id,
                client = %entry.client_key,
                latency_ms = entry.latency_ms,
                "{} ok",
                entry.operation
            ),
            Some(category) => tracing::warn!(
                target: "vigil::audit",
                request_id = %entry.request_id,
                client = %entry.client_key,
                latency_ms = entry.latency_ms,
                "{} failed: {}",
                entry.operation,
                category.as_str()
            ),
        }
        Ok(())
    }
}

/// Fans one entry out to several sinks, stopping at the first failure
pub struct MultiSink(pub Vec<Box<dyn LogSink>>);

impl LogSink for MultiSink {
    /// Every sink sees the entry; the first failure is reported
    fn append(&self, entry: &LogEntry) -> Result<()> {
        let mut first_error = None;
        for sink in &self.0 {
            if let Err(e) = sink.append(entry) {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

/// Files removed and bytes reclaimed by a cleanup step
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Removal {
    pub files_removed: u64,
    pub space_freed: u64,
}

impl Removal {
    pub(crate) fn add(&mut self, bytes: u64) {
        self.files_removed += 1;
        self.space_freed += bytes;
    }
}

/// `*.log` files in `dir`, newest first
pub(crate) fn log_files_newest_first(dir: &Path) -> Result<Vec<(PathBuf, SystemTime, u64)>> {
    let mut files = Vec::new();
    if !dir.exists() {
        return Ok(files);
    }
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("log") {
            continue;
        }
        let meta = entry.metadata()?;
        if !meta.is_file() {
            continue;
        }
        files.push((path, meta.modified()?, meta.len()));
    }
    files.sort_by(|a, b| b.1.cmp(&a.1));
    Ok(files)
}

/// Delete log files older than `older_than_days`, always sparing the newest
/// `keep_latest`
pub fn purge_logs(dir: &Path, older_than_days: u64, keep_latest: usize) -> Result<Removal> {
    let cutoff = Duration::from_secs(older_than_days * 86_400);
    let now = SystemTime::now();
    let mut removal = Removal::default();

    for (path, modified, size) in log_files_newest_first(dir)?.into_iter().skip(keep_latest) {
        let age = now.duration_since(modified).unwrap_or_default();
        if age > cutoff {
            std::fs::remove_file(&path)?;
            removal.add(size);
        }
    }
    if removal.files_removed > 0 {
        tracing::info!(
            "purged {} log files ({} bytes)",
            removal.files_removed,
            removal.space_freed
        );
    }
    Ok(removal)
}
