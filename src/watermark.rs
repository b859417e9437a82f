//! Persistence of the single "last ingested play" timestamp.
//!
//! The store provides no locking: at most one run per watermark location may
//! execute at a time, and serializing runs is the scheduler's job.

use crate::types::TimestampMs;
use crate::{Result, SyncError};
use async_trait::async_trait;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Storage for the watermark.
#[async_trait(?Send)]
pub trait WatermarkStore {
    /// The last committed watermark, or the store's default if none was ever
    /// committed. Fails only if the store exists but cannot be read.
    async fn read(&self) -> Result<TimestampMs>;

    /// Durably replace the watermark. A crash mid-write leaves either the old
    /// or the new value readable.
    async fn write(&self, watermark: TimestampMs) -> Result<()>;
}

/// File-backed store whose entire content is the decimal epoch-ms value.
#[derive(Debug, Clone)]
pub struct FileWatermarkStore {
    path: PathBuf,
    default: TimestampMs,
}

impl FileWatermarkStore {
    pub fn new(path: impl Into<PathBuf>, default: TimestampMs) -> Self {
        Self {
            path: path.into(),
            default,
        }
    }

    /// Default location: `~/.local/share/listen-sync/last_extraction.txt`.
    pub fn default_path() -> Result<PathBuf> {
        let data_dir = dirs::data_dir().ok_or_else(|| {
            SyncError::Config("Cannot determine XDG data directory".to_string())
        })?;
        Ok(data_dir.join("listen-sync").join("last_extraction.txt"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

/// Parse stored watermark content.
pub fn parse_watermark(content: &str) -> Result<TimestampMs> {
    let trimmed = content.trim();
    let value: TimestampMs = trimmed
        .parse()
        .map_err(|e| SyncError::CorruptWatermark(format!("'{trimmed}' is not a timestamp: {e}")))?;
    if value < 0 {
        return Err(SyncError::CorruptWatermark(format!(
            "negative timestamp {value}"
        )));
    }
    Ok(value)
}

#[async_trait(?Send)]
impl WatermarkStore for FileWatermarkStore {
    async fn read(&self) -> Result<TimestampMs> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::debug!(
                    "No watermark at {}, using default {}",
                    self.path.display(),
                    self.default
                );
                return Ok(self.default);
            }
            Err(e) => {
                return Err(SyncError::CorruptWatermark(format!(
                    "failed to read {}: {e}",
                    self.path.display()
                )))
            }
        };

        let watermark = parse_watermark(&content)?;
        log::debug!(
            "Watermark loaded from {}: {watermark}",
            self.path.display()
        );
        Ok(watermark)
    }

    async fn write(&self, watermark: TimestampMs) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let temp_path = self.temp_path();
        {
            let mut file = fs::File::create(&temp_path)?;
            file.write_all(watermark.to_string().as_bytes())?;
            file.sync_all()?;
        }
        fs::rename(&temp_path, &self.path)?;

        log::debug!("Watermark {watermark} saved to {}", self.path.display());
        Ok(())
    }
}

/// In-memory store for testing. Clones share state.
#[derive(Debug, Clone)]
pub struct MemoryWatermarkStore {
    value: Arc<Mutex<Option<TimestampMs>>>,
    default: TimestampMs,
}

impl MemoryWatermarkStore {
    pub fn new(default: TimestampMs) -> Self {
        Self {
            value: Arc::new(Mutex::new(None)),
            default,
        }
    }

    pub fn with_value(default: TimestampMs, value: TimestampMs) -> Self {
        Self {
            value: Arc::new(Mutex::new(Some(value))),
            default,
        }
    }

    /// The committed value, or `None` if nothing was ever written.
    pub fn committed(&self) -> Option<TimestampMs> {
        *self.value.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait(?Send)]
impl WatermarkStore for MemoryWatermarkStore {
    async fn read(&self) -> Result<TimestampMs> {
        Ok(self.committed().unwrap_or(self.default))
    }

    async fn write(&self, watermark: TimestampMs) -> Result<()> {
        *self.value.lock().unwrap_or_else(|e| e.into_inner()) = Some(watermark);
        Ok(())
    }
}
