pub mod json_dir;
pub mod memory;
pub mod sqlite;

pub use json_dir::JsonDirSink;
pub use memory::MemorySink;
pub use sqlite::SqliteSink;

use crate::types::{ArtistDetails, Batch, TrackDetails};
use crate::{Result, SyncError};
use async_trait::async_trait;
use std::path::PathBuf;

/// Durable destination for ingested events and dimension rows.
///
/// Every write must be an idempotent upsert: a crash after the sink write but
/// before the watermark commit re-sends the same batch on the next run.
#[async_trait(?Send)]
pub trait EventSink {
    /// Store play events, keyed by `(track_id, played_at)`.
    async fn append_events(&self, batch: &Batch) -> Result<()>;

    /// Store track dimension rows, keyed by track id. Existing rows are kept.
    async fn upsert_tracks(&self, tracks: &[TrackDetails]) -> Result<()>;

    /// Store artist dimension rows, keyed by artist id. Existing rows are kept.
    async fn upsert_artists(&self, artists: &[ArtistDetails]) -> Result<()>;
}

#[async_trait(?Send)]
impl<S: EventSink + ?Sized> EventSink for Box<S> {
    async fn append_events(&self, batch: &Batch) -> Result<()> {
        (**self).append_events(batch).await
    }

    async fn upsert_tracks(&self, tracks: &[TrackDetails]) -> Result<()> {
        (**self).upsert_tracks(tracks).await
    }

    async fn upsert_artists(&self, artists: &[ArtistDetails]) -> Result<()> {
        (**self).upsert_artists(artists).await
    }
}

/// Where the sink lives, parsed from a connection string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkTarget {
    /// `sqlite://<path>` or `sqlite::memory:`
    Sqlite(String),
    /// `file://<dir>` or `json://<dir>`
    JsonDir(PathBuf),
}

impl SinkTarget {
    pub fn parse(connection: &str) -> Result<Self> {
        let connection = connection.trim();

        if connection == "sqlite::memory:" {
            return Ok(SinkTarget::Sqlite(connection.to_string()));
        }
        if let Some(path) = connection.strip_prefix("sqlite://") {
            if path.is_empty() {
                return Err(SyncError::Config(
                    "sqlite sink connection has no database path".to_string(),
                ));
            }
            return Ok(SinkTarget::Sqlite(connection.to_string()));
        }

        let dir = connection
            .strip_prefix("file://")
            .or_else(|| connection.strip_prefix("json://"));
        match dir {
            Some(dir) if !dir.is_empty() => Ok(SinkTarget::JsonDir(PathBuf::from(dir))),
            Some(_) => Err(SyncError::Config(
                "file sink connection has no directory".to_string(),
            )),
            None => Err(SyncError::Config(format!(
                "unsupported sink connection '{connection}', expected sqlite://, file:// or json://"
            ))),
        }
    }

    /// Open the sink, creating its storage if needed.
    pub async fn connect(&self) -> Result<Box<dyn EventSink>> {
        match self {
            SinkTarget::Sqlite(url) => Ok(Box::new(SqliteSink::connect(url).await?)),
            SinkTarget::JsonDir(dir) => Ok(Box::new(JsonDirSink::new(dir.clone())?)),
        }
    }
}
