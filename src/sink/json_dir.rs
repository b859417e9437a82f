use super::EventSink;
use crate::types::{ArtistDetails, Batch, PlayEvent, TrackDetails};
use crate::{Result, SyncError};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashSet;
use std::fs;
use std::hash::Hash;
use std::path::{Path, PathBuf};

const HISTORY_FILE: &str = "listening_history.json";
const TRACKS_FILE: &str = "tracks.json";
const ARTISTS_FILE: &str = "artists.json";

/// Raw storage as JSON arrays in a directory.
///
/// Each write merges with what is on disk, keyed like the relational sink,
/// and replaces the file through a rename so readers never see a torn file.
#[derive(Debug, Clone)]
pub struct JsonDirSink {
    dir: PathBuf,
}

impl JsonDirSink {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .map_err(|e| SyncError::Sink(format!("cannot create {}: {e}", dir.display())))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// All stored events, ordered by play time.
    pub fn events(&self) -> Result<Vec<PlayEvent>> {
        load(&self.dir.join(HISTORY_FILE))
    }

    pub fn tracks(&self) -> Result<Vec<TrackDetails>> {
        load(&self.dir.join(TRACKS_FILE))
    }

    pub fn artists(&self) -> Result<Vec<ArtistDetails>> {
        load(&self.dir.join(ARTISTS_FILE))
    }
}

fn load<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    match fs::read_to_string(path) {
        Ok(json) => serde_json::from_str(&json)
            .map_err(|e| SyncError::Sink(format!("cannot parse {}: {e}", path.display()))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(SyncError::Sink(format!("cannot read {}: {e}", path.display()))),
    }
}

fn store<T: Serialize>(path: &Path, rows: &[T]) -> Result<()> {
    let json = serde_json::to_string_pretty(rows).map_err(|e| SyncError::Sink(e.to_string()))?;
    let temp_path = path.with_extension("json.tmp");
    fs::write(&temp_path, json)
        .and_then(|_| fs::rename(&temp_path, path))
        .map_err(|e| SyncError::Sink(format!("cannot write {}: {e}", path.display())))
}

/// Append the rows of `incoming` whose key is not yet present.
fn merge_by_key<T, K, F>(path: &Path, incoming: &[T], key: F) -> Result<Vec<T>>
where
    T: Clone + Serialize + DeserializeOwned,
    K: Eq + Hash,
    F: Fn(&T) -> K,
{
    let mut rows: Vec<T> = load(path)?;
    let mut keys: HashSet<K> = rows.iter().map(&key).collect();
    let before = rows.len();
    for row in incoming {
        if keys.insert(key(row)) {
            rows.push(row.clone());
        }
    }
    log::debug!(
        "{}: {} new of {} rows",
        path.display(),
        rows.len() - before,
        incoming.len()
    );
    Ok(rows)
}

#[async_trait(?Send)]
impl EventSink for JsonDirSink {
    async fn append_events(&self, batch: &Batch) -> Result<()> {
        let path = self.dir.join(HISTORY_FILE);
        let mut rows = merge_by_key(&path, &batch.events, PlayEvent::key)?;
        rows.sort_by_key(|e| e.played_at_ms);
        store(&path, &rows)
    }

    async fn upsert_tracks(&self, tracks: &[TrackDetails]) -> Result<()> {
        let path = self.dir.join(TRACKS_FILE);
        let rows = merge_by_key(&path, tracks, |t: &TrackDetails| t.track_id.clone())?;
        store(&path, &rows)
    }

    async fn upsert_artists(&self, artists: &[ArtistDetails]) -> Result<()> {
        let path = self.dir.join(ARTISTS_FILE);
        let rows = merge_by_key(&path, artists, |a: &ArtistDetails| a.artist_id.clone())?;
        store(&path, &rows)
    }
}
