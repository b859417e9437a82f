use super::EventSink;
use crate::types::{ArtistDetails, Batch, PlayEvent, TimestampMs, TrackDetails};
use crate::{Result, SyncError};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Default)]
struct MemorySinkState {
    rows: BTreeMap<(String, TimestampMs), PlayEvent>,
    append_calls: Vec<Vec<(String, TimestampMs)>>,
    tracks: BTreeMap<String, TrackDetails>,
    artists: BTreeMap<String, ArtistDetails>,
    failure: Option<String>,
}

/// In-memory sink for testing and dry runs. Clones share state.
///
/// Rows are keyed like the relational sink, so replaying an overlapping batch
/// leaves one row per key while every call is still recorded.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    state: Arc<Mutex<MemorySinkState>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MemorySinkState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Make every subsequent write fail with the given message.
    pub fn fail_with(&self, message: &str) {
        self.state().failure = Some(message.to_string());
    }

    pub fn recover(&self) {
        self.state().failure = None;
    }

    /// Stored events ordered by key.
    pub fn rows(&self) -> Vec<PlayEvent> {
        self.state().rows.values().cloned().collect()
    }

    pub fn row_count(&self) -> usize {
        self.state().rows.len()
    }

    /// Keys passed to each `append_events` call, in call order.
    pub fn append_calls(&self) -> Vec<Vec<(String, TimestampMs)>> {
        self.state().append_calls.clone()
    }

    pub fn tracks(&self) -> Vec<TrackDetails> {
        self.state().tracks.values().cloned().collect()
    }

    pub fn artists(&self) -> Vec<ArtistDetails> {
        self.state().artists.values().cloned().collect()
    }

    fn check_failure(state: &MemorySinkState) -> Result<()> {
        match &state.failure {
            Some(message) => Err(SyncError::Sink(message.clone())),
            None => Ok(()),
        }
    }
}

#[async_trait(?Send)]
impl EventSink for MemorySink {
    async fn append_events(&self, batch: &Batch) -> Result<()> {
        let mut state = self.state();
        state
            .append_calls
            .push(batch.events.iter().map(PlayEvent::key).collect());
        Self::check_failure(&state)?;

        for event in &batch.events {
            state
                .rows
                .entry(event.key())
                .or_insert_with(|| event.clone());
        }
        Ok(())
    }

    async fn upsert_tracks(&self, tracks: &[TrackDetails]) -> Result<()> {
        let mut state = self.state();
        Self::check_failure(&state)?;
        for track in tracks {
            state
                .tracks
                .entry(track.track_id.clone())
                .or_insert_with(|| track.clone());
        }
        Ok(())
    }

    async fn upsert_artists(&self, artists: &[ArtistDetails]) -> Result<()> {
        let mut state = self.state();
        Self::check_failure(&state)?;
        for artist in artists {
            state
                .artists
                .entry(artist.artist_id.clone())
                .or_insert_with(|| artist.clone());
        }
        Ok(())
    }
}
