#![allow(dead_code)]
use async_trait::async_trait;
use listen_sync::types::format_timestamp_ms;
use listen_sync::watermark::MemoryWatermarkStore;
use listen_sync::{
    FetchConfig, PlayHistoryApi, RawPlayItem, RecentlyPlayed, Result, RunConfig, SyncError,
    TimestampMs, WatermarkStore,
};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// 2025-01-01T00:00:00Z
pub const START: TimestampMs = 1_735_689_600_000;

pub fn item(track_id: &str, ms: TimestampMs) -> RawPlayItem {
    RawPlayItem {
        track_id: Some(track_id.to_string()),
        track_name: format!("Track {track_id}"),
        artist_id: Some(format!("artist-{track_id}")),
        artist_name: Some("Artist".to_string()),
        played_at: format_timestamp_ms(ms),
    }
}

/// Run settings without any pause between requests.
pub fn fast_config(page_size: u32) -> RunConfig {
    RunConfig {
        fetch: FetchConfig {
            page_size,
            min_interval: Duration::ZERO,
        },
        ..RunConfig::default()
    }
}

/// A user's complete play history, served like the real listing: every play
/// strictly after `after`, oldest first, at most `limit` per request.
pub struct TimelineApi {
    plays: Vec<RawPlayItem>,
    reverse_pages: bool,
    calls: RefCell<Vec<(TimestampMs, u32)>>,
}

impl TimelineApi {
    pub fn new(plays: &[(&str, TimestampMs)]) -> Self {
        let mut plays: Vec<RawPlayItem> = plays.iter().map(|(id, ms)| item(id, *ms)).collect();
        plays.sort_by_key(|p| played_ms(p));
        Self {
            plays,
            reverse_pages: false,
            calls: RefCell::new(Vec::new()),
        }
    }

    /// Return each page newest first instead of oldest first.
    pub fn with_reversed_pages(mut self) -> Self {
        self.reverse_pages = true;
        self
    }

    /// `(after, limit)` of every request so far.
    pub fn calls(&self) -> Vec<(TimestampMs, u32)> {
        self.calls.borrow().clone()
    }
}

fn played_ms(item: &RawPlayItem) -> TimestampMs {
    item.played_at_ms().unwrap_or_default()
}

#[async_trait(?Send)]
impl PlayHistoryApi for TimelineApi {
    async fn get_recent_plays(&self, after: TimestampMs, limit: u32) -> Result<RecentlyPlayed> {
        self.calls.borrow_mut().push((after, limit));
        let mut items: Vec<RawPlayItem> = self
            .plays
            .iter()
            .filter(|p| played_ms(p) > after)
            .take(limit as usize)
            .cloned()
            .collect();
        if self.reverse_pages {
            items.reverse();
        }
        Ok(RecentlyPlayed { items })
    }
}

/// Serves a fixed sequence of pages regardless of the request, then empty pages.
pub struct ScriptedApi {
    pages: RefCell<VecDeque<Vec<RawPlayItem>>>,
    calls: RefCell<Vec<TimestampMs>>,
}

impl ScriptedApi {
    pub fn new(pages: Vec<Vec<RawPlayItem>>) -> Self {
        Self {
            pages: RefCell::new(pages.into()),
            calls: RefCell::new(Vec::new()),
        }
    }

    /// Consecutive pages of the given sizes with strictly increasing
    /// timestamps after `since`.
    pub fn with_page_sizes(since: TimestampMs, sizes: &[usize]) -> Self {
        let mut next = since;
        let pages: Vec<Vec<RawPlayItem>> = sizes
            .iter()
            .map(|size| {
                (0..*size)
                    .map(|_| {
                        next += 1_000;
                        item(&format!("t{next}"), next)
                    })
                    .collect::<Vec<_>>()
            })
            .collect();
        Self::new(pages)
    }

    pub fn calls(&self) -> Vec<TimestampMs> {
        self.calls.borrow().clone()
    }
}

#[async_trait(?Send)]
impl PlayHistoryApi for ScriptedApi {
    async fn get_recent_plays(&self, after: TimestampMs, _limit: u32) -> Result<RecentlyPlayed> {
        self.calls.borrow_mut().push(after);
        let items = self.pages.borrow_mut().pop_front().unwrap_or_default();
        Ok(RecentlyPlayed { items })
    }
}

/// Fails every request after serving `ok_pages` timeline pages.
pub struct FailingApi {
    inner: TimelineApi,
    ok_pages: usize,
}

impl FailingApi {
    pub fn new(inner: TimelineApi, ok_pages: usize) -> Self {
        Self { inner, ok_pages }
    }
}

#[async_trait(?Send)]
impl PlayHistoryApi for FailingApi {
    async fn get_recent_plays(&self, after: TimestampMs, limit: u32) -> Result<RecentlyPlayed> {
        if self.inner.calls.borrow().len() >= self.ok_pages {
            return Err(SyncError::TransientFetch("connection reset".to_string()));
        }
        self.inner.get_recent_plays(after, limit).await
    }
}

/// Memory store whose writes can be made to fail, simulating a crash between
/// the sink write and the watermark commit.
#[derive(Debug, Clone)]
pub struct FlakyWatermarkStore {
    inner: MemoryWatermarkStore,
    fail_writes: Arc<AtomicBool>,
}

impl FlakyWatermarkStore {
    pub fn new(default: TimestampMs) -> Self {
        Self {
            inner: MemoryWatermarkStore::new(default),
            fail_writes: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn committed(&self) -> Option<TimestampMs> {
        self.inner.committed()
    }
}

#[async_trait(?Send)]
impl WatermarkStore for FlakyWatermarkStore {
    async fn read(&self) -> Result<TimestampMs> {
        self.inner.read().await
    }

    async fn write(&self, watermark: TimestampMs) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(SyncError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "simulated crash before watermark commit",
            )));
        }
        self.inner.write(watermark).await
    }
}
