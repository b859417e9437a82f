use crate::api::{PlayHistoryApi, MAX_PAGE_SIZE};
use crate::cancel::{cancelled, sleep_with_cancel};
use crate::events::{SharedEventBroadcaster, SyncEvent};
use crate::types::{format_timestamp_ms, Page, PlayEvent, RawPlayItem, TimestampMs};
use crate::{Result, SyncError};

use async_trait::async_trait;
use std::time::{Duration, Instant};
use tokio::sync::watch;

/// Pull-based iteration over paginated API results.
///
/// Each call to `next` may issue one request, preceded by the configured
/// pause, so consumers see pages in the order the API returned them.
#[async_trait(?Send)]
pub trait AsyncPaginatedIterator<T> {
    /// `Ok(None)` once the listing is exhausted; an error ends iteration.
    async fn next(&mut self) -> Result<Option<T>>;

    /// Drain the iterator.
    async fn collect_all(&mut self) -> Result<Vec<T>> {
        let mut items = Vec::new();
        while let Some(item) = self.next().await? {
            items.push(item);
        }
        Ok(items)
    }

    /// Number of the most recently yielded page (0 before the first one).
    fn current_page(&self) -> u32;
}

/// Pagination settings for the recently-played listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchConfig {
    /// Items requested per page, at most [`MAX_PAGE_SIZE`]
    pub page_size: u32,
    /// Minimum pause between consecutive page requests
    pub min_interval: Duration,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            page_size: MAX_PAGE_SIZE,
            min_interval: Duration::from_secs(1),
        }
    }
}

impl FetchConfig {
    pub fn validate(&self) -> Result<()> {
        if self.page_size == 0 || self.page_size > MAX_PAGE_SIZE {
            return Err(SyncError::Config(format!(
                "page size must be between 1 and {MAX_PAGE_SIZE}, got {}",
                self.page_size
            )));
        }
        Ok(())
    }
}

/// Iterator over pages of plays strictly after a lower bound.
///
/// The cursor starts at `since` and, after every page, moves to the largest
/// `played_at` seen so far, in the order the API returned the items. Iteration
/// stops on the first empty page; a short page is not treated as the end.
/// Each iterator starts a fresh pagination, so a failed run is retried by
/// building a new one from the same watermark.
pub struct RecentPlaysIterator<'a, C: PlayHistoryApi + ?Sized> {
    client: &'a C,
    config: FetchConfig,
    cursor: TimestampMs,
    current_page: u32,
    requests: u32,
    finished: bool,
    cancel_rx: Option<watch::Receiver<bool>>,
    broadcaster: Option<SharedEventBroadcaster>,
}

impl<'a, C: PlayHistoryApi + ?Sized> RecentPlaysIterator<'a, C> {
    pub fn new(client: &'a C, since: TimestampMs, config: FetchConfig) -> Self {
        Self {
            client,
            config,
            cursor: since,
            current_page: 0,
            requests: 0,
            finished: false,
            cancel_rx: None,
            broadcaster: None,
        }
    }

    /// Make the pause and any in-flight request interruptible by `cancel_rx`.
    pub fn with_cancellation(mut self, cancel_rx: watch::Receiver<bool>) -> Self {
        self.cancel_rx = Some(cancel_rx);
        self
    }

    pub fn with_broadcaster(mut self, broadcaster: SharedEventBroadcaster) -> Self {
        self.broadcaster = Some(broadcaster);
        self
    }

    /// The `after` bound the next request will use.
    pub fn cursor(&self) -> TimestampMs {
        self.cursor
    }

    /// Number of requests issued so far, including the terminating empty one.
    pub fn requests(&self) -> u32 {
        self.requests
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    fn broadcast(&self, event: SyncEvent) {
        if let Some(broadcaster) = &self.broadcaster {
            broadcaster.broadcast_event(event);
        }
    }

    async fn pause(&self) -> Result<()> {
        let delay = self.config.min_interval;
        if let Some(rx) = &self.cancel_rx {
            if *rx.borrow() {
                return Err(SyncError::Cancelled);
            }
        }
        if self.requests == 0 || delay.is_zero() {
            return Ok(());
        }

        self.broadcast(SyncEvent::RateLimitPause {
            delay_ms: delay.as_millis() as u64,
        });
        match &self.cancel_rx {
            Some(rx) => sleep_with_cancel(rx.clone(), delay).await,
            None => {
                tokio::time::sleep(delay).await;
                Ok(())
            }
        }
    }

    /// Advance the cursor over a page's items and keep the keyable ones.
    fn absorb(&self, items: Vec<RawPlayItem>) -> Result<(Vec<PlayEvent>, TimestampMs)> {
        let mut cursor = self.cursor;
        let mut events = Vec::with_capacity(items.len());

        for item in items {
            let played_at_ms = item.played_at_ms()?;
            cursor = cursor.max(played_at_ms);

            let played_at = item.played_at.clone();
            match item.into_event(played_at_ms) {
                Some(event) => events.push(event),
                None => log::warn!("Skipping play at {played_at} without a track id"),
            }
        }

        Ok((events, cursor))
    }
}

#[async_trait(?Send)]
impl<'a, C: PlayHistoryApi + ?Sized> AsyncPaginatedIterator<Page> for RecentPlaysIterator<'a, C> {
    async fn next(&mut self) -> Result<Option<Page>> {
        if self.finished {
            return Ok(None);
        }

        if let Err(e) = self.pause().await {
            self.finished = true;
            return Err(e);
        }

        let after = self.cursor;
        log::debug!(
            "Fetching plays after {} ({after})",
            format_timestamp_ms(after)
        );

        let request_start = Instant::now();
        self.requests += 1;
        let request = self.client.get_recent_plays(after, self.config.page_size);
        let response = match &self.cancel_rx {
            Some(rx) => tokio::select! {
                response = request => response,
                _ = cancelled(rx.clone()) => Err(SyncError::Cancelled),
            },
            None => request.await,
        };
        let response = match response {
            Ok(response) => response,
            Err(e) => {
                log::warn!(
                    "Request {} after {} failed: {e}",
                    self.requests,
                    format_timestamp_ms(after)
                );
                self.finished = true;
                return Err(e);
            }
        };

        if response.items.is_empty() {
            log::info!("No new plays since {}", format_timestamp_ms(after));
            self.finished = true;
            return Ok(None);
        }

        let raw_count = response.items.len();
        let (events, cursor) = match self.absorb(response.items) {
            Ok(absorbed) => absorbed,
            Err(e) => {
                self.finished = true;
                return Err(e);
            }
        };

        if cursor == after {
            log::warn!(
                "Page of {raw_count} plays did not advance past {}; stopping",
                format_timestamp_ms(after)
            );
            self.finished = true;
        }

        self.cursor = cursor;
        self.current_page += 1;

        log::debug!("Fetched {raw_count} plays, cursor now {cursor}");
        self.broadcast(SyncEvent::PageFetched {
            page: self.current_page,
            after,
            items: raw_count,
            cursor,
            duration_ms: request_start.elapsed().as_millis() as u64,
        });

        Ok(Some(Page {
            events,
            raw_count,
            requested_after: after,
            cursor,
            number: self.current_page,
        }))
    }

    fn current_page(&self) -> u32 {
        self.current_page
    }
}
