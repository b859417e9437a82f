//! # Sync Events
//!
//! A broadcast channel system for emitting run and pagination events that
//! observers can listen to, alongside the regular `log` output.

use crate::types::TimestampMs;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch};

/// Non-terminal stage of a sync run, reported when the run fails.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStage {
    Init,
    Fetching,
    Committing,
}

/// Events emitted while a sync run progresses.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum SyncEvent {
    /// A run read its watermark and is about to fetch
    RunStarted {
        /// When the run started
        timestamp: DateTime<Utc>,
        /// The watermark the run fetches after
        watermark: TimestampMs,
    },
    /// A page request completed
    PageFetched {
        /// Page number within the run (1-indexed)
        page: u32,
        /// The `after` bound that was requested
        after: TimestampMs,
        /// Number of items the API returned
        items: usize,
        /// Cursor after absorbing the page
        cursor: TimestampMs,
        /// Duration of the request in milliseconds
        duration_ms: u64,
    },
    /// The fetcher is waiting before the next page request
    RateLimitPause {
        /// Length of the pause in milliseconds
        delay_ms: u64,
    },
    /// The batch was written and the watermark advanced
    RunCommitted {
        /// Number of events written to the sink
        events: usize,
        /// Watermark before the run
        old_watermark: TimestampMs,
        /// Watermark after the run
        new_watermark: TimestampMs,
    },
    /// The run ended in failure; the watermark is untouched
    RunFailed {
        /// Stage the run was in when it failed
        stage: RunStage,
        /// Rendered error
        error: String,
    },
}

/// Receiver half handed out by [`SharedEventBroadcaster::subscribe`].
pub type SyncEventReceiver = broadcast::Receiver<SyncEvent>;

const EVENT_BUFFER: usize = 100;

/// Fan-out of [`SyncEvent`]s shared by every clone.
///
/// Subscribers get every event sent after they subscribed (lagging ones lose
/// the oldest). The most recent event is retained regardless of subscribers.
#[derive(Clone)]
pub struct SharedEventBroadcaster {
    events: broadcast::Sender<SyncEvent>,
    latest: watch::Sender<Option<SyncEvent>>,
}

impl SharedEventBroadcaster {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        let (latest, _) = watch::channel(None);
        Self { events, latest }
    }

    pub fn broadcast_event(&self, event: SyncEvent) {
        // No subscribers is not an error.
        let _ = self.events.send(event.clone());
        self.latest.send_replace(Some(event));
    }

    pub fn subscribe(&self) -> SyncEventReceiver {
        self.events.subscribe()
    }

    pub fn latest_event(&self) -> Option<SyncEvent> {
        self.latest.borrow().clone()
    }
}

impl Default for SharedEventBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SharedEventBroadcaster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedEventBroadcaster")
            .field("subscribers", &self.events.receiver_count())
            .field("latest", &*self.latest.borrow())
            .finish()
    }
}
