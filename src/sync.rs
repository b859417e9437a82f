//! The run orchestrator: read watermark, fetch, normalize, commit.

use crate::api::PlayHistoryApi;
use crate::cancel::CancellationState;
use crate::events::{RunStage, SharedEventBroadcaster, SyncEventReceiver, SyncEvent};
use crate::iterator::{AsyncPaginatedIterator, FetchConfig, RecentPlaysIterator};
use crate::normalize::normalize;
use crate::sink::EventSink;
use crate::types::{format_timestamp_ms, Batch, TimestampMs};
use crate::watermark::WatermarkStore;
use crate::{Result, SyncError};
use chrono::Utc;
use log::{debug, info, warn};
use std::time::Duration;

/// Settings for a single run.
#[derive(Debug, Clone, Default)]
pub struct RunConfig {
    pub fetch: FetchConfig,
    /// Abort the fetch if it has not finished within this time
    pub run_timeout: Option<Duration>,
    /// Fetch and normalize only; neither the sink nor the watermark is touched
    pub dry_run: bool,
}

/// Outcome of a successful run.
#[derive(Debug, Clone)]
pub struct SyncReport {
    pub old_watermark: TimestampMs,
    pub new_watermark: TimestampMs,
    /// Non-empty pages received
    pub pages: u32,
    /// Requests issued, including the terminating empty one
    pub requests: u32,
    pub batch: Batch,
    /// Whether the batch and watermark were actually written
    pub committed: bool,
}

impl SyncReport {
    pub fn events(&self) -> usize {
        self.batch.len()
    }
}

struct Fetched {
    batch: Batch,
    new_watermark: TimestampMs,
    pages: u32,
    requests: u32,
}

/// Drives one incremental extraction at a time.
///
/// The API client, sink and watermark store are built once by the caller and
/// reused across runs. Runs against the same watermark store must not
/// overlap; nothing here serializes them.
pub struct SyncRunner<A: PlayHistoryApi, S: EventSink, W: WatermarkStore> {
    api: A,
    sink: S,
    watermark: W,
    config: RunConfig,
    cancellation: CancellationState,
    broadcaster: SharedEventBroadcaster,
}

impl<A: PlayHistoryApi, S: EventSink, W: WatermarkStore> SyncRunner<A, S, W> {
    pub fn new(api: A, sink: S, watermark: W, config: RunConfig) -> Self {
        Self {
            api,
            sink,
            watermark,
            config,
            cancellation: CancellationState::new(),
            broadcaster: SharedEventBroadcaster::new(),
        }
    }

    /// Use an externally owned cancellation signal, e.g. one wired to Ctrl-C.
    pub fn with_cancellation(mut self, cancellation: CancellationState) -> Self {
        self.cancellation = cancellation;
        self
    }

    pub fn with_broadcaster(mut self, broadcaster: SharedEventBroadcaster) -> Self {
        self.broadcaster = broadcaster;
        self
    }

    pub fn subscribe(&self) -> SyncEventReceiver {
        self.broadcaster.subscribe()
    }

    pub fn cancellation(&self) -> &CancellationState {
        &self.cancellation
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn watermark_store(&self) -> &W {
        &self.watermark
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Execute one run.
    ///
    /// On any failure the watermark is left as it was, so the next run
    /// re-fetches the same window.
    pub async fn run_once(&self) -> Result<SyncReport> {
        self.config.fetch.validate()?;
        if self.cancellation.is_cancelled() {
            return Err(self.fail(RunStage::Init, SyncError::Cancelled));
        }

        let old_watermark = match self.watermark.read().await {
            Ok(watermark) => watermark,
            Err(e) => return Err(self.fail(RunStage::Init, e)),
        };
        info!(
            "Starting sync after {} ({old_watermark})",
            format_timestamp_ms(old_watermark)
        );
        self.broadcaster.broadcast_event(SyncEvent::RunStarted {
            timestamp: Utc::now(),
            watermark: old_watermark,
        });

        let fetched = match self.fetch_with_timeout(old_watermark).await {
            Ok(fetched) => fetched,
            Err(e) => return Err(self.fail(RunStage::Fetching, e)),
        };
        info!(
            "Fetched {} new plays in {} pages ({} requests)",
            fetched.batch.len(),
            fetched.pages,
            fetched.requests
        );

        let mut report = SyncReport {
            old_watermark,
            new_watermark: fetched.new_watermark,
            pages: fetched.pages,
            requests: fetched.requests,
            batch: fetched.batch,
            committed: false,
        };

        if self.config.dry_run {
            info!(
                "Dry run: would store {} plays and advance the watermark to {}",
                report.events(),
                format_timestamp_ms(report.new_watermark)
            );
            return Ok(report);
        }

        if let Err(e) = self.commit(&report).await {
            return Err(self.fail(RunStage::Committing, e));
        }
        report.committed = true;

        info!(
            "Committed {} plays, watermark {} -> {}",
            report.events(),
            old_watermark,
            report.new_watermark
        );
        self.broadcaster.broadcast_event(SyncEvent::RunCommitted {
            events: report.events(),
            old_watermark,
            new_watermark: report.new_watermark,
        });
        Ok(report)
    }

    async fn fetch_with_timeout(&self, since: TimestampMs) -> Result<Fetched> {
        match self.config.run_timeout {
            Some(limit) => tokio::time::timeout(limit, self.fetch(since))
                .await
                .map_err(|_| {
                    warn!("Run timed out after {}s", limit.as_secs_f64());
                    SyncError::Cancelled
                })?,
            None => self.fetch(since).await,
        }
    }

    async fn fetch(&self, since: TimestampMs) -> Result<Fetched> {
        let mut pages = RecentPlaysIterator::new(&self.api, since, self.config.fetch.clone())
            .with_cancellation(self.cancellation.subscribe())
            .with_broadcaster(self.broadcaster.clone());
        let accumulator = normalize(&mut pages, since).await?;

        if self.cancellation.is_cancelled() {
            return Err(SyncError::Cancelled);
        }

        let pages_seen = pages.current_page();
        let requests = pages.requests();
        let (batch, new_watermark) = accumulator.finish();
        Ok(Fetched {
            batch,
            new_watermark,
            pages: pages_seen,
            requests,
        })
    }

    async fn commit(&self, report: &SyncReport) -> Result<()> {
        if report.batch.is_empty() {
            debug!("No new plays; sink and watermark untouched");
            return Ok(());
        }

        self.sink.append_events(&report.batch).await?;
        // Only after the sink has the batch.
        self.watermark.write(report.new_watermark).await
    }

    fn fail(&self, stage: RunStage, error: SyncError) -> SyncError {
        warn!("Sync failed during {stage:?}: {error}");
        self.broadcaster.broadcast_event(SyncEvent::RunFailed {
            stage,
            error: error.to_string(),
        });
        error
    }
}
