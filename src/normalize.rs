//! Merging fetched pages against the watermark.
//!
//! Events at or before the watermark are discarded, since the API may return
//! the boundary event again. Events repeated across pages are kept once.

use crate::iterator::AsyncPaginatedIterator;
use crate::types::{Batch, Page, TimestampMs};
use crate::Result;
use std::collections::HashSet;

/// Accumulates the events of one run into a [`Batch`].
#[derive(Debug, Clone)]
pub struct BatchAccumulator {
    since: TimestampMs,
    new_watermark: TimestampMs,
    batch: Batch,
    seen: HashSet<(String, TimestampMs)>,
    discarded: usize,
    duplicates: usize,
}

impl BatchAccumulator {
    pub fn new(since: TimestampMs) -> Self {
        Self {
            since,
            new_watermark: since,
            batch: Batch::default(),
            seen: HashSet::new(),
            discarded: 0,
            duplicates: 0,
        }
    }

    /// Merge one page, in arrival order.
    pub fn absorb(&mut self, page: Page) {
        for event in page.events {
            if event.played_at_ms <= self.since {
                log::debug!(
                    "Discarding {} played at {}, not after watermark {}",
                    event.track_id,
                    event.played_at,
                    self.since
                );
                self.discarded += 1;
                continue;
            }
            if !self.seen.insert(event.key()) {
                self.duplicates += 1;
                continue;
            }
            self.new_watermark = self.new_watermark.max(event.played_at_ms);
            self.batch.events.push(event);
        }
    }

    pub fn since(&self) -> TimestampMs {
        self.since
    }

    /// Watermark to commit if the batch is durably written.
    pub fn new_watermark(&self) -> TimestampMs {
        self.new_watermark
    }

    pub fn len(&self) -> usize {
        self.batch.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batch.is_empty()
    }

    /// Events dropped for being at or before the watermark.
    pub fn discarded(&self) -> usize {
        self.discarded
    }

    /// Events dropped because their key was already accumulated.
    pub fn duplicates(&self) -> usize {
        self.duplicates
    }

    pub fn finish(self) -> (Batch, TimestampMs) {
        (self.batch, self.new_watermark)
    }
}

/// Drain `pages` and merge them against `since`.
///
/// The accumulator is returned unfinished so callers can read its counters.
/// With no surviving events its watermark equals `since`.
pub async fn normalize<I>(pages: &mut I, since: TimestampMs) -> Result<BatchAccumulator>
where
    I: AsyncPaginatedIterator<Page> + ?Sized,
{
    let mut accumulator = BatchAccumulator::new(since);
    while let Some(page) = pages.next().await? {
        log::debug!(
            "Page {}: {} items, {} keyable",
            page.number,
            page.raw_count,
            page.events.len()
        );
        accumulator.absorb(page);
    }

    if accumulator.discarded() > 0 || accumulator.duplicates() > 0 {
        log::debug!(
            "Dropped {} plays at or before the watermark and {} repeated plays",
            accumulator.discarded(),
            accumulator.duplicates()
        );
    }
    Ok(accumulator)
}
