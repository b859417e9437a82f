//! Dimension rows for the tracks and artists of a committed batch.
//!
//! Runs strictly after the watermark commit. A lookup or upsert that fails
//! is logged and skipped; nothing here can undo or block the commit.

use crate::api::{MetadataApi, MAX_LOOKUP_BATCH};
use crate::cancel::sleep_with_cancel;
use crate::sink::EventSink;
use crate::types::Batch;
use crate::Result;
use std::time::Duration;
use tokio::sync::watch;

/// Counts of what enrichment managed to store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnrichReport {
    pub tracks: usize,
    pub artists: usize,
    pub failed_batches: usize,
}

/// Look up and store metadata for every unique track and artist in `batch`.
pub async fn enrich_metadata<M, S>(
    api: &M,
    sink: &S,
    batch: &Batch,
    min_interval: Duration,
    cancel_rx: Option<watch::Receiver<bool>>,
) -> EnrichReport
where
    M: MetadataApi + ?Sized,
    S: EventSink + ?Sized,
{
    let mut report = EnrichReport::default();
    let mut requests = 0usize;

    let track_ids = batch.track_ids();
    for chunk in track_ids.chunks(MAX_LOOKUP_BATCH) {
        if pause(requests, min_interval, &cancel_rx).await.is_err() {
            log::info!("Enrichment cancelled");
            return report;
        }
        requests += 1;

        match store_tracks(api, sink, chunk).await {
            Ok(stored) => report.tracks += stored,
            Err(e) => {
                log::warn!("Skipping metadata for {} tracks: {e}", chunk.len());
                report.failed_batches += 1;
            }
        }
    }

    let artist_ids = batch.artist_ids();
    for chunk in artist_ids.chunks(MAX_LOOKUP_BATCH) {
        if pause(requests, min_interval, &cancel_rx).await.is_err() {
            log::info!("Enrichment cancelled");
            return report;
        }
        requests += 1;

        match store_artists(api, sink, chunk).await {
            Ok(stored) => report.artists += stored,
            Err(e) => {
                log::warn!("Skipping metadata for {} artists: {e}", chunk.len());
                report.failed_batches += 1;
            }
        }
    }

    log::info!(
        "Enriched {} tracks and {} artists ({} batches failed)",
        report.tracks,
        report.artists,
        report.failed_batches
    );
    report
}

async fn pause(
    requests: usize,
    delay: Duration,
    cancel_rx: &Option<watch::Receiver<bool>>,
) -> Result<()> {
    let delay = if requests == 0 { Duration::ZERO } else { delay };
    match cancel_rx {
        Some(rx) => sleep_with_cancel(rx.clone(), delay).await,
        None => {
            tokio::time::sleep(delay).await;
            Ok(())
        }
    }
}

async fn store_tracks<M, S>(api: &M, sink: &S, ids: &[String]) -> Result<usize>
where
    M: MetadataApi + ?Sized,
    S: EventSink + ?Sized,
{
    let tracks = api.get_tracks(ids).await?;
    sink.upsert_tracks(&tracks).await?;
    Ok(tracks.len())
}

async fn store_artists<M, S>(api: &M, sink: &S, ids: &[String]) -> Result<usize>
where
    M: MetadataApi + ?Sized,
    S: EventSink + ?Sized,
{
    let artists = api.get_artists(ids).await?;
    sink.upsert_artists(&artists).await?;
    Ok(artists.len())
}
