//! Data types for play history and associated metadata.
//!
//! This module contains the core data structures that flow through a sync run:
//! raw items as returned by the API, normalized play events, pages, batches,
//! and the dimension records produced by metadata enrichment.

use crate::{Result, SyncError};
use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Milliseconds since the Unix epoch, UTC.
pub type TimestampMs = i64;

/// Parse an ISO-8601 UTC `played_at` string into epoch milliseconds.
///
/// Sub-second precision beyond milliseconds is truncated.
///
/// # Examples
///
/// ```rust
/// use listen_sync::types::parse_played_at;
///
/// assert_eq!(parse_played_at("2025-01-01T00:00:01.250Z").unwrap(), 1_735_689_601_250);
/// ```
pub fn parse_played_at(played_at: &str) -> Result<TimestampMs> {
    DateTime::parse_from_rfc3339(played_at)
        .map(|dt| dt.with_timezone(&Utc).timestamp_millis())
        .map_err(|e| SyncError::Parse(format!("invalid played_at '{played_at}': {e}")))
}

/// Render epoch milliseconds as an RFC 3339 UTC string with millisecond precision.
pub fn format_timestamp_ms(ms: TimestampMs) -> String {
    match DateTime::<Utc>::from_timestamp_millis(ms) {
        Some(dt) => dt.to_rfc3339_opts(SecondsFormat::Millis, true),
        None => format!("{ms}ms"),
    }
}

/// The watermark used when none has ever been committed: midnight UTC on
/// 1 January of `year`.
pub fn default_watermark(year: i32) -> Result<TimestampMs> {
    Utc.with_ymd_and_hms(year, 1, 1, 0, 0, 0)
        .single()
        .map(|dt| dt.timestamp_millis())
        .ok_or_else(|| SyncError::Config(format!("invalid start year {year}")))
}

// ================================================================================================
// PLAY HISTORY
// ================================================================================================

/// One item of the recently-played listing, as exposed by an API client.
///
/// Identifiers are optional because the upstream API reports local files
/// without a track id. Only the first credited artist is carried.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawPlayItem {
    /// External track identifier, if the track has one
    pub track_id: Option<String>,
    /// The track name/title
    pub track_name: String,
    /// Identifier of the primary (first credited) artist
    pub artist_id: Option<String>,
    /// Name of the primary artist
    pub artist_name: Option<String>,
    /// ISO-8601 UTC play time as provided by the API
    pub played_at: String,
}

impl RawPlayItem {
    /// Epoch-millisecond form of [`played_at`](Self::played_at).
    pub fn played_at_ms(&self) -> Result<TimestampMs> {
        parse_played_at(&self.played_at)
    }

    /// Convert into a [`PlayEvent`] using an already parsed timestamp.
    ///
    /// Returns `None` for items without a track id, which cannot be keyed.
    pub fn into_event(self, played_at_ms: TimestampMs) -> Option<PlayEvent> {
        let track_id = self.track_id.filter(|id| !id.is_empty())?;
        Some(PlayEvent {
            track_id,
            artist_id: self.artist_id.unwrap_or_default(),
            track_name: self.track_name,
            artist_name: self.artist_name.unwrap_or_default(),
            played_at: self.played_at,
            played_at_ms,
        })
    }
}

/// Response body of one `get_recent_plays` call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecentlyPlayed {
    /// Items strictly after the requested bound; empty means end of history
    pub items: Vec<RawPlayItem>,
}

/// One play of one track by the user.
///
/// The natural key is `(track_id, played_at_ms)`: a track can be played many
/// times, but not twice at the same instant.
///
/// # Examples
///
/// ```rust
/// use listen_sync::PlayEvent;
///
/// let event = PlayEvent {
///     track_id: "4uLU6hMCjMI75M1A2tKUQC".to_string(),
///     artist_id: "0gxyHStUsqpMadRV0Di1Qt".to_string(),
///     track_name: "Never Gonna Give You Up".to_string(),
///     artist_name: "Rick Astley".to_string(),
///     played_at: "2025-03-01T12:00:00.000Z".to_string(),
///     played_at_ms: 1_740_830_400_000,
/// };
///
/// assert_eq!(event.key(), ("4uLU6hMCjMI75M1A2tKUQC".to_string(), 1_740_830_400_000));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PlayEvent {
    /// External track identifier
    pub track_id: String,
    /// Identifier of the primary artist (empty if the API credited none)
    pub artist_id: String,
    /// The track name/title
    pub track_name: String,
    /// Name of the primary artist
    pub artist_name: String,
    /// ISO-8601 UTC play time exactly as the API reported it
    pub played_at: String,
    /// `played_at` in epoch milliseconds
    pub played_at_ms: TimestampMs,
}

impl PlayEvent {
    /// The `(track_id, played_at_ms)` natural key.
    pub fn key(&self) -> (String, TimestampMs) {
        (self.track_id.clone(), self.played_at_ms)
    }
}

/// Events returned by one API call, in the order the API returned them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    /// Keyable events on this page
    pub events: Vec<PlayEvent>,
    /// Number of items the API returned, including unkeyable ones
    pub raw_count: usize,
    /// The `after` bound this page was requested with
    pub requested_after: TimestampMs,
    /// The cursor after absorbing this page
    pub cursor: TimestampMs,
    /// Page number within the current pagination (1-indexed)
    pub number: u32,
}

/// The deduplicated, time-filtered events produced by one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Batch {
    /// Events in arrival order
    pub events: Vec<PlayEvent>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Unique track ids, in first-seen order.
    pub fn track_ids(&self) -> Vec<String> {
        unique_in_order(self.events.iter().map(|e| e.track_id.as_str()))
    }

    /// Unique non-empty artist ids, in first-seen order.
    pub fn artist_ids(&self) -> Vec<String> {
        unique_in_order(
            self.events
                .iter()
                .map(|e| e.artist_id.as_str())
                .filter(|id| !id.is_empty()),
        )
    }
}

fn unique_in_order<'a>(ids: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut seen = HashSet::new();
    ids.filter(|id| seen.insert(*id))
        .map(str::to_string)
        .collect()
}

// ================================================================================================
// DIMENSION METADATA
// ================================================================================================

/// Descriptive metadata for a track.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackDetails {
    pub track_id: String,
    pub track_name: String,
    pub artist_name: Option<String>,
    pub album_name: Option<String>,
    pub album_release_date: Option<String>,
    pub album_image: Option<String>,
    pub popularity: Option<u32>,
    pub duration_ms: Option<u64>,
    pub explicit: Option<bool>,
}

/// Descriptive metadata for an artist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtistDetails {
    pub artist_id: String,
    pub artist_name: String,
    pub genres: Vec<String>,
    pub followers: Option<u64>,
    pub popularity: Option<u32>,
    pub image: Option<String>,
}
