use crate::types::{
    ArtistDetails, RawPlayItem, RecentlyPlayed, TimestampMs, TrackDetails,
};
use crate::{Result, SyncError};
use async_trait::async_trait;
use serde::Deserialize;

/// Hard maximum page size of the recently-played endpoint.
pub const MAX_PAGE_SIZE: u32 = 50;

/// Maximum number of ids accepted by the several-tracks/several-artists endpoints.
pub const MAX_LOOKUP_BATCH: usize = 50;

// =============================================================================
// API capability traits
// =============================================================================

/// The play-history capability consumed by the paginated fetcher.
///
/// Authentication and token refresh are entirely the implementation's
/// responsibility. Auth problems surface as [`SyncError::Config`] (cannot be
/// fixed by retrying) or [`SyncError::TransientFetch`].
///
/// # Mocking Support
///
/// When the `mock` feature is enabled, this crate provides `MockPlayHistoryApi`
/// that implements this trait using the `mockall` library.
#[cfg_attr(feature = "mock", mockall::automock)]
#[async_trait(?Send)]
pub trait PlayHistoryApi {
    /// Up to `limit` play items with `played_at` strictly after `after`.
    ///
    /// An empty `items` list signals the end of available history.
    async fn get_recent_plays(&self, after: TimestampMs, limit: u32) -> Result<RecentlyPlayed>;
}

/// Lookup of descriptive track and artist metadata.
#[cfg_attr(feature = "mock", mockall::automock)]
#[async_trait(?Send)]
pub trait MetadataApi {
    /// Details for up to [`MAX_LOOKUP_BATCH`] track ids. Unknown ids are omitted.
    async fn get_tracks(&self, ids: &[String]) -> Result<Vec<TrackDetails>>;

    /// Details for up to [`MAX_LOOKUP_BATCH`] artist ids. Unknown ids are omitted.
    async fn get_artists(&self, ids: &[String]) -> Result<Vec<ArtistDetails>>;
}

// =============================================================================
// Wire models
// =============================================================================

#[derive(Deserialize)]
pub struct ApiRecentlyPlayedResponse {
    #[serde(default)]
    pub items: Vec<ApiPlayHistoryItem>,
}

#[derive(Deserialize)]
pub struct ApiPlayHistoryItem {
    pub track: Option<ApiTrack>,
    pub played_at: String,
}

#[derive(Deserialize)]
pub struct ApiTrack {
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub artists: Vec<ApiArtistRef>,
    pub album: Option<ApiAlbum>,
    pub popularity: Option<u32>,
    pub duration_ms: Option<u64>,
    pub explicit: Option<bool>,
}

#[derive(Deserialize)]
pub struct ApiArtistRef {
    pub id: Option<String>,
    pub name: String,
}

#[derive(Deserialize)]
pub struct ApiAlbum {
    pub name: String,
    pub release_date: Option<String>,
    #[serde(default)]
    pub images: Vec<ApiImage>,
}

#[derive(Deserialize)]
pub struct ApiImage {
    pub url: String,
}

#[derive(Deserialize)]
pub struct ApiSeveralTracksResponse {
    pub tracks: Vec<Option<ApiTrack>>,
}

#[derive(Deserialize)]
pub struct ApiSeveralArtistsResponse {
    pub artists: Vec<Option<ApiArtist>>,
}

#[derive(Deserialize)]
pub struct ApiArtist {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub genres: Vec<String>,
    pub followers: Option<ApiFollowers>,
    pub popularity: Option<u32>,
    #[serde(default)]
    pub images: Vec<ApiImage>,
}

#[derive(Deserialize)]
pub struct ApiFollowers {
    pub total: Option<u64>,
}

// =============================================================================
// Parsing
// =============================================================================

fn parse_json<'a, T: Deserialize<'a>>(json: &'a str) -> Result<T> {
    serde_json::from_str(json).map_err(|e| SyncError::Parse(e.to_string()))
}

/// Parse a recently-played listing.
///
/// Only the first credited artist of each track is kept.
pub fn parse_recently_played_response(json: &str) -> Result<RecentlyPlayed> {
    let response: ApiRecentlyPlayedResponse = parse_json(json)?;

    let items = response
        .items
        .into_iter()
        .map(|item| match item.track {
            Some(track) => {
                let primary = track.artists.into_iter().next();
                RawPlayItem {
                    track_id: track.id,
                    track_name: track.name,
                    artist_id: primary.as_ref().and_then(|a| a.id.clone()),
                    artist_name: primary.map(|a| a.name),
                    played_at: item.played_at,
                }
            }
            None => RawPlayItem {
                track_id: None,
                track_name: String::new(),
                artist_id: None,
                artist_name: None,
                played_at: item.played_at,
            },
        })
        .collect();

    Ok(RecentlyPlayed { items })
}

pub fn parse_tracks_response(json: &str) -> Result<Vec<TrackDetails>> {
    let response: ApiSeveralTracksResponse = parse_json(json)?;

    Ok(response
        .tracks
        .into_iter()
        .flatten()
        .filter_map(|t| {
            let track_id = t.id?;
            let (album_name, album_release_date, album_image) = match t.album {
                Some(album) => (
                    Some(album.name),
                    album.release_date,
                    album.images.into_iter().next().map(|i| i.url),
                ),
                None => (None, None, None),
            };
            Some(TrackDetails {
                track_id,
                track_name: t.name,
                artist_name: t.artists.into_iter().next().map(|a| a.name),
                album_name,
                album_release_date,
                album_image,
                popularity: t.popularity,
                duration_ms: t.duration_ms,
                explicit: t.explicit,
            })
        })
        .collect())
}

pub fn parse_artists_response(json: &str) -> Result<Vec<ArtistDetails>> {
    let response: ApiSeveralArtistsResponse = parse_json(json)?;

    Ok(response
        .artists
        .into_iter()
        .flatten()
        .map(|a| ArtistDetails {
            artist_id: a.id,
            artist_name: a.name,
            genres: a.genres,
            followers: a.followers.and_then(|f| f.total),
            popularity: a.popularity,
            image: a.images.into_iter().next().map(|i| i.url),
        })
        .collect())
}
