use crate::api::{
    parse_artists_response, parse_recently_played_response, parse_tracks_response, MetadataApi,
    PlayHistoryApi, MAX_LOOKUP_BATCH,
};
use crate::token::{ApiToken, TokenPersistence};
use crate::types::{ArtistDetails, RecentlyPlayed, TimestampMs, TrackDetails};
use crate::{Result, SyncError};
use async_trait::async_trait;
use chrono::Utc;
use http_client::{HttpClient, Request, Response};
use http_types::{Method, Url};
use serde::Deserialize;
use std::sync::Mutex;

pub const DEFAULT_API_BASE: &str = "https://api.spotify.com/v1";
pub const DEFAULT_ACCOUNTS_BASE: &str = "https://accounts.spotify.com";
pub const RECENTLY_PLAYED_SCOPE: &str = "user-read-recently-played";

/// Registered application credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiCredentials {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
}

impl ApiCredentials {
    /// URL a user visits once to grant access and obtain a refresh token.
    pub fn authorize_url(&self, accounts_base: &str) -> String {
        format!(
            "{accounts_base}/authorize?response_type=code&client_id={}&redirect_uri={}&scope={}",
            urlencoding::encode(&self.client_id),
            urlencoding::encode(&self.redirect_uri),
            urlencoding::encode(RECENTLY_PLAYED_SCOPE),
        )
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
    refresh_token: Option<String>,
}

/// HTTP client for the music-streaming Web API.
///
/// Access tokens are obtained with the refresh-token grant, cached with their
/// expiry and, when a [`TokenPersistence`] is attached, written back to disk
/// so rotated refresh tokens survive across runs.
///
/// # Examples
///
/// ```rust,no_run
/// use listen_sync::spotify::{ApiCredentials, SpotifyClient};
/// use listen_sync::token::ApiToken;
/// use listen_sync::PlayHistoryApi;
///
/// #[tokio::main]
/// async fn main() -> listen_sync::Result<()> {
///     let credentials = ApiCredentials {
///         client_id: "id".to_string(),
///         client_secret: "secret".to_string(),
///         redirect_uri: "http://localhost:8888/callback".to_string(),
///     };
///     let http_client = http_client::native::NativeClient::new();
///     let client = SpotifyClient::new(
///         Box::new(http_client),
///         credentials,
///         ApiToken::new("refresh-token".to_string()),
///     );
///
///     let plays = client.get_recent_plays(1_735_689_600_000, 50).await?;
///     println!("{} plays", plays.items.len());
///     Ok(())
/// }
/// ```
pub struct SpotifyClient {
    client: Box<dyn HttpClient>,
    credentials: ApiCredentials,
    token: Mutex<ApiToken>,
    persistence: Option<TokenPersistence>,
    api_base: String,
    accounts_base: String,
}

impl SpotifyClient {
    pub fn new(client: Box<dyn HttpClient>, credentials: ApiCredentials, token: ApiToken) -> Self {
        Self::with_base_urls(
            client,
            credentials,
            token,
            DEFAULT_API_BASE.to_string(),
            DEFAULT_ACCOUNTS_BASE.to_string(),
        )
    }

    /// Create a client against custom endpoints, useful for testing.
    pub fn with_base_urls(
        client: Box<dyn HttpClient>,
        credentials: ApiCredentials,
        token: ApiToken,
        api_base: String,
        accounts_base: String,
    ) -> Self {
        Self {
            client,
            credentials,
            token: Mutex::new(token),
            persistence: None,
            api_base: api_base.trim_end_matches('/').to_string(),
            accounts_base: accounts_base.trim_end_matches('/').to_string(),
        }
    }

    /// Resolve the token to start from and build a client.
    ///
    /// A cached token wins over `refresh_token`, since the accounts service may
    /// have rotated the refresh token since it was configured. With neither
    /// available this fails with [`SyncError::Config`] naming the URL that
    /// grants access.
    pub fn connect(
        client: Box<dyn HttpClient>,
        credentials: ApiCredentials,
        refresh_token: Option<String>,
        persistence: TokenPersistence,
    ) -> Result<Self> {
        let cached = persistence.load()?.filter(ApiToken::is_valid);
        let token = match (cached, refresh_token.filter(|t| !t.is_empty())) {
            (Some(token), _) => token,
            (None, Some(refresh_token)) => ApiToken::new(refresh_token),
            (None, None) => {
                return Err(SyncError::Config(format!(
                    "no refresh token configured or cached; authorize at {} and set API_REFRESH_TOKEN",
                    credentials.authorize_url(DEFAULT_ACCOUNTS_BASE)
                )))
            }
        };

        Ok(Self::new(client, credentials, token).with_persistence(persistence))
    }

    pub fn with_persistence(mut self, persistence: TokenPersistence) -> Self {
        self.persistence = Some(persistence);
        self
    }

    /// Snapshot of the current token state.
    pub fn token(&self) -> ApiToken {
        self.token.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn update_token(&self, update: impl FnOnce(&mut ApiToken)) -> ApiToken {
        let mut token = self.token.lock().unwrap_or_else(|e| e.into_inner());
        update(&mut token);
        token.clone()
    }

    async fn send(&self, request: Request) -> Result<Response> {
        self.client
            .send(request)
            .await
            .map_err(|e| SyncError::TransientFetch(e.to_string()))
    }

    async fn body(response: &mut Response) -> Result<String> {
        response
            .body_string()
            .await
            .map_err(|e| SyncError::TransientFetch(e.to_string()))
    }

    fn retry_after(response: &Response) -> u64 {
        response
            .header("retry-after")
            .and_then(|h| h.get(0))
            .and_then(|v| v.as_str().trim().parse::<u64>().ok())
            .unwrap_or(1)
    }

    fn parse_url(url: &str) -> Result<Url> {
        url.parse::<Url>()
            .map_err(|e| SyncError::Config(format!("invalid URL '{url}': {e}")))
    }

    /// A bearer token valid for at least the refresh margin, refreshing if needed.
    pub async fn access_token(&self) -> Result<String> {
        let current = self.token();
        if let Some(token) = current.usable_access_token(Utc::now()) {
            return Ok(token.to_string());
        }

        log::debug!("Refreshing access token");
        let url = format!("{}/api/token", self.accounts_base);
        let form = format!(
            "grant_type=refresh_token&refresh_token={}&client_id={}&client_secret={}",
            urlencoding::encode(&current.refresh_token),
            urlencoding::encode(&self.credentials.client_id),
            urlencoding::encode(&self.credentials.client_secret),
        );

        let mut request = Request::new(Method::Post, Self::parse_url(&url)?);
        request.insert_header("Content-Type", "application/x-www-form-urlencoded");
        request.insert_header("Accept", "application/json");
        request.set_body(form);

        let mut response = self.send(request).await?;
        let status: u16 = response.status().into();
        let body = Self::body(&mut response).await?;

        match status {
            200..=299 => {}
            400 | 401 => {
                return Err(SyncError::Config(format!(
                    "refresh token rejected ({status}): {body}"
                )))
            }
            429 => {
                return Err(SyncError::RateLimit {
                    retry_after: Self::retry_after(&response),
                })
            }
            _ => {
                return Err(SyncError::TransientFetch(format!(
                    "token refresh failed with status {status}: {body}"
                )))
            }
        }

        let issued: TokenResponse =
            serde_json::from_str(&body).map_err(|e| SyncError::Parse(e.to_string()))?;
        let access_token = issued.access_token.clone();
        let token = self.update_token(|token| {
            if let Some(rotated) = issued.refresh_token.filter(|t| !t.is_empty()) {
                token.refresh_token = rotated;
            }
            token.set_access_token(issued.access_token, issued.expires_in, Utc::now());
        });

        if let Some(persistence) = &self.persistence {
            if let Err(e) = persistence.save(&token) {
                log::warn!("Failed to persist refreshed token: {e}");
            }
        }

        Ok(access_token)
    }

    /// Authenticated GET returning the response body.
    async fn get_json(&self, url: &str) -> Result<String> {
        let access_token = self.access_token().await?;

        let mut request = Request::new(Method::Get, Self::parse_url(url)?);
        request.insert_header("Authorization", format!("Bearer {access_token}").as_str());
        request.insert_header("Accept", "application/json");

        let request_start = std::time::Instant::now();
        let mut response = self.send(request).await?;
        let status: u16 = response.status().into();
        log::debug!(
            "GET {url} -> {status} in {}ms",
            request_start.elapsed().as_millis()
        );

        match status {
            200..=299 => Self::body(&mut response).await,
            429 => {
                let retry_after = Self::retry_after(&response);
                log::warn!("Rate limited by API, server asks for {retry_after}s");
                Err(SyncError::RateLimit { retry_after })
            }
            401 => {
                self.update_token(ApiToken::invalidate_access_token);
                Err(SyncError::TransientFetch(
                    "access token rejected by API".to_string(),
                ))
            }
            403 => {
                let body = Self::body(&mut response).await.unwrap_or_default();
                Err(SyncError::Config(format!(
                    "access forbidden, is the '{RECENTLY_PLAYED_SCOPE}' scope granted? {body}"
                )))
            }
            _ => {
                let body = Self::body(&mut response).await.unwrap_or_default();
                Err(SyncError::TransientFetch(format!(
                    "request failed with status {status}: {body}"
                )))
            }
        }
    }

    fn ids_param(ids: &[String]) -> Result<String> {
        if ids.len() > MAX_LOOKUP_BATCH {
            return Err(SyncError::Config(format!(
                "at most {MAX_LOOKUP_BATCH} ids per lookup, got {}",
                ids.len()
            )));
        }
        Ok(urlencoding::encode(&ids.join(",")).into_owned())
    }
}

#[async_trait(?Send)]
impl PlayHistoryApi for SpotifyClient {
    async fn get_recent_plays(&self, after: TimestampMs, limit: u32) -> Result<RecentlyPlayed> {
        let url = format!(
            "{}/me/player/recently-played?limit={limit}&after={after}",
            self.api_base
        );
        let body = self.get_json(&url).await?;
        parse_recently_played_response(&body)
    }
}

#[async_trait(?Send)]
impl MetadataApi for SpotifyClient {
    async fn get_tracks(&self, ids: &[String]) -> Result<Vec<TrackDetails>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let url = format!("{}/tracks?ids={}", self.api_base, Self::ids_param(ids)?);
        let body = self.get_json(&url).await?;
        parse_tracks_response(&body)
    }

    async fn get_artists(&self, ids: &[String]) -> Result<Vec<ArtistDetails>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let url = format!("{}/artists?ids={}", self.api_base, Self::ids_param(ids)?);
        let body = self.get_json(&url).await?;
        parse_artists_response(&body)
    }
}
