use crate::{Result, SyncError};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Access tokens this close to expiry are refreshed before use.
const EXPIRY_MARGIN_SECS: i64 = 60;

/// Serializable OAuth token state that can be persisted and restored.
///
/// The refresh token is long-lived and may be rotated by the accounts
/// service on refresh; the access token is short-lived and cached with its
/// expiry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiToken {
    /// Long-lived refresh token
    pub refresh_token: String,
    /// Cached bearer token, if one has been obtained
    pub access_token: Option<String>,
    /// When the cached bearer token expires
    pub expires_at: Option<DateTime<Utc>>,
}

impl ApiToken {
    pub fn new(refresh_token: String) -> Self {
        Self {
            refresh_token,
            access_token: None,
            expires_at: None,
        }
    }

    /// A token without a refresh token cannot be used for anything.
    pub fn is_valid(&self) -> bool {
        !self.refresh_token.is_empty()
    }

    /// The cached access token if it is still usable at `now`.
    pub fn usable_access_token(&self, now: DateTime<Utc>) -> Option<&str> {
        match (&self.access_token, self.expires_at) {
            (Some(token), Some(expires_at))
                if expires_at - Duration::seconds(EXPIRY_MARGIN_SECS) > now =>
            {
                Some(token.as_str())
            }
            _ => None,
        }
    }

    /// Store a freshly issued access token.
    pub fn set_access_token(&mut self, access_token: String, expires_in_secs: i64, now: DateTime<Utc>) {
        self.access_token = Some(access_token);
        self.expires_at = Some(now + Duration::seconds(expires_in_secs));
    }

    /// Forget the cached access token, forcing a refresh on next use.
    pub fn invalidate_access_token(&mut self) {
        self.access_token = None;
        self.expires_at = None;
    }

    pub fn to_json(&self) -> std::result::Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(json: &str) -> std::result::Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

/// Token cache stored as JSON, by default under the XDG data directory:
/// `~/.local/share/listen-sync/tokens/{client_id}.json`
#[derive(Debug, Clone)]
pub struct TokenPersistence {
    path: PathBuf,
}

impl TokenPersistence {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Cache location for the given API client id.
    pub fn for_client(client_id: &str) -> Result<Self> {
        let data_dir = dirs::data_dir().ok_or_else(|| {
            SyncError::Config("Cannot determine XDG data directory".to_string())
        })?;

        Ok(Self::new(
            data_dir
                .join("listen-sync")
                .join("tokens")
                .join(format!("{client_id}.json")),
        ))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    pub fn save(&self, token: &ApiToken) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let json = token
            .to_json()
            .map_err(|e| SyncError::Config(format!("Failed to serialize token: {e}")))?;
        fs::write(&self.path, json)?;

        log::debug!("Token saved to: {}", self.path.display());
        Ok(())
    }

    /// Load the cached token, or `None` if no cache exists.
    pub fn load(&self) -> Result<Option<ApiToken>> {
        if !self.path.exists() {
            return Ok(None);
        }

        let json = fs::read_to_string(&self.path)?;
        let token = ApiToken::from_json(&json).map_err(|e| {
            SyncError::Config(format!(
                "Failed to parse token cache {}: {e}",
                self.path.display()
            ))
        })?;

        log::debug!("Token loaded from: {}", self.path.display());
        Ok(Some(token))
    }

    pub fn remove(&self) -> Result<()> {
        if self.path.exists() {
            fs::remove_file(&self.path)?;
            log::debug!("Token removed from: {}", self.path.display());
        }
        Ok(())
    }
}
