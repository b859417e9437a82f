use thiserror::Error;

/// Error types for an incremental sync run.
///
/// Every variant propagates to the run's terminal state; none of them is
/// retried inside the run. A failed run leaves the watermark untouched, so the
/// next scheduled run re-fetches the same window.
///
/// # Error Handling Examples
///
/// ```rust,no_run
/// use listen_sync::SyncError;
///
/// fn report(err: &SyncError) {
///     match err {
///         SyncError::Config(msg) => eprintln!("Fix your configuration: {}", msg),
///         SyncError::CorruptWatermark(msg) => eprintln!("Operator action needed: {}", msg),
///         e if e.is_transient() => eprintln!("Will retry on the next run: {}", e),
///         e => eprintln!("Run failed: {}", e),
///     }
/// }
/// ```
#[derive(Error, Debug)]
pub enum SyncError {
    /// Missing or invalid credentials or sink configuration.
    ///
    /// Fatal and surfaced before any page request is made.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Network or server failure while paginating.
    ///
    /// # Common Causes
    /// - Connection failures and timeouts
    /// - 5xx responses from the API
    /// - An access token that expired mid-run
    #[error("Transient fetch error: {0}")]
    TransientFetch(String),

    /// The API rejected a request because of its rate limit.
    ///
    /// The `retry_after` field is the server's hint in seconds. This is a
    /// transient fetch failure; the orchestrator does not wait and retry.
    #[error("Rate limited, retry after {retry_after} seconds")]
    RateLimit {
        /// Number of seconds the server asked us to wait
        retry_after: u64,
    },

    /// The API returned a payload that could not be understood.
    #[error("Failed to parse response: {0}")]
    Parse(String),

    /// Writing a batch to the sink failed.
    ///
    /// The batch may be partially written; the sink's idempotent upsert
    /// absorbs the replay on the next run.
    #[error("Sink error: {0}")]
    Sink(String),

    /// The watermark store exists but its content is unreadable.
    ///
    /// Never silently defaulted: doing so would re-ingest or skip history.
    #[error("Corrupt watermark: {0}")]
    CorruptWatermark(String),

    /// The run was cancelled or hit its timeout.
    #[error("Run cancelled")]
    Cancelled,

    /// Local file system errors outside of watermark parsing.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SyncError {
    /// Whether a later run can reasonably be expected to succeed without
    /// operator intervention.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SyncError::TransientFetch(_) | SyncError::RateLimit { .. } | SyncError::Cancelled
        )
    }

    /// Process exit code used by the `run-sync` binary.
    pub fn exit_code(&self) -> i32 {
        match self {
            SyncError::Config(_) => 2,
            SyncError::TransientFetch(_)
            | SyncError::RateLimit { .. }
            | SyncError::Parse(_)
            | SyncError::Cancelled => 3,
            SyncError::Sink(_) => 4,
            SyncError::CorruptWatermark(_) => 5,
            SyncError::Io(_) => 1,
        }
    }
}

impl From<sqlx::Error> for SyncError {
    fn from(e: sqlx::Error) -> Self {
        SyncError::Sink(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(SyncError::TransientFetch("timeout".to_string()).is_transient());
        assert!(SyncError::RateLimit { retry_after: 3 }.is_transient());
        assert!(SyncError::Cancelled.is_transient());
        assert!(!SyncError::Config("missing".to_string()).is_transient());
        assert!(!SyncError::CorruptWatermark("abc".to_string()).is_transient());
        assert!(!SyncError::Sink("disk full".to_string()).is_transient());
    }

    #[test]
    fn test_exit_codes_are_distinct_per_kind() {
        assert_eq!(SyncError::Config(String::new()).exit_code(), 2);
        assert_eq!(SyncError::RateLimit { retry_after: 1 }.exit_code(), 3);
        assert_eq!(SyncError::Sink(String::new()).exit_code(), 4);
        assert_eq!(SyncError::CorruptWatermark(String::new()).exit_code(), 5);
    }
}
