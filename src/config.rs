use crate::iterator::FetchConfig;
use crate::sink::SinkTarget;
use crate::spotify::ApiCredentials;
use crate::types::{default_watermark, TimestampMs};
use crate::watermark::FileWatermarkStore;
use crate::{Result, SyncError};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_START_YEAR: i32 = 2025;

/// Everything a run needs, resolved from the environment.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub credentials: ApiCredentials,
    pub refresh_token: Option<String>,
    pub sink: SinkTarget,
    pub watermark_path: PathBuf,
    pub start_year: i32,
    pub fetch: FetchConfig,
    pub run_timeout: Option<Duration>,
}

impl SyncConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Resolve configuration through `lookup`, so callers can supply
    /// variables from somewhere other than the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let required = |name: &str| {
            get(name).ok_or_else(|| {
                SyncError::Config(format!("{name} environment variable not set"))
            })
        };

        let credentials = ApiCredentials {
            client_id: required("API_CLIENT_ID")?,
            client_secret: required("API_CLIENT_SECRET")?,
            redirect_uri: required("API_REDIRECT_URI")?,
        };
        let sink = SinkTarget::parse(&required("SINK_CONNECTION")?)?;

        let watermark_path = match get("WATERMARK_PATH") {
            Some(path) => PathBuf::from(path),
            None => FileWatermarkStore::default_path()?,
        };

        let start_year = parse_var(&get, "SYNC_START_YEAR")?.unwrap_or(DEFAULT_START_YEAR);
        // Fail here rather than at the first read.
        default_watermark(start_year)?;

        let defaults = FetchConfig::default();
        let fetch = FetchConfig {
            page_size: parse_var(&get, "SYNC_PAGE_SIZE")?.unwrap_or(defaults.page_size),
            min_interval: parse_var::<u64>(&get, "SYNC_MIN_INTERVAL_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.min_interval),
        };
        fetch.validate()?;

        let run_timeout = parse_var::<u64>(&get, "SYNC_RUN_TIMEOUT_SECS")?.map(Duration::from_secs);

        Ok(Self {
            credentials,
            refresh_token: get("API_REFRESH_TOKEN"),
            sink,
            watermark_path,
            start_year,
            fetch,
            run_timeout,
        })
    }

    /// Watermark used when none has been committed yet.
    pub fn default_watermark(&self) -> Result<TimestampMs> {
        default_watermark(self.start_year)
    }

    pub fn watermark_store(&self) -> Result<FileWatermarkStore> {
        Ok(FileWatermarkStore::new(
            self.watermark_path.clone(),
            self.default_watermark()?,
        ))
    }
}

fn parse_var<T: FromStr>(get: &impl Fn(&str) -> Option<String>, name: &str) -> Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    get(name)
        .map(|value| {
            value.trim().parse::<T>().map_err(|e| {
                SyncError::Config(format!("{name} has invalid value '{value}': {e}"))
            })
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    const REQUIRED: [(&str, &str); 4] = [
        ("API_CLIENT_ID", "client"),
        ("API_CLIENT_SECRET", "secret"),
        ("API_REDIRECT_URI", "http://localhost:8888/callback"),
        ("SINK_CONNECTION", "sqlite://listens.db"),
    ];

    fn with(extra: &[(&'static str, &'static str)]) -> Vec<(&'static str, &'static str)> {
        let mut vars = REQUIRED.to_vec();
        vars.extend_from_slice(extra);
        vars
    }

    #[test]
    fn test_defaults() {
        let config =
            SyncConfig::from_lookup(lookup(&with(&[("WATERMARK_PATH", "/tmp/wm.txt")]))).unwrap();

        assert_eq!(config.credentials.client_id, "client");
        assert_eq!(config.sink, SinkTarget::Sqlite("sqlite://listens.db".to_string()));
        assert_eq!(config.watermark_path, PathBuf::from("/tmp/wm.txt"));
        assert_eq!(config.fetch, FetchConfig::default());
        assert_eq!(config.run_timeout, None);
        assert_eq!(config.refresh_token, None);
        assert_eq!(config.default_watermark().unwrap(), 1_735_689_600_000);
    }

    #[test]
    fn test_each_required_variable_is_checked() {
        for (missing, _) in REQUIRED {
            let vars: Vec<_> = REQUIRED.iter().copied().filter(|(k, _)| *k != missing).collect();
            match SyncConfig::from_lookup(lookup(&vars)) {
                Err(SyncError::Config(msg)) => assert!(msg.contains(missing)),
                other => panic!("Expected config error for {missing}, got: {other:?}"),
            }
        }
    }

    #[test]
    fn test_empty_value_counts_as_missing() {
        let mut vars = REQUIRED.to_vec();
        vars[1] = ("API_CLIENT_SECRET", "  ");
        assert!(matches!(
            SyncConfig::from_lookup(lookup(&vars)),
            Err(SyncError::Config(_))
        ));
    }

    #[test]
    fn test_tuning_overrides() {
        let config = SyncConfig::from_lookup(lookup(&with(&[
            ("WATERMARK_PATH", "wm.txt"),
            ("SYNC_PAGE_SIZE", "20"),
            ("SYNC_MIN_INTERVAL_MS", "250"),
            ("SYNC_RUN_TIMEOUT_SECS", "600"),
            ("SYNC_START_YEAR", "2024"),
            ("API_REFRESH_TOKEN", "refresh"),
        ])))
        .unwrap();

        assert_eq!(config.fetch.page_size, 20);
        assert_eq!(config.fetch.min_interval, Duration::from_millis(250));
        assert_eq!(config.run_timeout, Some(Duration::from_secs(600)));
        assert_eq!(config.default_watermark().unwrap(), 1_704_067_200_000);
        assert_eq!(config.refresh_token.as_deref(), Some("refresh"));
    }

    #[test]
    fn test_invalid_numbers_are_config_errors() {
        for (name, value) in [
            ("SYNC_PAGE_SIZE", "fifty"),
            ("SYNC_PAGE_SIZE", "51"),
            ("SYNC_MIN_INTERVAL_MS", "-1"),
            ("SYNC_START_YEAR", "next"),
        ] {
            let vars = with(&[("WATERMARK_PATH", "wm.txt"), (name, value)]);
            assert!(
                matches!(SyncConfig::from_lookup(lookup(&vars)), Err(SyncError::Config(_))),
                "{name}={value} should be rejected"
            );
        }
    }

    #[test]
    fn test_unknown_sink_scheme_is_config_error() {
        let mut vars = REQUIRED.to_vec();
        vars[3] = ("SINK_CONNECTION", "postgres://localhost/listens");
        assert!(matches!(
            SyncConfig::from_lookup(lookup(&vars)),
            Err(SyncError::Config(_))
        ));
    }
}
