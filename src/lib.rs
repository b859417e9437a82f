//! # listen-sync
//!
//! Incremental extraction of a user's music play history into a durable
//! store, checkpointed by a single "last ingested play" watermark.
//!
//! A run reads the watermark, pages through the recently-played listing
//! strictly after it, drops anything at or before the watermark, writes the
//! batch to a sink and only then advances the watermark. Any failure leaves
//! the watermark untouched, so the next run re-fetches the same window and
//! the sink's idempotent upsert absorbs the replay.
//!
//! ```rust,no_run
//! use listen_sync::sink::MemorySink;
//! use listen_sync::spotify::{ApiCredentials, SpotifyClient};
//! use listen_sync::token::ApiToken;
//! use listen_sync::watermark::FileWatermarkStore;
//! use listen_sync::{RunConfig, SyncRunner};
//!
//! #[tokio::main]
//! async fn main() -> listen_sync::Result<()> {
//!     let api = SpotifyClient::new(
//!         Box::new(http_client::native::NativeClient::new()),
//!         ApiCredentials {
//!             client_id: "id".to_string(),
//!             client_secret: "secret".to_string(),
//!             redirect_uri: "http://localhost:8888/callback".to_string(),
//!         },
//!         ApiToken::new("refresh-token".to_string()),
//!     );
//!     let store = FileWatermarkStore::new("last_extraction.txt", 1_735_689_600_000);
//!     let runner = SyncRunner::new(api, MemorySink::new(), store, RunConfig::default());
//!
//!     let report = runner.run_once().await?;
//!     println!("{} new plays", report.events());
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod cancel;
pub mod config;
pub mod enrich;
pub mod error;
pub mod events;
pub mod iterator;
pub mod normalize;
pub mod sink;
pub mod spotify;
pub mod sync;
pub mod token;
pub mod types;
pub mod watermark;

pub use api::{MetadataApi, PlayHistoryApi};
pub use cancel::CancellationState;
pub use config::SyncConfig;
pub use enrich::{enrich_metadata, EnrichReport};
pub use error::SyncError;
pub use events::{RunStage, SharedEventBroadcaster, SyncEvent};
pub use iterator::{AsyncPaginatedIterator, FetchConfig, RecentPlaysIterator};
pub use normalize::{normalize, BatchAccumulator};
pub use sink::{EventSink, SinkTarget};
pub use spotify::SpotifyClient;
pub use sync::{RunConfig, SyncReport, SyncRunner};
pub use types::{
    ArtistDetails, Batch, Page, PlayEvent, RawPlayItem, RecentlyPlayed, TimestampMs, TrackDetails,
};
pub use watermark::{FileWatermarkStore, WatermarkStore};

#[cfg(feature = "mock")]
pub use api::{MockMetadataApi, MockPlayHistoryApi};

pub type Result<T> = std::result::Result<T, SyncError>;
