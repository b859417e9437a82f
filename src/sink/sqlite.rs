//! Relational sink backed by SQLite.
//!
//! Tables are created on connect. A batch is written in one transaction, and
//! every insert is `ON CONFLICT DO NOTHING` on the natural key, so replays are
//! absorbed.

use super::EventSink;
use crate::types::{ArtistDetails, Batch, TrackDetails};
use crate::{Result, SyncError};
use async_trait::async_trait;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use std::path::Path;

pub struct SqliteSink {
    pool: SqlitePool,
}

impl SqliteSink {
    /// Open (creating if necessary) the database behind `url`.
    pub async fn connect(url: &str) -> Result<Self> {
        if url == "sqlite::memory:" {
            return Self::in_memory().await;
        }

        let path = url.strip_prefix("sqlite://").unwrap_or(url);
        let path = path.split('?').next().unwrap_or(path);
        if let Some(parent) = Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| SyncError::Sink(format!("cannot create {}: {e}", parent.display())))?;
            }
        }

        let db_url = if url.contains('?') {
            url.to_string()
        } else {
            format!("sqlite://{path}?mode=rwc")
        };
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect(&db_url)
            .await?;

        log::info!("Opened sqlite sink: {path}");
        Self::from_pool(pool).await
    }

    /// A private in-memory database, mostly for tests.
    pub async fn in_memory() -> Result<Self> {
        // Every connection to :memory: is its own database, so the single
        // connection must never be recycled.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;
        Self::from_pool(pool).await
    }

    pub async fn from_pool(pool: SqlitePool) -> Result<Self> {
        let sink = Self { pool };
        sink.create_schema().await?;
        Ok(sink)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn create_schema(&self) -> Result<()> {
        sqlx::query("PRAGMA busy_timeout = 5000")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS listening_history (
                track_id TEXT NOT NULL,
                played_at TEXT NOT NULL,
                played_at_ms INTEGER NOT NULL,
                artist_id TEXT NOT NULL,
                track_name TEXT NOT NULL,
                artist_name TEXT NOT NULL,
                PRIMARY KEY (track_id, played_at_ms)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS tracks (
                track_id TEXT PRIMARY KEY,
                track_name TEXT NOT NULL,
                artist_name TEXT,
                album_name TEXT,
                album_release_date TEXT,
                album_image TEXT,
                popularity INTEGER,
                duration_ms INTEGER,
                explicit INTEGER
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS artists (
                artist_id TEXT PRIMARY KEY,
                artist_name TEXT NOT NULL,
                genres TEXT,
                followers INTEGER,
                popularity INTEGER,
                image TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn count_events(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM listening_history")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    pub async fn max_played_at_ms(&self) -> Result<Option<i64>> {
        let max: Option<i64> = sqlx::query_scalar("SELECT MAX(played_at_ms) FROM listening_history")
            .fetch_one(&self.pool)
            .await?;
        Ok(max)
    }
}

#[async_trait(?Send)]
impl EventSink for SqliteSink {
    async fn append_events(&self, batch: &Batch) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        let mut inserted = 0u64;
        for event in &batch.events {
            let result = sqlx::query(
                r#"
                INSERT INTO listening_history (
                    track_id, played_at, played_at_ms, artist_id, track_name, artist_name
                ) VALUES (?, ?, ?, ?, ?, ?)
                ON CONFLICT(track_id, played_at_ms) DO NOTHING
                "#,
            )
            .bind(&event.track_id)
            .bind(&event.played_at)
            .bind(event.played_at_ms)
            .bind(&event.artist_id)
            .bind(&event.track_name)
            .bind(&event.artist_name)
            .execute(&mut *tx)
            .await?;
            inserted += result.rows_affected();
        }
        tx.commit().await?;

        log::info!(
            "Stored {inserted} new of {} events ({} already present)",
            batch.len(),
            batch.len() as u64 - inserted
        );
        Ok(())
    }

    async fn upsert_tracks(&self, tracks: &[TrackDetails]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for track in tracks {
            sqlx::query(
                r#"
                INSERT INTO tracks (
                    track_id, track_name, artist_name, album_name, album_release_date,
                    album_image, popularity, duration_ms, explicit
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(track_id) DO NOTHING
                "#,
            )
            .bind(&track.track_id)
            .bind(&track.track_name)
            .bind(&track.artist_name)
            .bind(&track.album_name)
            .bind(&track.album_release_date)
            .bind(&track.album_image)
            .bind(track.popularity.map(i64::from))
            .bind(track.duration_ms.map(|d| d as i64))
            .bind(track.explicit)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn upsert_artists(&self, artists: &[ArtistDetails]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for artist in artists {
            let genres = serde_json::to_string(&artist.genres)
                .map_err(|e| SyncError::Sink(e.to_string()))?;
            sqlx::query(
                r#"
                INSERT INTO artists (
                    artist_id, artist_name, genres, followers, popularity, image
                ) VALUES (?, ?, ?, ?, ?, ?)
                ON CONFLICT(artist_id) DO NOTHING
                "#,
            )
            .bind(&artist.artist_id)
            .bind(&artist.artist_name)
            .bind(genres)
            .bind(artist.followers.map(|f| f as i64))
            .bind(artist.popularity.map(i64::from))
            .bind(&artist.image)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }
}
