//! Ledger connection and repository access (spec §4.1).
//!
//! Backed by a single SQLite file with `sqlx::migrate!` embedded
//! migrations. One repository struct per entity, each holding a cloned
//! pool — cheap, since `SqlitePool` is an `Arc` internally.

pub mod analytics;
pub mod jobs;
pub mod media_files;
pub mod playlist_videos;
pub mod playlists;
pub mod sqlite_helpers;
pub mod transcriptions;

use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::warn;

pub use analytics::AnalyticsRepository;
pub use jobs::{JobRepository, JobStatus};
pub use media_files::MediaFileRepository;
pub use playlist_videos::PlaylistVideoRepository;
pub use playlists::PlaylistRepository;
pub use transcriptions::TranscriptionRepository;

/// Ledger connection pool plus per-entity repository accessors.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open (and, if necessary, create) the ledger file at `url`.
    pub async fn connect(url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .with_context(|| format!("invalid database URL {url}"))?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new().max_connections(5).connect_with(options).await?;

        Ok(Self { pool })
    }

    /// Retry the initial connection with exponential backoff — the data
    /// directory may be on a mount that isn't ready yet at process start.
    pub async fn connect_with_retry(url: &str, max_attempts: u32) -> Result<Self> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match Self::connect(url).await {
                Ok(db) => return Ok(db),
                Err(err) if attempt < max_attempts => {
                    let backoff = Duration::from_secs(2u64.saturating_pow(attempt.min(6)));
                    warn!(attempt, %err, "ledger connection failed, retrying");
                    tokio::time::sleep(backoff).await;
                }
                Err(err) => {
                    return Err(err).context("failed to connect to ledger after retries");
                }
            }
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn media_files(&self) -> MediaFileRepository {
        MediaFileRepository::new(self.pool.clone())
    }

    pub fn jobs(&self) -> JobRepository {
        JobRepository::new(self.pool.clone())
    }

    pub fn playlists(&self) -> PlaylistRepository {
        PlaylistRepository::new(self.pool.clone())
    }

    pub fn playlist_videos(&self) -> PlaylistVideoRepository {
        PlaylistVideoRepository::new(self.pool.clone())
    }

    pub fn analytics(&self) -> AnalyticsRepository {
        AnalyticsRepository::new(self.pool.clone())
    }

    pub fn transcriptions(&self) -> TranscriptionRepository {
        TranscriptionRepository::new(self.pool.clone())
    }

    /// Run embedded migrations, bringing a fresh or older ledger file up
    /// to the current schema.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}
