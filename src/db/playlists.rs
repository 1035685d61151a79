//! Playlist ledger repository.

use sqlx::SqlitePool;

use crate::db::sqlite_helpers::now_iso8601;
use crate::error::CoreResult;

/// A named collection of videos from a remote source (spec §3 Playlist).
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PlaylistRecord {
    pub id: i64,
    pub playlist_id: String,
    pub title: Option<String>,
    pub uploader: Option<String>,
    pub source_url: Option<String>,
    pub source_platform: String,
    pub video_count: i64,
    pub created_at: String,
}

#[derive(Debug, Default)]
pub struct CreatePlaylist {
    pub playlist_id: String,
    pub title: Option<String>,
    pub uploader: Option<String>,
    pub source_url: Option<String>,
    pub source_platform: String,
    pub video_count: i64,
}

pub struct PlaylistRepository {
    pool: SqlitePool,
}

impl PlaylistRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn get_by_playlist_id(
        &self,
        playlist_id: &str,
        source_platform: &str,
    ) -> CoreResult<Option<PlaylistRecord>> {
        let record = sqlx::query_as::<_, PlaylistRecord>(
            "SELECT * FROM playlists WHERE playlist_id = ? AND source_platform = ?",
        )
        .bind(playlist_id)
        .bind(source_platform)
        .fetch_optional(&self.pool)
        .await?;
        Ok(record)
    }

    pub async fn create(&self, input: CreatePlaylist) -> CoreResult<PlaylistRecord> {
        let created_at = now_iso8601();
        let record = sqlx::query_as::<_, PlaylistRecord>(
            r#"
            INSERT INTO playlists (playlist_id, title, uploader, source_url, source_platform, video_count, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(&input.playlist_id)
        .bind(&input.title)
        .bind(&input.uploader)
        .bind(&input.source_url)
        .bind(&input.source_platform)
        .bind(input.video_count)
        .bind(&created_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(record)
    }

    /// Insert or refresh a playlist row keyed on `(playlist_id, source_platform)`.
    pub async fn upsert(&self, input: CreatePlaylist) -> CoreResult<PlaylistRecord> {
        if let Some(existing) = self
            .get_by_playlist_id(&input.playlist_id, &input.source_platform)
            .await?
        {
            let record = sqlx::query_as::<_, PlaylistRecord>(
                r#"
                UPDATE playlists SET title = ?, uploader = ?, source_url = ?, video_count = ?
                WHERE id = ?
                RETURNING *
                "#,
            )
            .bind(input.title.or(existing.title))
            .bind(input.uploader.or(existing.uploader))
            .bind(input.source_url.or(existing.source_url))
            .bind(input.video_count.max(existing.video_count))
            .bind(existing.id)
            .fetch_one(&self.pool)
            .await?;
            return Ok(record);
        }

        self.create(input).await
    }
}
