//! Playlist/video link repository — the ordered many-to-many between
//! Playlist and MediaFile (spec §3 PlaylistVideo).

use sqlx::SqlitePool;

use crate::error::{CoreError, CoreResult};

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PlaylistVideoRecord {
    pub playlist_id: i64,
    pub media_file_id: i64,
    pub position: i64,
    pub video_title: Option<String>,
}

pub struct PlaylistVideoRepository {
    pool: SqlitePool,
}

impl PlaylistVideoRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Fails with `Conflict` on duplicate `(playlist_id, position)`.
    pub async fn add_video_to_playlist(
        &self,
        playlist_id: i64,
        media_file_id: i64,
        position: i64,
        video_title: Option<&str>,
    ) -> CoreResult<PlaylistVideoRecord> {
        if self.get_at_position(playlist_id, position).await?.is_some() {
            return Err(CoreError::Conflict(format!(
                "playlist {playlist_id} already has a video at position {position}"
            )));
        }

        let record = sqlx::query_as::<_, PlaylistVideoRecord>(
            r#"
            INSERT INTO playlist_videos (playlist_id, media_file_id, position, video_title)
            VALUES (?, ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(playlist_id)
        .bind(media_file_id)
        .bind(position)
        .bind(video_title)
        .fetch_one(&self.pool)
        .await?;

        Ok(record)
    }

    pub async fn get_at_position(
        &self,
        playlist_id: i64,
        position: i64,
    ) -> CoreResult<Option<PlaylistVideoRecord>> {
        let record = sqlx::query_as::<_, PlaylistVideoRecord>(
            "SELECT * FROM playlist_videos WHERE playlist_id = ? AND position = ?",
        )
        .bind(playlist_id)
        .bind(position)
        .fetch_optional(&self.pool)
        .await?;
        Ok(record)
    }

    pub async fn list_for_playlist(&self, playlist_id: i64) -> CoreResult<Vec<PlaylistVideoRecord>> {
        let records = sqlx::query_as::<_, PlaylistVideoRecord>(
            "SELECT * FROM playlist_videos WHERE playlist_id = ? ORDER BY position ASC",
        )
        .bind(playlist_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }
}
