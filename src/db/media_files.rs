//! Media file ledger repository.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use crate::db::sqlite_helpers::{now_iso8601, str_to_datetime};
use crate::error::{CoreError, CoreResult};

/// A tracked file on disk (spec §3 MediaFile).
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct MediaFileRecord {
    pub id: i64,
    pub file_path: String,
    pub file_name: String,
    pub file_size: i64,
    pub file_hash: String,
    pub media_type: String,
    pub mime_type: String,
    pub file_device: Option<i64>,
    pub file_inode: Option<i64>,
    pub file_identifier: Option<String>,
    pub source_url: Option<String>,
    pub source_platform: Option<String>,
    pub source_id: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub uploader: Option<String>,
    pub uploader_id: Option<String>,
    pub upload_date: Option<String>,
    pub view_count: Option<i64>,
    pub like_count: Option<i64>,
    pub duration: Option<f64>,
    pub language: Option<String>,
    pub thumbnail_url: Option<String>,
    pub created_at: String,
}

impl MediaFileRecord {
    pub fn created_at(&self) -> CoreResult<DateTime<Utc>> {
        str_to_datetime(&self.created_at).map_err(|e| CoreError::Fatal(e.to_string()))
    }
}

/// Input for creating a media file.
#[derive(Debug, Default)]
pub struct CreateMediaFile {
    pub file_path: String,
    pub file_name: String,
    pub file_size: i64,
    pub file_hash: String,
    pub media_type: String,
    pub mime_type: String,
    pub file_device: Option<i64>,
    pub file_inode: Option<i64>,
    pub file_identifier: Option<String>,
    pub source_url: Option<String>,
    pub source_platform: Option<String>,
    pub source_id: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub uploader: Option<String>,
    pub uploader_id: Option<String>,
    pub upload_date: Option<String>,
    pub view_count: Option<i64>,
    pub like_count: Option<i64>,
    pub duration: Option<f64>,
    pub language: Option<String>,
    pub thumbnail_url: Option<String>,
}

/// Partial update applied to an existing media file row.
#[derive(Debug, Default)]
pub struct MediaFilePatch {
    pub file_path: Option<String>,
    pub file_size: Option<i64>,
    pub file_hash: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub uploader: Option<String>,
    pub view_count: Option<i64>,
    pub like_count: Option<i64>,
    pub duration: Option<f64>,
    pub thumbnail_url: Option<String>,
}

pub struct MediaFileRepository {
    pool: SqlitePool,
}

impl MediaFileRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Fails with `Conflict` if `file_path` or `file_identifier` collides.
    pub async fn create(&self, input: CreateMediaFile) -> CoreResult<MediaFileRecord> {
        if self.get_by_file_path(&input.file_path).await?.is_some() {
            return Err(CoreError::Conflict(format!(
                "media file already tracked at {}",
                input.file_path
            )));
        }
        if let Some(identifier) = &input.file_identifier {
            if self.get_by_file_identifier(identifier).await?.is_some() {
                return Err(CoreError::Conflict(format!(
                    "media file already tracked with identifier {identifier}"
                )));
            }
        }

        let created_at = now_iso8601();
        let record = sqlx::query_as::<_, MediaFileRecord>(
            r#"
            INSERT INTO media_files (
                file_path, file_name, file_size, file_hash, media_type, mime_type,
                file_device, file_inode, file_identifier,
                source_url, source_platform, source_id,
                title, description, uploader, uploader_id, upload_date,
                view_count, like_count, duration, language, thumbnail_url, created_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(&input.file_path)
        .bind(&input.file_name)
        .bind(input.file_size)
        .bind(&input.file_hash)
        .bind(&input.media_type)
        .bind(&input.mime_type)
        .bind(input.file_device)
        .bind(input.file_inode)
        .bind(&input.file_identifier)
        .bind(&input.source_url)
        .bind(&input.source_platform)
        .bind(&input.source_id)
        .bind(&input.title)
        .bind(&input.description)
        .bind(&input.uploader)
        .bind(&input.uploader_id)
        .bind(&input.upload_date)
        .bind(input.view_count)
        .bind(input.like_count)
        .bind(input.duration)
        .bind(&input.language)
        .bind(&input.thumbnail_url)
        .bind(&created_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(record)
    }

    pub async fn get_by_id(&self, id: i64) -> CoreResult<Option<MediaFileRecord>> {
        let record = sqlx::query_as::<_, MediaFileRecord>("SELECT * FROM media_files WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(record)
    }

    pub async fn get_by_file_path(&self, path: &str) -> CoreResult<Option<MediaFileRecord>> {
        let record =
            sqlx::query_as::<_, MediaFileRecord>("SELECT * FROM media_files WHERE file_path = ?")
                .bind(path)
                .fetch_optional(&self.pool)
                .await?;
        Ok(record)
    }

    pub async fn get_by_file_identifier(
        &self,
        identifier: &str,
    ) -> CoreResult<Option<MediaFileRecord>> {
        let record = sqlx::query_as::<_, MediaFileRecord>(
            "SELECT * FROM media_files WHERE file_identifier = ?",
        )
        .bind(identifier)
        .fetch_optional(&self.pool)
        .await?;
        Ok(record)
    }

    /// Lookup by the platform-native id a download engine reports (e.g. a
    /// YouTube video id), used by the smart-overwrite resume check.
    pub async fn get_by_source_id(&self, source_id: &str) -> CoreResult<Option<MediaFileRecord>> {
        let record =
            sqlx::query_as::<_, MediaFileRecord>("SELECT * FROM media_files WHERE source_id = ?")
                .bind(source_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(record)
    }

    pub async fn get_by_device_inode(
        &self,
        device: i64,
        inode: i64,
    ) -> CoreResult<Option<MediaFileRecord>> {
        let record = sqlx::query_as::<_, MediaFileRecord>(
            "SELECT * FROM media_files WHERE file_device = ? AND file_inode = ?",
        )
        .bind(device)
        .bind(inode)
        .fetch_optional(&self.pool)
        .await?;
        Ok(record)
    }

    /// Partial update; fails with `NotFound` if the row is missing.
    pub async fn update(&self, id: i64, patch: MediaFilePatch) -> CoreResult<MediaFileRecord> {
        let existing = self
            .get_by_id(id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("media file {id}")))?;

        let record = sqlx::query_as::<_, MediaFileRecord>(
            r#"
            UPDATE media_files SET
                file_path = ?,
                file_size = ?,
                file_hash = ?,
                title = ?,
                description = ?,
                uploader = ?,
                view_count = ?,
                like_count = ?,
                duration = ?,
                thumbnail_url = ?
            WHERE id = ?
            RETURNING *
            "#,
        )
        .bind(patch.file_path.unwrap_or(existing.file_path))
        .bind(patch.file_size.unwrap_or(existing.file_size))
        .bind(patch.file_hash.unwrap_or(existing.file_hash))
        .bind(patch.title.or(existing.title))
        .bind(patch.description.or(existing.description))
        .bind(patch.uploader.or(existing.uploader))
        .bind(patch.view_count.or(existing.view_count))
        .bind(patch.like_count.or(existing.like_count))
        .bind(patch.duration.or(existing.duration))
        .bind(patch.thumbnail_url.or(existing.thumbnail_url))
        .bind(id)
        .fetch_one(&self.pool)
        .await?;

        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn memory_pool() -> SqlitePool {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();
        pool
    }

    fn sample() -> CreateMediaFile {
        CreateMediaFile {
            file_path: "/tmp/out/video.mp4".to_string(),
            file_name: "video.mp4".to_string(),
            file_size: 1024,
            file_hash: "abc123".to_string(),
            media_type: "video".to_string(),
            mime_type: "video/mp4".to_string(),
            source_id: Some("ABCDEFGHIJK".to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn create_and_get_round_trips() {
        let repo = MediaFileRepository::new(memory_pool().await);
        let created = repo.create(sample()).await.unwrap();
        let fetched = repo.get_by_file_path(&created.file_path).await.unwrap().unwrap();
        assert_eq!(fetched.id, created.id);
        assert_eq!(fetched.source_id.as_deref(), Some("ABCDEFGHIJK"));
    }

    #[tokio::test]
    async fn get_by_source_id_finds_tracked_video() {
        let repo = MediaFileRepository::new(memory_pool().await);
        let created = repo.create(sample()).await.unwrap();
        let found = repo.get_by_source_id("ABCDEFGHIJK").await.unwrap().unwrap();
        assert_eq!(found.id, created.id);
        assert!(repo.get_by_source_id("NOPE").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn create_rejects_duplicate_path() {
        let repo = MediaFileRepository::new(memory_pool().await);
        repo.create(sample()).await.unwrap();
        let err = repo.create(sample()).await.unwrap_err();
        assert!(matches!(err, CoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn update_missing_row_is_not_found() {
        let repo = MediaFileRepository::new(memory_pool().await);
        let err = repo.update(999, MediaFilePatch::default()).await.unwrap_err();
        assert!(matches!(err, CoreError::NotFound(_)));
    }
}
