//! Cross-repository ledger behavior (spec §3, §4.1): media file
//! identity, playlist membership ordering under partial failure, the
//! analytics event log, and transcription full-text search, all wired
//! together the way the use-case orchestrators exercise them.

use spatelier_core::db::media_files::CreateMediaFile;
use spatelier_core::db::playlists::CreatePlaylist;
use spatelier_core::db::transcriptions::{Segment, TranscriptionPayload};
use spatelier_core::db::Database;
use spatelier_core::error::CoreError;

async fn memory_db() -> Database {
    let db = Database::connect("sqlite::memory:").await.unwrap();
    db.migrate().await.unwrap();
    db
}

fn sample_media(path: &str, source_id: &str) -> CreateMediaFile {
    CreateMediaFile {
        file_path: path.to_string(),
        file_name: path.rsplit('/').next().unwrap_or(path).to_string(),
        file_size: 2048,
        file_hash: "deadbeef".to_string(),
        media_type: "video".to_string(),
        mime_type: "video/mp4".to_string(),
        source_id: Some(source_id.to_string()),
        ..Default::default()
    }
}

#[tokio::test]
async fn media_file_is_findable_by_path_identifier_and_source_id() {
    let db = memory_db().await;
    let repo = db.media_files();
    let created = repo.create(sample_media("/data/out/a.mp4", "ABCDEFGHIJK")).await.unwrap();

    assert_eq!(repo.get_by_file_path("/data/out/a.mp4").await.unwrap().unwrap().id, created.id);
    assert_eq!(repo.get_by_source_id("ABCDEFGHIJK").await.unwrap().unwrap().id, created.id);
    assert!(repo.get_by_source_id("ZZZZZZZZZZZ").await.unwrap().is_none());
}

#[tokio::test]
async fn playlist_upsert_refreshes_metadata_without_duplicating_rows() {
    let db = memory_db().await;
    let repo = db.playlists();

    let first = repo
        .upsert(CreatePlaylist {
            playlist_id: "PL123".to_string(),
            title: Some("Old Title".to_string()),
            uploader: Some("someone".to_string()),
            source_url: Some("https://www.youtube.com/playlist?list=PL123".to_string()),
            source_platform: "youtube".to_string(),
            video_count: 2,
        })
        .await
        .unwrap();

    let refreshed = repo
        .upsert(CreatePlaylist {
            playlist_id: "PL123".to_string(),
            title: Some("New Title".to_string()),
            uploader: None,
            source_url: None,
            source_platform: "youtube".to_string(),
            video_count: 5,
        })
        .await
        .unwrap();

    assert_eq!(refreshed.id, first.id);
    assert_eq!(refreshed.title.as_deref(), Some("New Title"));
    assert_eq!(refreshed.uploader.as_deref(), Some("someone"));
    assert_eq!(refreshed.video_count, 5);
}

#[tokio::test]
async fn playlist_videos_keep_sparse_positions_when_an_entry_fails() {
    let db = memory_db().await;
    let playlist = db
        .playlists()
        .create(CreatePlaylist {
            playlist_id: "PL999".to_string(),
            title: None,
            uploader: None,
            source_url: None,
            source_platform: "youtube".to_string(),
            video_count: 3,
        })
        .await
        .unwrap();

    let media_a = db.media_files().create(sample_media("/data/out/1.mp4", "AAAAAAAAAAA")).await.unwrap();
    let media_c = db.media_files().create(sample_media("/data/out/3.mp4", "CCCCCCCCCCC")).await.unwrap();

    let videos = db.playlist_videos();
    videos.add_video_to_playlist(playlist.id, media_a.id, 1, Some("first")).await.unwrap();
    // Position 2 deliberately skipped: that entry failed to download.
    videos.add_video_to_playlist(playlist.id, media_c.id, 3, Some("third")).await.unwrap();

    let all = videos.list_for_playlist(playlist.id).await.unwrap();
    assert_eq!(all.iter().map(|v| v.position).collect::<Vec<_>>(), vec![1, 3]);

    let err = videos.add_video_to_playlist(playlist.id, media_a.id, 1, None).await.unwrap_err();
    assert!(matches!(err, CoreError::Conflict(_)));
}

#[tokio::test]
async fn analytics_events_accumulate_per_job_in_order() {
    let db = memory_db().await;
    let job = db
        .jobs()
        .create(spatelier_core::db::jobs::CreateJob {
            job_type: "download_video".to_string(),
            input_path: "https://example/v/X".to_string(),
            max_retries: 3,
            ..Default::default()
        })
        .await
        .unwrap();

    let analytics = db.analytics();
    analytics.track_event("download_start", None, Some(job.id), &serde_json::json!({})).await.unwrap();
    analytics
        .track_event("download_completed", None, Some(job.id), &serde_json::json!({"file_path": "/out/x.mp4"}))
        .await
        .unwrap();

    let events = analytics.list_for_job(job.id).await.unwrap();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].event_type, "download_start");
    assert_eq!(events[1].event_type, "download_completed");
}

#[tokio::test]
async fn transcription_search_finds_segments_joined_into_full_text() {
    let db = memory_db().await;
    let media = db.media_files().create(sample_media("/data/out/talk.mp4", "TALKTALKTAL")).await.unwrap();

    db.transcriptions()
        .store(
            media.id,
            TranscriptionPayload {
                language: Some("en".to_string()),
                duration: Some(12.5),
                processing_time: Some(3.0),
                model_used: Some("small".to_string()),
                segments: vec![
                    Segment { start: 0.0, end: 1.2, text: "welcome back".to_string() },
                    Segment { start: 1.2, end: 2.5, text: "to the show".to_string() },
                ],
            },
        )
        .await
        .unwrap();

    let found = db.transcriptions().search("welcome", 10).await.unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].full_text, "welcome back to the show");

    let stored = db.transcriptions().get(media.id).await.unwrap().unwrap();
    assert_eq!(stored.segments().len(), 2);
}
