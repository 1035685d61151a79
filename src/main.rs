//! Job scheduler and worker runtime entry point.

use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use spatelier_core::config::{Config, WorkerMode};
use spatelier_core::db::Database;
use spatelier_core::engines::{FfmpegMuxer, WhisperTranscriptionEngine, YtDlpDownloadEngine};
use spatelier_core::queue::JobQueue;
use spatelier_core::storage::{PrefixRemoteClassifier, StorageAdapter};
use spatelier_core::usecases::{
    DownloadPlaylistHandler, DownloadVideoHandler, Services, TranscribeVideoHandler,
};
use spatelier_core::worker::WorkerRuntime;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;
    let resolved_mode = config.worker_mode.resolved();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "spatelier_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    tracing::info!("starting worker runtime");

    if resolved_mode == WorkerMode::Daemon {
        config.acquire_daemon_lock()?;
        tracing::info!(pid_file = %config.pid_file().display(), "daemon lock acquired");
    }

    let db = Database::connect_with_retry(&config.database_url, 10).await?;
    db.migrate().await?;
    tracing::info!("ledger connected and migrated");

    let storage = Arc::new(StorageAdapter::new(
        Arc::new(PrefixRemoteClassifier::new(config.remote_path_prefixes.clone())),
        config.staging_root(),
    ));
    let queue = JobQueue::new(db.clone());

    let services = Arc::new(Services {
        db: db.clone(),
        queue: queue.clone(),
        storage,
        download_engine: Arc::new(YtDlpDownloadEngine::new(config.ytdlp_binary.clone())),
        transcription_engine: Arc::new(WhisperTranscriptionEngine::new(config.whisper_binary.clone())),
        muxer: Arc::new(FfmpegMuxer::new(config.ffmpeg_binary.clone(), config.ffprobe_binary.clone())),
        config: Arc::new(config),
    });

    let runtime = Arc::new(WorkerRuntime::new(queue, db, (*services.config).clone()));
    runtime
        .register_processor("download_video", Arc::new(DownloadVideoHandler::new(services.clone())))
        .await;
    runtime
        .register_processor("download_playlist", Arc::new(DownloadPlaylistHandler::new(services.clone())))
        .await;
    runtime
        .register_processor("transcribe", Arc::new(TranscribeVideoHandler::new(services.clone())))
        .await;

    let shutdown_runtime = runtime.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutdown signal received");
            shutdown_runtime.stop();
        }
    });

    runtime.run().await;

    if resolved_mode == WorkerMode::Daemon {
        services.config.release_daemon_lock();
        tracing::info!("daemon lock released");
    }

    Ok(())
}
