//! Use-Case Orchestrators (spec §4.5): `DownloadVideo`, `DownloadPlaylist`,
//! `TranscribeVideo`. Each is a plain async function `(services, params)`,
//! not a struct with `execute()` (spec §9 Design Notes) — state lives in
//! the Ledger, not in long-lived objects.

pub mod download_playlist;
pub mod download_video;
pub mod transcribe_video;

use std::sync::Arc;

pub use download_playlist::{
    download_playlist, DownloadPlaylistHandler, DownloadPlaylistOutcome, DownloadPlaylistParams,
};
pub use download_video::{download_video, DownloadVideoHandler, DownloadVideoOutcome, DownloadVideoParams};
pub use transcribe_video::{
    transcribe_video, TranscribeVideoHandler, TranscribeVideoOutcome, TranscribeVideoParams,
};

use crate::config::Config;
use crate::db::Database;
use crate::engines::{DownloadEngine, Muxer, TranscriptionEngine};
use crate::queue::JobQueue;
use crate::storage::StorageAdapter;

/// Dependency-injection record threaded through every call site (spec §9
/// Design Notes: "Construct a `Services` record at startup ... no
/// module-level mutable state"), modeled on the teacher's
/// `ServicesManager`/`AppState` pattern. The Worker Runtime is composed
/// alongside `Services` in `main.rs` rather than nested inside it — it
/// needs a reference to `Services` to build its handlers, so holding one
/// back would be self-referential for no benefit.
#[derive(Clone)]
pub struct Services {
    pub db: Database,
    pub queue: JobQueue,
    pub storage: Arc<StorageAdapter>,
    pub download_engine: Arc<dyn DownloadEngine>,
    pub transcription_engine: Arc<dyn TranscriptionEngine>,
    pub muxer: Arc<dyn Muxer>,
    pub config: Arc<Config>,
}
