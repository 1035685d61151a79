//! Core error taxonomy.
//!
//! Every boundary in this crate (Ledger, Storage Adapter, Job Queue, Worker
//! Runtime, Use-Case Orchestrators) converts whatever it encounters into one
//! of these variants. Collaborator errors (the download/transcription/mux
//! engines) arrive as `anyhow::Error` and are classified into `Transient` or
//! `Permanent` at the point the use case calls them; nothing upstream of
//! that point needs to know the collaborator's own error type.

use thiserror::Error;

/// The error sum for the whole core. See spec §7 for the taxonomy.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A row or file was absent where presence was required. Most repository
    /// lookups return `Option` instead of this; it's used where absence is
    /// itself the failure (e.g. updating a job that doesn't exist).
    #[error("not found: {0}")]
    NotFound(String),

    /// A uniqueness constraint or disallowed state transition was requested.
    #[error("conflict: {0}")]
    Conflict(String),

    /// A job status transition violated the monotonicity rule in
    /// `JobRepository::update_status`.
    #[error("invalid status transition: {0}")]
    InvalidTransition(String),

    /// Retryable: network blips, a remote mount briefly unreachable, an
    /// engine asking for an auth refresh.
    #[error("transient failure: {0}")]
    Transient(String),

    /// Non-retryable: invalid input, unsupported format, destination full.
    #[error("permanent failure: {0}")]
    Permanent(String),

    /// The ledger itself failed (I/O, constraint violation not covered
    /// above, pool exhaustion). Surfaced and logged; callers back off.
    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    /// Unrecoverable process-level condition; the worker should exit.
    #[error("fatal error: {0}")]
    Fatal(String),
}

impl CoreError {
    /// Whether a worker encountering this error should retry the job that
    /// produced it (assuming retries remain). `Unknown` collaborator errors
    /// are classified as transient elsewhere before ever reaching here.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CoreError::Transient(_) | CoreError::Storage(_))
    }
}

/// Classification assigned to an error surfaced by an external collaborator
/// (download engine, transcription engine, muxer). The worker uses this to
/// decide whether to retry a failed job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retryability {
    Transient,
    Permanent,
}

/// Classify a collaborator error using simple substring heuristics on its
/// message, following the taxonomy in spec §4.4. Collaborators in this crate
/// are thin process-shelling adapters (see `engines`) with no typed error of
/// their own, so classification happens on the rendered message - the same
/// boundary the spec describes as "errors surfaced by external
/// collaborators are tagged".
pub fn classify_collaborator_error(err: &anyhow::Error) -> Retryability {
    let msg = err.to_string().to_lowercase();
    const PERMANENT_MARKERS: &[&str] = &[
        "invalid url",
        "unsupported format",
        "disk full",
        "no space left",
        "unsupported url",
        "video unavailable",
        "private video",
    ];
    if PERMANENT_MARKERS.iter().any(|m| msg.contains(m)) {
        return Retryability::Permanent;
    }
    Retryability::Transient
}

pub type CoreResult<T> = Result<T, CoreError>;
