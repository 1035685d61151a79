//! Storage Adapter (spec §4.2): classifies a destination as local or
//! remote, hands out per-job staging directories, and performs a
//! crash-safe move from stage to final destination.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::fs;
use tracing::warn;
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};

const WRITE_PROBE_NAME: &str = ".spatelier_write_probe";

/// Classifies a destination path as remote storage. Generalizes the
/// substring-match NAS detection into a pluggable predicate so the set of
/// remote indicators is configuration, not code (spec §9 Design Notes).
pub trait RemoteClassifier: Send + Sync {
    fn is_remote(&self, path: &Path) -> bool;
}

/// Matches a destination path against a configured list of lowercase
/// prefixes/substrings (mount points, UNC roots, scheme markers).
pub struct PrefixRemoteClassifier {
    prefixes: Vec<String>,
}

impl PrefixRemoteClassifier {
    pub fn new(prefixes: Vec<String>) -> Self {
        Self { prefixes }
    }
}

impl RemoteClassifier for PrefixRemoteClassifier {
    fn is_remote(&self, path: &Path) -> bool {
        let lowered = path.to_string_lossy().to_lowercase();
        self.prefixes.iter().any(|p| lowered.contains(p.as_str()))
    }
}

/// The Storage Adapter. Polymorphic over local/remote by delegating
/// classification to a [`RemoteClassifier`]; the staging and publish
/// logic is identical either way, which is what makes remote destinations
/// crash-safe without special-casing them at call sites.
pub struct StorageAdapter {
    classifier: Arc<dyn RemoteClassifier>,
    staging_root: PathBuf,
}

impl StorageAdapter {
    pub fn new(classifier: Arc<dyn RemoteClassifier>, staging_root: PathBuf) -> Self {
        Self { classifier, staging_root }
    }

    pub fn is_remote(&self, path: &Path) -> bool {
        self.classifier.is_remote(path)
    }

    /// Side-effect-free aside from creating the directory tree and
    /// writing/deleting a probe file. Never leaves debris.
    pub async fn can_write_to(&self, path: &Path) -> bool {
        if fs::create_dir_all(path).await.is_err() {
            return false;
        }
        let probe = path.join(WRITE_PROBE_NAME);
        if fs::write(&probe, b"").await.is_err() {
            return false;
        }
        let _ = fs::remove_file(&probe).await;
        true
    }

    /// A writable, job-scoped local directory, even when the eventual
    /// destination is remote. Concurrent jobs receive disjoint
    /// directories because each is named after its job id plus a random
    /// suffix.
    pub async fn stage_dir_for(&self, job_id: i64) -> CoreResult<PathBuf> {
        let dir = self
            .staging_root
            .join(format!("{job_id}-{}", Uuid::new_v4()));
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| CoreError::Transient(format!("failed to create staging dir: {e}")))?;
        Ok(dir)
    }

    /// Atomic-as-possible rename; falls back to copy+fsync+unlink when
    /// source and destination differ in device (e.g. staging on local
    /// disk, destination on a network mount). On failure the source
    /// remains intact.
    pub async fn publish(&self, src_file: &Path, dst_file: &Path) -> CoreResult<()> {
        if let Some(parent) = dst_file.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| CoreError::Transient(format!("failed to create destination dir: {e}")))?;
        }

        match fs::rename(src_file, dst_file).await {
            Ok(()) => Ok(()),
            Err(_) => self.copy_then_remove(src_file, dst_file).await,
        }
    }

    async fn copy_then_remove(&self, src_file: &Path, dst_file: &Path) -> CoreResult<()> {
        fs::copy(src_file, dst_file)
            .await
            .map_err(|e| CoreError::Transient(format!("failed to copy to destination: {e}")))?;

        let file = fs::File::open(dst_file)
            .await
            .map_err(|e| CoreError::Transient(format!("failed to reopen published file: {e}")))?;
        file.sync_all()
            .await
            .map_err(|e| CoreError::Transient(format!("failed to fsync published file: {e}")))?;

        fs::remove_file(src_file)
            .await
            .map_err(|e| CoreError::Transient(format!("failed to remove staged file: {e}")))?;

        Ok(())
    }

    /// Best-effort recursive removal; never fails a job.
    pub async fn cleanup(&self, stage_dir: &Path) {
        if let Err(e) = fs::remove_dir_all(stage_dir).await {
            warn!(path = %stage_dir.display(), error = %e, "failed to clean up staging directory");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_classifier_matches_case_insensitively() {
        let classifier = PrefixRemoteClassifier::new(vec!["/mnt/".to_string(), "smb://".to_string()]);
        assert!(classifier.is_remote(Path::new("/Mnt/Media/movie.mp4")));
        assert!(classifier.is_remote(Path::new("smb://server/share")));
        assert!(!classifier.is_remote(Path::new("/home/user/downloads")));
    }

    #[tokio::test]
    async fn can_write_to_leaves_no_probe_file_behind() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("sub");
        let adapter = StorageAdapter::new(
            Arc::new(PrefixRemoteClassifier::new(vec![])),
            dir.path().join("staging"),
        );

        assert!(adapter.can_write_to(&target).await);
        assert!(!target.join(WRITE_PROBE_NAME).exists());
    }

    #[tokio::test]
    async fn stage_dir_for_returns_disjoint_directories() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = StorageAdapter::new(
            Arc::new(PrefixRemoteClassifier::new(vec![])),
            dir.path().to_path_buf(),
        );

        let a = adapter.stage_dir_for(1).await.unwrap();
        let b = adapter.stage_dir_for(1).await.unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn publish_moves_file_to_destination() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src.mp4");
        let dst = dir.path().join("out").join("dst.mp4");
        fs::write(&src, b"data").await.unwrap();

        let adapter = StorageAdapter::new(
            Arc::new(PrefixRemoteClassifier::new(vec![])),
            dir.path().to_path_buf(),
        );
        adapter.publish(&src, &dst).await.unwrap();

        assert!(!src.exists());
        assert!(dst.exists());
    }
}
