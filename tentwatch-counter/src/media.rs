//! Evidence image storage
//!
//! Camera events may carry a snapshot. It is written once at ingest, referenced
//! by the raw row, and attached to a reconciled record only while that record
//! shows a violation. Keys look like `counter_image/2025/06/05/<uuid>.jpg`
//! and resolve under the media root.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::{Component, Path, PathBuf};
use tentwatch_common::{Error, Result};
use tracing::{debug, warn};
use uuid::Uuid;

#[async_trait]
pub trait EvidenceStore: Send + Sync {
    /// Persist image bytes, returning the storage key
    async fn save(&self, captured_at: DateTime<Utc>, bytes: &[u8]) -> Result<String>;

    /// Delete a stored image
    async fn remove(&self, key: &str) -> Result<()>;

    /// Public URL for a key
    fn url_for(&self, key: &str) -> String;
}

/// Result of a best-effort image delete
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CleanupOutcome {
    Removed,
    /// File was already missing
    AlreadyGone,
    Failed(String),
}

/// Delete an image without ever failing the caller.
pub async fn remove_best_effort(store: &dyn EvidenceStore, key: &str) -> CleanupOutcome {
    match store.remove(key).await {
        Ok(()) => {
            debug!(key, "Evidence image removed");
            CleanupOutcome::Removed
        }
        Err(Error::NotFound(_)) => CleanupOutcome::AlreadyGone,
        Err(e) => {
            warn!(key, error = %e, "Evidence image cleanup failed");
            CleanupOutcome::Failed(e.to_string())
        }
    }
}

/// Evidence images on the local filesystem
#[derive(Debug, Clone)]
pub struct FsEvidenceStore {
    root: PathBuf,
    base_url: String,
}

impl FsEvidenceStore {
    pub fn new(root: impl Into<PathBuf>, base_url: impl Into<String>) -> Self {
        let mut base_url = base_url.into();
        if !base_url.ends_with('/') {
            base_url.push('/');
        }
        Self { root: root.into(), base_url }
    }

    /// Resolve a key inside the root, refusing anything that could escape it
    fn resolve(&self, key: &str) -> Result<PathBuf> {
        let relative = Path::new(key);
        let safe = !key.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !safe {
            return Err(Error::InvalidInput(format!("invalid image key: {}", key)));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl EvidenceStore for FsEvidenceStore {
    async fn save(&self, captured_at: DateTime<Utc>, bytes: &[u8]) -> Result<String> {
        if bytes.is_empty() {
            return Err(Error::InvalidInput("image payload is empty".to_string()));
        }

        let key = format!(
            "counter_image/{}/{}.jpg",
            captured_at.format("%Y/%m/%d"),
            Uuid::new_v4()
        );
        let path = self.resolve(&key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, bytes).await?;

        debug!(key = %key, bytes = bytes.len(), "Evidence image stored");
        Ok(key)
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let path = self.resolve(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::NotFound(format!("image {}", key)))
            }
            Err(e) => Err(Error::Io(e)),
        }
    }

    fn url_for(&self, key: &str) -> String {
        format!("{}{}", self.base_url, key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_save_then_remove() {
        let dir = TempDir::new().unwrap();
        let store = FsEvidenceStore::new(dir.path(), "/media");
        let captured = Utc.with_ymd_and_hms(2025, 6, 5, 9, 0, 0).unwrap();

        let key = store.save(captured, b"jpeg-bytes").await.unwrap();
        assert!(key.starts_with("counter_image/2025/06/05/"));
        assert!(dir.path().join(&key).exists());
        assert_eq!(store.url_for(&key), format!("/media/{}", key));

        assert_eq!(remove_best_effort(&store, &key).await, CleanupOutcome::Removed);
        assert!(!dir.path().join(&key).exists());
        assert_eq!(remove_best_effort(&store, &key).await, CleanupOutcome::AlreadyGone);
    }

    #[tokio::test]
    async fn test_traversal_keys_rejected() {
        let dir = TempDir::new().unwrap();
        let store = FsEvidenceStore::new(dir.path(), "/media/");
        assert!(store.remove("../etc/passwd").await.is_err());
        assert!(store.remove("/etc/passwd").await.is_err());
        assert!(matches!(
            remove_best_effort(&store, "../x").await,
            CleanupOutcome::Failed(_)
        ));
    }

    #[tokio::test]
    async fn test_empty_payload_rejected() {
        let dir = TempDir::new().unwrap();
        let store = FsEvidenceStore::new(dir.path(), "/media/");
        assert!(store.save(Utc::now(), b"").await.is_err());
    }
}
