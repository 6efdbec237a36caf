//! JSON file storage backend.
//!
//! The document is written to `<path>.tmp` and renamed over `<path>`, so a
//! crash mid-write leaves the previous document in place.
//!
//! # Locks
//! Advisory exclusive locks on sibling files, shared by every process that
//! opens the same path:
//! - `<path>.lock`: held for one load or load-modify-save
//! - `<path>.sync.lock`: held for a whole sync pass

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use fs2::FileExt;
use serde_json::Value;

use crate::domain::StoreError;
use crate::ports::{StorageBackend, StorageLock};

#[derive(Debug, Clone, Copy)]
enum LockMode {
    Wait,
    Try,
}

#[derive(Debug, Clone)]
pub struct FileBackend {
    path: PathBuf,
    /// Largest document accepted, in bytes.
    quota_bytes: Option<u64>,
}

impl FileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            quota_bytes: None,
        }
    }

    pub fn with_quota(mut self, quota_bytes: u64) -> Self {
        self.quota_bytes = Some(quota_bytes);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn sibling(&self, suffix: &str) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "store.json".into());
        name.push(suffix);
        self.path.with_file_name(name)
    }

    fn temp_path(&self) -> PathBuf {
        self.sibling(".tmp")
    }

    async fn ensure_parent(&self) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| self.unavailable("create directory for", e))?;
        }
        Ok(())
    }

    /// `None` only in `Try` mode, when another holder has the lock.
    async fn lock_file(&self, suffix: &str, mode: LockMode) -> Result<Option<StorageLock>, StoreError> {
        self.ensure_parent().await?;
        let path = self.sibling(suffix);

        let acquired = tokio::task::spawn_blocking(move || -> std::io::Result<Option<File>> {
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .open(&path)?;
            match mode {
                LockMode::Wait => FileExt::lock_exclusive(&file).map(|()| Some(file)),
                LockMode::Try => match FileExt::try_lock_exclusive(&file) {
                    Ok(()) => Ok(Some(file)),
                    Err(e) if e.raw_os_error() == fs2::lock_contended_error().raw_os_error() => {
                        Ok(None)
                    }
                    Err(e) => Err(e),
                },
            }
        })
        .await
        .map_err(|e| StoreError::StorageUnavailable(format!("lock task failed: {e}")))?
        .map_err(|e| self.unavailable("lock", e))?;

        // closing the file releases the lock
        Ok(acquired.map(StorageLock::new))
    }

    fn unavailable(&self, action: &str, err: std::io::Error) -> StoreError {
        tracing::error!(path = %self.path.display(), error = %err, "failed to {action} store file");
        StoreError::StorageUnavailable(format!(
            "failed to {action} {}: {err}",
            self.path.display()
        ))
    }
}

#[async_trait]
impl StorageBackend for FileBackend {
    async fn load(&self) -> Result<Option<Value>, StoreError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(self.unavailable("read", e)),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| StoreError::Corrupt(format!("{}: {e}", self.path.display())))
    }

    async fn save(&self, document: &Value) -> Result<(), StoreError> {
        let bytes =
            serde_json::to_vec_pretty(document).map_err(|e| StoreError::Corrupt(e.to_string()))?;

        if let Some(quota) = self.quota_bytes
            && bytes.len() as u64 > quota
        {
            return Err(StoreError::StorageUnavailable(format!(
                "quota exceeded: document is {} bytes, limit is {quota}",
                bytes.len()
            )));
        }

        self.ensure_parent().await?;

        let temp = self.temp_path();
        tokio::fs::write(&temp, &bytes)
            .await
            .map_err(|e| self.unavailable("write", e))?;
        tokio::fs::rename(&temp, &self.path)
            .await
            .map_err(|e| self.unavailable("replace", e))?;

        tracing::debug!(path = %self.path.display(), bytes = bytes.len(), "store saved");
        Ok(())
    }

    async fn lock(&self) -> Result<StorageLock, StoreError> {
        self.lock_file(".lock", LockMode::Wait)
            .await?
            .ok_or_else(|| StoreError::StorageUnavailable("store lock not acquired".to_string()))
    }

    async fn try_lock_sync_pass(&self) -> Result<Option<StorageLock>, StoreError> {
        self.lock_file(".sync.lock", LockMode::Try).await
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn missing_file_loads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::new(dir.path().join("store.json"));

        assert_eq!(backend.load().await.unwrap(), None);
    }

    #[tokio::test]
    async fn save_then_load_returns_document() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::new(dir.path().join("nested").join("store.json"));
        let document = json!({"schema_version": 2, "artifacts": []});

        backend.save(&document).await.unwrap();

        assert_eq!(backend.load().await.unwrap(), Some(document));
        assert!(!backend.temp_path().exists());
    }

    #[tokio::test]
    async fn quota_rejects_large_documents_and_keeps_previous() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::new(dir.path().join("store.json")).with_quota(64);
        let small = json!({"a": 1});
        backend.save(&small).await.unwrap();

        let large = json!({"blob": "x".repeat(500)});
        let err = backend.save(&large).await.unwrap_err();

        assert!(matches!(err, StoreError::StorageUnavailable(_)));
        assert_eq!(backend.load().await.unwrap(), Some(small));
    }

    #[tokio::test]
    async fn sync_pass_lock_is_shared_across_backends_on_one_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        let first = FileBackend::new(&path);
        let second = FileBackend::new(&path);

        let held = first.try_lock_sync_pass().await.unwrap();
        assert!(held.is_some());
        assert!(second.try_lock_sync_pass().await.unwrap().is_none());

        drop(held);
        assert!(second.try_lock_sync_pass().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn document_lock_waits_for_the_holder() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        let held = FileBackend::new(&path).lock().await.unwrap();

        let waiter = FileBackend::new(&path);
        let pending = tokio::spawn(async move { waiter.lock().await.map(drop) });
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        assert!(!pending.is_finished());

        drop(held);
        tokio::time::timeout(std::time::Duration::from_secs(5), pending)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn garbage_on_disk_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        tokio::fs::write(&path, b"{not json").await.unwrap();

        let err = FileBackend::new(path).load().await.unwrap_err();
        assert!(matches!(err, StoreError::Corrupt(_)));
    }
}
