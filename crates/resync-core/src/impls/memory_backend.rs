//! In-memory storage backend (tests, `--simulate`).

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use serde_json::Value;

use crate::domain::StoreError;
use crate::ports::{StorageBackend, StorageLock};

/// Keeps the last saved document in memory.
///
/// Can be switched unavailable (or read-only) to exercise storage failures;
/// loads and saves are counted. Stores opened on the same backend share its
/// document lock and sync pass lock, like processes sharing one file.
#[derive(Debug)]
pub struct MemoryBackend {
    document: Mutex<Option<Value>>,
    available: AtomicBool,
    writable: AtomicBool,
    loads: AtomicUsize,
    saves: AtomicUsize,
    document_lock: Arc<tokio::sync::Mutex<()>>,
    sync_pass: Arc<AtomicBool>,
}

/// Releases the sync pass flag on drop.
struct PassFlag(Arc<AtomicBool>);

impl Drop for PassFlag {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            document: Mutex::new(None),
            available: AtomicBool::new(true),
            writable: AtomicBool::new(true),
            loads: AtomicUsize::new(0),
            saves: AtomicUsize::new(0),
            document_lock: Arc::new(tokio::sync::Mutex::new(())),
            sync_pass: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Start from an existing document (e.g. an older schema version).
    pub fn with_document(document: Value) -> Self {
        let backend = Self::new();
        *backend.lock_document() = Some(document);
        backend
    }

    /// Unavailable storage fails both loads and saves.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Read-only storage loads fine but rejects saves.
    pub fn set_writable(&self, writable: bool) {
        self.writable.store(writable, Ordering::SeqCst);
    }

    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    /// Last successfully saved document.
    pub fn snapshot(&self) -> Option<Value> {
        self.lock_document().clone()
    }

    fn lock_document(&self) -> std::sync::MutexGuard<'_, Option<Value>> {
        self.document.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn ensure_available(&self) -> Result<(), StoreError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::StorageUnavailable(
                "memory backend disabled".to_string(),
            ))
        }
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn load(&self) -> Result<Option<Value>, StoreError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        self.ensure_available()?;
        Ok(self.lock_document().clone())
    }

    async fn save(&self, document: &Value) -> Result<(), StoreError> {
        self.ensure_available()?;
        if !self.writable.load(Ordering::SeqCst) {
            return Err(StoreError::StorageUnavailable(
                "memory backend is read-only".to_string(),
            ));
        }
        *self.lock_document() = Some(document.clone());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn lock(&self) -> Result<StorageLock, StoreError> {
        let guard = Arc::clone(&self.document_lock).lock_owned().await;
        Ok(StorageLock::new(guard))
    }

    async fn try_lock_sync_pass(&self) -> Result<Option<StorageLock>, StoreError> {
        if self
            .sync_pass
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Ok(None);
        }
        Ok(Some(StorageLock::new(PassFlag(Arc::clone(&self.sync_pass)))))
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}
