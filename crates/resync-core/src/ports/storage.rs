//! StorageBackend port - 保存先ドキュメントの抽象
//!
//! ストアは操作のたびにドキュメント全体を読み直し、コミット時に丸ごと書き戻す。
//! 複数プロセスが同じ保存先を共有しても更新が失われないよう、読み書きは
//! `lock` で得たロックの内側で行う。
//!
//! # 実装
//! - `MemoryBackend`: プロセス内のみ（テスト、`--simulate`）
//! - `FileBackend`: ディスク上の JSON ドキュメント

use async_trait::async_trait;

use crate::domain::StoreError;

/// 保持中のロック。drop で解放される。
pub struct StorageLock {
    _held: Box<dyn Send + Sync>,
}

impl StorageLock {
    pub fn new(held: impl Send + Sync + 'static) -> Self {
        Self {
            _held: Box::new(held),
        }
    }

    /// 何も保持しないロック（単一プロセス専用の保存先向け）
    pub fn noop() -> Self {
        Self::new(())
    }
}

impl std::fmt::Debug for StorageLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("StorageLock")
    }
}

/// StorageBackend はストアのドキュメントを読み書きする
///
/// # 契約
/// - `load` は一度も保存されていなければ `None`
/// - `save` は全体成功か全体失敗。失敗しても直前のドキュメントは読める
/// - 保存先が使えない場合は `StoreError::StorageUnavailable`
/// - `lock` は排他ロック。同じ保存先を開いた全プロセスの間で読み書きを直列化する
/// - `try_lock_sync_pass` は同期パス用の非ブロッキングロック。他が保持中なら `None`
#[async_trait]
pub trait StorageBackend: Send + Sync {
    async fn load(&self) -> Result<Option<serde_json::Value>, StoreError>;

    async fn save(&self, document: &serde_json::Value) -> Result<(), StoreError>;

    async fn lock(&self) -> Result<StorageLock, StoreError> {
        Ok(StorageLock::noop())
    }

    async fn try_lock_sync_pass(&self) -> Result<Option<StorageLock>, StoreError> {
        Ok(Some(StorageLock::noop()))
    }

    /// Human readable location, for logs.
    fn describe(&self) -> String;
}
