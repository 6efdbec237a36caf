use std::sync::Arc;

use tokio::sync::OnceCell;

use super::Store;
use crate::domain::StoreError;
use crate::ports::StorageBackend;

/// StoreHandle - 遅延オープンされる共有ストア
///
/// 起動時に一度だけ作り、ストアが必要な箇所へ渡す。
///
/// # 振る舞い
/// - 最初の `store()` がドキュメントを開く（必要ならスキーマも上げる）
/// - 同時に呼ばれても、後続は同じオープンを待つ
/// - 失敗したオープンは記憶しないので、次の呼び出しで再試行する
pub struct StoreHandle {
    backend: Arc<dyn StorageBackend>,
    cell: OnceCell<Arc<Store>>,
}

impl StoreHandle {
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self {
            backend,
            cell: OnceCell::new(),
        }
    }

    pub async fn store(&self) -> Result<Arc<Store>, StoreError> {
        self.cell
            .get_or_try_init(|| async {
                Store::open(Arc::clone(&self.backend)).await.map(Arc::new)
            })
            .await
            .map(Arc::clone)
    }

    pub fn is_open(&self) -> bool {
        self.cell.initialized()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impls::MemoryBackend;

    #[tokio::test]
    async fn concurrent_callers_share_one_open() {
        let backend = Arc::new(MemoryBackend::new());
        let handle = Arc::new(StoreHandle::new(backend.clone()));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let handle = Arc::clone(&handle);
                tokio::spawn(async move { handle.store().await.unwrap() })
            })
            .collect();

        let mut stores = Vec::new();
        for task in tasks {
            stores.push(task.await.unwrap());
        }

        assert_eq!(backend.load_count(), 1);
        // the fresh document is written exactly once
        assert_eq!(backend.save_count(), 1);
        assert!(stores.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
        assert!(handle.is_open());
    }

    #[tokio::test]
    async fn failed_open_is_retried() {
        let backend = Arc::new(MemoryBackend::new());
        backend.set_available(false);
        let handle = StoreHandle::new(backend.clone());

        assert!(handle.store().await.is_err());
        assert!(!handle.is_open());

        backend.set_available(true);
        assert!(handle.store().await.is_ok());
    }
}
