//! 永続ストア: 成果物、同期キュー、デッドレター
//!
//! # トランザクション
//! 変更はすべて保存先のロックを取り、ドキュメントを読み直してから適用する。
//! 読み直した作業コピーに変更を加え、保存が成功したときだけ確定する。
//! 別プロセスが同じ保存先を更新していても、その更新を上書きで失うことはない。
//! 保存に失敗した場合はメモリ上も保存先も変更前のまま。
//!
//! # ペア不変条件
//! リクエストが `sync_queue` にあるのは、その成果物が `Queued` のときだけ。
//! `enqueue` / `resolve` / `resurrect` は両側を一つのトランザクションで変更する。

mod handle;
mod schema;
mod state;

pub use self::handle::StoreHandle;
pub use self::schema::CURRENT_VERSION;

use std::sync::Arc;

use tokio::sync::Mutex;

use self::schema::StoreDocument;
use self::state::StoreState;
use crate::domain::{
    ArtifactId, ArtifactPatch, ArtifactPayload, ArtifactRecord, ArtifactStatus, DeadLetterRecord,
    GenerationRequest, QueuedRequestRecord, StoreError,
};
use crate::observability::StoreCounts;
use crate::ports::{StorageBackend, StorageLock};

/// How a queued request ends.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Completed(ArtifactPayload),
    Failed(String),
}

/// Partial update of a queued request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestPatch {
    pub request: Option<GenerationRequest>,
    pub retry_count: Option<u32>,
}

pub struct Store {
    backend: Arc<dyn StorageBackend>,
    /// 最後に読み書きした状態。プロセス内の操作もこのロックで直列化する
    state: Mutex<StoreState>,
}

impl Store {
    /// Load the document, upgrade it if needed and build the working set.
    pub async fn open(backend: Arc<dyn StorageBackend>) -> Result<Self, StoreError> {
        let state = {
            let _lock = backend.lock().await?;
            let migrated = schema::migrate(backend.load().await?)?;
            let upgraded = migrated.upgraded;
            let from_version = migrated.from_version;
            let state = StoreState::from_document(migrated.document);

            if upgraded {
                backend.save(&to_document(&state)?).await?;
                tracing::info!(
                    from_version,
                    to_version = CURRENT_VERSION,
                    location = %backend.describe(),
                    "store schema upgraded"
                );
            }
            state
        };

        Ok(Self {
            backend,
            state: Mutex::new(state),
        })
    }

    /// 保存先から最新のドキュメントを読み直す。呼び出し側が保存先のロックを持つこと
    async fn reload(&self) -> Result<StoreState, StoreError> {
        let migrated = schema::migrate(self.backend.load().await?)?;
        Ok(StoreState::from_document(migrated.document))
    }

    async fn read<T>(&self, f: impl FnOnce(&StoreState) -> T) -> Result<T, StoreError> {
        let mut state = self.state.lock().await;
        let _lock = self.backend.lock().await?;
        *state = self.reload().await?;
        Ok(f(&*state))
    }

    async fn transact<T>(
        &self,
        f: impl FnOnce(&mut StoreState) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut state = self.state.lock().await;
        let _lock = self.backend.lock().await?;
        let mut next = self.reload().await?;
        let out = f(&mut next)?;
        self.backend.save(&to_document(&next)?).await?;
        *state = next;
        Ok(out)
    }

    /// 同期パス用のロックを試みる。別のストア（別プロセス）がパス中なら `None`
    pub async fn try_lock_sync_pass(&self) -> Result<Option<StorageLock>, StoreError> {
        self.backend.try_lock_sync_pass().await
    }

    // ========================================
    // Artifacts
    // ========================================

    /// Insert or replace an artifact.
    pub async fn put_artifact(&self, record: ArtifactRecord) -> Result<(), StoreError> {
        self.transact(|state| {
            state.artifacts.insert(record);
            Ok(())
        })
        .await
    }

    pub async fn get_artifact(&self, id: ArtifactId) -> Result<Option<ArtifactRecord>, StoreError> {
        self.read(|state| state.artifacts.get(id).cloned()).await
    }

    /// All artifacts, oldest first.
    pub async fn artifacts_by_time(&self) -> Result<Vec<ArtifactRecord>, StoreError> {
        self.read(|state| state.artifacts.by_time().cloned().collect())
            .await
    }

    /// Read-modify-write of one artifact. Terminal records keep their status.
    pub async fn update_artifact(
        &self,
        id: ArtifactId,
        patch: ArtifactPatch,
    ) -> Result<ArtifactRecord, StoreError> {
        self.transact(|state| {
            let current = state.artifacts.get(id).ok_or(StoreError::NotFound(id))?;
            if let Some(status) = patch.status
                && current.status.is_terminal()
                && status != current.status
            {
                return Err(StoreError::InvalidState {
                    id,
                    reason: format!("artifact is already {}", current.status),
                });
            }
            state
                .artifacts
                .modify(id, |record| {
                    record.apply(patch);
                    record.clone()
                })
                .ok_or(StoreError::NotFound(id))
        })
        .await
    }

    /// Returns whether a record was removed.
    pub async fn delete_artifact(&self, id: ArtifactId) -> Result<bool, StoreError> {
        self.transact(|state| Ok(state.artifacts.remove(id).is_some()))
            .await
    }

    // ========================================
    // Queued requests
    // ========================================

    pub async fn put_request(&self, record: QueuedRequestRecord) -> Result<(), StoreError> {
        self.transact(|state| {
            state.sync_queue.insert(record);
            Ok(())
        })
        .await
    }

    pub async fn get_request(
        &self,
        id: ArtifactId,
    ) -> Result<Option<QueuedRequestRecord>, StoreError> {
        self.read(|state| state.sync_queue.get(id).cloned()).await
    }

    /// Pending requests, oldest first (the sync order).
    pub async fn requests_by_time(&self) -> Result<Vec<QueuedRequestRecord>, StoreError> {
        self.read(|state| state.sync_queue.by_time().cloned().collect())
            .await
    }

    pub async fn update_request(
        &self,
        id: ArtifactId,
        patch: RequestPatch,
    ) -> Result<QueuedRequestRecord, StoreError> {
        self.transact(|state| {
            state
                .sync_queue
                .modify(id, |record| {
                    if let Some(request) = patch.request {
                        record.request = request;
                    }
                    if let Some(retry_count) = patch.retry_count {
                        record.retry_count = retry_count;
                    }
                    record.clone()
                })
                .ok_or(StoreError::NotFound(id))
        })
        .await
    }

    pub async fn delete_request(&self, id: ArtifactId) -> Result<bool, StoreError> {
        self.transact(|state| Ok(state.sync_queue.remove(id).is_some()))
            .await
    }

    // ========================================
    // Pair operations
    // ========================================

    /// Record an offline submission: queued request plus its placeholder.
    pub async fn enqueue(
        &self,
        artifact: ArtifactRecord,
        request: QueuedRequestRecord,
    ) -> Result<(), StoreError> {
        let id = artifact.id;
        if request.id != id {
            return Err(StoreError::InvalidState {
                id,
                reason: format!("request id {} does not match artifact", request.id),
            });
        }
        if artifact.status != ArtifactStatus::Queued {
            return Err(StoreError::InvalidState {
                id,
                reason: format!("placeholder must be queued, found {}", artifact.status),
            });
        }

        self.transact(|state| {
            if state.artifacts.contains(id)
                || state.sync_queue.contains(id)
                || state.dead_letters.contains(id)
            {
                return Err(StoreError::Duplicate(id));
            }
            state.artifacts.insert(artifact);
            state.sync_queue.insert(request);
            Ok(())
        })
        .await
    }

    /// Finish a queued request.
    ///
    /// `Completed` stores the payload and drops the request; `Failed` stores
    /// the message and moves the request to the dead letters.
    pub async fn resolve(
        &self,
        id: ArtifactId,
        resolution: Resolution,
    ) -> Result<ArtifactRecord, StoreError> {
        self.transact(|state| {
            let artifact = state.artifacts.get(id).ok_or(StoreError::NotFound(id))?;
            if artifact.status != ArtifactStatus::Queued {
                return Err(StoreError::InvalidState {
                    id,
                    reason: format!("cannot resolve an artifact that is {}", artifact.status),
                });
            }

            let request = state.sync_queue.remove(id);
            let patch = match resolution {
                Resolution::Completed(payload) => ArtifactPatch::completed(payload),
                Resolution::Failed(message) => {
                    if let Some(record) = request {
                        state.dead_letters.insert(DeadLetterRecord {
                            record,
                            reason: message.clone(),
                        });
                    }
                    ArtifactPatch::failed(message)
                }
            };

            state
                .artifacts
                .modify(id, |record| {
                    record.apply(patch);
                    record.clone()
                })
                .ok_or(StoreError::NotFound(id))
        })
        .await
    }

    /// Count one more failed sync attempt. Returns the new count.
    pub async fn increment_retry(&self, id: ArtifactId) -> Result<u32, StoreError> {
        self.transact(|state| {
            state
                .sync_queue
                .modify(id, |record| {
                    record.retry_count = record.retry_count.saturating_add(1);
                    record.retry_count
                })
                .ok_or(StoreError::NotFound(id))
        })
        .await
    }

    /// Put a dead letter back in the queue with a fresh retry budget.
    pub async fn resurrect(&self, id: ArtifactId) -> Result<QueuedRequestRecord, StoreError> {
        self.transact(|state| {
            if state.sync_queue.contains(id) {
                return Err(StoreError::Duplicate(id));
            }
            if let Some(artifact) = state.artifacts.get(id)
                && artifact.status != ArtifactStatus::Failed
            {
                return Err(StoreError::InvalidState {
                    id,
                    reason: format!("only failed artifacts can be resurrected, found {}", artifact.status),
                });
            }

            let DeadLetterRecord { mut record, .. } =
                state.dead_letters.remove(id).ok_or(StoreError::NotFound(id))?;
            record.retry_count = 0;

            let reopened = state.artifacts.modify(id, |artifact| {
                artifact.apply(ArtifactPatch {
                    status: Some(ArtifactStatus::Queued),
                    ..ArtifactPatch::default()
                })
            });
            if reopened.is_none() {
                state.artifacts.insert(ArtifactRecord::queued(
                    id,
                    record.request_type().artifact_kind(),
                    record.request.prompt_text(),
                    record.created_at,
                ));
            }

            state.sync_queue.insert(record.clone());
            Ok(record)
        })
        .await
    }

    /// Dead letters, oldest request first.
    pub async fn dead_letters(&self) -> Result<Vec<DeadLetterRecord>, StoreError> {
        self.read(|state| state.dead_letters.by_time().cloned().collect())
            .await
    }

    pub async fn counts(&self) -> Result<StoreCounts, StoreError> {
        self.read(StoreState::counts).await
    }
}

fn to_document(state: &StoreState) -> Result<serde_json::Value, StoreError> {
    let document = StoreDocument {
        schema_version: CURRENT_VERSION,
        artifacts: state.artifacts.by_time().cloned().collect(),
        sync_queue: state.sync_queue.by_time().cloned().collect(),
        dead_letters: state.dead_letters.by_time().cloned().collect(),
    };
    serde_json::to_value(&document).map_err(|e| StoreError::Corrupt(e.to_string()))
}
