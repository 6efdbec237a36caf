//! SyncEngine - 接続復帰後にキュー済みリクエストを再実行する
//!
//! # パス
//! - 同時に走るパスは一つだけ（同じストアを共有する全プロセスで）。
//!   二つ目の呼び出しは `Skipped`
//! - 古い順に一件ずつ処理し、再実行の直前に読み直す
//! - 再実行は `RequestExecutor` を `force_online = true` で通す
//! - 失敗した再実行はリトライ予算を一つ消費する。予算を超えたら成果物を
//!   `Failed` にし、リクエストをデッドレターへ移す
//! - ストアのエラーはパスを中断する

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::Serialize;

use crate::app::cancel::CancelToken;
use crate::app::executor::RequestExecutor;
use crate::app::poller::ignore_progress;
use crate::domain::{ArtifactId, ArtifactRecord, PassId, QueuedRequestRecord, StoreError};
use crate::ports::IdGenerator;
use crate::store::{Resolution, Store};

pub const DEFAULT_SYNC_RETRY_BUDGET: u32 = 3;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncReport {
    pub pass_id: PassId,
    pub delivered: usize,
    pub retried: usize,
    pub abandoned: usize,
}

impl SyncReport {
    fn new(pass_id: PassId) -> Self {
        Self {
            pass_id,
            delivered: 0,
            retried: 0,
            abandoned: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SyncOutcome {
    Completed(SyncReport),
    /// 別のパスが実行中だった
    Skipped,
}

pub struct SyncEngine {
    store: Arc<Store>,
    executor: Arc<RequestExecutor>,
    ids: Arc<dyn IdGenerator>,
    retry_budget: u32,
    running: AtomicBool,
}

/// パスがどう終わっても実行中フラグを戻す
struct PassGuard<'a>(&'a AtomicBool);

impl Drop for PassGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl SyncEngine {
    pub fn new(store: Arc<Store>, executor: Arc<RequestExecutor>, ids: Arc<dyn IdGenerator>) -> Self {
        Self {
            store,
            executor,
            ids,
            retry_budget: DEFAULT_SYNC_RETRY_BUDGET,
            running: AtomicBool::new(false),
        }
    }

    pub fn with_retry_budget(mut self, retry_budget: u32) -> Self {
        self.retry_budget = retry_budget;
        self
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub async fn process_sync_queue(&self) -> Result<SyncOutcome, StoreError> {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!("sync pass already running, skipping");
            return Ok(SyncOutcome::Skipped);
        }
        let _guard = PassGuard(&self.running);

        let Some(_pass_lock) = self.store.try_lock_sync_pass().await? else {
            tracing::info!("sync pass running elsewhere on this store, skipping");
            return Ok(SyncOutcome::Skipped);
        };

        let mut report = SyncReport::new(self.ids.generate_pass_id());
        let pending = self.store.requests_by_time().await?;
        tracing::info!(pass_id = %report.pass_id, pending = pending.len(), "sync pass started");

        for queued in pending {
            let Some(current) = self.store.get_request(queued.id).await? else {
                tracing::debug!(id = %queued.id, "request left the queue, skipping");
                continue;
            };
            self.replay(current, &mut report).await?;
        }

        tracing::info!(
            pass_id = %report.pass_id,
            delivered = report.delivered,
            retried = report.retried,
            abandoned = report.abandoned,
            "sync pass finished"
        );
        Ok(SyncOutcome::Completed(report))
    }

    async fn replay(
        &self,
        queued: QueuedRequestRecord,
        report: &mut SyncReport,
    ) -> Result<(), StoreError> {
        let id = queued.id;
        tracing::debug!(%id, request_type = %queued.request_type(), "replaying request");

        let error = match self
            .executor
            .execute(&queued.request, true, &ignore_progress, &CancelToken::never())
            .await
        {
            Ok(payload) => {
                if settle(self.store.resolve(id, Resolution::Completed(payload)).await)?.is_some() {
                    report.delivered += 1;
                }
                return Ok(());
            }
            Err(error) => error,
        };

        let Some(retry_count) = settle(self.store.increment_retry(id).await)? else {
            return Ok(());
        };
        if retry_count <= self.retry_budget {
            tracing::warn!(%id, retry_count, error = %error, "replay failed, will retry next pass");
            report.retried += 1;
            return Ok(());
        }

        tracing::warn!(%id, retry_count, error = %error, "retry budget exhausted, giving up");
        if settle(self.store.resolve(id, Resolution::Failed(error.to_string())).await)?.is_some() {
            report.abandoned += 1;
        }
        Ok(())
    }

    /// キュー済みリクエストを今すぐ諦める
    pub async fn abandon(
        &self,
        id: ArtifactId,
        reason: impl Into<String>,
    ) -> Result<ArtifactRecord, StoreError> {
        if self.store.get_request(id).await?.is_none() {
            return Err(StoreError::NotFound(id));
        }
        let record = self.store.resolve(id, Resolution::Failed(reason.into())).await?;
        tracing::info!(%id, "queued request abandoned");
        Ok(record)
    }

    /// デッドレターをリトライ予算を戻してキューへ戻す
    pub async fn resurrect(&self, id: ArtifactId) -> Result<QueuedRequestRecord, StoreError> {
        let record = self.store.resurrect(id).await?;
        tracing::info!(%id, "dead letter re-queued");
        Ok(record)
    }
}

/// 再実行中に他者が解決済みにしていたら `None`
fn settle<T>(result: Result<T, StoreError>) -> Result<Option<T>, StoreError> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(err @ (StoreError::NotFound(_) | StoreError::InvalidState { .. })) => {
            tracing::warn!(error = %err, "request resolved elsewhere during replay");
            Ok(None)
        }
        Err(err) => Err(err),
    }
}
