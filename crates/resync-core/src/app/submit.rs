//! Submitter - リクエストを今すぐ実行するか、同期キューに預ける

use std::sync::Arc;

use crate::app::cancel::CancelToken;
use crate::app::executor::RequestExecutor;
use crate::app::poller::{PollProgress, ignore_progress};
use crate::domain::{
    ArtifactRecord, GenerationError, GenerationRequest, QueuedRequestRecord,
};
use crate::ports::{Clock, IdGenerator};
use crate::store::Store;

#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    /// 接続なし。プレースホルダーが次の同期パスを待つ
    Queued(ArtifactRecord),
    Completed(ArtifactRecord),
}

impl SubmitOutcome {
    pub fn artifact(&self) -> &ArtifactRecord {
        match self {
            SubmitOutcome::Queued(record) | SubmitOutcome::Completed(record) => record,
        }
    }
}

pub struct Submitter {
    store: Arc<Store>,
    executor: Arc<RequestExecutor>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
}

impl Submitter {
    pub fn new(
        store: Arc<Store>,
        executor: Arc<RequestExecutor>,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
    ) -> Self {
        Self {
            store,
            executor,
            clock,
            ids,
        }
    }

    pub async fn submit(&self, request: GenerationRequest) -> Result<SubmitOutcome, GenerationError> {
        self.submit_with_progress(request, &ignore_progress, &CancelToken::never())
            .await
    }

    /// オンラインで失敗した場合は何も保存せず、エラーだけを返す。
    pub async fn submit_with_progress(
        &self,
        request: GenerationRequest,
        progress: &(dyn Fn(PollProgress) + Send + Sync),
        cancel: &CancelToken,
    ) -> Result<SubmitOutcome, GenerationError> {
        if !self.executor.connectivity().is_online() {
            return self.enqueue(request).await;
        }

        match self.executor.execute(&request, false, progress, cancel).await {
            Ok(payload) => {
                let record = ArtifactRecord::completed(
                    self.ids.generate_artifact_id(),
                    request.prompt_text(),
                    payload,
                    self.clock.now(),
                );
                self.store.put_artifact(record.clone()).await?;
                tracing::info!(id = %record.id, kind = ?record.kind, "artifact completed");
                Ok(SubmitOutcome::Completed(record))
            }
            // connectivity dropped between the check and the call
            Err(GenerationError::Offline) => self.enqueue(request).await,
            Err(err) => {
                tracing::warn!(request_type = %request.request_type(), error = %err, "generation failed");
                Err(err)
            }
        }
    }

    async fn enqueue(&self, request: GenerationRequest) -> Result<SubmitOutcome, GenerationError> {
        let id = self.ids.generate_artifact_id();
        let created_at = self.clock.now();
        let placeholder = ArtifactRecord::queued(
            id,
            request.request_type().artifact_kind(),
            request.prompt_text(),
            created_at,
        );
        let request_type = request.request_type();

        self.store
            .enqueue(placeholder.clone(), QueuedRequestRecord::new(id, request, created_at))
            .await?;
        tracing::info!(%id, %request_type, "offline, request queued");
        Ok(SubmitOutcome::Queued(placeholder))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::executor::tests::executor_for;
    use crate::domain::{ArtifactStatus, ServiceError};
    use crate::impls::{MemoryBackend, ScriptedService};
    use crate::ports::{FixedClock, UlidGenerator};
    use crate::store::tests::{at, image_request};

    struct Fixture {
        service: Arc<ScriptedService>,
        backend: Arc<MemoryBackend>,
        store: Arc<Store>,
        submitter: Submitter,
    }

    async fn fixture(online: bool) -> Fixture {
        let service = Arc::new(ScriptedService::new());
        let backend = Arc::new(MemoryBackend::new());
        let store = Arc::new(Store::open(backend.clone()).await.unwrap());
        let (_, executor) = executor_for(service.clone(), online);
        let clock = Arc::new(FixedClock::new(at(0)));
        let submitter = Submitter::new(
            Arc::clone(&store),
            Arc::new(executor),
            clock.clone(),
            Arc::new(UlidGenerator::new(clock)),
        );
        Fixture {
            service,
            backend,
            store,
            submitter,
        }
    }

    #[tokio::test]
    async fn offline_submission_queues_one_pair() {
        let f = fixture(false).await;

        let outcome = f.submitter.submit(image_request("a red fox")).await.unwrap();

        let SubmitOutcome::Queued(placeholder) = outcome else {
            panic!("expected a queued outcome");
        };
        assert_eq!(placeholder.status, ArtifactStatus::Queued);
        assert_eq!(placeholder.prompt_text, "a red fox");

        let artifacts = f.store.artifacts_by_time().await.unwrap();
        let requests = f.store.requests_by_time().await.unwrap();
        assert_eq!(artifacts, vec![placeholder.clone()]);
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].id, placeholder.id);
        assert_eq!(requests[0].retry_count, 0);
        assert!(f.service.submitted().is_empty());
    }

    #[tokio::test]
    async fn online_success_stores_completed_artifact() {
        let f = fixture(true).await;

        let outcome = f.submitter.submit(image_request("P")).await.unwrap();

        let SubmitOutcome::Completed(record) = outcome else {
            panic!("expected a completed outcome");
        };
        assert_eq!(record.status, ArtifactStatus::Completed);
        assert!(record.payload.is_some());
        assert_eq!(f.store.get_artifact(record.id).await.unwrap(), Some(record));
        assert!(f.store.requests_by_time().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn fatal_error_stores_nothing() {
        let f = fixture(true).await;
        f.service.fail_prompt("P", ServiceError::fatal("API key not valid"));

        let err = f.submitter.submit(image_request("P")).await.unwrap_err();

        assert!(matches!(err, GenerationError::Service(_)));
        assert!(f.store.artifacts_by_time().await.unwrap().is_empty());
        assert!(f.store.requests_by_time().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn storage_failure_surfaces_as_store_error() {
        let f = fixture(false).await;
        f.backend.set_writable(false);

        let err = f.submitter.submit(image_request("P")).await.unwrap_err();

        assert!(matches!(err, GenerationError::Store(_)));
        assert!(f.store.artifacts_by_time().await.unwrap().is_empty());
    }
}
