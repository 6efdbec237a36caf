//! RequestExecutor - 生成リクエスト一件を最後まで実行する
//!
//! オンライン送信経路と同期エンジンの両方がこれを使う。手順は同じで、
//! 送信し、サービスがオペレーションを返したらポーリングする。

use std::sync::Arc;

use crate::app::cancel::CancelToken;
use crate::app::client::GenerationClient;
use crate::app::connectivity::ConnectivityMonitor;
use crate::app::poller::{OperationPoller, PollProgress};
use crate::domain::{ArtifactPayload, GenerationError, GenerationRequest};
use crate::ports::Submission;

pub struct RequestExecutor {
    client: Arc<GenerationClient>,
    poller: Arc<OperationPoller>,
    connectivity: Arc<ConnectivityMonitor>,
}

impl RequestExecutor {
    pub fn new(
        client: Arc<GenerationClient>,
        poller: Arc<OperationPoller>,
        connectivity: Arc<ConnectivityMonitor>,
    ) -> Self {
        Self {
            client,
            poller,
            connectivity,
        }
    }

    pub fn connectivity(&self) -> &Arc<ConnectivityMonitor> {
        &self.connectivity
    }

    /// `request` を実行して結果を得る
    ///
    /// `force_online` が false で接続がない場合は、即座に `Offline` を返す。
    /// 同期エンジンは接続復帰後にしか動かないので true を渡す。
    pub async fn execute(
        &self,
        request: &GenerationRequest,
        force_online: bool,
        progress: &(dyn Fn(PollProgress) + Send + Sync),
        cancel: &CancelToken,
    ) -> Result<ArtifactPayload, GenerationError> {
        if !force_online && !self.connectivity.is_online() {
            return Err(GenerationError::Offline);
        }

        let request_type = request.request_type();
        match self.client.submit(request).await? {
            Submission::Completed(payload) if request_type.is_async() => {
                tracing::warn!(%request_type, "async request completed without an operation");
                Ok(payload)
            }
            Submission::Completed(payload) => Ok(payload),
            Submission::Pending(handle) if request_type.is_async() => {
                tracing::info!(%request_type, operation = %handle, "operation started");
                self.poller.poll_until_done(&handle, progress, cancel).await
            }
            Submission::Pending(handle) => Err(GenerationError::UnexpectedResponse(format!(
                "{request_type} returned operation {handle} instead of a result"
            ))),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::app::client::tests::client_for;
    use crate::app::connectivity::DEFAULT_RECOVERY_WINDOW;
    use crate::app::poller::{DEFAULT_POLL_INTERVAL, ignore_progress};
    use crate::domain::{ArtifactKind, VideoAspectRatio, VideoParams, VideoResolution};
    use crate::impls::ScriptedService;
    use crate::store::tests::image_request;

    pub(crate) fn executor_for(
        service: Arc<ScriptedService>,
        online: bool,
    ) -> (Arc<ConnectivityMonitor>, RequestExecutor) {
        let client = Arc::new(client_for(service));
        let poller = Arc::new(OperationPoller::new(Arc::clone(&client), DEFAULT_POLL_INTERVAL));
        let monitor = Arc::new(ConnectivityMonitor::new(online, DEFAULT_RECOVERY_WINDOW));
        let executor = RequestExecutor::new(client, poller, Arc::clone(&monitor));
        (monitor, executor)
    }

    #[tokio::test]
    async fn offline_fails_fast_without_contacting_service() {
        let service = Arc::new(ScriptedService::new());
        let (_, executor) = executor_for(service.clone(), false);

        let err = executor
            .execute(&image_request("P"), false, &ignore_progress, &CancelToken::never())
            .await
            .unwrap_err();

        assert_eq!(err, GenerationError::Offline);
        assert!(service.submitted().is_empty());
    }

    #[tokio::test]
    async fn forced_execution_ignores_connectivity() {
        let service = Arc::new(ScriptedService::new());
        let (_, executor) = executor_for(service.clone(), false);

        let payload = executor
            .execute(&image_request("P"), true, &ignore_progress, &CancelToken::never())
            .await
            .unwrap();

        assert_eq!(payload.kind(), ArtifactKind::Image);
        assert_eq!(service.submitted(), vec!["P"]);
    }

    #[tokio::test(start_paused = true)]
    async fn video_request_is_polled_to_completion() {
        let service = Arc::new(ScriptedService::new().with_polls_until_done(1));
        let (_, executor) = executor_for(service.clone(), true);
        let request = GenerationRequest::GenerateVideo(VideoParams {
            prompt: "waves".into(),
            image: None,
            aspect_ratio: VideoAspectRatio::Portrait,
            resolution: VideoResolution::FullHd,
        });

        let payload = executor
            .execute(&request, false, &ignore_progress, &CancelToken::never())
            .await
            .unwrap();

        assert_eq!(payload.kind(), ArtifactKind::Video);
        assert_eq!(service.status_checks(), 2);
        assert_eq!(service.downloads(), 1);
    }
}
