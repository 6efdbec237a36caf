//! OperationPoller - 非同期（動画）オペレーションを完了まで追跡する
//!
//! ループ: 間隔だけ待ってステータスを確認し、完了するまで繰り返す。
//! 完了後にダウンロード先を取り出し、バイト列を一度だけ取得する。
//! 全体のタイムアウトはない。完了、ステータス取得の失敗、キャンセルのいずれかで終わる。

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::app::cancel::{CancelHandle, CancelToken, cancel_pair};
use crate::app::client::GenerationClient;
use crate::domain::{ArtifactPayload, GenerationError};
use crate::ports::{OperationHandle, OperationStatus};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

const DEFAULT_VIDEO_MIME: &str = "video/mp4";

/// ポーリング中に通知するフェーズの区切り
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PollProgress {
    CheckingStatus,
    ProcessingComplete,
    FetchingData,
}

impl PollProgress {
    pub fn message(self) -> &'static str {
        match self {
            PollProgress::CheckingStatus => "Checking status...",
            PollProgress::ProcessingComplete => "Processing complete.",
            PollProgress::FetchingData => "Fetching data...",
        }
    }
}

/// 進捗コールバック
pub type ProgressFn = Arc<dyn Fn(PollProgress) + Send + Sync>;

/// 通知をすべて捨てる進捗コールバック
pub fn ignore_progress(_: PollProgress) {}

pub struct OperationPoller {
    client: Arc<GenerationClient>,
    interval: Duration,
}

impl OperationPoller {
    pub fn new(client: Arc<GenerationClient>, interval: Duration) -> Self {
        Self { client, interval }
    }

    pub async fn poll_until_done(
        &self,
        handle: &OperationHandle,
        progress: &(dyn Fn(PollProgress) + Send + Sync),
        cancel: &CancelToken,
    ) -> Result<ArtifactPayload, GenerationError> {
        let mut status = OperationStatus::running();

        while !status.done {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = cancel.cancelled() => {
                    tracing::info!(operation = %handle, "polling cancelled");
                    return Err(GenerationError::Cancelled(handle.name().to_string()));
                }
            }
            progress(PollProgress::CheckingStatus);
            status = self.client.operation_status(handle).await?;
            tracing::debug!(operation = %handle, done = status.done, "operation status");
        }

        if let Some(message) = status.error {
            return Err(GenerationError::OperationFailed {
                operation: handle.name().to_string(),
                message,
            });
        }

        progress(PollProgress::ProcessingComplete);
        let descriptor = status
            .result
            .ok_or_else(|| GenerationError::MissingArtifact(handle.name().to_string()))?;

        progress(PollProgress::FetchingData);
        let bytes = self.client.download(&descriptor).await?;
        let mime_type = descriptor
            .mime_type
            .as_deref()
            .unwrap_or(DEFAULT_VIDEO_MIME);

        Ok(ArtifactPayload::video(mime_type, &bytes, descriptor.uri.clone()))
    }

    /// `poll_until_done` を別タスクとして実行する
    pub fn spawn(self: &Arc<Self>, handle: OperationHandle, progress: ProgressFn) -> PollTask {
        let (cancel, token) = cancel_pair();
        let poller = Arc::clone(self);
        let operation = handle.name().to_string();

        let join = tokio::spawn(async move {
            poller
                .poll_until_done(&handle, progress.as_ref(), &token)
                .await
        });

        PollTask {
            operation,
            join,
            cancel,
        }
    }
}

/// 実行中のポーリング。drop するとタスクは切り離されるだけなので、止めるには `cancel` を使う
pub struct PollTask {
    operation: String,
    join: JoinHandle<Result<ArtifactPayload, GenerationError>>,
    cancel: CancelHandle,
}

impl PollTask {
    pub fn operation(&self) -> &str {
        &self.operation
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.token()
    }

    pub async fn join(self) -> Result<ArtifactPayload, GenerationError> {
        match self.join.await {
            Ok(result) => result,
            Err(err) => {
                tracing::error!(operation = %self.operation, error = %err, "poll task aborted");
                Err(GenerationError::Cancelled(self.operation))
            }
        }
    }
}
