//! GenerationService port - プロンプトから成果物を作るリモート API
//!
//! ここには境界だけを置く。リトライやポーリングは `app::client` と
//! `app::poller` が上に重ねる。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::{ArtifactPayload, GenerationRequest, ServiceError};
use crate::ports::Credential;

/// 実行中のリモートジョブへの不透明な参照
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OperationHandle {
    name: String,
}

impl OperationHandle {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for OperationHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// 完了したオペレーションの出力の取得先
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactDescriptor {
    pub uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct OperationStatus {
    pub done: bool,
    pub result: Option<ArtifactDescriptor>,
    /// オペレーションが失敗で終わったときに入る
    pub error: Option<String>,
}

impl OperationStatus {
    pub fn running() -> Self {
        Self::default()
    }

    pub fn finished(descriptor: ArtifactDescriptor) -> Self {
        Self {
            done: true,
            result: Some(descriptor),
            error: None,
        }
    }
}

/// `submit` の結果。同期型はすぐに完了し、動画型はポーリング用のオペレーションを返す
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submission {
    Completed(ArtifactPayload),
    Pending(OperationHandle),
}

/// GenerationService は外部の協調者
///
/// # エラー
/// - 一時的な過負荷・利用不可 → `ErrorKind::Transient`
/// - 資格情報・入力検証の失敗 → `ErrorKind::Fatal`
#[async_trait]
pub trait GenerationService: Send + Sync {
    async fn submit(
        &self,
        request: &GenerationRequest,
        credential: &Credential,
    ) -> Result<Submission, ServiceError>;

    async fn operation_status(
        &self,
        handle: &OperationHandle,
        credential: &Credential,
    ) -> Result<OperationStatus, ServiceError>;

    async fn download(
        &self,
        descriptor: &ArtifactDescriptor,
        credential: &Credential,
    ) -> Result<Vec<u8>, ServiceError>;
}
