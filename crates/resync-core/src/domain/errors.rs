//! エラーとその分類
//!
//! - Transient: リモートの過負荷や一時的な利用不可（リトライする）
//! - Fatal: 不正な入力、資格情報、その他すべて（リトライしない）

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::ids::ArtifactId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    Transient,
    Fatal,
}

/// リトライ実行側が分類できるエラー
pub trait Retryable {
    fn is_transient(&self) -> bool;
}

/// 生成サービスの境界から返るエラー
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ServiceError {
    kind: ErrorKind,
    status: Option<u16>,
    message: String,
}

/// 過負荷・利用不可を示すメッセージ断片
const TRANSIENT_MARKERS: &[&str] = &[
    "overloaded",
    "unavailable",
    "resource_exhausted",
    "rate limit",
    "try again later",
    "timed out",
];

impl ServiceError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Transient,
            status: None,
            message: message.into(),
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Fatal,
            status: None,
            message: message.into(),
        }
    }

    /// HTTP の失敗をステータスコード、次にメッセージで分類する
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        let kind = if matches!(status, 408 | 429 | 500 | 502 | 503 | 504) {
            ErrorKind::Transient
        } else {
            ErrorKind::Fatal
        };
        let kind = match kind {
            ErrorKind::Fatal if message_is_transient(&message) => ErrorKind::Transient,
            kind => kind,
        };
        Self {
            kind,
            status: Some(status),
            message: format!("service returned {status}: {message}"),
        }
    }

    /// メッセージしか持たないエラーを分類する
    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        if message_is_transient(&message) {
            Self::transient(message)
        } else {
            Self::fatal(message)
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn status(&self) -> Option<u16> {
        self.status
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

fn message_is_transient(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    TRANSIENT_MARKERS.iter().any(|marker| lower.contains(marker))
}

impl Retryable for ServiceError {
    fn is_transient(&self) -> bool {
        self.kind == ErrorKind::Transient
    }
}

/// 失敗した `with_retry` の結果
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RetryError<E: std::error::Error> {
    /// すべての試行が一時的エラーで失敗した
    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: E },

    /// リトライしない失敗。最初に起きた時点で返す
    #[error(transparent)]
    Fatal(E),
}

impl<E: std::error::Error> RetryError<E> {
    pub fn into_inner(self) -> E {
        match self {
            RetryError::Exhausted { last, .. } => last,
            RetryError::Fatal(err) => err,
        }
    }
}

/// 永続ストアの失敗
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// 保存先が使えない（I/O 失敗、容量超過、無効化）
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("record {0} already exists")]
    Duplicate(ArtifactId),

    #[error("record {0} not found")]
    NotFound(ArtifactId),

    #[error("invalid state for {id}: {reason}")]
    InvalidState { id: ArtifactId, reason: String },

    #[error("corrupt store document: {0}")]
    Corrupt(String),

    #[error("store schema version {found} is newer than supported version {supported}")]
    UnsupportedSchema { found: u64, supported: u64 },
}

/// 生成経路（client, poller, executor）の失敗
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GenerationError {
    /// 接続がなく、オンライン強制でもなかった
    #[error("offline: request not sent")]
    Offline,

    #[error(transparent)]
    Service(ServiceError),

    #[error("retries exhausted after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: ServiceError },

    #[error("no credential configured for service '{0}'")]
    MissingCredential(String),

    #[error("service returned an unexpected result: {0}")]
    UnexpectedResponse(String),

    #[error("operation {operation} failed: {message}")]
    OperationFailed { operation: String, message: String },

    #[error("operation {0} completed without a downloadable artifact")]
    MissingArtifact(String),

    #[error("polling of operation {0} was cancelled")]
    Cancelled(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<RetryError<ServiceError>> for GenerationError {
    fn from(err: RetryError<ServiceError>) -> Self {
        match err {
            RetryError::Exhausted { attempts, last } => GenerationError::Exhausted { attempts, last },
            RetryError::Fatal(err) => GenerationError::Service(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::rate_limited(429, "quota", ErrorKind::Transient)]
    #[case::unavailable(503, "backend", ErrorKind::Transient)]
    #[case::gateway(504, "upstream", ErrorKind::Transient)]
    #[case::bad_request(400, "invalid argument", ErrorKind::Fatal)]
    #[case::unauthorized(401, "API key not valid", ErrorKind::Fatal)]
    #[case::overloaded_body(400, "The model is overloaded", ErrorKind::Transient)]
    fn status_classification(#[case] status: u16, #[case] body: &str, #[case] kind: ErrorKind) {
        let err = ServiceError::from_status(status, body);
        assert_eq!(err.kind(), kind);
        assert_eq!(err.status(), Some(status));
        assert!(err.message().contains(body));
    }

    #[rstest]
    #[case("model overloaded", true)]
    #[case("UNAVAILABLE: try again", true)]
    #[case("RESOURCE_EXHAUSTED", true)]
    #[case("permission denied", false)]
    fn message_classification(#[case] message: &str, #[case] transient: bool) {
        assert_eq!(ServiceError::from_message(message).is_transient(), transient);
    }

    #[test]
    fn exhausted_wraps_last_error() {
        let err: GenerationError = RetryError::Exhausted {
            attempts: 3,
            last: ServiceError::transient("model overloaded"),
        }
        .into();

        assert_eq!(
            err.to_string(),
            "retries exhausted after 3 attempts: model overloaded"
        );
    }
}
