//! Ports - 抽象化レイヤー
//!
//! 同期エンジンの外側との境界をトレイトで表す。
//! 生成サービス、保存先、接続状態の通知元、秘密情報、時刻、id 生成。
//! 実装は `impls` に置く。

pub mod clock;
pub mod connectivity;
pub mod credentials;
pub mod generation;
pub mod id_generator;
pub mod storage;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::connectivity::ConnectivityEvent;
pub use self::credentials::{Credential, CredentialProvider, StaticCredentials};
pub use self::generation::{
    ArtifactDescriptor, GenerationService, OperationHandle, OperationStatus, Submission,
};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::storage::{StorageBackend, StorageLock};
