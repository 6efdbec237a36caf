//! App - アプリケーション層
//!
//! ports を組み合わせて、キューイングと同期の振る舞いを作る。
//!
//! # 構成要素
//! - **RetryPolicy / with_retry**: 上限付き指数バックオフ
//! - **GenerationClient**: 生成サービスへのリトライ付きアダプタ
//! - **OperationPoller**: 非同期オペレーションを完了までポーリング
//! - **ConnectivityMonitor**: オンライン状態と復帰ウィンドウ
//! - **RequestExecutor**: 送信してポーリング。下の二経路で共有
//! - **Submitter**: オンラインなら即送信、オフラインならキューへ
//! - **SyncEngine**: 復帰後にキューを消化
//! - **SyncRuntime**: イベント転送と同期トリガーのバックグラウンドタスク

pub mod cancel;
pub mod client;
pub mod connectivity;
pub mod executor;
pub mod poller;
pub mod retry;
pub mod runtime;
pub mod submit;
pub mod sync;

pub use self::cancel::{CancelHandle, CancelToken, cancel_pair};
pub use self::client::{DEFAULT_SERVICE_ID, GenerationClient};
pub use self::connectivity::{ConnectivityMonitor, ConnectivityState, DEFAULT_RECOVERY_WINDOW};
pub use self::executor::RequestExecutor;
pub use self::poller::{
    DEFAULT_POLL_INTERVAL, OperationPoller, PollProgress, PollTask, ProgressFn, ignore_progress,
};
pub use self::retry::{RetryPolicy, with_retry};
pub use self::runtime::SyncRuntime;
pub use self::submit::{SubmitOutcome, Submitter};
pub use self::sync::{DEFAULT_SYNC_RETRY_BUDGET, SyncEngine, SyncOutcome, SyncReport};
