//! RetryPolicy - ジッター付き、上限ありの指数バックオフ

use std::future::Future;
use std::time::Duration;

use rand::Rng;

use crate::domain::{RetryError, Retryable};

/// リモート呼び出しのリトライポリシー
///
/// `k` 回目（0 始まり）のリトライ前の待ち時間は
/// `initial_delay * multiplier^k + uniform[0, max_jitter)`.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// 初回を含む総試行回数
    pub max_attempts: u32,

    /// 最初のリトライの基本待ち時間
    pub initial_delay: Duration,

    /// Backoff multiplier for exponential backoff.
    pub multiplier: f64,

    /// 各バックオフに足すランダム遅延の上限（未満）
    pub max_jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1000),
            multiplier: 2.0,
            max_jitter: Duration::from_millis(1000),
        }
    }
}

impl RetryPolicy {
    pub fn without_jitter(mut self) -> Self {
        self.max_jitter = Duration::ZERO;
        self
    }

    /// リトライ `attempt` 前の待ち時間のうち決定的な部分
    ///
    /// 例: initial_delay=1s, multiplier=2.0
    /// - attempt 0: 1s
    /// - attempt 1: 2s
    /// - attempt 2: 4s
    pub fn backoff(&self, attempt: u32) -> Duration {
        let base_secs = self.initial_delay.as_secs_f64();
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        Duration::from_secs_f64(base_secs * self.multiplier.powi(exponent))
    }

    fn jitter(&self) -> Duration {
        let max_ms = u64::try_from(self.max_jitter.as_millis()).unwrap_or(u64::MAX);
        if max_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..max_ms))
    }

    /// リトライ `attempt` 前の待ち時間（バックオフ + ジッター）
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.backoff(attempt) + self.jitter()
    }
}

/// `operation` を成功するまで実行する。
///
/// 致命的エラーは即座に返す。一時的エラーは試行回数が尽きるまで待ってから再試行する。
pub async fn with_retry<T, E, F, Fut>(policy: &RetryPolicy, mut operation: F) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retryable + std::error::Error,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) if !err.is_transient() => return Err(RetryError::Fatal(err)),
            Err(err) => {
                attempt += 1;
                if attempt >= max_attempts {
                    return Err(RetryError::Exhausted {
                        attempts: attempt,
                        last: err,
                    });
                }
                let delay = policy.delay_for(attempt - 1);
                tracing::warn!(
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "transient failure, retrying"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}
