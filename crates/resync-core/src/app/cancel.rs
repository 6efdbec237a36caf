//! 長時間ポーリングのキャンセル
//!
//! ランタイム停止と同じ仕組みで、`watch` チャネルを `true` にする。

use tokio::sync::watch;

/// 所有者側。一度キャンセルしたら戻らない
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

/// 監視側。clone は安い
#[derive(Debug, Clone)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
}

pub fn cancel_pair() -> (CancelHandle, CancelToken) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx }, CancelToken { rx })
}

impl CancelHandle {
    pub fn cancel(&self) {
        // send_replace works with no receivers left
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn token(&self) -> CancelToken {
        CancelToken {
            rx: self.tx.subscribe(),
        }
    }
}

impl CancelToken {
    /// キャンセルされないトークン
    pub fn never() -> Self {
        let (_tx, rx) = watch::channel(false);
        Self { rx }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// キャンセルされたら完了する。キャンセルせずにハンドルが drop された場合は
    /// 永遠に完了しない。
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn cancel_wakes_waiters() {
        let (handle, token) = cancel_pair();
        let waiter = tokio::spawn({
            let token = token.clone();
            async move { token.cancelled().await }
        });

        handle.cancel();

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(token.is_cancelled());
        assert!(handle.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn never_token_stays_pending() {
        let token = CancelToken::never();
        let result = tokio::time::timeout(Duration::from_secs(60), token.cancelled()).await;
        assert!(result.is_err());
    }
}
