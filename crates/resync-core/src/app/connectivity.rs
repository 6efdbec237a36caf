//! ConnectivityMonitor - 接続状態の監視
//!
//! ホストの `ConnectivityEvent` を `ConnectivityState` に変換し、`watch` チャネルで公開する。
//! オンライン復帰後、`recently_recovered` は復帰ウィンドウの間だけ true になり、
//! その後自動で false に戻る。

use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::ports::ConnectivityEvent;

pub const DEFAULT_RECOVERY_WINDOW: Duration = Duration::from_millis(4000);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConnectivityState {
    pub is_online: bool,
    pub recently_recovered: bool,
}

pub struct ConnectivityMonitor {
    tx: watch::Sender<ConnectivityState>,
    recovery_window: Duration,
    /// 遷移ごとに進む。リセットタイマーは自分の epoch のときだけ発火する
    epoch: Arc<AtomicU64>,
    reset_timer: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectivityMonitor {
    pub fn new(initially_online: bool, recovery_window: Duration) -> Self {
        let (tx, _) = watch::channel(ConnectivityState {
            is_online: initially_online,
            recently_recovered: false,
        });
        Self {
            tx,
            recovery_window,
            epoch: Arc::new(AtomicU64::new(0)),
            reset_timer: Mutex::new(None),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectivityState> {
        self.tx.subscribe()
    }

    pub fn state(&self) -> ConnectivityState {
        *self.tx.borrow()
    }

    pub fn is_online(&self) -> bool {
        self.state().is_online
    }

    /// ホストのイベントを一つ適用する。同じ向きの連続イベントは無視。
    /// tokio ランタイム内から呼ぶこと。
    pub fn handle_event(&self, event: ConnectivityEvent) {
        let current = self.state();
        match event {
            ConnectivityEvent::Online if current.is_online => {}
            ConnectivityEvent::Online => {
                let epoch = self.next_epoch();
                self.tx.send_replace(ConnectivityState {
                    is_online: true,
                    recently_recovered: true,
                });
                tracing::info!("connectivity restored");
                self.start_reset_timer(epoch);
            }
            ConnectivityEvent::Offline if !current.is_online && !current.recently_recovered => {}
            ConnectivityEvent::Offline => {
                self.next_epoch();
                self.tx.send_replace(ConnectivityState {
                    is_online: false,
                    recently_recovered: false,
                });
                tracing::info!("connectivity lost");
            }
        }
    }

    /// 保留中のリセットタイマーを無効化し、新しい epoch を返す
    fn next_epoch(&self) -> u64 {
        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(timer) = self.lock_timer().take() {
            timer.abort();
        }
        epoch
    }

    fn start_reset_timer(&self, epoch: u64) {
        let deadline = tokio::time::Instant::now() + self.recovery_window;
        let tx = self.tx.clone();
        let current_epoch = Arc::clone(&self.epoch);

        let timer = tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            tx.send_if_modified(|state| {
                if current_epoch.load(Ordering::SeqCst) != epoch || !state.recently_recovered {
                    return false;
                }
                state.recently_recovered = false;
                true
            });
        });
        *self.lock_timer() = Some(timer);
    }

    fn lock_timer(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
        self.reset_timer.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for ConnectivityMonitor {
    fn drop(&mut self) {
        if let Some(timer) = self.lock_timer().take() {
            timer.abort();
        }
    }
}
