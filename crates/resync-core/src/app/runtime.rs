//! SyncRuntime - キューを消化し続けるバックグラウンドタスク
//!
//! - event pump: ホストの `ConnectivityEvent` をモニターへ渡す
//! - trigger loop: 復帰ごとに同期パスを一回（起動時にオンラインならもう一回）
//!
//! `shutdown_and_join` で両方のループを止める。実行中のパスは最後まで走らせる。
//! `SyncRuntime` を drop した場合も停止要求として扱う。

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::app::connectivity::{ConnectivityMonitor, ConnectivityState};
use crate::app::sync::{SyncEngine, SyncOutcome};
use crate::ports::ConnectivityEvent;

pub struct SyncRuntime {
    shutdown_tx: watch::Sender<bool>,
    joins: Vec<JoinHandle<()>>,
}

impl SyncRuntime {
    pub fn spawn(
        monitor: Arc<ConnectivityMonitor>,
        engine: Arc<SyncEngine>,
        events: mpsc::Receiver<ConnectivityEvent>,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let pump = tokio::spawn(event_pump(Arc::clone(&monitor), events, shutdown_rx.clone()));
        let trigger = tokio::spawn(trigger_loop(monitor.subscribe(), engine, shutdown_rx));

        Self {
            shutdown_tx,
            joins: vec![pump, trigger],
        }
    }

    pub fn request_shutdown(&self) {
        // receivers may already be gone
        let _ = self.shutdown_tx.send(true);
    }

    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        for join in self.joins {
            if let Err(err) = join.await {
                tracing::error!(error = %err, "runtime task panicked");
            }
        }
    }
}

async fn event_pump(
    monitor: Arc<ConnectivityMonitor>,
    mut events: mpsc::Receiver<ConnectivityEvent>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        if *shutdown_rx.borrow() {
            break;
        }
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            event = events.recv() => match event {
                Some(event) => monitor.handle_event(event),
                None => {
                    tracing::debug!("connectivity source closed");
                    break;
                }
            },
        }
    }
}

async fn trigger_loop(
    mut state_rx: watch::Receiver<ConnectivityState>,
    engine: Arc<SyncEngine>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut was_online = state_rx.borrow_and_update().is_online;
    if was_online {
        run_pass(&engine).await;
    }

    loop {
        if *shutdown_rx.borrow() {
            break;
        }
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            changed = state_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = *state_rx.borrow_and_update();
                // a change that carries `recently_recovered` is always a fresh recovery
                if state.is_online && (!was_online || state.recently_recovered) {
                    run_pass(&engine).await;
                }
                was_online = state.is_online;
            }
        }
    }
}

async fn run_pass(engine: &SyncEngine) {
    match engine.process_sync_queue().await {
        Ok(SyncOutcome::Completed(report)) => {
            tracing::debug!(pass_id = %report.pass_id, "triggered pass done");
        }
        Ok(SyncOutcome::Skipped) => tracing::debug!("triggered pass skipped"),
        Err(err) => tracing::error!(error = %err, "sync pass aborted"),
    }
}
