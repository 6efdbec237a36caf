//! TCP reachability probe: a host-level connectivity signal source.

use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::ports::ConnectivityEvent;

/// Periodically connects to `target` and reports reachability changes.
///
/// Only changes are sent, so the receiver sees strictly alternating
/// events. The first check is always reported.
#[derive(Debug, Clone)]
pub struct TcpProbe {
    target: String,
    interval: Duration,
    timeout: Duration,
}

impl TcpProbe {
    pub fn new(target: impl Into<String>, interval: Duration, timeout: Duration) -> Self {
        Self {
            target: target.into(),
            interval,
            timeout,
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub async fn is_reachable(&self) -> bool {
        matches!(
            tokio::time::timeout(self.timeout, TcpStream::connect(&self.target)).await,
            Ok(Ok(_))
        )
    }

    pub fn spawn(
        self,
        events: mpsc::Sender<ConnectivityEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut last: Option<bool> = None;
            loop {
                let reachable = self.is_reachable().await;
                if last != Some(reachable) {
                    tracing::debug!(addr = %self.target, reachable, "reachability changed");
                    if events
                        .send(ConnectivityEvent::from_reachable(reachable))
                        .await
                        .is_err()
                    {
                        break;
                    }
                    last = Some(reachable);
                }

                tokio::select! {
                    _ = tokio::time::sleep(self.interval) => {}
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
        })
    }
}
