//! 接続状態の通知元との境界
//!
//! ホストは到達性の変化を `ConnectivityEvent` として `tokio::sync::mpsc` に流し、
//! モニターがそれを受け取る。

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectivityEvent {
    Online,
    Offline,
}

impl ConnectivityEvent {
    pub fn from_reachable(reachable: bool) -> Self {
        if reachable {
            ConnectivityEvent::Online
        } else {
            ConnectivityEvent::Offline
        }
    }
}
