//! IdGenerator port - id 生成の抽象
//!
//! 時刻に依存する部分をテストで固定できるようにトレイトの裏に置く。

use crate::domain::ids::{ArtifactId, PassId};
use crate::ports::Clock;
use ulid::Ulid;

/// IdGenerator は時刻順に並ぶ id を生成する
///
/// # Thread Safety
/// - `Send + Sync`（Submitter と SyncEngine で共有する）
pub trait IdGenerator: Send + Sync {
    fn generate_artifact_id(&self) -> ArtifactId;

    fn generate_pass_id(&self) -> PassId;
}

/// ULID ベースの生成器。時刻部分は注入された clock から、乱数部分は `rand` から取る
pub struct UlidGenerator<C> {
    clock: C,
}

impl<C: Clock> UlidGenerator<C> {
    pub fn new(clock: C) -> Self {
        Self { clock }
    }

    fn next_ulid(&self) -> Ulid {
        let timestamp_ms = self.clock.now().timestamp_millis() as u64;
        Ulid::from_parts(timestamp_ms, rand::random())
    }
}

impl<C: Clock> IdGenerator for UlidGenerator<C> {
    fn generate_artifact_id(&self) -> ArtifactId {
        ArtifactId::from(self.next_ulid())
    }

    fn generate_pass_id(&self) -> PassId {
        PassId::from(self.next_ulid())
    }
}
