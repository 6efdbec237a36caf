//! ストアの作業セット（メモリ上）

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};

use crate::domain::{
    ArtifactId, ArtifactRecord, ArtifactStatus, DeadLetterRecord, QueuedRequestRecord,
};
use super::schema::StoreDocument;
use crate::observability::StoreCounts;

/// `Collection` に入れるレコード
pub(crate) trait Keyed {
    fn key(&self) -> ArtifactId;
    fn created_at(&self) -> DateTime<Utc>;
}

impl Keyed for ArtifactRecord {
    fn key(&self) -> ArtifactId {
        self.id
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

impl Keyed for QueuedRequestRecord {
    fn key(&self) -> ArtifactId {
        self.id
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

impl Keyed for DeadLetterRecord {
    fn key(&self) -> ArtifactId {
        self.record.id
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.record.created_at
    }
}

/// id をキーにしたレコードと `created_at` のインデックス
///
/// インデックスのキーは `(created_at, id)`。同時刻に作られたレコードも
/// 安定した順序で返る。
#[derive(Debug, Clone)]
pub(crate) struct Collection<V> {
    records: HashMap<ArtifactId, V>,
    by_time: BTreeSet<(DateTime<Utc>, ArtifactId)>,
}

impl<V> Default for Collection<V> {
    fn default() -> Self {
        Self {
            records: HashMap::new(),
            by_time: BTreeSet::new(),
        }
    }
}

impl<V: Keyed + Clone> Collection<V> {
    /// 挿入または置き換え。置き換えたレコードを返す
    pub(crate) fn insert(&mut self, record: V) -> Option<V> {
        let id = record.key();
        let previous = self.remove(id);
        self.by_time.insert((record.created_at(), id));
        self.records.insert(id, record);
        previous
    }

    pub(crate) fn get(&self, id: ArtifactId) -> Option<&V> {
        self.records.get(&id)
    }

    pub(crate) fn contains(&self, id: ArtifactId) -> bool {
        self.records.contains_key(&id)
    }

    pub(crate) fn remove(&mut self, id: ArtifactId) -> Option<V> {
        let record = self.records.remove(&id)?;
        self.by_time.remove(&(record.created_at(), id));
        Some(record)
    }

    /// レコードをその場で変更し、インデックスも合わせる
    pub(crate) fn modify<T>(&mut self, id: ArtifactId, f: impl FnOnce(&mut V) -> T) -> Option<T> {
        let record = self.records.get_mut(&id)?;
        self.by_time.remove(&(record.created_at(), id));
        let out = f(record);
        self.by_time.insert((record.created_at(), id));
        Some(out)
    }

    /// `created_at` の昇順
    pub(crate) fn by_time(&self) -> impl Iterator<Item = &V> {
        self.by_time
            .iter()
            .filter_map(|(_, id)| self.records.get(id))
    }

    pub(crate) fn len(&self) -> usize {
        self.records.len()
    }
}

impl<V: Keyed + Clone> FromIterator<V> for Collection<V> {
    fn from_iter<I: IntoIterator<Item = V>>(iter: I) -> Self {
        let mut collection = Collection::default();
        for record in iter {
            collection.insert(record);
        }
        collection
    }
}

#[derive(Debug, Clone, Default)]
pub(crate) struct StoreState {
    pub(crate) artifacts: Collection<ArtifactRecord>,
    pub(crate) sync_queue: Collection<QueuedRequestRecord>,
    pub(crate) dead_letters: Collection<DeadLetterRecord>,
}

impl StoreState {
    pub(crate) fn from_document(document: StoreDocument) -> Self {
        Self {
            artifacts: document.artifacts.into_iter().collect(),
            sync_queue: document.sync_queue.into_iter().collect(),
            dead_letters: document.dead_letters.into_iter().collect(),
        }
    }

    pub(crate) fn counts(&self) -> StoreCounts {
        let mut counts = StoreCounts::default();
        for artifact in self.artifacts.by_time() {
            match artifact.status {
                ArtifactStatus::Queued => counts.queued += 1,
                ArtifactStatus::Completed => counts.completed += 1,
                ArtifactStatus::Failed => counts.failed += 1,
            }
        }
        counts.pending_requests = self.sync_queue.len();
        counts.dead_letters = self.dead_letters.len();
        counts
    }
}
