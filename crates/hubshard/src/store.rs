//! Per-instance persistence: the checkpointed execution history that makes
//! replay possible, and the terminal results kept for inspection and dedup.

use crate::{ActivityCall, ActivityOutcome, WorkflowResult};
use core::fmt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use uuid::Uuid;

/// Identifies one workflow instance.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceId(String);

impl InstanceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// A fresh random id.
    pub fn random() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A completed activity: the call the workflow asked for and what it
/// returned after retries.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Checkpoint {
    pub call: ActivityCall,
    pub outcome: ActivityOutcome,
    pub attempts: u32,
}

/// Ordered checkpoints of one instance.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionHistory {
    checkpoints: Vec<Checkpoint>,
}

impl ExecutionHistory {
    pub fn new(checkpoints: Vec<Checkpoint>) -> Self {
        Self { checkpoints }
    }

    pub fn get(&self, index: usize) -> Option<&Checkpoint> {
        self.checkpoints.get(index)
    }

    pub fn push(&mut self, checkpoint: Checkpoint) {
        self.checkpoints.push(checkpoint);
    }

    pub fn len(&self) -> usize {
        self.checkpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.checkpoints.is_empty()
    }

    pub fn checkpoints(&self) -> &[Checkpoint] {
        &self.checkpoints
    }
}

/// Durable log of activity checkpoints.
pub trait HistoryStore: Send + Sync {
    fn load(&self, instance_id: &InstanceId) -> ExecutionHistory;

    fn append(&self, instance_id: &InstanceId, checkpoint: Checkpoint);

    /// Drops the history of a finished instance.
    fn remove(&self, instance_id: &InstanceId);
}

/// Terminal results by instance.
pub trait ResultStore: Send + Sync {
    fn get(&self, instance_id: &InstanceId) -> Option<WorkflowResult>;

    /// Stores `result` unless one is already present, and returns the stored
    /// value. A result never changes once written.
    fn put(&self, instance_id: &InstanceId, result: WorkflowResult) -> WorkflowResult;
}

#[derive(Debug, Default)]
pub struct MemoryHistoryStore {
    histories: Mutex<HashMap<InstanceId, ExecutionHistory>>,
}

impl MemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the history of `instance_id`, e.g. to simulate a restart.
    pub fn insert(&self, instance_id: InstanceId, history: ExecutionHistory) {
        self.histories.lock().insert(instance_id, history);
    }
}

impl HistoryStore for MemoryHistoryStore {
    fn load(&self, instance_id: &InstanceId) -> ExecutionHistory {
        self.histories
            .lock()
            .get(instance_id)
            .cloned()
            .unwrap_or_default()
    }

    fn append(&self, instance_id: &InstanceId, checkpoint: Checkpoint) {
        self.histories
            .lock()
            .entry(instance_id.clone())
            .or_default()
            .push(checkpoint);
    }

    fn remove(&self, instance_id: &InstanceId) {
        self.histories.lock().remove(instance_id);
    }
}

#[derive(Debug, Default)]
struct Results {
    by_id: HashMap<InstanceId, WorkflowResult>,
    /// Insertion order, oldest first.
    order: VecDeque<InstanceId>,
}

/// Terminal results kept in memory, bounded by a capacity.
///
/// Once full, the oldest result is evicted; resubmitting an evicted instance
/// id runs the workflow again.
#[derive(Debug)]
pub struct MemoryResultStore {
    capacity: usize,
    results: Mutex<Results>,
}

impl Default for MemoryResultStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryResultStore {
    pub const DEFAULT_CAPACITY: usize = 100_000;

    pub fn new() -> Self {
        Self::with_capacity(Self::DEFAULT_CAPACITY)
    }

    /// A store holding at most `capacity` results (at least one).
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            results: Mutex::new(Results::default()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.results.lock().by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ResultStore for MemoryResultStore {
    fn get(&self, instance_id: &InstanceId) -> Option<WorkflowResult> {
        self.results.lock().by_id.get(instance_id).cloned()
    }

    fn put(&self, instance_id: &InstanceId, result: WorkflowResult) -> WorkflowResult {
        let mut results = self.results.lock();
        if let Some(existing) = results.by_id.get(instance_id) {
            return existing.clone();
        }
        while results.order.len() >= self.capacity {
            let Some(oldest) = results.order.pop_front() else {
                break;
            };
            results.by_id.remove(&oldest);
        }
        results.order.push_back(instance_id.clone());
        results.by_id.insert(instance_id.clone(), result.clone());
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_result_wins() {
        let store = MemoryResultStore::new();
        let id = InstanceId::new("a");
        assert_eq!(store.put(&id, WorkflowResult::Success), WorkflowResult::Success);
        assert_eq!(
            store.put(&id, WorkflowResult::unhandled("late")),
            WorkflowResult::Success
        );
        assert_eq!(store.get(&id), Some(WorkflowResult::Success));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn oldest_result_is_evicted_at_capacity() {
        let store = MemoryResultStore::with_capacity(2);
        let ids: Vec<_> = (0..3).map(|i| InstanceId::new(format!("i{i}"))).collect();
        for id in &ids {
            store.put(id, WorkflowResult::Success);
        }

        assert_eq!(store.len(), 2);
        assert_eq!(store.get(&ids[0]), None);
        assert_eq!(store.get(&ids[2]), Some(WorkflowResult::Success));

        // A repeated put neither evicts nor replaces.
        store.put(&ids[1], WorkflowResult::unhandled("late"));
        assert_eq!(store.len(), 2);
        assert_eq!(store.get(&ids[1]), Some(WorkflowResult::Success));
    }

    #[test]
    fn random_ids_differ() {
        assert_ne!(InstanceId::random(), InstanceId::random());
    }
}
