use hubshard::InstanceId;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashSet;
use tokio::sync::oneshot;

/// A message for one worker.
#[derive(Debug)]
pub enum WorkRequest {
    /// Run a workflow instance to completion.
    Run { instance_id: InstanceId, input: Value },
    /// Stop after acknowledging on `response`.
    Shutdown { response: oneshot::Sender<()> },
}

/// Instances accepted by the ingress that have no result yet.
#[derive(Debug, Default)]
pub struct Inflight {
    ids: Mutex<HashSet<InstanceId>>,
}

impl Inflight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` if `instance_id` was already in flight.
    pub fn insert(&self, instance_id: InstanceId) -> bool {
        self.ids.lock().insert(instance_id)
    }

    pub fn remove(&self, instance_id: &InstanceId) {
        self.ids.lock().remove(instance_id);
    }

    pub fn contains(&self, instance_id: &InstanceId) -> bool {
        self.ids.lock().contains(instance_id)
    }

    pub fn len(&self) -> usize {
        self.ids.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.lock().is_empty()
    }
}
