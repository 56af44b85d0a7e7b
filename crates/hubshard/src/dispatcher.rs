use crate::{InstanceId, RequestKind, ResultStore, WorkflowHost, WorkflowResult};
use serde_json::Value;
use std::sync::Arc;

/// Entry point for inbound events.
///
/// Every request kind is handled by the same workflow; the dispatcher adds
/// dedup by instance id and persists the terminal result.
#[derive(Clone)]
pub struct Dispatcher {
    host: WorkflowHost,
    results: Arc<dyn ResultStore>,
}

impl Dispatcher {
    pub fn new(host: WorkflowHost, results: Arc<dyn ResultStore>) -> Self {
        Self { host, results }
    }

    pub fn host(&self) -> &WorkflowHost {
        &self.host
    }

    /// Stored result of `instance_id`, if it finished.
    pub fn result(&self, instance_id: &InstanceId) -> Option<WorkflowResult> {
        self.results.get(instance_id)
    }

    /// Runs `input` as instance `instance_id`.
    ///
    /// An instance that already has a result is not run again; the stored
    /// result is returned instead.
    pub async fn dispatch(&self, instance_id: &InstanceId, input: &Value) -> WorkflowResult {
        if let Some(result) = self.results.get(instance_id) {
            #[cfg(feature = "tracing")]
            tracing::debug!(%instance_id, "instance already completed");
            return result;
        }

        #[cfg(feature = "tracing")]
        tracing::debug!(
            %instance_id,
            kind = ?request_kind(input),
            "dispatching workflow"
        );
        let result = self.host.run(instance_id, input).await;
        self.complete(instance_id, result)
    }

    /// Persists the terminal result of `instance_id` and drops its history.
    /// Returns the stored result, which is the earlier one if the instance
    /// had already completed.
    pub fn complete(&self, instance_id: &InstanceId, result: WorkflowResult) -> WorkflowResult {
        let stored = self.results.put(instance_id, result);
        self.host.history().remove(instance_id);
        #[cfg(feature = "tracing")]
        tracing::info!(%instance_id, kind = stored.kind(), "workflow completed");
        stored
    }
}

/// Reads the `kind` tag of a raw request without validating the rest.
pub fn request_kind(input: &Value) -> Option<RequestKind> {
    match input.get("kind")?.as_str()? {
        "CreateOrUpdateInstallation" | "CreateOrUpdate" => Some(RequestKind::CreateOrUpdate),
        "DeleteInstallation" | "Delete" => Some(RequestKind::Delete),
        "Notify" => Some(RequestKind::Notify),
        _ => None,
    }
}
