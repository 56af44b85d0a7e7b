use crate::server::{
    pool::request::{Inflight, WorkRequest},
    telemetry::{decrement_workflows_inflight, increment_workflow_results, record_workflow_duration},
};
use hubshard::{Dispatcher, InstanceId, WorkflowResult};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Worker task processing [`WorkRequest`] messages until shut down.
///
/// Instances run one at a time. Each is spawned as its own task so that a
/// panic inside the engine or a backend client is caught here and persisted
/// as `FAILURE_UNHANDLED` instead of taking the worker down. Instances still
/// queued once `shutdown_token` is cancelled are dropped unstarted.
pub async fn worker_loop(
    worker_id: usize,
    mut rx: mpsc::Receiver<WorkRequest>,
    dispatcher: Dispatcher,
    inflight: Arc<Inflight>,
    shutdown_token: CancellationToken,
) {
    #[cfg(feature = "tracing")]
    tracing::trace!("Worker {worker_id} started");

    while let Some(work) = rx.recv().await {
        match work {
            WorkRequest::Run { instance_id, input } => {
                if shutdown_token.is_cancelled() {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(%instance_id, "Worker {worker_id} dropping instance during shutdown");
                } else {
                    run_instance(worker_id, &dispatcher, &instance_id, input).await;
                }
                inflight.remove(&instance_id);
                decrement_workflows_inflight();
            }
            WorkRequest::Shutdown { response } => {
                #[cfg(feature = "tracing")]
                tracing::debug!("Worker {worker_id} received shutdown signal");

                if response.send(()).is_err() {
                    #[cfg(feature = "tracing")]
                    tracing::error!("Worker {worker_id} failed to acknowledge shutdown");
                }
                break;
            }
        }
    }

    #[cfg(feature = "tracing")]
    tracing::trace!("Worker {worker_id} stopped");
}

async fn run_instance(
    _worker_id: usize,
    dispatcher: &Dispatcher,
    instance_id: &InstanceId,
    input: Value,
) -> WorkflowResult {
    let start = std::time::Instant::now();

    let fut = {
        let dispatcher = dispatcher.clone();
        let instance_id = instance_id.clone();
        async move { dispatcher.dispatch(&instance_id, &input).await }
    };
    #[cfg(feature = "tracing")]
    let fut = {
        use tracing::Instrument;
        let span = tracing::info_span!("workflow", %instance_id, worker_id = _worker_id);
        fut.instrument(span)
    };

    let result = match tokio::spawn(fut).await {
        Ok(result) => result,
        Err(e) => {
            #[cfg(feature = "tracing")]
            tracing::error!(%instance_id, "Workflow task failed: {e}");
            dispatcher.complete(
                instance_id,
                WorkflowResult::unhandled(format!("workflow task failed: {e}")),
            )
        }
    };

    increment_workflow_results(result.kind());
    record_workflow_duration(start.elapsed().as_millis() as f64);
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use hubshard::{
        ActivityRunner, BackendError, BackendProvider, FeatureFlag, InstallationBackend,
        MemoryHistoryStore, MemoryResultStore, NoopTelemetry, NotificationBackendConfig,
        OrchestratorConfig, PartitionSpec, PartitionTable, RetryPolicy, StaticBetaUsers,
        WorkflowHost,
    };
    use serde_json::json;
    use tokio::sync::oneshot;

    struct PanickingProvider;

    impl BackendProvider for PanickingProvider {
        fn backend(
            &self,
            _config: &NotificationBackendConfig,
        ) -> Result<Arc<dyn InstallationBackend>, BackendError> {
            panic!("backend client exploded");
        }
    }

    fn dispatcher(backends: Arc<dyn BackendProvider>) -> Dispatcher {
        let partitions = PartitionTable::new(&[PartitionSpec {
            partition_regex: "^[0-9a-f]".into(),
            name: "nh1".into(),
            endpoint: "sb://nh1".into(),
        }])
        .unwrap();
        let config = OrchestratorConfig::new(
            NotificationBackendConfig::new("legacy", "sb://legacy").unwrap(),
            partitions,
            FeatureFlag::None,
            None,
            RetryPolicy::no_retry(),
        )
        .unwrap();
        let runner = ActivityRunner::new(
            Arc::new(config),
            backends,
            Arc::new(StaticBetaUsers::default()),
            Arc::new(NoopTelemetry),
        );
        let host = WorkflowHost::new(runner, Arc::new(MemoryHistoryStore::new()));
        Dispatcher::new(host, Arc::new(MemoryResultStore::new()))
    }

    async fn run_one(dispatcher: Dispatcher, instance_id: &InstanceId) {
        let (tx, rx) = mpsc::channel(4);
        let inflight = Arc::new(Inflight::new());
        inflight.insert(instance_id.clone());
        let worker = tokio::spawn(worker_loop(
            0,
            rx,
            dispatcher,
            Arc::clone(&inflight),
            CancellationToken::new(),
        ));

        tx.send(WorkRequest::Run {
            instance_id: instance_id.clone(),
            input: json!({
                "kind": "CreateOrUpdateInstallation",
                "installationId": "0abc",
                "platform": "gcm",
                "pushChannel": "token"
            }),
        })
        .await
        .unwrap();
        let (ack_tx, ack_rx) = oneshot::channel();
        tx.send(WorkRequest::Shutdown { response: ack_tx })
            .await
            .unwrap();

        ack_rx.await.unwrap();
        worker.await.unwrap();
        assert!(inflight.is_empty());
    }

    #[tokio::test]
    async fn panicking_instance_is_persisted_as_unhandled() {
        let dispatcher = dispatcher(Arc::new(PanickingProvider));
        let instance_id = InstanceId::new("panics");

        run_one(dispatcher.clone(), &instance_id).await;

        match dispatcher.result(&instance_id) {
            Some(WorkflowResult::Unhandled { reason }) => {
                assert!(reason.contains("workflow task failed"), "{reason}");
            }
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[tokio::test]
    async fn completed_instance_is_persisted() {
        let dispatcher = dispatcher(Arc::new(hubshard::MemoryBackendProvider::new()));
        let instance_id = InstanceId::new("ok");

        run_one(dispatcher.clone(), &instance_id).await;

        assert_eq!(dispatcher.result(&instance_id), Some(WorkflowResult::Success));
    }

    #[tokio::test]
    async fn cancelled_worker_drops_queued_instances() {
        let dispatcher = dispatcher(Arc::new(hubshard::MemoryBackendProvider::new()));
        let (tx, rx) = mpsc::channel(4);
        let inflight = Arc::new(Inflight::new());
        let token = CancellationToken::new();
        token.cancel();
        let instance_id = InstanceId::new("late");
        inflight.insert(instance_id.clone());

        tx.send(WorkRequest::Run {
            instance_id: instance_id.clone(),
            input: json!({ "kind": "Notify" }),
        })
        .await
        .unwrap();
        drop(tx);
        worker_loop(0, rx, dispatcher.clone(), Arc::clone(&inflight), token).await;

        assert!(inflight.is_empty());
        assert_eq!(dispatcher.result(&instance_id), None);
    }
}
