//! Replay driver.
//!
//! [`WorkflowHost`] drives a [`Workflow`] to completion. Before running an
//! activity it looks at the instance's
//! [`ExecutionHistory`](crate::ExecutionHistory): checkpointed
//! outcomes are fed back verbatim instead of calling the backend again, so a
//! restarted instance resumes where it stopped. Only new activities are
//! executed, each under the configured [`RetryPolicy`](crate::RetryPolicy),
//! and their outcome is checkpointed before the workflow sees it.

use crate::{
    ActivityCall, ActivityOutcome, ActivityRunner, Checkpoint, HistoryStore, InstanceId,
    OrchestratorConfig, Step, Workflow, WorkflowResult,
};
use core::time::Duration;
use serde_json::Value;
use std::sync::Arc;
#[cfg(feature = "tracing")]
use tracing::instrument;

/// Hooks for host events. Every method defaults to doing nothing.
pub trait HostObserver: Send + Sync {
    /// One activity attempt finished.
    fn activity_attempted(&self, _call: &ActivityCall, _outcome: &ActivityOutcome) {}

    /// A retryable failure will be retried after `delay`.
    fn activity_retry_scheduled(&self, _call: &ActivityCall, _attempt: u32, _delay: Duration) {}

    /// A workflow entered its rollback path.
    fn compensation_started(&self, _instance_id: &InstanceId) {}
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NoopObserver;

impl HostObserver for NoopObserver {}

#[derive(Clone)]
pub struct WorkflowHost {
    config: Arc<OrchestratorConfig>,
    runner: ActivityRunner,
    history: Arc<dyn HistoryStore>,
    observer: Arc<dyn HostObserver>,
}

impl WorkflowHost {
    pub fn new(runner: ActivityRunner, history: Arc<dyn HistoryStore>) -> Self {
        Self {
            config: Arc::clone(runner.config()),
            runner,
            history,
            observer: Arc::new(NoopObserver),
        }
    }

    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn HostObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn runner(&self) -> &ActivityRunner {
        &self.runner
    }

    pub fn history(&self) -> &Arc<dyn HistoryStore> {
        &self.history
    }

    /// Runs (or resumes) instance `instance_id` on `input` until it is done.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "debug", skip_all, fields(instance_id = %instance_id))
    )]
    pub async fn run(&self, instance_id: &InstanceId, input: &Value) -> WorkflowResult {
        let history = self.history.load(instance_id);
        let mut workflow = Workflow::new(&self.config);
        let mut step = workflow.start(input);
        let mut replayed = 0;

        loop {
            let call = match step {
                Step::Done(result) => {
                    if replayed < history.len() {
                        return replay_mismatch(format!(
                            "non-deterministic replay: workflow finished after {replayed} of {} checkpoints",
                            history.len()
                        ));
                    }
                    return result;
                }
                Step::Call(call) => call,
            };

            let fresh = replayed >= history.len();
            let outcome = if let Some(checkpoint) = history.get(replayed) {
                if checkpoint.call != call {
                    return replay_mismatch(format!(
                        "non-deterministic replay at step {replayed}: expected {}, workflow asked for {}",
                        checkpoint.call.name(),
                        call.name()
                    ));
                }
                replayed += 1;
                #[cfg(feature = "tracing")]
                tracing::debug!(activity = %call.name(), "replaying checkpoint");
                checkpoint.outcome.clone()
            } else {
                let (outcome, attempts) = self.execute(&call).await;
                self.history.append(
                    instance_id,
                    Checkpoint {
                        call,
                        outcome: outcome.clone(),
                        attempts,
                    },
                );
                outcome
            };

            let was_compensating = workflow.is_compensating();
            step = workflow.resume(&outcome);
            if fresh && !was_compensating && workflow.is_compensating() {
                self.observer.compensation_started(instance_id);
            }
        }
    }

    /// Runs `call` until it succeeds, fails for good, or the attempt ceiling
    /// is reached. Returns the last outcome and the number of attempts.
    async fn execute(&self, call: &ActivityCall) -> (ActivityOutcome, u32) {
        let policy = self.config.retry();
        let mut attempt = 1;
        loop {
            let outcome = self.runner.run(call).await;
            self.observer.activity_attempted(call, &outcome);
            if !outcome.is_retryable() {
                return (outcome, attempt);
            }
            let Some(delay) = policy.delay_after(attempt) else {
                #[cfg(feature = "tracing")]
                tracing::warn!(activity = %call.name(), attempts = attempt, "retries exhausted");
                return (outcome, attempt);
            };
            #[cfg(feature = "tracing")]
            tracing::debug!(activity = %call.name(), attempt, ?delay, "retrying activity");
            self.observer.activity_retry_scheduled(call, attempt, delay);
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

fn replay_mismatch(reason: String) -> WorkflowResult {
    #[cfg(feature = "tracing")]
    tracing::error!(%reason, "execution history does not match the workflow");
    WorkflowResult::unhandled(reason)
}
