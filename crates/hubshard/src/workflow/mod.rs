//! The orchestration workflow.
//!
//! A [`Workflow`] is a deterministic state machine. It never performs I/O:
//! each transition consumes the outcome of the previous activity and yields
//! either the next [`ActivityCall`] or the terminal [`WorkflowResult`]. Given
//! the same input, configuration and sequence of outcomes it always yields
//! the same calls, which is what lets the host replay it from checkpoints.
//!
//! ```text
//! Delete:                Start -> SingleWrite(legacy) -> Done
//! CreateOrUpdate/Notify: Start -> ResolveSubset
//!   inactive:            ResolveSubset -> SingleWrite(legacy) -> Done
//!   active, Notify:      ResolveSubset -> SingleWrite(partition) -> Done
//!   active, Create:      ResolveSubset -> PartitionWrite -> LegacyCleanup -> Done
//!   cleanup failed:      LegacyCleanup -> CompensateLegacyRestore
//!                          -> CompensatePartitionRemove -> Done(failure)
//! ```


use crate::{
    ActivityCall, ActivityFailure, ActivityName, ActivityOutcome, ActivityOutput,
    CompensationFailure, FailureClass, FeatureFlag, NotificationBackendConfig,
    OrchestratorConfig, WorkflowRequest, WorkflowResult,
};
use serde_json::Value;

/// Where a workflow instance currently is.
#[derive(Clone, Debug, PartialEq)]
pub enum WorkflowState {
    /// Nothing has run yet.
    Start,
    /// Waiting for the subset lookup.
    ResolveSubset,
    /// Waiting for the only write of this request.
    SingleWrite { activity: ActivityName },
    /// Waiting for the create/update on the user's partition.
    PartitionWrite { partition: NotificationBackendConfig },
    /// Partition written; waiting for the legacy delete.
    LegacyCleanup { partition: NotificationBackendConfig },
    /// Legacy delete failed; waiting for the legacy re-create.
    CompensateLegacyRestore {
        partition: NotificationBackendConfig,
        original: String,
    },
    /// Legacy restored; waiting for the partition delete.
    CompensatePartitionRemove { original: String },
    Done(WorkflowResult),
}

/// What the host must do next.
#[derive(Clone, Debug, PartialEq)]
pub enum Step {
    Call(ActivityCall),
    Done(WorkflowResult),
}

/// One workflow instance.
#[derive(Debug)]
pub struct Workflow<'a> {
    config: &'a OrchestratorConfig,
    feature_flag: FeatureFlag,
    request: Option<WorkflowRequest>,
    state: WorkflowState,
}

impl<'a> Workflow<'a> {
    /// Creates an instance. The rollout flag is captured here and used for
    /// the whole run.
    pub fn new(config: &'a OrchestratorConfig) -> Self {
        Self {
            config,
            feature_flag: config.feature_flag(),
            request: None,
            state: WorkflowState::Start,
        }
    }

    pub fn state(&self) -> &WorkflowState {
        &self.state
    }

    pub fn request(&self) -> Option<&WorkflowRequest> {
        self.request.as_ref()
    }

    pub fn is_done(&self) -> bool {
        matches!(self.state, WorkflowState::Done(_))
    }

    /// Whether the instance is running the rollback path.
    pub fn is_compensating(&self) -> bool {
        matches!(
            self.state,
            WorkflowState::CompensateLegacyRestore { .. }
                | WorkflowState::CompensatePartitionRemove { .. }
        )
    }

    /// Decodes the input and yields the first step.
    ///
    /// Only the first call decodes; later calls leave the state untouched and
    /// report the final result, or an unhandled failure if still running.
    pub fn start(&mut self, input: &Value) -> Step {
        if self.state != WorkflowState::Start {
            return self.current();
        }
        let (state, step) = match WorkflowRequest::parse(input) {
            Ok(request) => {
                let (state, step) = self.begin(&request);
                self.request = Some(request);
                (state, step)
            }
            Err(invalid) => {
                let result = WorkflowResult::InvalidInput {
                    input: invalid.input,
                    reason: invalid.reason,
                };
                (WorkflowState::Done(result.clone()), Step::Done(result))
            }
        };
        self.enter(state);
        step
    }

    /// Feeds the outcome of the last requested activity and yields the next
    /// step.
    pub fn resume(&mut self, outcome: &ActivityOutcome) -> Step {
        let (state, step) = match (&self.state, &self.request) {
            (WorkflowState::Done(result), _) => return Step::Done(result.clone()),
            (_, None) => {
                let result = WorkflowResult::unhandled("workflow resumed before it was started");
                (WorkflowState::Done(result.clone()), Step::Done(result))
            }
            (state, Some(request)) => self.transition(state, request, outcome),
        };
        self.enter(state);
        step
    }

    fn enter(&mut self, state: WorkflowState) {
        #[cfg(feature = "tracing")]
        match &state {
            WorkflowState::Done(WorkflowResult::Unhandled { reason }) => {
                tracing::error!(%reason, "workflow ended with an unhandled failure");
            }
            WorkflowState::Done(result) => {
                tracing::debug!(kind = result.kind(), "workflow done");
            }
            next => tracing::debug!(from = ?self.state, to = ?next, "workflow transition"),
        }
        self.state = state;
    }

    /// The step matching the current state, without transitioning.
    fn current(&self) -> Step {
        match &self.state {
            WorkflowState::Done(result) => Step::Done(result.clone()),
            _ => Step::Done(WorkflowResult::unhandled("workflow started twice")),
        }
    }

    fn begin(&self, request: &WorkflowRequest) -> (WorkflowState, Step) {
        let legacy = self.config.legacy();
        match request {
            WorkflowRequest::Delete(message) => (
                WorkflowState::SingleWrite {
                    activity: ActivityName::DeleteInstallation,
                },
                Step::Call(ActivityCall::delete(legacy, &message.installation_id)),
            ),
            WorkflowRequest::CreateOrUpdate(_) | WorkflowRequest::Notify(_) => (
                WorkflowState::ResolveSubset,
                Step::Call(ActivityCall::is_user_in_active_subset(
                    self.feature_flag,
                    request.installation_id(),
                )),
            ),
        }
    }

    fn transition(
        &self,
        state: &WorkflowState,
        request: &WorkflowRequest,
        outcome: &ActivityOutcome,
    ) -> (WorkflowState, Step) {
        match (state, outcome) {
            (WorkflowState::Start, _) => {
                done(WorkflowResult::unhandled("activity outcome received before start"))
            }

            (WorkflowState::ResolveSubset, ActivityOutcome::Failure(failure)) => done(
                WorkflowResult::activity_failure(ActivityName::IsUserInActiveSubset, &failure.reason),
            ),
            (
                WorkflowState::ResolveSubset,
                ActivityOutcome::Success {
                    output: ActivityOutput::SubsetMembership { active },
                },
            ) => self.dispatch(request, *active),
            (WorkflowState::ResolveSubset, ActivityOutcome::Success { output }) => done(
                WorkflowResult::unhandled(format!("unexpected subset lookup output {output:?}")),
            ),

            (WorkflowState::SingleWrite { .. }, ActivityOutcome::Success { .. }) => {
                done(WorkflowResult::Success)
            }
            (WorkflowState::SingleWrite { activity }, ActivityOutcome::Failure(failure)) => {
                if matches!(request, WorkflowRequest::Delete(_))
                    && failure.class == FailureClass::Terminal
                {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(reason = %failure.reason, "delete failed, treated as completed");
                    done(WorkflowResult::Success)
                } else {
                    done(WorkflowResult::activity_failure(*activity, &failure.reason))
                }
            }

            (WorkflowState::PartitionWrite { partition }, ActivityOutcome::Success { .. }) => (
                WorkflowState::LegacyCleanup {
                    partition: partition.clone(),
                },
                Step::Call(ActivityCall::delete(
                    self.config.legacy(),
                    request.installation_id(),
                )),
            ),
            // Nothing was written yet, so there is nothing to undo.
            (WorkflowState::PartitionWrite { .. }, ActivityOutcome::Failure(failure)) => done(
                WorkflowResult::activity_failure(
                    ActivityName::CreateOrUpdateInstallation,
                    &failure.reason,
                ),
            ),

            (WorkflowState::LegacyCleanup { .. }, ActivityOutcome::Success { .. }) => {
                done(WorkflowResult::Success)
            }
            (WorkflowState::LegacyCleanup { .. }, ActivityOutcome::Failure(failure))
                if failure.not_found =>
            {
                done(WorkflowResult::Success)
            }
            (WorkflowState::LegacyCleanup { partition }, ActivityOutcome::Failure(failure)) => {
                self.compensate(request, partition, failure)
            }

            (
                WorkflowState::CompensateLegacyRestore {
                    partition,
                    original,
                },
                ActivityOutcome::Success { .. },
            ) => (
                WorkflowState::CompensatePartitionRemove {
                    original: original.clone(),
                },
                Step::Call(ActivityCall::delete(partition, request.installation_id())),
            ),
            (
                WorkflowState::CompensateLegacyRestore {
                    partition,
                    original,
                },
                ActivityOutcome::Failure(failure),
            ) => {
                // Leaving the partition copy in place keeps the user registered
                // somewhere.
                #[cfg(feature = "tracing")]
                tracing::error!(
                    installation_id = %request.installation_id(),
                    partition = %partition.name,
                    reason = %failure.reason,
                    "legacy restore failed, installation left on partition only"
                );
                #[cfg(not(feature = "tracing"))]
                let _ = partition;
                done(compensation_failed(
                    original,
                    ActivityName::CreateOrUpdateInstallation,
                    failure,
                ))
            }

            (WorkflowState::CompensatePartitionRemove { original }, ActivityOutcome::Success { .. }) => {
                done(WorkflowResult::activity_failure(
                    ActivityName::DeleteInstallation,
                    original,
                ))
            }
            (WorkflowState::CompensatePartitionRemove { original }, ActivityOutcome::Failure(failure))
                if failure.not_found =>
            {
                done(WorkflowResult::activity_failure(
                    ActivityName::DeleteInstallation,
                    original,
                ))
            }
            (
                WorkflowState::CompensatePartitionRemove { original },
                ActivityOutcome::Failure(failure),
            ) => {
                #[cfg(feature = "tracing")]
                tracing::error!(
                    installation_id = %request.installation_id(),
                    reason = %failure.reason,
                    "partition rollback failed, installation present on legacy and partition"
                );
                done(compensation_failed(
                    original,
                    ActivityName::DeleteInstallation,
                    failure,
                ))
            }

            (WorkflowState::Done(result), _) => (
                WorkflowState::Done(result.clone()),
                Step::Done(result.clone()),
            ),
        }
    }

    /// Picks the backend for a resolved subset membership.
    fn dispatch(&self, request: &WorkflowRequest, active: bool) -> (WorkflowState, Step) {
        let legacy = self.config.legacy();
        let installation_id = request.installation_id();

        if !active {
            let call = match request {
                WorkflowRequest::CreateOrUpdate(m) => {
                    ActivityCall::create_or_update(legacy, installation_id, &m.registration)
                }
                WorkflowRequest::Notify(m) => ActivityCall::notify(legacy, installation_id, &m.payload),
                WorkflowRequest::Delete(_) => ActivityCall::delete(legacy, installation_id),
            };
            return (
                WorkflowState::SingleWrite {
                    activity: call.name(),
                },
                Step::Call(call),
            );
        }

        let partition = match self.config.partitions().route(installation_id) {
            Ok(partition) => partition,
            Err(e) => return done(WorkflowResult::unhandled(e.to_string())),
        };
        match request {
            WorkflowRequest::CreateOrUpdate(m) => (
                WorkflowState::PartitionWrite {
                    partition: partition.clone(),
                },
                Step::Call(ActivityCall::create_or_update(
                    partition,
                    installation_id,
                    &m.registration,
                )),
            ),
            WorkflowRequest::Notify(m) => (
                WorkflowState::SingleWrite {
                    activity: ActivityName::NotifyInstallation,
                },
                Step::Call(ActivityCall::notify(partition, installation_id, &m.payload)),
            ),
            // Deletes only ever target legacy.
            WorkflowRequest::Delete(_) => (
                WorkflowState::SingleWrite {
                    activity: ActivityName::DeleteInstallation,
                },
                Step::Call(ActivityCall::delete(legacy, installation_id)),
            ),
        }
    }

    fn compensate(
        &self,
        request: &WorkflowRequest,
        partition: &NotificationBackendConfig,
        failure: &ActivityFailure,
    ) -> (WorkflowState, Step) {
        let WorkflowRequest::CreateOrUpdate(message) = request else {
            return done(WorkflowResult::unhandled(
                "legacy cleanup reached for a request that does not write",
            ));
        };
        #[cfg(feature = "tracing")]
        tracing::error!(
            installation_id = %message.installation_id,
            partition = %partition.name,
            reason = %failure.reason,
            "legacy cleanup failed, rolling back"
        );
        (
            WorkflowState::CompensateLegacyRestore {
                partition: partition.clone(),
                original: failure.reason.clone(),
            },
            Step::Call(ActivityCall::create_or_update(
                self.config.legacy(),
                &message.installation_id,
                &message.registration,
            )),
        )
    }
}

fn done(result: WorkflowResult) -> (WorkflowState, Step) {
    (WorkflowState::Done(result.clone()), Step::Done(result))
}

fn compensation_failed(
    original: &str,
    activity_name: ActivityName,
    failure: &ActivityFailure,
) -> WorkflowResult {
    WorkflowResult::ActivityFailure {
        activity_name: ActivityName::DeleteInstallation,
        reason: original.to_string(),
        compensation: Some(CompensationFailure {
            activity_name,
            reason: failure.reason.clone(),
        }),
    }
}
