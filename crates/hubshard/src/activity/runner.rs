use crate::{
    ActivityCall, ActivityFailure, ActivityOutcome, ActivityOutput, BackendError,
    BackendOperation, BackendProvider, BetaUserLookup, BetaUsers, FailureClass, FeatureFlag,
    InstallationId, NotificationBackendConfig, OrchestratorConfig, TelemetryEvent, TelemetrySink,
    EVENT_INSTALLATION_DELETED, EVENT_INSTALLATION_UPSERTED, EVENT_PUSH_SENT,
};
use serde_json::Value;
use std::sync::Arc;
#[cfg(feature = "tracing")]
use tracing::instrument;

/// Executes [`ActivityCall`]s against the backend collaborators.
///
/// Each run performs at most one backend operation and always returns an
/// [`ActivityOutcome`]; backend errors never escape as `Err`.
#[derive(Clone)]
pub struct ActivityRunner {
    config: Arc<OrchestratorConfig>,
    backends: Arc<dyn BackendProvider>,
    beta_users: Arc<dyn BetaUserLookup>,
    telemetry: Arc<dyn TelemetrySink>,
}

impl ActivityRunner {
    pub fn new(
        config: Arc<OrchestratorConfig>,
        backends: Arc<dyn BackendProvider>,
        beta_users: Arc<dyn BetaUserLookup>,
        telemetry: Arc<dyn TelemetrySink>,
    ) -> Self {
        Self {
            config,
            backends,
            beta_users,
            telemetry,
        }
    }

    pub fn config(&self) -> &Arc<OrchestratorConfig> {
        &self.config
    }

    pub fn backends(&self) -> &Arc<dyn BackendProvider> {
        &self.backends
    }

    /// Decodes a raw activity input, then runs it.
    ///
    /// Input that does not decode is reported as
    /// [`FailureClass::InvalidInput`] without touching any backend.
    pub async fn run_input(&self, input: &Value) -> ActivityOutcome {
        match serde_json::from_value::<ActivityCall>(input.clone()) {
            Ok(call) => self.run(&call).await,
            Err(e) => ActivityOutcome::failure(FailureClass::InvalidInput, e.to_string()),
        }
    }

    /// Runs one activity attempt.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "debug", skip_all, fields(activity = %call.name(), installation_id = %call.installation_id()))
    )]
    pub async fn run(&self, call: &ActivityCall) -> ActivityOutcome {
        if let Err(reason) = call.validate() {
            #[cfg(feature = "tracing")]
            tracing::warn!(%reason, "activity input rejected");
            return ActivityOutcome::failure(FailureClass::InvalidInput, reason);
        }

        let (backend, operation) = match call {
            ActivityCall::IsUserInActiveSubset {
                feature_flag,
                installation_id,
            } => return self.is_user_in_active_subset(*feature_flag, installation_id).await,
            ActivityCall::CreateOrUpdateInstallation { backend, .. } => {
                (backend, BackendOperation::CreateOrUpdate)
            }
            ActivityCall::DeleteInstallation { backend, .. } => (backend, BackendOperation::Delete),
            ActivityCall::NotifyInstallation { backend, .. } => (backend, BackendOperation::Send),
        };

        match self.invoke(call, backend).await {
            Ok(output) => {
                self.track(Self::event(call, backend, output));
                ActivityOutcome::success(output)
            }
            Err(error) => {
                let class = match operation {
                    // The record may already be gone; retrying cannot help.
                    BackendOperation::Delete => FailureClass::Terminal,
                    BackendOperation::CreateOrUpdate | BackendOperation::Send => {
                        FailureClass::Retryable
                    }
                };
                #[cfg(feature = "tracing")]
                tracing::warn!(backend = %backend.name, %operation, ?class, %error, "backend call failed");
                ActivityOutcome::Failure(ActivityFailure {
                    class,
                    reason: error.to_string(),
                    not_found: error.is_not_found(),
                })
            }
        }
    }

    async fn invoke(
        &self,
        call: &ActivityCall,
        backend: &NotificationBackendConfig,
    ) -> Result<ActivityOutput, BackendError> {
        if let ActivityCall::NotifyInstallation {
            installation_id, ..
        } = call
        {
            if self.config.is_blacklisted(installation_id) {
                #[cfg(feature = "tracing")]
                tracing::info!(%installation_id, "blacklisted installation, notification skipped");
                return Ok(ActivityOutput::Skipped);
            }
        }

        let client = self.backends.backend(backend)?;
        match call {
            ActivityCall::CreateOrUpdateInstallation {
                installation_id,
                registration,
                ..
            } => client.create_or_update(installation_id, registration).await?,
            ActivityCall::DeleteInstallation {
                installation_id, ..
            } => client.delete(installation_id).await?,
            ActivityCall::NotifyInstallation {
                installation_id,
                payload,
                ..
            } => client.send(installation_id, payload).await?,
            ActivityCall::IsUserInActiveSubset { .. } => {}
        }
        Ok(ActivityOutput::Completed)
    }

    async fn is_user_in_active_subset(
        &self,
        feature_flag: FeatureFlag,
        installation_id: &InstallationId,
    ) -> ActivityOutcome {
        // The table is only read when it matters, and never cached.
        let beta_users = if feature_flag == FeatureFlag::Beta {
            match self.beta_users.beta_users().await {
                Ok(users) => users,
                Err(error) => {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(%error, "beta user lookup failed");
                    return ActivityOutcome::failure(FailureClass::Retryable, error.to_string());
                }
            }
        } else {
            BetaUsers::default()
        };
        let active = self
            .config
            .resolver()
            .is_active(feature_flag, installation_id, &beta_users);
        ActivityOutcome::success(ActivityOutput::SubsetMembership { active })
    }

    fn event(
        call: &ActivityCall,
        backend: &NotificationBackendConfig,
        output: ActivityOutput,
    ) -> TelemetryEvent {
        let name = match call {
            ActivityCall::DeleteInstallation { .. } => EVENT_INSTALLATION_DELETED,
            ActivityCall::NotifyInstallation { .. } => EVENT_PUSH_SENT,
            _ => EVENT_INSTALLATION_UPSERTED,
        };
        let mut event = TelemetryEvent::new(name)
            .with("installationId", call.installation_id())
            .with("backend", &backend.name);
        if let Some(operation) = call.operation() {
            event = event.with("operation", operation);
        }
        if let ActivityCall::NotifyInstallation { payload, .. } = call {
            event = event
                .with("messageId", &payload.message_id)
                .with("dryRun", output == ActivityOutput::Skipped);
        }
        event
    }

    /// Best effort: sink failures are logged and dropped.
    fn track(&self, event: TelemetryEvent) {
        if let Err(error) = self.telemetry.track_event(event) {
            #[cfg(feature = "tracing")]
            tracing::warn!(%error, "telemetry event dropped");
            #[cfg(not(feature = "tracing"))]
            let _ = error;
        }
    }
}
