//! Glue between engine hooks and the process telemetry.

use crate::server::telemetry::{
    increment_activity_attempts, increment_activity_retries, increment_compensations,
    increment_telemetry_events,
};
use core::time::Duration;
use hubshard::{
    ActivityCall, ActivityOutcome, HostObserver, InstanceId, TelemetryError, TelemetryEvent,
    TelemetrySink,
};

/// Writes business events as structured log records and counts them.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingTelemetrySink;

impl TelemetrySink for TracingTelemetrySink {
    fn track_event(&self, event: TelemetryEvent) -> Result<(), TelemetryError> {
        #[cfg(feature = "tracing")]
        tracing::info!(
            event = %event.name,
            properties = ?event.properties,
            "telemetry event"
        );
        increment_telemetry_events(&event.name);
        Ok(())
    }
}

/// Feeds activity attempts, retries and compensations into metrics.
#[derive(Clone, Copy, Debug, Default)]
pub struct MetricsObserver;

impl HostObserver for MetricsObserver {
    fn activity_attempted(&self, call: &ActivityCall, outcome: &ActivityOutcome) {
        let status = if outcome.is_success() {
            "success"
        } else {
            "failure"
        };
        increment_activity_attempts(call.name().as_str(), status);
    }

    fn activity_retry_scheduled(&self, call: &ActivityCall, _attempt: u32, _delay: Duration) {
        increment_activity_retries(call.name().as_str());
    }

    fn compensation_started(&self, _instance_id: &InstanceId) {
        increment_compensations();
    }
}
