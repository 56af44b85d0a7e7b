//! Business telemetry emitted by activities.
//!
//! Events are best effort: a failing [`TelemetrySink`] is logged and ignored,
//! it never changes an activity result.

use parking_lot::Mutex;
use std::collections::BTreeMap;

/// Event name for a successful installation create/update.
pub const EVENT_INSTALLATION_UPSERTED: &str = "api.notifications.installation.upserted";
/// Event name for a successful installation delete.
pub const EVENT_INSTALLATION_DELETED: &str = "api.notifications.installation.deleted";
/// Event name for a delivered (or dry-run skipped) push.
pub const EVENT_PUSH_SENT: &str = "api.messages.notification.push.sent";

/// A named event with string properties.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TelemetryEvent {
    pub name: String,
    pub properties: BTreeMap<String, String>,
}

impl TelemetryEvent {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            properties: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.properties.insert(key.into(), value.to_string());
        self
    }

    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }
}

#[derive(Clone, thiserror::Error, Debug, PartialEq, Eq)]
#[error("telemetry sink failed: {reason}")]
pub struct TelemetryError {
    pub reason: String,
}

pub trait TelemetrySink: Send + Sync {
    /// # Errors
    ///
    /// Returns an error if the event could not be recorded. Callers drop it.
    fn track_event(&self, event: TelemetryEvent) -> Result<(), TelemetryError>;
}

/// Discards every event.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopTelemetry;

impl TelemetrySink for NoopTelemetry {
    fn track_event(&self, _event: TelemetryEvent) -> Result<(), TelemetryError> {
        Ok(())
    }
}

/// Keeps every event in memory.
#[derive(Debug, Default)]
pub struct RecordingTelemetry {
    events: Mutex<Vec<TelemetryEvent>>,
}

impl RecordingTelemetry {
    pub fn events(&self) -> Vec<TelemetryEvent> {
        self.events.lock().clone()
    }
}

impl TelemetrySink for RecordingTelemetry {
    fn track_event(&self, event: TelemetryEvent) -> Result<(), TelemetryError> {
        self.events.lock().push(event);
        Ok(())
    }
}
