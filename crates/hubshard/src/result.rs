use crate::ActivityName;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Terminal outcome of a workflow instance, persisted by the host.
///
/// Once returned it is immutable; it is kept for inspection and dedup but
/// never drives further logic.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum WorkflowResult {
    #[serde(rename = "SUCCESS")]
    Success,

    /// The request failed validation before any backend call.
    #[serde(rename = "FAILURE_INVALID_INPUT")]
    InvalidInput { input: Value, reason: String },

    /// An activity failed for good (retries exhausted, or a non retryable
    /// failure on a transition that treats it as fatal).
    #[serde(rename = "FAILURE_ACTIVITY", rename_all = "camelCase")]
    ActivityFailure {
        activity_name: ActivityName,
        reason: String,
        /// Set when the rollback that followed the failure did not complete.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        compensation: Option<CompensationFailure>,
    },

    /// Anything not covered above.
    #[serde(rename = "FAILURE_UNHANDLED")]
    Unhandled { reason: String },
}

/// A failed compensating write.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompensationFailure {
    pub activity_name: ActivityName,
    pub reason: String,
}

impl WorkflowResult {
    pub fn activity_failure(activity_name: ActivityName, reason: impl Into<String>) -> Self {
        Self::ActivityFailure {
            activity_name,
            reason: reason.into(),
            compensation: None,
        }
    }

    pub fn unhandled(reason: impl Into<String>) -> Self {
        Self::Unhandled {
            reason: reason.into(),
        }
    }

    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    /// The `kind` tag, e.g. for metric labels.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Success => "SUCCESS",
            Self::InvalidInput { .. } => "FAILURE_INVALID_INPUT",
            Self::ActivityFailure { .. } => "FAILURE_ACTIVITY",
            Self::Unhandled { .. } => "FAILURE_UNHANDLED",
        }
    }
}
