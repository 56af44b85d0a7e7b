//! The activity layer.
//!
//! An activity is one idempotent unit of backend work. The workflow never
//! performs I/O itself: it describes the work as an [`ActivityCall`], the host
//! runs it through an [`ActivityRunner`] and feeds the resulting
//! [`ActivityOutcome`] back. Both halves are serializable so that the host can
//! checkpoint them and replay outcomes verbatim.
//!
//! Failures are values, classified once here:
//!
//! | Operation           | Failure class                          |
//! |---------------------|----------------------------------------|
//! | create/update       | [`FailureClass::Retryable`]            |
//! | send (notify)       | [`FailureClass::Retryable`]            |
//! | subset lookup       | [`FailureClass::Retryable`]            |
//! | delete              | [`FailureClass::Terminal`]             |
//! | malformed input     | [`FailureClass::InvalidInput`]         |


mod runner;

pub use runner::*;

use crate::{
    BackendOperation, FeatureFlag, InstallationId, NotificationBackendConfig, NotifyPayload,
    Registration,
};
use core::fmt;
use serde::{Deserialize, Serialize};

/// Name of an activity, as reported in failures.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActivityName {
    #[serde(rename = "CreateOrUpdateInstallationActivity")]
    CreateOrUpdateInstallation,
    #[serde(rename = "DeleteInstallationActivity")]
    DeleteInstallation,
    #[serde(rename = "NotifyInstallationActivity")]
    NotifyInstallation,
    #[serde(rename = "IsUserInActiveSubsetActivity")]
    IsUserInActiveSubset,
}

impl ActivityName {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::CreateOrUpdateInstallation => "CreateOrUpdateInstallationActivity",
            Self::DeleteInstallation => "DeleteInstallationActivity",
            Self::NotifyInstallation => "NotifyInstallationActivity",
            Self::IsUserInActiveSubset => "IsUserInActiveSubsetActivity",
        }
    }
}

impl fmt::Display for ActivityName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A unit of work requested by the workflow.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "activity", rename_all_fields = "camelCase")]
pub enum ActivityCall {
    CreateOrUpdateInstallation {
        backend: NotificationBackendConfig,
        installation_id: InstallationId,
        registration: Registration,
    },
    DeleteInstallation {
        backend: NotificationBackendConfig,
        installation_id: InstallationId,
    },
    NotifyInstallation {
        backend: NotificationBackendConfig,
        installation_id: InstallationId,
        payload: NotifyPayload,
    },
    IsUserInActiveSubset {
        feature_flag: FeatureFlag,
        installation_id: InstallationId,
    },
}

impl ActivityCall {
    pub fn create_or_update(
        backend: &NotificationBackendConfig,
        installation_id: &InstallationId,
        registration: &Registration,
    ) -> Self {
        Self::CreateOrUpdateInstallation {
            backend: backend.clone(),
            installation_id: installation_id.clone(),
            registration: registration.clone(),
        }
    }

    pub fn delete(backend: &NotificationBackendConfig, installation_id: &InstallationId) -> Self {
        Self::DeleteInstallation {
            backend: backend.clone(),
            installation_id: installation_id.clone(),
        }
    }

    pub fn notify(
        backend: &NotificationBackendConfig,
        installation_id: &InstallationId,
        payload: &NotifyPayload,
    ) -> Self {
        Self::NotifyInstallation {
            backend: backend.clone(),
            installation_id: installation_id.clone(),
            payload: payload.clone(),
        }
    }

    pub fn is_user_in_active_subset(
        feature_flag: FeatureFlag,
        installation_id: &InstallationId,
    ) -> Self {
        Self::IsUserInActiveSubset {
            feature_flag,
            installation_id: installation_id.clone(),
        }
    }

    pub const fn name(&self) -> ActivityName {
        match self {
            Self::CreateOrUpdateInstallation { .. } => ActivityName::CreateOrUpdateInstallation,
            Self::DeleteInstallation { .. } => ActivityName::DeleteInstallation,
            Self::NotifyInstallation { .. } => ActivityName::NotifyInstallation,
            Self::IsUserInActiveSubset { .. } => ActivityName::IsUserInActiveSubset,
        }
    }

    /// Backend operation performed by this call, if any.
    pub const fn operation(&self) -> Option<BackendOperation> {
        match self {
            Self::CreateOrUpdateInstallation { .. } => Some(BackendOperation::CreateOrUpdate),
            Self::DeleteInstallation { .. } => Some(BackendOperation::Delete),
            Self::NotifyInstallation { .. } => Some(BackendOperation::Send),
            Self::IsUserInActiveSubset { .. } => None,
        }
    }

    pub fn backend(&self) -> Option<&NotificationBackendConfig> {
        match self {
            Self::CreateOrUpdateInstallation { backend, .. }
            | Self::DeleteInstallation { backend, .. }
            | Self::NotifyInstallation { backend, .. } => Some(backend),
            Self::IsUserInActiveSubset { .. } => None,
        }
    }

    pub fn installation_id(&self) -> &InstallationId {
        match self {
            Self::CreateOrUpdateInstallation {
                installation_id, ..
            }
            | Self::DeleteInstallation {
                installation_id, ..
            }
            | Self::NotifyInstallation {
                installation_id, ..
            }
            | Self::IsUserInActiveSubset {
                installation_id, ..
            } => installation_id,
        }
    }

    /// Checks the semantic constraints serde cannot express.
    ///
    /// # Errors
    ///
    /// Returns a readable reason for the first violated constraint.
    pub fn validate(&self) -> Result<(), String> {
        if let Some(backend) = self.backend() {
            backend.validate().map_err(|e| e.to_string())?;
        }
        match self {
            Self::CreateOrUpdateInstallation { registration, .. }
                if registration.push_channel.trim().is_empty() =>
            {
                Err("pushChannel must not be empty".to_string())
            }
            Self::NotifyInstallation { payload, .. } if payload.message_id.trim().is_empty() => {
                Err("payload.message_id must not be empty".to_string())
            }
            _ => Ok(()),
        }
    }
}

/// How a failed activity must be treated by its caller.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FailureClass {
    /// Transient; the host retries under the configured policy.
    Retryable,
    /// Final; never retried.
    Terminal,
    /// The input failed validation before any backend call.
    InvalidInput,
}

/// A failed activity.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityFailure {
    pub class: FailureClass,
    pub reason: String,
    /// The backend reported that the installation does not exist.
    #[serde(default)]
    pub not_found: bool,
}

/// Value produced by a successful activity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ActivityOutput {
    /// The backend operation was performed.
    Completed,
    /// The operation was deliberately not performed (notification dry run).
    Skipped,
    /// Answer of the subset lookup.
    SubsetMembership { active: bool },
}

/// Tagged result of one activity run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum ActivityOutcome {
    Success { output: ActivityOutput },
    Failure(ActivityFailure),
}

impl ActivityOutcome {
    pub const fn success(output: ActivityOutput) -> Self {
        Self::Success { output }
    }

    pub fn failure(class: FailureClass, reason: impl Into<String>) -> Self {
        Self::Failure(ActivityFailure {
            class,
            reason: reason.into(),
            not_found: false,
        })
    }

    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn output(&self) -> Option<ActivityOutput> {
        match self {
            Self::Success { output } => Some(*output),
            Self::Failure(_) => None,
        }
    }

    /// Whether the host should try again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Failure(f) if f.class == FailureClass::Retryable)
    }
}
