//! Inbound workflow requests.
//!
//! One [`WorkflowRequest`] arrives per event. Raw JSON is turned into a typed
//! request by a single validating parse, [`WorkflowRequest::parse`]; nothing
//! past this point handles partially typed values.

use crate::{InstallationId, NotifyPayload, Registration};
use core::fmt;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Create or refresh a device registration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrUpdateMessage {
    pub installation_id: InstallationId,
    #[serde(flatten)]
    pub registration: Registration,
}

/// Remove a device registration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteMessage {
    pub installation_id: InstallationId,
}

/// Push a notification to a device.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotifyMessage {
    pub installation_id: InstallationId,
    pub payload: NotifyPayload,
}

/// A request, tagged by `kind`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum WorkflowRequest {
    #[serde(rename = "CreateOrUpdateInstallation", alias = "CreateOrUpdate")]
    CreateOrUpdate(CreateOrUpdateMessage),
    #[serde(rename = "DeleteInstallation", alias = "Delete")]
    Delete(DeleteMessage),
    #[serde(rename = "Notify")]
    Notify(NotifyMessage),
}

/// Kind of a [`WorkflowRequest`], without its payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RequestKind {
    CreateOrUpdate,
    Delete,
    Notify,
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::CreateOrUpdate => "CreateOrUpdateInstallation",
            Self::Delete => "DeleteInstallation",
            Self::Notify => "Notify",
        })
    }
}

/// A raw input that failed validation, echoed back verbatim.
#[derive(Clone, thiserror::Error, Debug, PartialEq)]
#[error("invalid request: {reason}")]
pub struct InvalidRequest {
    pub input: Value,
    pub reason: String,
}

impl WorkflowRequest {
    /// Decodes and validates a raw request.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidRequest`] carrying the original input when the shape
    /// is wrong or a field is semantically invalid.
    pub fn parse(input: &Value) -> Result<Self, InvalidRequest> {
        let invalid = |reason: String| InvalidRequest {
            input: input.clone(),
            reason,
        };
        let request: Self = serde_json::from_value(input.clone()).map_err(|e| invalid(e.to_string()))?;
        request.validate().map_err(|reason| invalid(reason.to_string()))?;
        Ok(request)
    }

    fn validate(&self) -> Result<(), &'static str> {
        match self {
            Self::CreateOrUpdate(m) if m.registration.push_channel.trim().is_empty() => {
                Err("pushChannel must not be empty")
            }
            Self::Notify(m) if m.payload.message_id.trim().is_empty() => {
                Err("payload.message_id must not be empty")
            }
            _ => Ok(()),
        }
    }

    pub fn kind(&self) -> RequestKind {
        match self {
            Self::CreateOrUpdate(_) => RequestKind::CreateOrUpdate,
            Self::Delete(_) => RequestKind::Delete,
            Self::Notify(_) => RequestKind::Notify,
        }
    }

    pub fn installation_id(&self) -> &InstallationId {
        match self {
            Self::CreateOrUpdate(m) => &m.installation_id,
            Self::Delete(m) => &m.installation_id,
            Self::Notify(m) => &m.installation_id,
        }
    }
}
