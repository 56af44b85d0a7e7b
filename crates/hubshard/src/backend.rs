//! The installation backend capability.
//!
//! A backend is one push-notification hub instance holding installation
//! records. The orchestration engine only ever talks to it through
//! [`InstallationBackend`]; concrete SDK bindings are supplied by the host via
//! a [`BackendProvider`].

use crate::{InstallationId, NotificationBackendConfig, NotifyPayload, Registration};
use async_trait::async_trait;
use core::fmt;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Failure reported by a backend call.
#[derive(Clone, thiserror::Error, Debug, PartialEq, Eq)]
pub enum BackendError {
    /// The installation does not exist on this backend.
    #[error("installation not found")]
    NotFound,

    /// The backend refused the request.
    #[error("rejected by backend: {message}")]
    Rejected { message: String },

    /// Transport failure or backend unavailable.
    #[error("backend unavailable: {message}")]
    Unavailable { message: String },

    /// The provider has no client for the requested backend.
    #[error("unknown backend `{name}`")]
    UnknownBackend { name: String },
}

impl BackendError {
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound)
    }
}

/// The three operations an activity can perform.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BackendOperation {
    CreateOrUpdate,
    Delete,
    Send,
}

impl fmt::Display for BackendOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::CreateOrUpdate => "createOrUpdate",
            Self::Delete => "delete",
            Self::Send => "send",
        })
    }
}

/// One backend instance. Create/update and delete must be safe to repeat
/// (last write wins).
#[async_trait]
pub trait InstallationBackend: Send + Sync {
    async fn create_or_update(
        &self,
        installation_id: &InstallationId,
        registration: &Registration,
    ) -> Result<(), BackendError>;

    async fn delete(&self, installation_id: &InstallationId) -> Result<(), BackendError>;

    async fn send(
        &self,
        installation_id: &InstallationId,
        payload: &NotifyPayload,
    ) -> Result<(), BackendError>;

    /// Connectivity probe used by health checks.
    async fn health_check(&self) -> Result<(), BackendError> {
        Ok(())
    }
}

/// Resolves a backend config to a client.
pub trait BackendProvider: Send + Sync {
    /// # Errors
    ///
    /// Returns [`BackendError::UnknownBackend`] if no client can be built for
    /// `config`.
    fn backend(
        &self,
        config: &NotificationBackendConfig,
    ) -> Result<Arc<dyn InstallationBackend>, BackendError>;
}
