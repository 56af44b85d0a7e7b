//! Error types for the HTTP ingress.
//!
//! [`Error`] covers everything a request can fail with before a workflow
//! instance takes over. Failures inside an instance are not errors here; they
//! end up in the instance's persisted result.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

pub type Result<T> = core::result::Result<T, Error>;

#[derive(Clone, thiserror::Error, Debug)]
pub enum Error {
    /// A worker queue was closed.
    #[error("Channel error: {context}")]
    ChannelError { context: String },

    /// The request body or parameters could not be read.
    #[error("Invalid request: {reason}")]
    InvalidRequest { reason: String },

    /// No instance with this id was ever submitted.
    #[error("Unknown instance `{instance_id}`")]
    NotFound { instance_id: String },

    /// The service is in the process of shutting down.
    #[error("Service is shutting down")]
    ServiceShutdown,
}

impl Error {
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::InvalidRequest { .. } => StatusCode::BAD_REQUEST,
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::ChannelError { .. } | Self::ServiceShutdown => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        (self.status(), Json(json!({ "error": self.to_string() }))).into_response()
    }
}
