//! HTTP service and its glue to the workflow engine.
//!
//! ## Structure
//!
//! - [`handler`] - axum routes and the `NotificationService` entry point.
//! - [`error`] - ingress errors and their status codes.
//! - [`observer`] - telemetry sink and host observer backed by `tracing` and
//!   OpenTelemetry metrics.


pub mod error;
pub mod handler;
pub mod observer;
