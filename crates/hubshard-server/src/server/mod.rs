//! Server-side components of `hubshard-server`.
//!
//! ## Submodules
//!
//! - [`config`] - CLI/environment configuration and its validation.
//! - [`beta`] - file-backed beta-tester table.
//! - [`pool`] - worker pool running workflow instances.
//! - [`service`] - HTTP routes, ingress errors and engine hooks.
//! - [`telemetry`] - log subscriber, OpenTelemetry exporters and metric
//!   handles.

pub mod beta;
pub mod config;
pub mod pool;
pub mod service;
pub mod telemetry;
