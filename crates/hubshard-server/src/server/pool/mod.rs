//! Worker pool running workflow instances.
//!
//! - [`manager`] - [`manager::WorkerPool`], round-robin dispatch and shutdown.
//! - [`worker`] - the per-worker receive loop.
//! - [`request`] - messages sent to workers and the in-flight set.

pub mod manager;
pub mod request;
pub mod worker;
