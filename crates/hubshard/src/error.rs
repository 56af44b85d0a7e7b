//! Error types shared across the orchestration engine.
//!
//! Two families live here:
//!
//! - [`ConfigError`] - raised while building the immutable configuration at
//!   startup. These are never produced while a request is being served.
//! - [`RouteError`] - a request-time invariant violation in the partition
//!   router. A validated [`PartitionTable`](crate::PartitionTable) never
//!   produces it.
//!
//! Backend, lookup and telemetry failures are defined next to the
//! capabilities that produce them.

/// A result type for configuration building.
pub type Result<T, E = ConfigError> = core::result::Result<T, E>;

/// Startup validation failures.
#[derive(Clone, thiserror::Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    /// No partitions were configured.
    #[error("partition table is empty")]
    EmptyPartitionTable,

    /// A partition predicate does not anchor to the start of the identifier.
    #[error("partition `{name}` regex `{pattern}` must start with `^`")]
    UnanchoredPartition { name: String, pattern: String },

    /// A regular expression could not be compiled.
    #[error("invalid regex `{pattern}`: {reason}")]
    InvalidRegex { pattern: String, reason: String },

    /// Two partitions both match the same installation prefix.
    #[error("partitions `{first}` and `{second}` overlap on prefix `{prefix}`")]
    OverlappingPartitions {
        first: String,
        second: String,
        prefix: String,
    },

    /// No partition matches an installation prefix.
    #[error("no partition covers prefix `{prefix}`")]
    UncoveredPrefix { prefix: String },

    /// A partition predicate matches no routing prefix.
    #[error("partition `{name}` regex `{pattern}` matches no installation prefix")]
    UnreachablePartition { name: String, pattern: String },

    /// A backend is missing its name or endpoint.
    #[error("backend config is incomplete: {reason}")]
    InvalidBackend { reason: String },

    /// Two partitions point at the same backend name.
    #[error("backend name `{name}` is used more than once")]
    DuplicateBackend { name: String },

    /// The `canary` rollout flag was selected without a pattern.
    #[error("feature flag `canary` requires a canary regex")]
    MissingCanaryPattern,

    /// Retry policy values are out of range.
    #[error("invalid retry policy: {reason}")]
    InvalidRetryPolicy { reason: String },
}

/// The partition router could not place an installation.
///
/// Unreachable for tables built through
/// [`PartitionTable::new`](crate::PartitionTable::new); surfacing it means the
/// startup validation missed a case.
#[derive(Clone, thiserror::Error, Debug, PartialEq, Eq)]
#[error("no partition matches installation `{installation_id}`")]
pub struct RouteError {
    pub installation_id: String,
}
