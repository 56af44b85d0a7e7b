//! Partition table and router.
//!
//! A [`PartitionTable`] is a static set of anchored regular expressions over
//! the leading hex digits of an [`InstallationId`], each bound to one
//! [`NotificationBackendConfig`]. It is validated once at startup so that
//! every identifier maps to exactly one backend; [`PartitionTable::route`] is
//! then a pure function over that table.
//!
//! ## Validation
//!
//! Predicates only ever see the routing prefix: the first
//! [`ROUTING_PREFIX_LEN`] hex digits of an id (the whole id if it is shorter).
//! Digits past the prefix never influence routing, so probing every two-digit
//! prefix (`00`..`ff`) covers the whole input space. Each probe must match
//! exactly one partition, each one-digit prefix at most one, and every
//! partition must own at least one prefix.

#[cfg(test)]
mod tests;

use crate::{ConfigError, InstallationId, RouteError};
use regex::Regex;
use serde::{Deserialize, Serialize};

const HEX_DIGITS: &[u8; 16] = b"0123456789abcdef";

/// Number of leading hex digits partition predicates are evaluated on.
pub const ROUTING_PREFIX_LEN: usize = 2;

/// The part of an installation id that partition predicates see.
fn routing_prefix(installation_id: &str) -> &str {
    installation_id
        .get(..ROUTING_PREFIX_LEN)
        .unwrap_or(installation_id)
}

/// Identifies one backend instance.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NotificationBackendConfig {
    pub name: String,
    pub endpoint: String,
}

impl NotificationBackendConfig {
    /// Builds a backend config, rejecting empty fields.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidBackend`] if `name` or `endpoint` is blank.
    pub fn new(name: impl Into<String>, endpoint: impl Into<String>) -> crate::Result<Self> {
        let config = Self {
            name: name.into(),
            endpoint: endpoint.into(),
        };
        config.validate()?;
        Ok(config)
    }

    pub(crate) fn validate(&self) -> crate::Result<()> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::InvalidBackend {
                reason: "name must not be empty".to_string(),
            });
        }
        if self.endpoint.trim().is_empty() {
            return Err(ConfigError::InvalidBackend {
                reason: format!("endpoint of `{}` must not be empty", self.name),
            });
        }
        Ok(())
    }
}

/// Raw partition entry as found in configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartitionSpec {
    pub partition_regex: String,
    pub name: String,
    pub endpoint: String,
}

/// One shard of the backend fleet.
#[derive(Clone, Debug)]
pub struct Partition {
    predicate: Regex,
    backend: NotificationBackendConfig,
}

impl Partition {
    /// Compiles a partition from its configuration entry.
    ///
    /// # Errors
    ///
    /// Fails if the regex is not anchored with `^`, does not compile, or the
    /// backend fields are blank.
    pub fn from_spec(spec: &PartitionSpec) -> crate::Result<Self> {
        let backend = NotificationBackendConfig::new(&spec.name, &spec.endpoint)?;
        if !spec.partition_regex.starts_with('^') {
            return Err(ConfigError::UnanchoredPartition {
                name: spec.name.clone(),
                pattern: spec.partition_regex.clone(),
            });
        }
        let predicate =
            Regex::new(&spec.partition_regex).map_err(|e| ConfigError::InvalidRegex {
                pattern: spec.partition_regex.clone(),
                reason: e.to_string(),
            })?;
        Ok(Self { predicate, backend })
    }

    /// Tests the predicate against the routing prefix of `installation_id`.
    pub fn matches(&self, installation_id: &str) -> bool {
        self.predicate.is_match(routing_prefix(installation_id))
    }

    pub fn backend(&self) -> &NotificationBackendConfig {
        &self.backend
    }

    pub fn pattern(&self) -> &str {
        self.predicate.as_str()
    }
}

/// Validated, immutable set of disjoint and exhaustive partitions.
#[derive(Clone, Debug)]
pub struct PartitionTable {
    partitions: Vec<Partition>,
}

impl PartitionTable {
    /// Compiles and validates a partition table.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if the list is empty, any entry is invalid,
    /// two partitions share a backend name, two predicates overlap on a
    /// prefix, or some prefix is left uncovered.
    pub fn new(specs: &[PartitionSpec]) -> crate::Result<Self> {
        if specs.is_empty() {
            return Err(ConfigError::EmptyPartitionTable);
        }

        let partitions = specs
            .iter()
            .map(Partition::from_spec)
            .collect::<crate::Result<Vec<_>>>()?;

        for (i, partition) in partitions.iter().enumerate() {
            let name = &partition.backend.name;
            if partitions[..i].iter().any(|p| &p.backend.name == name) {
                return Err(ConfigError::DuplicateBackend { name: name.clone() });
            }
        }

        let table = Self { partitions };
        table.check_disjoint_and_exhaustive()?;

        #[cfg(feature = "tracing")]
        tracing::debug!(partitions = table.partitions.len(), "partition table validated");

        Ok(table)
    }

    fn check_disjoint_and_exhaustive(&self) -> crate::Result<()> {
        let mut owned = vec![0usize; self.partitions.len()];
        for prefix in two_digit_prefixes() {
            match self.single_owner(&prefix)? {
                Some(index) => owned[index] += 1,
                None => return Err(ConfigError::UncoveredPrefix { prefix }),
            }
        }
        // Short ids are routed on what they have; they may be unroutable but
        // never ambiguous.
        for digit in HEX_DIGITS {
            self.single_owner(&(*digit as char).to_string())?;
        }
        if let Some(index) = owned.iter().position(|&count| count == 0) {
            let partition = &self.partitions[index];
            return Err(ConfigError::UnreachablePartition {
                name: partition.backend.name.clone(),
                pattern: partition.pattern().to_string(),
            });
        }
        Ok(())
    }

    /// Index of the only partition matching `prefix`, if any.
    fn single_owner(&self, prefix: &str) -> crate::Result<Option<usize>> {
        let mut owner: Option<usize> = None;
        for (index, partition) in self.partitions.iter().enumerate() {
            if !partition.matches(prefix) {
                continue;
            }
            if let Some(first) = owner {
                return Err(ConfigError::OverlappingPartitions {
                    first: self.partitions[first].backend.name.clone(),
                    second: partition.backend.name.clone(),
                    prefix: prefix.to_string(),
                });
            }
            owner = Some(index);
        }
        Ok(owner)
    }

    /// Returns the backend owning `installation_id`.
    ///
    /// # Errors
    ///
    /// Returns [`RouteError`] only if no partition matches, which validation
    /// rules out for ids of at least [`ROUTING_PREFIX_LEN`] digits.
    pub fn route(
        &self,
        installation_id: &InstallationId,
    ) -> Result<&NotificationBackendConfig, RouteError> {
        self.partitions
            .iter()
            .find(|p| p.matches(installation_id.as_str()))
            .map(Partition::backend)
            .ok_or_else(|| RouteError {
                installation_id: installation_id.to_string(),
            })
    }

    pub fn partitions(&self) -> &[Partition] {
        &self.partitions
    }

    /// Every backend referenced by the table, in configuration order.
    pub fn backends(&self) -> impl Iterator<Item = &NotificationBackendConfig> {
        self.partitions.iter().map(Partition::backend)
    }
}

/// Every two-digit routing prefix, `00` through `ff`.
fn two_digit_prefixes() -> impl Iterator<Item = String> {
    HEX_DIGITS.iter().flat_map(|&a| {
        HEX_DIGITS
            .iter()
            .map(move |&b| [a as char, b as char].into_iter().collect())
    })
}
