//! Active-subset resolution.
//!
//! Decides whether an installation belongs to the cohort currently being
//! migrated to the partitioned backends. The answer depends on the rollout
//! [`FeatureFlag`] read at workflow start and, for `beta`, on an external
//! table of test users that is consulted on every call.

use crate::{ConfigError, InstallationId};
use async_trait::async_trait;
use core::{fmt, str::FromStr};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Rollout stage of the partitioned backends.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeatureFlag {
    /// Nobody is migrated.
    #[default]
    None,
    /// Only members of the beta-tester table.
    Beta,
    /// Installations matching the canary regex.
    Canary,
    /// Everybody.
    All,
}

impl fmt::Display for FeatureFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::None => "none",
            Self::Beta => "beta",
            Self::Canary => "canary",
            Self::All => "all",
        })
    }
}

/// Error returned when parsing an unknown flag name.
#[derive(Clone, thiserror::Error, Debug, PartialEq, Eq)]
#[error("unknown feature flag `{0}`, expected one of none|beta|canary|all")]
pub struct UnknownFeatureFlag(pub String);

impl FromStr for FeatureFlag {
    type Err = UnknownFeatureFlag;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(Self::None),
            "beta" => Ok(Self::Beta),
            "canary" => Ok(Self::Canary),
            "all" => Ok(Self::All),
            _ => Err(UnknownFeatureFlag(s.to_string())),
        }
    }
}

/// Snapshot of the beta-tester table.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BetaUsers(HashSet<InstallationId>);

impl BetaUsers {
    pub fn new(ids: impl IntoIterator<Item = InstallationId>) -> Self {
        Self(ids.into_iter().collect())
    }

    pub fn contains(&self, id: &InstallationId) -> bool {
        self.0.contains(id)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<InstallationId> for BetaUsers {
    fn from_iter<T: IntoIterator<Item = InstallationId>>(iter: T) -> Self {
        Self::new(iter)
    }
}

/// Failure reading the beta-tester table.
#[derive(Clone, thiserror::Error, Debug, PartialEq, Eq)]
#[error("beta user lookup failed: {reason}")]
pub struct LookupError {
    pub reason: String,
}

/// Source of the beta-tester table.
///
/// Implementations must not cache across calls: operators add and remove
/// testers without redeploying.
#[async_trait]
pub trait BetaUserLookup: Send + Sync {
    async fn beta_users(&self) -> Result<BetaUsers, LookupError>;
}

/// A fixed in-process table, mostly useful in tests.
#[derive(Clone, Debug, Default)]
pub struct StaticBetaUsers(pub BetaUsers);

#[async_trait]
impl BetaUserLookup for StaticBetaUsers {
    async fn beta_users(&self) -> Result<BetaUsers, LookupError> {
        Ok(self.0.clone())
    }
}

/// Cohort membership rules. Built once at startup.
#[derive(Clone, Debug)]
pub struct ActiveSubsetResolver {
    canary: Option<Regex>,
}

impl ActiveSubsetResolver {
    /// Creates a resolver for the configured flag.
    ///
    /// # Errors
    ///
    /// Fails if `flag` is [`FeatureFlag::Canary`] without a pattern, or if the
    /// pattern does not compile.
    pub fn new(flag: FeatureFlag, canary_pattern: Option<&str>) -> crate::Result<Self> {
        let canary = canary_pattern
            .filter(|p| !p.is_empty())
            .map(|p| {
                Regex::new(p).map_err(|e| ConfigError::InvalidRegex {
                    pattern: p.to_string(),
                    reason: e.to_string(),
                })
            })
            .transpose()?;
        if flag == FeatureFlag::Canary && canary.is_none() {
            return Err(ConfigError::MissingCanaryPattern);
        }
        Ok(Self { canary })
    }

    /// Returns whether `installation_id` is in the migrating cohort.
    ///
    /// `beta_users` is only consulted for [`FeatureFlag::Beta`]. A canary flag
    /// with no configured pattern matches nobody.
    pub fn is_active(
        &self,
        flag: FeatureFlag,
        installation_id: &InstallationId,
        beta_users: &BetaUsers,
    ) -> bool {
        match flag {
            FeatureFlag::All => true,
            FeatureFlag::None => false,
            FeatureFlag::Beta => beta_users.contains(installation_id),
            FeatureFlag::Canary => self
                .canary
                .as_ref()
                .is_some_and(|re| re.is_match(installation_id.as_str())),
        }
    }
}
