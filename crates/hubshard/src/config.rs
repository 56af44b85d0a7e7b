use crate::{
    ActiveSubsetResolver, ConfigError, FeatureFlag, InstallationId, NotificationBackendConfig,
    PartitionTable, RetryPolicy,
};
use std::collections::HashSet;

/// Read-only configuration shared by every workflow instance.
///
/// Built once at startup and passed explicitly to the workflow, the activity
/// runner and the host. Nothing in the engine reads process-wide state.
#[derive(Clone, Debug)]
pub struct OrchestratorConfig {
    legacy: NotificationBackendConfig,
    partitions: PartitionTable,
    feature_flag: FeatureFlag,
    resolver: ActiveSubsetResolver,
    retry: RetryPolicy,
    notify_blacklist: HashSet<InstallationId>,
}

impl OrchestratorConfig {
    /// # Errors
    ///
    /// Fails if the legacy backend is incomplete, if it shares a name or
    /// endpoint with a partition backend, or if the subset resolver cannot be
    /// built for `feature_flag` (see [`ActiveSubsetResolver::new`]).
    pub fn new(
        legacy: NotificationBackendConfig,
        partitions: PartitionTable,
        feature_flag: FeatureFlag,
        canary_pattern: Option<&str>,
        retry: RetryPolicy,
    ) -> crate::Result<Self> {
        legacy.validate()?;
        if let Some(clash) = partitions
            .backends()
            .find(|b| b.name == legacy.name || b.endpoint == legacy.endpoint)
        {
            return Err(ConfigError::DuplicateBackend {
                name: clash.name.clone(),
            });
        }
        let resolver = ActiveSubsetResolver::new(feature_flag, canary_pattern)?;
        Ok(Self {
            legacy,
            partitions,
            feature_flag,
            resolver,
            retry,
            notify_blacklist: HashSet::new(),
        })
    }

    /// Installations that must never receive a push. Notify requests for them
    /// run as a dry run.
    #[must_use]
    pub fn with_notify_blacklist(mut self, ids: impl IntoIterator<Item = InstallationId>) -> Self {
        self.notify_blacklist = ids.into_iter().collect();
        self
    }

    pub fn legacy(&self) -> &NotificationBackendConfig {
        &self.legacy
    }

    pub fn partitions(&self) -> &PartitionTable {
        &self.partitions
    }

    pub fn feature_flag(&self) -> FeatureFlag {
        self.feature_flag
    }

    pub fn resolver(&self) -> &ActiveSubsetResolver {
        &self.resolver
    }

    pub fn retry(&self) -> &RetryPolicy {
        &self.retry
    }

    pub fn is_blacklisted(&self, installation_id: &InstallationId) -> bool {
        self.notify_blacklist.contains(installation_id)
    }

    /// Legacy first, then partitions in table order.
    pub fn backends(&self) -> impl Iterator<Item = &NotificationBackendConfig> {
        core::iter::once(&self.legacy).chain(self.partitions.backends())
    }
}
