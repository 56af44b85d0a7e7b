use anyhow::{Context, bail};
use clap::Parser;
use core::time::Duration;
use hubshard::{
    FeatureFlag, InstallationId, MemoryResultStore, NotificationBackendConfig, OrchestratorConfig, PartitionSpec,
    PartitionTable, RetryPolicy,
};
use std::{path::PathBuf, sync::Arc};

/// Runtime configuration for the `hubshard-server` binary.
///
/// Every value can be given as a CLI flag or through the environment; a `.env`
/// file in the working directory is loaded first. The notification hub
/// settings are validated as a whole, so a bad partition table or rollout
/// flag stops the process before it binds.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "hubshard-server",
    version,
    about = "Runs notification installation workflows across legacy and partitioned hubs",
    args_override_self = true
)]
pub struct CliArgs {
    /// Address to listen on.
    ///
    /// Environment variable: `SERVER_ADDR`
    #[arg(long, env = "SERVER_ADDR", default_value_t = String::from("0.0.0.0:8080"))]
    pub server_addr: String,

    /// Number of worker tasks running workflow instances.
    ///
    /// Environment variable: `NUM_WORKERS`
    #[arg(long, env = "NUM_WORKERS", default_value_t = num_cpus::get())]
    pub num_workers: usize,

    /// Capacity of each worker's queue. Submissions wait when it is full.
    ///
    /// Environment variable: `WORK_QUEUE_SIZE`
    #[arg(long, env = "WORK_QUEUE_SIZE", default_value_t = 64)]
    pub work_queue_size: usize,

    /// Number of terminal workflow results kept for status queries and
    /// dedup. The oldest is dropped once full.
    ///
    /// Environment variable: `RESULT_STORE_CAPACITY`
    #[arg(long, env = "RESULT_STORE_CAPACITY", default_value_t = MemoryResultStore::DEFAULT_CAPACITY)]
    pub result_store_capacity: usize,

    /// Seconds to wait for running instances to finish on shutdown.
    ///
    /// Environment variable: `SHUTDOWN_TIMEOUT`
    #[arg(long, env = "SHUTDOWN_TIMEOUT", default_value_t = 5)]
    pub shutdown_timeout: u64,

    /// Name of the legacy notification hub.
    ///
    /// Environment variable: `LEGACY_NH_NAME`
    #[arg(long, env = "LEGACY_NH_NAME")]
    pub legacy_nh_name: String,

    /// Endpoint of the legacy notification hub.
    ///
    /// Environment variable: `LEGACY_NH_ENDPOINT`
    #[arg(long, env = "LEGACY_NH_ENDPOINT")]
    pub legacy_nh_endpoint: String,

    /// Partition hubs as a JSON array of `{partitionRegex, name, endpoint}`.
    ///
    /// Example: `[{"partitionRegex":"^[0-7]","name":"nh1","endpoint":"sb://nh1"}]`
    ///
    /// Environment variable: `NH_PARTITIONS`
    #[arg(long, env = "NH_PARTITIONS")]
    pub nh_partitions: String,

    /// Maximum attempts per activity, the first one included.
    ///
    /// Environment variable: `RETRY_ATTEMPT_NUMBER`
    #[arg(long, env = "RETRY_ATTEMPT_NUMBER", default_value_t = RetryPolicy::DEFAULT_MAX_ATTEMPTS)]
    pub retry_attempt_number: u32,

    /// Wait before the first retry, in milliseconds.
    ///
    /// Environment variable: `RETRY_FIRST_INTERVAL_MS`
    #[arg(long, env = "RETRY_FIRST_INTERVAL_MS", default_value_t = 5000)]
    pub retry_first_interval_ms: u64,

    /// Growth factor between consecutive retry waits.
    ///
    /// Environment variable: `RETRY_BACKOFF_COEFFICIENT`
    #[arg(long, env = "RETRY_BACKOFF_COEFFICIENT", default_value_t = RetryPolicy::DEFAULT_BACKOFF_COEFFICIENT)]
    pub retry_backoff_coefficient: f64,

    /// Rollout stage of the partition hubs: `none`, `beta`, `canary` or `all`.
    ///
    /// Environment variable: `NH_PARTITION_FEATURE_FLAG`
    #[arg(long, env = "NH_PARTITION_FEATURE_FLAG", default_value_t = FeatureFlag::None)]
    pub nh_partition_feature_flag: FeatureFlag,

    /// Installation ids matching this regex migrate under the `canary` flag.
    ///
    /// Environment variable: `NH_CANARY_REGEX`
    #[arg(long, env = "NH_CANARY_REGEX")]
    pub nh_canary_regex: Option<String>,

    /// File listing beta-tester installation ids, one per line. Read again on
    /// every lookup.
    ///
    /// Environment variable: `BETA_USERS_FILE`
    #[arg(long, env = "BETA_USERS_FILE")]
    pub beta_users_file: Option<PathBuf>,

    /// Comma separated fiscal codes that must never receive a push.
    ///
    /// Environment variable: `FISCAL_CODE_NOTIFICATION_BLACKLIST`
    #[arg(long, env = "FISCAL_CODE_NOTIFICATION_BLACKLIST", default_value_t = String::new())]
    pub fiscal_code_notification_blacklist: String,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub server_addr: String,
    pub num_workers: usize,
    pub work_queue_size: usize,
    pub result_store_capacity: usize,
    pub shutdown_timeout: Duration,
    pub beta_users_file: Option<PathBuf>,
    pub orchestrator: Arc<OrchestratorConfig>,
}

impl TryFrom<CliArgs> for ServerConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        if args.num_workers == 0 {
            bail!("NUM_WORKERS must be greater than 0");
        }

        if args.work_queue_size == 0 {
            bail!("WORK_QUEUE_SIZE must be greater than 0");
        }

        if args.result_store_capacity == 0 {
            bail!("RESULT_STORE_CAPACITY must be greater than 0");
        }

        if args.nh_partition_feature_flag == FeatureFlag::Beta && args.beta_users_file.is_none() {
            bail!("BETA_USERS_FILE is required when NH_PARTITION_FEATURE_FLAG is `beta`");
        }

        let legacy = NotificationBackendConfig::new(args.legacy_nh_name, args.legacy_nh_endpoint)
            .context("invalid LEGACY_NH_NAME / LEGACY_NH_ENDPOINT")?;

        let specs: Vec<PartitionSpec> = serde_json::from_str(&args.nh_partitions)
            .context("NH_PARTITIONS must be a JSON array of {partitionRegex, name, endpoint}")?;
        let partitions = PartitionTable::new(&specs).context("invalid NH_PARTITIONS")?;

        let retry = RetryPolicy::new(
            Duration::from_millis(args.retry_first_interval_ms),
            args.retry_attempt_number,
            args.retry_backoff_coefficient,
        )
        .context("invalid RETRY_ATTEMPT_NUMBER / RETRY_BACKOFF_COEFFICIENT")?;

        let blacklist = args
            .fiscal_code_notification_blacklist
            .split(',')
            .map(str::trim)
            .filter(|code| !code.is_empty())
            .map(InstallationId::from_fiscal_code);

        let orchestrator = OrchestratorConfig::new(
            legacy,
            partitions,
            args.nh_partition_feature_flag,
            args.nh_canary_regex.as_deref(),
            retry,
        )
        .context("invalid NH_PARTITION_FEATURE_FLAG / NH_CANARY_REGEX")?
        .with_notify_blacklist(blacklist);

        Ok(Self {
            server_addr: args.server_addr,
            num_workers: args.num_workers,
            work_queue_size: args.work_queue_size,
            result_store_capacity: args.result_store_capacity,
            shutdown_timeout: Duration::from_secs(args.shutdown_timeout),
            beta_users_file: args.beta_users_file,
            orchestrator: Arc::new(orchestrator),
        })
    }
}
