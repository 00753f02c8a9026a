//! Command-line and environment configuration

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use replicator_common::telemetry::LogFormat;
use replicator_controller::ControllerConfig;

/// Replicator - keeps each ReplicaSet's running pods at its desired replica count
#[derive(Parser, Debug)]
#[command(name = "replicator", version, about, long_about = None)]
pub struct Cli {
    /// Only watch ReplicaSets and pods in this namespace (default: all namespaces)
    #[arg(long, env = "REPLICATOR_NAMESPACE")]
    pub namespace: Option<String>,

    /// Seconds between periodic resyncs of each ReplicaSet
    #[arg(long, env = "REPLICATOR_RESYNC_PERIOD_SECS", default_value_t = 60)]
    pub resync_period_secs: u64,

    /// Seconds before retrying a pass whose status write failed
    #[arg(long, env = "REPLICATOR_REQUEUE_AFTER_SECS", default_value_t = 5)]
    pub requeue_after_secs: u64,

    /// Milliseconds to park a ReplicaSet while the caches are still syncing
    #[arg(long, env = "REPLICATOR_CACHE_SYNC_POLL_MS", default_value_t = 500)]
    pub cache_sync_poll_ms: u64,

    /// Maximum number of ReplicaSets reconciled concurrently
    #[arg(long, env = "REPLICATOR_CONCURRENCY", default_value_t = 4)]
    pub concurrency: u16,

    /// Log output format: json or text
    #[arg(long, env = "REPLICATOR_LOG_FORMAT", default_value = "json")]
    pub log_format: LogFormat,

    /// Path to a kubeconfig file (default: in-cluster config, then KUBECONFIG)
    #[arg(long)]
    pub kubeconfig: Option<PathBuf>,
}

impl Cli {
    /// Controller tuning from the parsed flags
    pub fn controller_config(&self) -> ControllerConfig {
        ControllerConfig {
            resync_period: Duration::from_secs(self.resync_period_secs),
            requeue_after: Duration::from_secs(self.requeue_after_secs),
            cache_sync_poll: Duration::from_millis(self.cache_sync_poll_ms),
            concurrency: self.concurrency,
            namespace: self.namespace.clone(),
        }
    }
}
