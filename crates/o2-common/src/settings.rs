//! Deployment settings
//!
//! Every field can be set by flag or `O2_*` environment variable. Defaults
//! match what a single-replica install needs.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Args;

use crate::resource::ResourceKind;
use crate::retry::RetryConfig;
use crate::{Error, Result, DEFAULT_OPERATOR_NAMESPACE};

/// Operator-wide settings
#[derive(Args, Clone, Debug, PartialEq)]
pub struct OperatorSettings {
    /// Concurrent reconciles for O2Config
    #[arg(long, env = "O2_CONFIG_CONCURRENCY", default_value_t = 2)]
    pub config_concurrency: u16,

    /// Concurrent reconciles for O2Alert
    #[arg(long, env = "O2_ALERT_CONCURRENCY", default_value_t = 5)]
    pub alert_concurrency: u16,

    /// Concurrent reconciles for O2Pipeline
    #[arg(long, env = "O2_PIPELINE_CONCURRENCY", default_value_t = 5)]
    pub pipeline_concurrency: u16,

    /// Concurrent reconciles for O2Function
    #[arg(long, env = "O2_FUNCTION_CONCURRENCY", default_value_t = 3)]
    pub function_concurrency: u16,

    /// Concurrent reconciles for O2Destination
    #[arg(long, env = "O2_DESTINATION_CONCURRENCY", default_value_t = 3)]
    pub destination_concurrency: u16,

    /// Concurrent reconciles for O2Template
    #[arg(long, env = "O2_TEMPLATE_CONCURRENCY", default_value_t = 3)]
    pub template_concurrency: u16,

    /// Concurrent reconciles for O2Dashboard
    #[arg(long, env = "O2_DASHBOARD_CONCURRENCY", default_value_t = 3)]
    pub dashboard_concurrency: u16,

    /// Timeout for each backend HTTP call, in seconds
    #[arg(long, env = "O2_HTTP_TIMEOUT_SECS", default_value_t = 30)]
    pub http_timeout_secs: u64,

    /// Attempts per backend call for transient failures
    #[arg(long, env = "O2_RETRY_MAX_ATTEMPTS", default_value_t = 3)]
    pub retry_max_attempts: u32,

    /// Wait before the first retry, in milliseconds
    #[arg(long, env = "O2_RETRY_INITIAL_WAIT_MS", default_value_t = 500)]
    pub retry_initial_wait_ms: u64,

    /// Sustained backend requests per second, per Config
    #[arg(long, env = "O2_RATE_LIMIT_RPS", default_value_t = 10)]
    pub rate_limit_rps: u32,

    /// Request burst allowed above the sustained rate, per Config
    #[arg(long, env = "O2_RATE_LIMIT_BURST", default_value_t = 20)]
    pub rate_limit_burst: u32,

    /// Concurrent backend connections, per Config
    #[arg(long, env = "O2_MAX_CONNECTIONS", default_value_t = 10)]
    pub max_connections: u32,

    /// Base of the reconcile error backoff, in seconds
    #[arg(long, env = "O2_BACKOFF_BASE_SECS", default_value_t = 1)]
    pub backoff_base_secs: u64,

    /// Cap of the reconcile error backoff, in seconds
    #[arg(long, env = "O2_BACKOFF_CAP_SECS", default_value_t = 300)]
    pub backoff_cap_secs: u64,

    /// Interval at which Ready resources are re-checked for drift, in seconds
    #[arg(long, env = "O2_RESYNC_INTERVAL_SECS", default_value_t = 600)]
    pub resync_interval_secs: u64,

    /// Namespace the operator runs in; Configs here are always referenceable
    #[arg(long, env = "O2_OPERATOR_NAMESPACE", default_value = DEFAULT_OPERATOR_NAMESPACE)]
    pub operator_namespace: String,

    /// Extra namespaces whose Configs may be referenced from other namespaces
    #[arg(long, env = "O2_CONFIG_NAMESPACES", value_delimiter = ',')]
    pub config_namespaces: Vec<String>,

    /// Admission webhook listen address
    #[arg(long, env = "O2_WEBHOOK_ADDR", default_value = "0.0.0.0:9443")]
    pub webhook_addr: SocketAddr,

    /// PEM certificate for the webhook (plain HTTP when unset)
    #[arg(long, env = "O2_WEBHOOK_CERT", requires = "webhook_key")]
    pub webhook_cert: Option<PathBuf>,

    /// PEM private key for the webhook
    #[arg(long, env = "O2_WEBHOOK_KEY", requires = "webhook_cert")]
    pub webhook_key: Option<PathBuf>,

    /// Run controllers only while holding the leader lease
    #[arg(long, env = "O2_LEADER_ELECTION", default_value_t = true, action = clap::ArgAction::Set)]
    pub leader_election: bool,

    /// Identity used for the leader lease (defaults to the pod name)
    #[arg(long, env = "POD_NAME")]
    pub identity: Option<String>,
}

impl Default for OperatorSettings {
    fn default() -> Self {
        Self {
            config_concurrency: 2,
            alert_concurrency: 5,
            pipeline_concurrency: 5,
            function_concurrency: 3,
            destination_concurrency: 3,
            template_concurrency: 3,
            dashboard_concurrency: 3,
            http_timeout_secs: 30,
            retry_max_attempts: 3,
            retry_initial_wait_ms: 500,
            rate_limit_rps: 10,
            rate_limit_burst: 20,
            max_connections: 10,
            backoff_base_secs: 1,
            backoff_cap_secs: 300,
            resync_interval_secs: 600,
            operator_namespace: DEFAULT_OPERATOR_NAMESPACE.to_string(),
            config_namespaces: Vec::new(),
            webhook_addr: SocketAddr::from(([0, 0, 0, 0], 9443)),
            webhook_cert: None,
            webhook_key: None,
            leader_election: true,
            identity: None,
        }
    }
}

impl OperatorSettings {
    /// Reject settings that would stall or spin the controllers
    pub fn validate(&self) -> Result<()> {
        for kind in ResourceKind::ALL {
            if self.concurrency(kind) == 0 {
                return Err(Error::validation(format!(
                    "{kind} concurrency must be at least 1"
                )));
            }
        }
        if self.http_timeout_secs == 0 {
            return Err(Error::validation("HTTP timeout must be at least 1s"));
        }
        if self.retry_max_attempts == 0 {
            return Err(Error::validation("retry max attempts must be at least 1"));
        }
        if self.rate_limit_rps == 0 || self.rate_limit_burst == 0 {
            return Err(Error::validation("rate limit and burst must be at least 1"));
        }
        if self.max_connections == 0 {
            return Err(Error::validation("max connections must be at least 1"));
        }
        if self.backoff_base_secs == 0 || self.backoff_base_secs > self.backoff_cap_secs {
            return Err(Error::validation(
                "backoff base must be at least 1s and not exceed the cap",
            ));
        }
        if self.resync_interval_secs == 0 {
            return Err(Error::validation("resync interval must be at least 1s"));
        }
        Ok(())
    }

    /// Worker concurrency for one kind
    pub fn concurrency(&self, kind: ResourceKind) -> u16 {
        match kind {
            ResourceKind::Config => self.config_concurrency,
            ResourceKind::Alert => self.alert_concurrency,
            ResourceKind::Pipeline => self.pipeline_concurrency,
            ResourceKind::Function => self.function_concurrency,
            ResourceKind::Destination => self.destination_concurrency,
            ResourceKind::Template => self.template_concurrency,
            ResourceKind::Dashboard => self.dashboard_concurrency,
        }
    }

    /// Per-call HTTP timeout
    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    /// Retry policy for backend calls
    pub fn retry(&self) -> RetryConfig {
        RetryConfig::new(
            self.retry_max_attempts,
            Duration::from_millis(self.retry_initial_wait_ms),
        )
    }

    /// Reconcile backoff base
    pub fn backoff_base(&self) -> Duration {
        Duration::from_secs(self.backoff_base_secs)
    }

    /// Reconcile backoff cap
    pub fn backoff_cap(&self) -> Duration {
        Duration::from_secs(self.backoff_cap_secs)
    }

    /// Drift resync interval
    pub fn resync_interval(&self) -> Duration {
        Duration::from_secs(self.resync_interval_secs)
    }

    /// Whether Configs in `namespace` may be referenced from `referrer_namespace`
    pub fn config_namespace_allowed(&self, namespace: &str, referrer_namespace: &str) -> bool {
        namespace == referrer_namespace
            || namespace == self.operator_namespace
            || self.config_namespaces.iter().any(|n| n == namespace)
    }
}
