//! O2Alert CRD: a scheduled or real-time alert on a stream

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{ConditionRule, ConfigRef, ResourceStatus, StreamType};

/// Maximum destinations one alert may notify
pub const MAX_ALERT_DESTINATIONS: usize = 10;

/// An alert evaluated by the backend.
///
/// Example:
/// ```yaml
/// apiVersion: openobserve.ai/v1alpha1
/// kind: O2Alert
/// metadata:
///   name: high-error-rate
/// spec:
///   configRef:
///     name: main
///   streamName: k8s_logs
///   streamType: logs
///   queryCondition:
///     type: sql
///     sql: SELECT count(*) AS errors FROM "k8s_logs" WHERE level = 'error'
///   schedule:
///     frequency: 5
///     period: 10
///   destinations: [slack-oncall]
/// ```
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "openobserve.ai",
    version = "v1alpha1",
    kind = "O2Alert",
    namespaced,
    status = "ResourceStatus",
    shortname = "o2alert",
    printcolumn = r#"{"name":"Stream","type":"string","jsonPath":".spec.streamName"}"#,
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"RemoteID","type":"string","jsonPath":".status.remoteId"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct O2AlertSpec {
    /// Config this alert syncs through
    pub config_ref: ConfigRef,

    /// Stream the alert queries
    pub stream_name: String,

    /// Type of the stream
    #[serde(default)]
    pub stream_type: StreamType,

    /// Evaluate on ingestion instead of on a schedule
    #[serde(default)]
    pub is_real_time: bool,

    /// What the alert evaluates
    pub query_condition: QueryCondition,

    /// Evaluation schedule (absent for real-time alerts)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<AlertSchedule>,

    /// Names of alert destinations (same namespace) to notify
    #[serde(default)]
    pub destinations: Vec<String>,

    /// Notification de-duplication
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deduplication: Option<Deduplication>,

    /// Whether the alert is active
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Free-form description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Query evaluated by an alert
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct QueryCondition {
    /// How the condition is expressed
    #[serde(rename = "type")]
    pub type_: QueryType,

    /// Column predicates (custom queries)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<ConditionRule>,

    /// SQL query (sql queries)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sql: Option<String>,

    /// PromQL query (promql queries)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub promql: Option<String>,
}

/// Query languages supported by alerts
#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum QueryType {
    /// Column predicates
    Custom,
    /// SQL
    Sql,
    /// PromQL
    Promql,
}

impl std::fmt::Display for QueryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Custom => write!(f, "custom"),
            Self::Sql => write!(f, "sql"),
            Self::Promql => write!(f, "promql"),
        }
    }
}

/// Scheduled evaluation settings
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AlertSchedule {
    /// Minutes between evaluations
    pub frequency: u32,
    /// Minutes of data each evaluation covers
    pub period: u32,
    /// Cron expression overriding `frequency`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cron: Option<String>,
}

/// Notification de-duplication settings
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Deduplication {
    /// Whether de-duplication is active
    #[serde(default)]
    pub enabled: bool,
    /// Fields that identify a duplicate
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fingerprint_fields: Vec<String>,
    /// Window in which duplicates are suppressed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_window_minutes: Option<u32>,
}

fn default_true() -> bool {
    true
}
