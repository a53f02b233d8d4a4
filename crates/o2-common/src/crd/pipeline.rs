//! O2Pipeline CRD: a DAG of processing nodes fed from one source stream
//!
//! Nodes are addressed by `id`. The virtual node `source` represents the
//! pipeline input and may be declared explicitly or left implicit. Edge
//! structure is checked by [`crate::graph::validate_pipeline`].

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{ConditionRule, ConfigRef, ResourceStatus, StreamType};

/// A stream-processing pipeline.
///
/// Example:
/// ```yaml
/// apiVersion: openobserve.ai/v1alpha1
/// kind: O2Pipeline
/// metadata:
///   name: errors-to-splunk
/// spec:
///   configRef:
///     name: main
///   source:
///     streamName: k8s_logs
///     streamType: logs
///   nodes:
///     - id: is-error
///       kind: condition
///       config:
///         conditions: [{column: level, operator: "=", value: error}]
///     - id: splunk
///       kind: custom
///       config:
///         destinationRef: splunk-hec
///   edges:
///     - sourceNodeId: source
///       targetNodeId: is-error
///     - sourceNodeId: is-error
///       targetNodeId: splunk
///       conditionPredicate: true
/// ```
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "openobserve.ai",
    version = "v1alpha1",
    kind = "O2Pipeline",
    namespaced,
    status = "ResourceStatus",
    shortname = "o2pipe",
    printcolumn = r#"{"name":"Source","type":"string","jsonPath":".spec.source.streamName"}"#,
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"RemoteID","type":"string","jsonPath":".status.remoteId"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct O2PipelineSpec {
    /// Config this pipeline syncs through
    pub config_ref: ConfigRef,

    /// Free-form description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Whether the pipeline is active
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Stream feeding the virtual `source` node
    pub source: PipelineSource,

    /// Processing nodes
    #[serde(default)]
    pub nodes: Vec<PipelineNode>,

    /// Data-flow edges
    #[serde(default)]
    pub edges: Vec<PipelineEdge>,

    /// What happens to records matching no edge of a condition node
    #[serde(default)]
    pub condition_fallthrough: ConditionFallthrough,
}

/// Input stream of a pipeline
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PipelineSource {
    /// Stream name
    pub stream_name: String,
    /// Stream type
    #[serde(default)]
    pub stream_type: StreamType,
}

/// One processing node
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PipelineNode {
    /// Identifier, unique within the pipeline
    pub id: String,
    /// Node behaviour
    pub kind: NodeKind,
    /// Kind-specific settings
    #[serde(default)]
    pub config: NodeConfig,
}

/// Node behaviours
#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    /// Read from or write to a stream
    Stream,
    /// Route records by predicate
    Condition,
    /// Produce records from a SQL query
    Query,
    /// Apply an O2Function
    Function,
    /// Forward to a pipeline O2Destination
    Custom,
}

impl NodeKind {
    /// Whether a node of this kind may end a branch
    pub fn is_sink(&self) -> bool {
        matches!(self, Self::Stream | Self::Custom)
    }
}

impl std::fmt::Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stream => write!(f, "stream"),
            Self::Condition => write!(f, "condition"),
            Self::Query => write!(f, "query"),
            Self::Function => write!(f, "function"),
            Self::Custom => write!(f, "custom"),
        }
    }
}

/// Kind-specific node settings; only the fields of the node's kind are read
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NodeConfig {
    /// Stream name (stream nodes)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_name: Option<String>,
    /// Stream type (stream nodes)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_type: Option<StreamType>,
    /// Routing predicates (condition nodes)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<ConditionRule>,
    /// SQL (query nodes)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sql: Option<String>,
    /// O2Function name (function nodes)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_ref: Option<String>,
    /// Pipeline O2Destination name (custom nodes)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination_ref: Option<String>,
}

/// A directed data-flow edge
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PipelineEdge {
    /// Upstream node id (or `source`)
    pub source_node_id: String,
    /// Downstream node id
    pub target_node_id: String,
    /// Branch taken from a condition node: true or false
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition_predicate: Option<bool>,
}

/// Policy for records that match no outgoing edge of a condition node
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum ConditionFallthrough {
    /// Unmatched records are dropped; a false edge is optional
    #[default]
    Drop,
    /// Every condition node must declare a false edge
    RequireFalseBranch,
}

fn default_true() -> bool {
    true
}
