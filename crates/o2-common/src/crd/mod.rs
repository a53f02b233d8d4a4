//! Custom Resource Definitions for the OpenObserve operator
//!
//! All kinds live in API group `openobserve.ai/v1alpha1`, are namespaced and
//! share [`ResourceStatus`].

mod alert;
mod config;
mod dashboard;
mod destination;
mod function;
mod pipeline;
mod template;
mod types;

pub use alert::{
    AlertSchedule, Deduplication, O2Alert, O2AlertSpec, QueryCondition, QueryType,
    MAX_ALERT_DESTINATIONS,
};
pub use config::{O2Config, O2ConfigSpec, RateLimitSpec};
pub use dashboard::{O2Dashboard, O2DashboardSpec};
pub use destination::{
    DestinationKind, DestinationType, HttpMethod, O2Destination, O2DestinationSpec, OutputFormat,
    RequiredHeader, TransportType,
};
pub use function::{FunctionTestCase, O2Function, O2FunctionSpec};
pub use pipeline::{
    ConditionFallthrough, NodeConfig, NodeKind, O2Pipeline, O2PipelineSpec, PipelineEdge,
    PipelineNode, PipelineSource,
};
pub use template::{O2Template, O2TemplateSpec};
pub use types::{
    Condition, ConditionRule, ConditionStatus, ConfigRef, ResourcePhase, ResourceStatus,
    SecretRef, StreamType, CONDITION_ERROR, CONDITION_READY, CONDITION_SYNCED,
};
