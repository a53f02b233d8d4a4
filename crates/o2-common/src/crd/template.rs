//! O2Template CRD: notification body rendered by alert destinations

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::destination::TransportType;
use super::types::{ConfigRef, ResourceStatus};

/// A notification template with `{variable}` placeholders.
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "openobserve.ai",
    version = "v1alpha1",
    kind = "O2Template",
    namespaced,
    status = "ResourceStatus",
    shortname = "o2tpl",
    printcolumn = r#"{"name":"Transport","type":"string","jsonPath":".spec.transportType"}"#,
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct O2TemplateSpec {
    /// Config this template syncs through
    pub config_ref: ConfigRef,

    /// Transport the template renders for
    #[serde(default)]
    pub transport_type: TransportType,

    /// Title expression (required for email)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    /// Body expression
    pub body: String,
}
