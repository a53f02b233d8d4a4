//! O2Dashboard CRD: a dashboard whose panel layout is forwarded verbatim

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{ConfigRef, ResourceStatus};

/// A dashboard on the backend.
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "openobserve.ai",
    version = "v1alpha1",
    kind = "O2Dashboard",
    namespaced,
    status = "ResourceStatus",
    shortname = "o2dash",
    printcolumn = r#"{"name":"Title","type":"string","jsonPath":".spec.title"}"#,
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct O2DashboardSpec {
    /// Config this dashboard syncs through
    pub config_ref: ConfigRef,

    /// Dashboard title
    pub title: String,

    /// Free-form description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Folder the dashboard is filed under
    #[serde(default = "default_folder")]
    pub folder: String,

    /// Panel layout, passed through to the backend
    #[serde(default)]
    pub definition: serde_json::Value,
}

fn default_folder() -> String {
    "default".to_string()
}
