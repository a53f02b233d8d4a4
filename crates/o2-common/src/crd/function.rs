//! O2Function CRD: a record transform with optional test cases

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{ConfigRef, ResourceStatus};

/// A transform function used by pipelines.
///
/// When `testCases` is non-empty every case must pass against the backend's
/// test endpoint before the function is admitted.
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "openobserve.ai",
    version = "v1alpha1",
    kind = "O2Function",
    namespaced,
    status = "ResourceStatus",
    shortname = "o2fn",
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct O2FunctionSpec {
    /// Config this function syncs through
    pub config_ref: ConfigRef,

    /// Transform source
    pub transform_expr: String,

    /// Input/expected-output pairs run at admission
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub test_cases: Vec<FunctionTestCase>,
}

/// One function test case
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FunctionTestCase {
    /// Input record
    pub input: serde_json::Value,
    /// Record the transform must produce
    pub expected_output: serde_json::Value,
}
