//! O2Config CRD: connection settings for one backend organization
//!
//! Every other kind references an O2Config through `spec.configRef`. The
//! referenced Secret holds `username` plus either `token` (service account,
//! limited scope) or `password` (user account, full scope).

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{ResourceStatus, SecretRef};

/// Connection settings for an OpenObserve organization.
///
/// Example:
/// ```yaml
/// apiVersion: openobserve.ai/v1alpha1
/// kind: O2Config
/// metadata:
///   name: main
///   namespace: o2operator
/// spec:
///   endpoint: https://o2.example.com
///   organization: default
///   credentialRef:
///     name: o2-credentials
/// ```
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "openobserve.ai",
    version = "v1alpha1",
    kind = "O2Config",
    namespaced,
    status = "ResourceStatus",
    shortname = "o2cfg",
    printcolumn = r#"{"name":"Endpoint","type":"string","jsonPath":".spec.endpoint"}"#,
    printcolumn = r#"{"name":"Org","type":"string","jsonPath":".spec.organization"}"#,
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct O2ConfigSpec {
    /// Base URL of the backend (http or https)
    pub endpoint: String,

    /// Organization every API path is scoped to
    pub organization: String,

    /// Secret holding the credentials
    pub credential_ref: SecretRef,

    /// Verify the backend's TLS certificate
    #[serde(default = "default_true")]
    pub tls_verify: bool,

    /// Per-backend rate limit override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<RateLimitSpec>,

    /// Per-backend concurrent connection cap override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_connections: Option<u32>,
}

/// Token bucket parameters for one backend
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitSpec {
    /// Sustained requests per second
    pub requests_per_second: u32,
    /// Bucket capacity
    pub burst: u32,
}

fn default_true() -> bool {
    true
}
