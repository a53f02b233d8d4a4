//! O2Destination CRD: where alert notifications and pipeline output go
//!
//! Alert destinations render a Template and carry `templateRef`; pipeline
//! destinations forward records to a typed sink and carry
//! `destinationTypeName`. The output format and auth headers each sink type
//! requires are encoded on [`DestinationType`].

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{ConfigRef, ResourceStatus};

/// A notification or forwarding target on the backend.
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "openobserve.ai",
    version = "v1alpha1",
    kind = "O2Destination",
    namespaced,
    status = "ResourceStatus",
    shortname = "o2dest",
    printcolumn = r#"{"name":"Kind","type":"string","jsonPath":".spec.kind"}"#,
    printcolumn = r#"{"name":"Type","type":"string","jsonPath":".spec.destinationTypeName"}"#,
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct O2DestinationSpec {
    /// Config this destination syncs through
    pub config_ref: ConfigRef,

    /// Whether alerts or pipelines use this destination
    pub kind: DestinationKind,

    /// Delivery transport
    #[serde(default)]
    pub transport_type: TransportType,

    /// Target URL (http transport)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// HTTP method (http transport)
    #[serde(default)]
    pub method: HttpMethod,

    /// Skip TLS verification when calling `url`
    #[serde(default)]
    pub skip_tls_verify: bool,

    /// Recipients (email transport)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub emails: Vec<String>,

    /// Name of the O2Template rendered into notifications (alert destinations only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_ref: Option<String>,

    /// Sink type (pipeline destinations only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination_type_name: Option<DestinationType>,

    /// Record encoding sent to the sink
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_format: Option<OutputFormat>,

    /// HTTP headers sent with every delivery
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,

    /// Sink-specific metadata (e.g. ddsource/ddtags for datadog)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

impl O2DestinationSpec {
    /// Case-insensitive header lookup
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Which resource family consumes a destination
#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DestinationKind {
    /// Notification target for alerts
    Alert,
    /// Forwarding target for pipelines
    Pipeline,
}

/// Delivery transport
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TransportType {
    /// Webhook-style HTTP delivery
    #[default]
    Http,
    /// Email delivery
    Email,
}

impl std::fmt::Display for TransportType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Http => write!(f, "http"),
            Self::Email => write!(f, "email"),
        }
    }
}

/// HTTP method used for delivery
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HttpMethod {
    /// POST
    #[default]
    Post,
    /// PUT
    Put,
    /// GET
    Get,
}

impl std::fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Post => write!(f, "post"),
            Self::Put => write!(f, "put"),
            Self::Get => write!(f, "get"),
        }
    }
}

/// Pipeline sink types
#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DestinationType {
    /// Arbitrary HTTP sink
    Custom,
    /// Another OpenObserve instance
    Openobserve,
    /// Splunk HEC
    Splunk,
    /// New Relic
    Newrelic,
    /// Elasticsearch bulk API
    Elasticsearch,
    /// Dynatrace
    Dynatrace,
    /// Datadog
    Datadog,
}

/// A header a sink type requires
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RequiredHeader {
    /// Header name, matched case-insensitively
    pub name: &'static str,
    /// Required value prefix, if any
    pub value_prefix: Option<&'static str>,
}

impl DestinationType {
    /// Output format the sink requires; `None` accepts any format
    pub fn required_output_format(&self) -> Option<OutputFormat> {
        match self {
            Self::Custom => None,
            Self::Openobserve => Some(OutputFormat::Json),
            Self::Splunk => Some(OutputFormat::Nestedevent),
            Self::Newrelic => Some(OutputFormat::Json),
            Self::Elasticsearch => Some(OutputFormat::Esbulk),
            Self::Dynatrace => Some(OutputFormat::Json),
            Self::Datadog => Some(OutputFormat::Json),
        }
    }

    /// Auth header the sink requires
    pub fn required_header(&self) -> Option<RequiredHeader> {
        let (name, value_prefix) = match self {
            Self::Custom | Self::Elasticsearch => return None,
            Self::Openobserve => ("Authorization", Some("Basic ")),
            Self::Splunk => ("Authorization", Some("Splunk ")),
            Self::Newrelic => ("Api-Key", None),
            Self::Dynatrace => ("Authorization", Some("Api-Token ")),
            Self::Datadog => ("DD-API-KEY", None),
        };
        Some(RequiredHeader { name, value_prefix })
    }

    /// Metadata keys the sink requires to be non-empty
    pub fn required_metadata(&self) -> &'static [&'static str] {
        match self {
            Self::Datadog => &["ddsource", "ddtags"],
            _ => &[],
        }
    }
}

impl std::fmt::Display for DestinationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Custom => write!(f, "custom"),
            Self::Openobserve => write!(f, "openobserve"),
            Self::Splunk => write!(f, "splunk"),
            Self::Newrelic => write!(f, "newrelic"),
            Self::Elasticsearch => write!(f, "elasticsearch"),
            Self::Dynatrace => write!(f, "dynatrace"),
            Self::Datadog => write!(f, "datadog"),
        }
    }
}

/// Record encodings a pipeline destination can emit
#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// JSON array
    Json,
    /// Newline-delimited JSON
    Ndjson,
    /// Splunk HEC nested event
    Nestedevent,
    /// Elasticsearch bulk
    Esbulk,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Json => write!(f, "json"),
            Self::Ndjson => write!(f, "ndjson"),
            Self::Nestedevent => write!(f, "nestedevent"),
            Self::Esbulk => write!(f, "esbulk"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_format_table() {
        assert_eq!(
            DestinationType::Splunk.required_output_format(),
            Some(OutputFormat::Nestedevent)
        );
        assert_eq!(
            DestinationType::Elasticsearch.required_output_format(),
            Some(OutputFormat::Esbulk)
        );
        assert_eq!(
            DestinationType::Datadog.required_output_format(),
            Some(OutputFormat::Json)
        );
        assert_eq!(DestinationType::Custom.required_output_format(), None);
    }

    #[test]
    fn test_required_headers() {
        let splunk = DestinationType::Splunk.required_header().unwrap();
        assert_eq!(splunk.name, "Authorization");
        assert_eq!(splunk.value_prefix, Some("Splunk "));

        let datadog = DestinationType::Datadog.required_header().unwrap();
        assert_eq!(datadog.name, "DD-API-KEY");
        assert_eq!(datadog.value_prefix, None);

        assert!(DestinationType::Custom.required_header().is_none());
    }

    #[test]
    fn test_header_lookup_is_case_insensitive() {
        let spec: O2DestinationSpec = serde_json::from_value(serde_json::json!({
            "configRef": {"name": "main"},
            "kind": "pipeline",
            "destinationTypeName": "datadog",
            "outputFormat": "json",
            "headers": {"dd-api-key": "x"}
        }))
        .unwrap();
        assert_eq!(spec.header("DD-API-KEY"), Some("x"));
        assert_eq!(spec.transport_type, TransportType::Http);
        assert_eq!(spec.method, HttpMethod::Post);
    }
}
