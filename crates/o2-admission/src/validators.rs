//! Kind-specific structural rules
//!
//! One [`KindValidator`] per resource kind, each checked in isolation. The
//! [`AdmissionValidator`](crate::AdmissionValidator) picks the validator for
//! the candidate's kind from its registry.

use async_trait::async_trait;
use o2_common::crd::{
    DestinationKind, NodeKind, O2AlertSpec, O2ConfigSpec, O2DashboardSpec, O2DestinationSpec,
    O2FunctionSpec, O2PipelineSpec, O2TemplateSpec, QueryType, StreamType, TransportType,
};
use o2_common::graph::{validate_pipeline, SOURCE_NODE_ID};
use o2_common::resource::AnySpec;
use o2_common::{Error, ManagedResource, ResourceKind, Result};
use serde_json::Value;
use tracing::debug;

use crate::deps::DependencyLookup;

/// Validates the spec of one resource kind
#[async_trait]
pub trait KindValidator: Send + Sync {
    /// Kind this validator handles
    fn kind(&self) -> ResourceKind;

    /// Check `candidate`, consulting `deps` for referenced resources
    async fn validate(&self, candidate: &ManagedResource, deps: &dyn DependencyLookup)
        -> Result<()>;
}

/// Every built-in validator
pub fn builtin_validators() -> Vec<Box<dyn KindValidator>> {
    vec![
        Box::new(ConfigValidator),
        Box::new(AlertValidator),
        Box::new(PipelineValidator),
        Box::new(FunctionValidator),
        Box::new(DestinationValidator),
        Box::new(TemplateValidator),
        Box::new(DashboardValidator),
    ]
}

fn invalid(candidate: &ManagedResource, field: &str, message: impl Into<String>) -> Error {
    Error::validation_for_field(candidate.key.to_string(), field, message)
}

fn wrong_kind(candidate: &ManagedResource, expected: ResourceKind) -> Error {
    Error::internal_with_context(
        "admission",
        format!("{} routed to the {expected} validator", candidate.key),
    )
}

// =============================================================================
// Config
// =============================================================================

/// O2Config rules
pub struct ConfigValidator;

impl ConfigValidator {
    fn check(candidate: &ManagedResource, spec: &O2ConfigSpec) -> Result<()> {
        match url::Url::parse(&spec.endpoint) {
            Ok(u) if matches!(u.scheme(), "http" | "https") => {}
            Ok(u) => {
                return Err(invalid(
                    candidate,
                    "spec.endpoint",
                    format!("endpoint scheme must be http or https, got {}", u.scheme()),
                ))
            }
            Err(e) => {
                return Err(invalid(
                    candidate,
                    "spec.endpoint",
                    format!("invalid endpoint {}: {e}", spec.endpoint),
                ))
            }
        }
        if spec.organization.trim().is_empty() {
            return Err(invalid(candidate, "spec.organization", "organization is required"));
        }
        if spec.credential_ref.name.trim().is_empty() {
            return Err(invalid(
                candidate,
                "spec.credentialRef.name",
                "credentialRef.name is required",
            ));
        }
        if let Some(limit) = &spec.rate_limit {
            if limit.requests_per_second == 0 || limit.burst == 0 {
                return Err(invalid(
                    candidate,
                    "spec.rateLimit",
                    "rateLimit requestsPerSecond and burst must be at least 1",
                ));
            }
        }
        if spec.max_connections == Some(0) {
            return Err(invalid(
                candidate,
                "spec.maxConnections",
                "maxConnections must be at least 1",
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl KindValidator for ConfigValidator {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Config
    }

    async fn validate(&self, candidate: &ManagedResource, _: &dyn DependencyLookup) -> Result<()> {
        match &candidate.spec {
            AnySpec::Config(spec) => Self::check(candidate, spec),
            _ => Err(wrong_kind(candidate, self.kind())),
        }
    }
}

// =============================================================================
// Destination
// =============================================================================

/// O2Destination rules: transport fields, template reference, and the
/// output format, headers and metadata each destination type requires
pub struct DestinationValidator;

impl DestinationValidator {
    fn check_transport(candidate: &ManagedResource, spec: &O2DestinationSpec) -> Result<()> {
        match spec.transport_type {
            TransportType::Http => {
                let url = spec.url.as_deref().unwrap_or_default();
                if url.is_empty() {
                    return Err(invalid(candidate, "spec.url", "url is required for http destinations"));
                }
                if url::Url::parse(url).is_err() {
                    return Err(invalid(candidate, "spec.url", format!("invalid url {url}")));
                }
            }
            TransportType::Email => {
                if spec.kind == DestinationKind::Pipeline {
                    return Err(invalid(
                        candidate,
                        "spec.transportType",
                        "pipeline destinations only support http transport",
                    ));
                }
                if spec.emails.is_empty() {
                    return Err(invalid(
                        candidate,
                        "spec.emails",
                        "emails are required for email destinations",
                    ));
                }
            }
        }
        Ok(())
    }

    fn check_pipeline_type(candidate: &ManagedResource, spec: &O2DestinationSpec) -> Result<()> {
        if spec.template_ref.as_deref().is_some_and(|t| !t.is_empty()) {
            return Err(invalid(
                candidate,
                "spec.templateRef",
                "pipeline destinations must not set templateRef",
            ));
        }
        let Some(type_name) = spec.destination_type_name else {
            return Err(invalid(
                candidate,
                "spec.destinationTypeName",
                "destinationTypeName is required for pipeline destinations",
            ));
        };

        let Some(format) = spec.output_format else {
            return Err(invalid(
                candidate,
                "spec.outputFormat",
                "outputFormat is required for pipeline destinations",
            ));
        };
        if let Some(required) = type_name.required_output_format() {
            if format != required {
                return Err(invalid(
                    candidate,
                    "spec.outputFormat",
                    format!("outputFormat must be {required} for {type_name} destinations"),
                ));
            }
        }

        if let Some(header) = type_name.required_header() {
            let value = spec.header(header.name).unwrap_or_default();
            let ok = match header.value_prefix {
                Some(prefix) => {
                    value
                        .get(..prefix.len())
                        .is_some_and(|p| p.eq_ignore_ascii_case(prefix))
                        && value
                            .get(prefix.len()..)
                            .is_some_and(|token| !token.trim().is_empty())
                }
                None => !value.trim().is_empty(),
            };
            if !ok {
                let expected = match header.value_prefix {
                    Some(prefix) => format!("{}: {}<token>", header.name, prefix),
                    None => header.name.to_string(),
                };
                return Err(invalid(
                    candidate,
                    "spec.headers",
                    format!("header {expected} required for {type_name} destinations"),
                ));
            }
        }

        let required = type_name.required_metadata();
        let missing = required
            .iter()
            .any(|k| spec.metadata.get(*k).is_none_or(|v| v.trim().is_empty()));
        if missing {
            return Err(invalid(
                candidate,
                "spec.metadata",
                format!("{} required in metadata", required.join(" and ")),
            ));
        }
        Ok(())
    }

    async fn check_alert_template(
        candidate: &ManagedResource,
        spec: &O2DestinationSpec,
        deps: &dyn DependencyLookup,
    ) -> Result<()> {
        if spec.destination_type_name.is_some() {
            return Err(invalid(
                candidate,
                "spec.destinationTypeName",
                "alert destinations must not set destinationTypeName",
            ));
        }
        let template = spec.template_ref.as_deref().unwrap_or_default();
        if template.is_empty() {
            return Err(invalid(
                candidate,
                "spec.templateRef",
                "templateRef is required for alert destinations",
            ));
        }
        if !deps.template_exists(candidate, template).await? {
            let config = deps.ready_config(candidate).await?;
            let org = match &config.spec {
                AnySpec::Config(c) => c.organization.clone(),
                _ => config.name().to_string(),
            };
            return Err(Error::dependency_missing(
                candidate.key.to_string(),
                format!("Template/{}/{template}", candidate.namespace()),
                format!("not found in organization {org}"),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl KindValidator for DestinationValidator {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Destination
    }

    async fn validate(&self, candidate: &ManagedResource, deps: &dyn DependencyLookup) -> Result<()> {
        let AnySpec::Destination(spec) = &candidate.spec else {
            return Err(wrong_kind(candidate, self.kind()));
        };
        Self::check_transport(candidate, spec)?;
        match spec.kind {
            DestinationKind::Pipeline => Self::check_pipeline_type(candidate, spec),
            DestinationKind::Alert => Self::check_alert_template(candidate, spec, deps).await,
        }
    }
}

// =============================================================================
// Template
// =============================================================================

/// O2Template rules
pub struct TemplateValidator;

/// Whether every `{` has a matching `}`
fn balanced_placeholders(body: &str) -> bool {
    let mut depth = 0usize;
    for c in body.chars() {
        match c {
            '{' => depth += 1,
            '}' => match depth.checked_sub(1) {
                Some(d) => depth = d,
                None => return false,
            },
            _ => {}
        }
    }
    depth == 0
}

impl TemplateValidator {
    fn check(candidate: &ManagedResource, spec: &O2TemplateSpec) -> Result<()> {
        if spec.body.trim().is_empty() {
            return Err(invalid(candidate, "spec.body", "body is required"));
        }
        if !balanced_placeholders(&spec.body) {
            return Err(invalid(candidate, "spec.body", "unbalanced braces in body"));
        }
        let title = spec.title.as_deref().unwrap_or_default();
        if spec.transport_type == TransportType::Email && title.trim().is_empty() {
            return Err(invalid(
                candidate,
                "spec.title",
                "title is required for email templates",
            ));
        }
        if !balanced_placeholders(title) {
            return Err(invalid(candidate, "spec.title", "unbalanced braces in title"));
        }
        Ok(())
    }
}

#[async_trait]
impl KindValidator for TemplateValidator {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Template
    }

    async fn validate(&self, candidate: &ManagedResource, _: &dyn DependencyLookup) -> Result<()> {
        match &candidate.spec {
            AnySpec::Template(spec) => Self::check(candidate, spec),
            _ => Err(wrong_kind(candidate, self.kind())),
        }
    }
}

// =============================================================================
// Alert
// =============================================================================

/// O2Alert rules. The destination ceiling is enforced by the admission
/// validator after these.
pub struct AlertValidator;

impl AlertValidator {
    fn check(candidate: &ManagedResource, spec: &O2AlertSpec) -> Result<()> {
        if spec.stream_name.trim().is_empty() {
            return Err(invalid(candidate, "spec.streamName", "streamName is required"));
        }

        let query = &spec.query_condition;
        match query.type_ {
            QueryType::Custom if query.conditions.is_empty() => {
                return Err(invalid(
                    candidate,
                    "spec.queryCondition.conditions",
                    "custom query conditions require at least one condition",
                ));
            }
            QueryType::Sql if query.sql.as_deref().is_none_or(|s| s.trim().is_empty()) => {
                return Err(invalid(
                    candidate,
                    "spec.queryCondition.sql",
                    "sql query conditions require sql",
                ));
            }
            QueryType::Promql => {
                if query.promql.as_deref().is_none_or(|s| s.trim().is_empty()) {
                    return Err(invalid(
                        candidate,
                        "spec.queryCondition.promql",
                        "promql query conditions require promql",
                    ));
                }
                if spec.stream_type != StreamType::Metrics {
                    return Err(invalid(
                        candidate,
                        "spec.streamType",
                        "promql alerts require streamType metrics",
                    ));
                }
            }
            _ => {}
        }

        match (&spec.schedule, spec.is_real_time) {
            (Some(_), true) => {
                return Err(invalid(
                    candidate,
                    "spec.schedule",
                    "real-time alerts must not set a schedule",
                ))
            }
            (None, false) => {
                return Err(invalid(
                    candidate,
                    "spec.schedule",
                    "scheduled alerts require a schedule",
                ))
            }
            (Some(s), false) if s.frequency == 0 || s.period == 0 => {
                return Err(invalid(
                    candidate,
                    "spec.schedule",
                    "schedule frequency and period must be greater than 0",
                ))
            }
            _ => {}
        }

        if spec.destinations.is_empty() {
            return Err(invalid(
                candidate,
                "spec.destinations",
                "at least one destination is required",
            ));
        }
        let mut seen = std::collections::BTreeSet::new();
        for d in &spec.destinations {
            if !seen.insert(d.as_str()) {
                return Err(invalid(
                    candidate,
                    "spec.destinations",
                    format!("duplicate destination {d}"),
                ));
            }
        }

        if let Some(dedup) = &spec.deduplication {
            if dedup.enabled && dedup.time_window_minutes == Some(0) {
                return Err(invalid(
                    candidate,
                    "spec.deduplication.timeWindowMinutes",
                    "deduplication time window must be greater than 0",
                ));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl KindValidator for AlertValidator {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Alert
    }

    async fn validate(&self, candidate: &ManagedResource, _: &dyn DependencyLookup) -> Result<()> {
        match &candidate.spec {
            AnySpec::Alert(spec) => Self::check(candidate, spec),
            _ => Err(wrong_kind(candidate, self.kind())),
        }
    }
}

// =============================================================================
// Pipeline
// =============================================================================

/// O2Pipeline rules: graph shape, then per-node configuration
pub struct PipelineValidator;

impl PipelineValidator {
    fn check(candidate: &ManagedResource, spec: &O2PipelineSpec) -> Result<()> {
        if spec.source.stream_name.trim().is_empty() {
            return Err(invalid(
                candidate,
                "spec.source.streamName",
                "source streamName is required",
            ));
        }

        validate_pipeline(spec).map_err(|e| invalid(candidate, "spec.edges", e.to_string()))?;

        for node in spec.nodes.iter().filter(|n| n.id != SOURCE_NODE_ID) {
            let cfg = &node.config;
            let missing = match node.kind {
                NodeKind::Stream if cfg.stream_name.is_none() => Some("streamName"),
                NodeKind::Condition if cfg.conditions.is_empty() => Some("conditions"),
                NodeKind::Query if cfg.sql.is_none() => Some("sql"),
                NodeKind::Function if cfg.function_ref.is_none() => Some("functionRef"),
                NodeKind::Custom if cfg.destination_ref.is_none() => Some("destinationRef"),
                _ => None,
            };
            if let Some(field) = missing {
                return Err(invalid(
                    candidate,
                    "spec.nodes",
                    format!("{} node {} requires config.{field}", node.kind, node.id),
                ));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl KindValidator for PipelineValidator {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Pipeline
    }

    async fn validate(&self, candidate: &ManagedResource, _: &dyn DependencyLookup) -> Result<()> {
        match &candidate.spec {
            AnySpec::Pipeline(spec) => Self::check(candidate, spec),
            _ => Err(wrong_kind(candidate, self.kind())),
        }
    }
}

// =============================================================================
// Function
// =============================================================================

/// O2Function rules: every declared test case must produce its expected output
pub struct FunctionValidator;

impl FunctionValidator {
    async fn run_tests(
        candidate: &ManagedResource,
        spec: &O2FunctionSpec,
        deps: &dyn DependencyLookup,
    ) -> Result<()> {
        for (i, case) in spec.test_cases.iter().enumerate() {
            let actual = match deps
                .run_function(candidate, &spec.transform_expr, &case.input)
                .await
            {
                Ok(v) => v,
                Err(Error::RemoteRejected { message, .. }) => {
                    return Err(invalid(
                        candidate,
                        "spec.transformExpr",
                        format!("test case {i} could not run: {message}"),
                    ))
                }
                Err(e) => return Err(e),
            };
            if !outputs_match(&actual, &case.expected_output) {
                return Err(invalid(
                    candidate,
                    "spec.testCases",
                    format!(
                        "test case {i} failed: expected {}, got {actual}",
                        case.expected_output
                    ),
                ));
            }
            debug!(resource = %candidate.key, case = i, "Function test case passed");
        }
        Ok(())
    }
}

/// Structural equality; numbers compare by value so `1` matches `1.0`
fn outputs_match(actual: &Value, expected: &Value) -> bool {
    match (actual, expected) {
        (Value::Number(a), Value::Number(b)) => a == b || a.as_f64() == b.as_f64(),
        (Value::Array(a), Value::Array(b)) => {
            a.len() == b.len() && a.iter().zip(b).all(|(x, y)| outputs_match(x, y))
        }
        (Value::Object(a), Value::Object(b)) => {
            a.len() == b.len()
                && a.iter()
                    .all(|(k, v)| b.get(k).is_some_and(|w| outputs_match(v, w)))
        }
        _ => actual == expected,
    }
}

#[async_trait]
impl KindValidator for FunctionValidator {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Function
    }

    async fn validate(&self, candidate: &ManagedResource, deps: &dyn DependencyLookup) -> Result<()> {
        let AnySpec::Function(spec) = &candidate.spec else {
            return Err(wrong_kind(candidate, self.kind()));
        };
        if spec.transform_expr.trim().is_empty() {
            return Err(invalid(
                candidate,
                "spec.transformExpr",
                "transformExpr is required",
            ));
        }
        Self::run_tests(candidate, spec, deps).await
    }
}

// =============================================================================
// Dashboard
// =============================================================================

/// O2Dashboard rules
pub struct DashboardValidator;

impl DashboardValidator {
    fn check(candidate: &ManagedResource, spec: &O2DashboardSpec) -> Result<()> {
        if spec.title.trim().is_empty() {
            return Err(invalid(candidate, "spec.title", "title is required"));
        }
        if spec.folder.trim().is_empty() {
            return Err(invalid(candidate, "spec.folder", "folder must not be empty"));
        }
        if !matches!(spec.definition, Value::Object(_) | Value::Null) {
            return Err(invalid(
                candidate,
                "spec.definition",
                "definition must be a JSON object",
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl KindValidator for DashboardValidator {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Dashboard
    }

    async fn validate(&self, candidate: &ManagedResource, _: &dyn DependencyLookup) -> Result<()> {
        match &candidate.spec {
            AnySpec::Dashboard(spec) => Self::check(candidate, spec),
            _ => Err(wrong_kind(candidate, self.kind())),
        }
    }
}
