//! Backend wire format for each remote kind
//!
//! Payloads only contain fields the operator manages, so the observed remote
//! object can be projected onto them for drift detection. Optional fields
//! are omitted rather than sent as `null`.

use o2_common::crd::{
    DestinationKind, NodeKind, O2AlertSpec, O2DashboardSpec, O2DestinationSpec, O2FunctionSpec,
    O2PipelineSpec, O2TemplateSpec, PipelineNode,
};
use o2_common::resource::AnySpec;
use o2_common::{Error, ResourceKind, Result};
use serde_json::{json, Map, Value};

/// How the backend identifies objects of a kind
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IdScheme {
    /// Remote id is the resource name
    Name,
    /// Remote id is assigned by the backend on create
    ServerAssigned,
}

/// Path segment and identity scheme of a kind that exists remotely
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RemoteKind {
    /// Resource kind
    pub kind: ResourceKind,
    /// Path under `/api/{org}/`
    pub segment: &'static str,
    /// Identity scheme
    pub id_scheme: IdScheme,
    /// Field holding the display name in list responses
    pub name_field: &'static str,
}

impl RemoteKind {
    /// Remote metadata for `kind`; `None` for Config, which has no remote object
    pub fn of(kind: ResourceKind) -> Option<Self> {
        let (segment, id_scheme, name_field) = match kind {
            ResourceKind::Config => return None,
            ResourceKind::Alert => ("alerts", IdScheme::ServerAssigned, "name"),
            ResourceKind::Pipeline => ("pipelines", IdScheme::ServerAssigned, "name"),
            ResourceKind::Function => ("functions", IdScheme::Name, "name"),
            ResourceKind::Destination => ("alerts/destinations", IdScheme::Name, "name"),
            ResourceKind::Template => ("alerts/templates", IdScheme::Name, "name"),
            ResourceKind::Dashboard => ("dashboards", IdScheme::ServerAssigned, "title"),
        };
        Some(Self {
            kind,
            segment,
            id_scheme,
            name_field,
        })
    }

    /// Like [`RemoteKind::of`], failing for Config
    pub fn require(kind: ResourceKind) -> Result<Self> {
        Self::of(kind).ok_or_else(|| {
            Error::internal_with_context("remote", format!("{kind} has no remote object"))
        })
    }
}

/// Fields a create response may carry the server-assigned id in
const ID_FIELDS: [&str; 5] = ["id", "alert_id", "pipeline_id", "dashboard_id", "v"];

/// Read a server-assigned id from a create or list response
pub fn extract_id(body: &Value) -> Option<String> {
    ID_FIELDS.iter().find_map(|field| match body.get(field) {
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

/// Build the backend payload for a resource named `name`
pub fn build_payload(name: &str, spec: &AnySpec) -> Result<Value> {
    match spec {
        AnySpec::Config(_) => Err(Error::internal_with_context(
            "payload",
            "O2Config has no remote payload",
        )),
        AnySpec::Alert(s) => Ok(alert_payload(name, s)),
        AnySpec::Pipeline(s) => Ok(pipeline_payload(name, s)),
        AnySpec::Function(s) => Ok(function_payload(name, s)),
        AnySpec::Destination(s) => Ok(destination_payload(name, s)),
        AnySpec::Template(s) => Ok(template_payload(name, s)),
        AnySpec::Dashboard(s) => Ok(dashboard_payload(s)),
    }
}

fn insert_opt(map: &mut Map<String, Value>, key: &str, value: Option<Value>) {
    if let Some(v) = value {
        map.insert(key.to_string(), v);
    }
}

fn alert_payload(name: &str, spec: &O2AlertSpec) -> Value {
    let mut query = Map::new();
    query.insert("type".into(), json!(spec.query_condition.type_.to_string()));
    if !spec.query_condition.conditions.is_empty() {
        query.insert("conditions".into(), json!(spec.query_condition.conditions));
    }
    insert_opt(&mut query, "sql", spec.query_condition.sql.as_ref().map(|s| json!(s)));
    insert_opt(
        &mut query,
        "promql",
        spec.query_condition.promql.as_ref().map(|s| json!(s)),
    );

    let mut body = Map::new();
    body.insert("name".into(), json!(name));
    body.insert("stream_name".into(), json!(spec.stream_name));
    body.insert("stream_type".into(), json!(spec.stream_type.to_string()));
    body.insert("is_real_time".into(), json!(spec.is_real_time));
    body.insert("query_condition".into(), Value::Object(query));
    body.insert("destinations".into(), json!(spec.destinations));
    body.insert("enabled".into(), json!(spec.enabled));
    if let Some(schedule) = spec.schedule.as_ref().filter(|_| !spec.is_real_time) {
        let mut trigger = Map::new();
        trigger.insert("frequency".into(), json!(schedule.frequency));
        trigger.insert("period".into(), json!(schedule.period));
        insert_opt(&mut trigger, "cron", schedule.cron.as_ref().map(|c| json!(c)));
        body.insert("trigger_condition".into(), Value::Object(trigger));
    }
    if let Some(dedup) = &spec.deduplication {
        let mut d = Map::new();
        d.insert("enabled".into(), json!(dedup.enabled));
        d.insert("fingerprint_columns".into(), json!(dedup.fingerprint_fields));
        insert_opt(
            &mut d,
            "time_window_minutes",
            dedup.time_window_minutes.map(|m| json!(m)),
        );
        body.insert("deduplication".into(), Value::Object(d));
    }
    insert_opt(&mut body, "description", spec.description.as_ref().map(|d| json!(d)));
    Value::Object(body)
}

fn destination_payload(name: &str, spec: &O2DestinationSpec) -> Value {
    let mut body = Map::new();
    body.insert("name".into(), json!(name));
    body.insert("type".into(), json!(spec.transport_type.to_string()));
    insert_opt(&mut body, "url", spec.url.as_ref().map(|u| json!(u)));
    body.insert("method".into(), json!(spec.method.to_string()));
    body.insert("skip_tls_verify".into(), json!(spec.skip_tls_verify));
    if !spec.headers.is_empty() {
        body.insert("headers".into(), json!(spec.headers));
    }
    if !spec.emails.is_empty() {
        body.insert("emails".into(), json!(spec.emails));
    }
    match spec.kind {
        DestinationKind::Alert => {
            insert_opt(&mut body, "template", spec.template_ref.as_ref().map(|t| json!(t)));
        }
        DestinationKind::Pipeline => {
            insert_opt(
                &mut body,
                "destination_type_name",
                spec.destination_type_name.map(|t| json!(t.to_string())),
            );
            insert_opt(
                &mut body,
                "output_format",
                spec.output_format.map(|f| json!(f.to_string())),
            );
            if !spec.metadata.is_empty() {
                body.insert("metadata".into(), json!(spec.metadata));
            }
        }
    }
    Value::Object(body)
}

fn template_payload(name: &str, spec: &O2TemplateSpec) -> Value {
    let mut body = Map::new();
    body.insert("name".into(), json!(name));
    body.insert("type".into(), json!(spec.transport_type.to_string()));
    insert_opt(&mut body, "title", spec.title.as_ref().map(|t| json!(t)));
    body.insert("body".into(), json!(spec.body));
    Value::Object(body)
}

fn function_payload(name: &str, spec: &O2FunctionSpec) -> Value {
    json!({
        "name": name,
        "function": spec.transform_expr,
        "params": "row",
        "transType": 0,
    })
}

fn pipeline_node(node: &PipelineNode) -> Value {
    let mut data = Map::new();
    data.insert("node_type".into(), json!(node.kind.to_string()));
    let cfg = &node.config;
    match node.kind {
        NodeKind::Stream => {
            insert_opt(&mut data, "stream_name", cfg.stream_name.as_ref().map(|s| json!(s)));
            insert_opt(
                &mut data,
                "stream_type",
                cfg.stream_type.map(|t| json!(t.to_string())),
            );
        }
        NodeKind::Condition => {
            data.insert("conditions".into(), json!(cfg.conditions));
        }
        NodeKind::Query => {
            insert_opt(&mut data, "query", cfg.sql.as_ref().map(|s| json!(s)));
        }
        NodeKind::Function => {
            insert_opt(&mut data, "name", cfg.function_ref.as_ref().map(|f| json!(f)));
        }
        NodeKind::Custom => {
            insert_opt(
                &mut data,
                "destination_name",
                cfg.destination_ref.as_ref().map(|d| json!(d)),
            );
        }
    }
    json!({ "id": node.id, "data": Value::Object(data) })
}

fn pipeline_payload(name: &str, spec: &O2PipelineSpec) -> Value {
    let nodes: Vec<Value> = spec.nodes.iter().map(pipeline_node).collect();
    let edges: Vec<Value> = spec
        .edges
        .iter()
        .map(|e| {
            let mut edge = Map::new();
            edge.insert(
                "id".into(),
                json!(format!("e{}-{}", e.source_node_id, e.target_node_id)),
            );
            edge.insert("source".into(), json!(e.source_node_id));
            edge.insert("target".into(), json!(e.target_node_id));
            insert_opt(&mut edge, "condition", e.condition_predicate.map(|p| json!(p)));
            Value::Object(edge)
        })
        .collect();

    let mut body = Map::new();
    body.insert("name".into(), json!(name));
    insert_opt(&mut body, "description", spec.description.as_ref().map(|d| json!(d)));
    body.insert("enabled".into(), json!(spec.enabled));
    body.insert(
        "source".into(),
        json!({
            "source_type": "realtime",
            "stream_name": spec.source.stream_name,
            "stream_type": spec.source.stream_type.to_string(),
        }),
    );
    body.insert("nodes".into(), Value::Array(nodes));
    body.insert("edges".into(), Value::Array(edges));
    Value::Object(body)
}

fn dashboard_payload(spec: &O2DashboardSpec) -> Value {
    let mut body = match &spec.definition {
        Value::Object(def) => def.clone(),
        _ => Map::new(),
    };
    body.insert("title".into(), json!(spec.title));
    insert_opt(&mut body, "description", spec.description.as_ref().map(|d| json!(d)));
    Value::Object(body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use o2_common::crd::{
        AlertSchedule, DestinationType, HttpMethod, NodeConfig, OutputFormat, PipelineEdge,
        PipelineSource, QueryCondition, QueryType, StreamType, TransportType,
    };
    use o2_common::resource::fixtures;

    #[test]
    fn test_remote_kinds() {
        assert!(RemoteKind::of(ResourceKind::Config).is_none());
        let dest = RemoteKind::of(ResourceKind::Destination).unwrap();
        assert_eq!(dest.segment, "alerts/destinations");
        assert_eq!(dest.id_scheme, IdScheme::Name);
        let alert = RemoteKind::of(ResourceKind::Alert).unwrap();
        assert_eq!(alert.id_scheme, IdScheme::ServerAssigned);
        assert_eq!(RemoteKind::of(ResourceKind::Dashboard).unwrap().name_field, "title");
        assert!(RemoteKind::require(ResourceKind::Config).is_err());
    }

    #[test]
    fn test_extract_id_field_order() {
        assert_eq!(extract_id(&json!({"id": "a1"})), Some("a1".to_string()));
        assert_eq!(extract_id(&json!({"alert_id": "x9"})), Some("x9".to_string()));
        assert_eq!(extract_id(&json!({"v": 7})), Some("7".to_string()));
        assert_eq!(extract_id(&json!({"id": "", "pipeline_id": "p"})), Some("p".to_string()));
        assert_eq!(extract_id(&json!({"message": "ok"})), None);
    }

    #[test]
    fn test_alert_payload_omits_schedule_for_real_time() {
        let spec = O2AlertSpec {
            config_ref: fixtures::config_ref(),
            stream_name: "k8s".to_string(),
            stream_type: StreamType::Logs,
            is_real_time: true,
            query_condition: QueryCondition {
                type_: QueryType::Sql,
                conditions: vec![],
                sql: Some("select count(*) from k8s".to_string()),
                promql: None,
            },
            schedule: Some(AlertSchedule {
                frequency: 5,
                period: 5,
                cron: None,
            }),
            destinations: vec!["oncall".to_string()],
            deduplication: None,
            enabled: true,
            description: None,
        };
        let body = build_payload("cpu", &AnySpec::Alert(spec)).unwrap();
        assert_eq!(body["name"], "cpu");
        assert_eq!(body["query_condition"]["type"], "sql");
        assert_eq!(body["destinations"], json!(["oncall"]));
        assert!(body.get("trigger_condition").is_none());
        assert!(body.get("description").is_none());
    }

    #[test]
    fn test_pipeline_destination_payload() {
        let spec = O2DestinationSpec {
            config_ref: fixtures::config_ref(),
            kind: DestinationKind::Pipeline,
            transport_type: TransportType::Http,
            url: Some("https://splunk.example.com".to_string()),
            method: HttpMethod::Post,
            skip_tls_verify: false,
            emails: vec![],
            template_ref: None,
            destination_type_name: Some(DestinationType::Splunk),
            output_format: Some(OutputFormat::Nestedevent),
            headers: BTreeMap::from([("Authorization".to_string(), "Splunk t".to_string())]),
            metadata: BTreeMap::new(),
        };
        let body = build_payload("splunk", &AnySpec::Destination(spec)).unwrap();
        assert_eq!(body["destination_type_name"], "splunk");
        assert_eq!(body["output_format"], "nestedevent");
        assert_eq!(body["headers"]["Authorization"], "Splunk t");
        assert!(body.get("template").is_none());
        assert!(body.get("metadata").is_none());
    }

    #[test]
    fn test_pipeline_payload_shape() {
        let spec = O2PipelineSpec {
            config_ref: fixtures::config_ref(),
            description: None,
            enabled: true,
            source: PipelineSource {
                stream_name: "k8s".to_string(),
                stream_type: StreamType::Logs,
            },
            nodes: vec![PipelineNode {
                id: "fn".to_string(),
                kind: NodeKind::Function,
                config: NodeConfig {
                    function_ref: Some("redact".to_string()),
                    ..Default::default()
                },
            }],
            edges: vec![PipelineEdge {
                source_node_id: "source".to_string(),
                target_node_id: "fn".to_string(),
                condition_predicate: None,
            }],
            condition_fallthrough: Default::default(),
        };
        let body = build_payload("ingest", &AnySpec::Pipeline(spec)).unwrap();
        assert_eq!(body["source"]["stream_name"], "k8s");
        assert_eq!(body["nodes"][0]["data"]["node_type"], "function");
        assert_eq!(body["nodes"][0]["data"]["name"], "redact");
        assert_eq!(body["edges"][0]["source"], "source");
        assert!(body["edges"][0].get("condition").is_none());
    }

    #[test]
    fn test_dashboard_title_overrides_definition() {
        let spec = O2DashboardSpec {
            config_ref: fixtures::config_ref(),
            title: "Latency".to_string(),
            description: None,
            folder: "default".to_string(),
            definition: json!({"title": "old", "panels": [{"id": "p1"}]}),
        };
        let body = build_payload("latency", &AnySpec::Dashboard(spec)).unwrap();
        assert_eq!(body["title"], "Latency");
        assert_eq!(body["panels"][0]["id"], "p1");
    }

    #[test]
    fn test_config_has_no_payload() {
        let spec = AnySpec::Config(fixtures::config_spec());
        assert!(build_payload("main", &spec).is_err());
    }
}
