//! HTTP client for the OpenObserve backend
//!
//! [`RemoteSync`] is the typed create/update/get/delete surface the
//! reconcile loop and admission path use. [`BackendClient`] implements it
//! with reqwest, HTTP Basic auth, bounded retry for transient failures and
//! the per-Config [`RequestGate`].

use std::sync::Arc;

use async_trait::async_trait;
#[cfg(any(test, feature = "test-utils"))]
use mockall::automock;
use o2_common::retry::{retry_with_backoff, RetryConfig};
use o2_common::settings::OperatorSettings;
use o2_common::{Error, ResourceKind, Result};
use reqwest::Method;
use serde_json::{json, Value};
use tracing::{debug, info};
use url::Url;
use zeroize::Zeroizing;

use crate::config::ClientDescriptor;
use crate::limiter::RequestGate;
use crate::payload::{extract_id, IdScheme, RemoteKind};

/// Result of a create call
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Created {
    /// Identifier of the remote object
    pub remote_id: String,
    /// The object already existed and was adopted instead of created
    pub adopted: bool,
}

/// Result of a delete call
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Deleted {
    /// The backend removed the object
    Removed,
    /// The object was already gone
    NotFound,
}

/// Typed operations against one backend organization
#[cfg_attr(any(test, feature = "test-utils"), automock)]
#[async_trait]
pub trait RemoteSync: Send + Sync {
    /// Create an object, adopting an existing one with the same name
    async fn create(&self, kind: ResourceKind, name: &str, desired: &Value) -> Result<Created>;

    /// Replace the object identified by `remote_id`
    async fn update(&self, kind: ResourceKind, remote_id: &str, desired: &Value) -> Result<()>;

    /// Read an object; `None` when it does not exist
    async fn get(&self, kind: ResourceKind, remote_id: &str) -> Result<Option<Value>>;

    /// Delete an object
    async fn delete(&self, kind: ResourceKind, remote_id: &str) -> Result<Deleted>;

    /// Find the remote id of the object called `name`
    async fn find_by_name(&self, kind: ResourceKind, name: &str) -> Result<Option<String>>;

    /// Run a transform against one input event and return the output event
    async fn test_function(&self, transform_expr: &str, input: &Value) -> Result<Value>;

    /// Check that the endpoint answers and accepts the credentials
    async fn verify_connection(&self) -> Result<()>;
}

#[derive(Debug)]
struct RawResponse {
    status: u16,
    body: String,
}

impl RawResponse {
    fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    fn is_not_found(&self) -> bool {
        self.status == 404
    }

    fn already_exists(&self) -> bool {
        self.status == 409
            || (self.status == 400 && self.body.to_ascii_lowercase().contains("already exists"))
    }

    fn json(&self) -> Value {
        if self.body.trim().is_empty() {
            return Value::Null;
        }
        serde_json::from_str(&self.body).unwrap_or(Value::Null)
    }

    fn rejected(self, operation: &str) -> Error {
        Error::remote_rejected(operation, self.status, truncate(&self.body))
    }
}

fn truncate(body: &str) -> String {
    const MAX: usize = 512;
    if body.len() <= MAX {
        return body.to_string();
    }
    let mut end = MAX;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &body[..end])
}

fn transport_error(operation: &str, e: reqwest::Error) -> Error {
    let message = if e.is_timeout() {
        format!("request timed out: {e}")
    } else if e.is_connect() {
        format!("connection failed: {e}")
    } else {
        e.to_string()
    };
    Error::remote_transient(operation, message, e.status().map(|s| s.as_u16()))
}

/// Entries of a list response: a bare array or the arrays inside an object
fn list_entries(body: &Value) -> Vec<&Value> {
    match body {
        Value::Array(items) => items.iter().collect(),
        Value::Object(map) => map
            .values()
            .filter_map(Value::as_array)
            .flatten()
            .collect(),
        _ => Vec::new(),
    }
}

/// Output event of a function test response
fn function_output(body: Value) -> Value {
    match body.get("results").and_then(|r| r.get(0)) {
        Some(first) => first.get("event").unwrap_or(first).clone(),
        None => body,
    }
}

/// reqwest-backed [`RemoteSync`] for one Config
pub struct BackendClient {
    http: reqwest::Client,
    endpoint: Url,
    organization: String,
    username: String,
    secret: Zeroizing<String>,
    retry: RetryConfig,
    gate: Arc<RequestGate>,
}

impl BackendClient {
    /// Build a client for `descriptor` with timeouts and retry from `settings`
    pub fn new(descriptor: &ClientDescriptor, settings: &OperatorSettings) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(settings.http_timeout())
            .pool_max_idle_per_host(descriptor.max_connections as usize)
            .danger_accept_invalid_certs(!descriptor.tls_verify)
            .build()
            .map_err(|e| {
                Error::internal_with_context("backend_client", format!("building HTTP client: {e}"))
            })?;

        let mut retry = settings.retry();
        retry.max_attempts = retry.max_attempts.max(1);

        Ok(Self {
            http,
            endpoint: descriptor.endpoint.clone(),
            organization: descriptor.organization.clone(),
            username: descriptor.username.clone(),
            secret: descriptor.secret.clone(),
            retry,
            gate: Arc::new(RequestGate::new(
                descriptor.rate_limit,
                descriptor.max_connections,
            )),
        })
    }

    /// Reject further requests through this client
    pub fn close(&self) {
        self.gate.close();
    }

    #[cfg(test)]
    pub(crate) fn gate(&self) -> &RequestGate {
        &self.gate
    }

    /// `{endpoint}/api/{org}/{segments...}`
    fn url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.endpoint.clone();
        {
            let mut path = url.path_segments_mut().map_err(|_| {
                Error::internal_with_context(
                    "backend_client",
                    format!("endpoint {} cannot carry a path", self.endpoint),
                )
            })?;
            path.pop_if_empty().push("api").push(&self.organization);
            for segment in segments {
                path.extend(segment.split('/'));
            }
        }
        Ok(url)
    }

    fn kind_url(&self, kind: &RemoteKind, id: Option<&str>) -> Result<Url> {
        match id {
            Some(id) => self.url(&[kind.segment, id]),
            None => self.url(&[kind.segment]),
        }
    }

    async fn send_once(
        &self,
        operation: &str,
        method: Method,
        url: Url,
        body: Option<&Value>,
    ) -> Result<RawResponse> {
        let _permit = self.gate.admit().await?;

        let mut request = self
            .http
            .request(method, url)
            .basic_auth(&self.username, Some(self.secret.as_str()));
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| transport_error(operation, e))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| transport_error(operation, e))?;

        match status {
            401 | 403 => Err(Error::remote_auth(
                self.endpoint.as_str(),
                status,
                truncate(&body),
            )),
            429 => Err(Error::remote_transient(
                operation,
                "throttled by backend",
                Some(status),
            )),
            s if s >= 500 => Err(Error::remote_transient(operation, truncate(&body), Some(s))),
            _ => Ok(RawResponse { status, body }),
        }
    }

    async fn send(
        &self,
        operation: &str,
        method: Method,
        url: Url,
        body: Option<&Value>,
    ) -> Result<RawResponse> {
        debug!(operation, url = %url, "Backend request");
        retry_with_backoff(
            &self.retry,
            operation,
            || self.send_once(operation, method.clone(), url.clone(), body),
            |e: &Error| matches!(e, Error::RemoteTransient { .. }),
        )
        .await
    }
}

#[async_trait]
impl RemoteSync for BackendClient {
    async fn create(&self, kind: ResourceKind, name: &str, desired: &Value) -> Result<Created> {
        let rk = RemoteKind::require(kind)?;
        let operation = format!("create {}", rk.segment);
        let response = self
            .send(&operation, Method::POST, self.kind_url(&rk, None)?, Some(desired))
            .await?;

        if response.is_success() {
            let remote_id = match rk.id_scheme {
                IdScheme::Name => name.to_string(),
                IdScheme::ServerAssigned => {
                    extract_id(&response.json()).unwrap_or_else(|| name.to_string())
                }
            };
            return Ok(Created {
                remote_id,
                adopted: false,
            });
        }

        if response.already_exists() {
            info!(kind = %kind, name, "Remote object already exists, adopting");
            let remote_id = self.find_by_name(kind, name).await?.ok_or_else(|| {
                Error::remote_conflict(
                    format!("{kind}/{name}"),
                    "backend reports the object exists but no object with that name is listed",
                )
            })?;
            return Ok(Created {
                remote_id,
                adopted: true,
            });
        }

        Err(response.rejected(&operation))
    }

    async fn update(&self, kind: ResourceKind, remote_id: &str, desired: &Value) -> Result<()> {
        let rk = RemoteKind::require(kind)?;
        let operation = format!("update {}", rk.segment);
        let response = self
            .send(
                &operation,
                Method::PUT,
                self.kind_url(&rk, Some(remote_id))?,
                Some(desired),
            )
            .await?;

        if response.is_success() {
            return Ok(());
        }
        if response.is_not_found() {
            // Next reconcile re-reads and takes the vanished-object path
            return Err(Error::remote_transient(
                operation,
                format!("{remote_id} disappeared during update"),
                Some(404),
            ));
        }
        Err(response.rejected(&operation))
    }

    async fn get(&self, kind: ResourceKind, remote_id: &str) -> Result<Option<Value>> {
        let rk = RemoteKind::require(kind)?;
        let operation = format!("get {}", rk.segment);
        let response = self
            .send(&operation, Method::GET, self.kind_url(&rk, Some(remote_id))?, None)
            .await?;

        if response.is_success() {
            return Ok(Some(response.json()));
        }
        if response.is_not_found() {
            return Ok(None);
        }
        Err(response.rejected(&operation))
    }

    async fn delete(&self, kind: ResourceKind, remote_id: &str) -> Result<Deleted> {
        let rk = RemoteKind::require(kind)?;
        let operation = format!("delete {}", rk.segment);
        let response = self
            .send(
                &operation,
                Method::DELETE,
                self.kind_url(&rk, Some(remote_id))?,
                None,
            )
            .await?;

        if response.is_success() {
            return Ok(Deleted::Removed);
        }
        if response.is_not_found() {
            return Ok(Deleted::NotFound);
        }
        Err(response.rejected(&operation))
    }

    async fn find_by_name(&self, kind: ResourceKind, name: &str) -> Result<Option<String>> {
        let rk = RemoteKind::require(kind)?;
        let operation = format!("list {}", rk.segment);
        let response = self
            .send(&operation, Method::GET, self.kind_url(&rk, None)?, None)
            .await?;

        if response.is_not_found() {
            return Ok(None);
        }
        if !response.is_success() {
            return Err(response.rejected(&operation));
        }

        let body = response.json();
        let found = list_entries(&body)
            .into_iter()
            .find(|entry| entry.get(rk.name_field).and_then(Value::as_str) == Some(name));
        Ok(found.map(|entry| match rk.id_scheme {
            IdScheme::Name => name.to_string(),
            IdScheme::ServerAssigned => extract_id(entry).unwrap_or_else(|| name.to_string()),
        }))
    }

    async fn test_function(&self, transform_expr: &str, input: &Value) -> Result<Value> {
        let operation = "test functions";
        let body = json!({
            "function": transform_expr,
            "events": [input],
        });
        let response = self
            .send(
                operation,
                Method::POST,
                self.url(&["functions", "test"])?,
                Some(&body),
            )
            .await?;

        if !response.is_success() {
            return Err(response.rejected(operation));
        }
        Ok(function_output(response.json()))
    }

    async fn verify_connection(&self) -> Result<()> {
        let operation = "get settings";
        let response = self
            .send(operation, Method::GET, self.url(&["settings"])?, None)
            .await?;
        if response.is_success() {
            Ok(())
        } else {
            Err(response.rejected(operation))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use o2_common::resource::ResourceKey;
    use wiremock::matchers::{body_partial_json, header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use crate::config::{CredentialScope, RateLimit};

    fn descriptor(endpoint: &str) -> ClientDescriptor {
        ClientDescriptor {
            config_key: ResourceKey::new(ResourceKind::Config, "obs", "main"),
            endpoint: Url::parse(endpoint).unwrap(),
            organization: "default".to_string(),
            username: "ops@example.com".to_string(),
            secret: Zeroizing::new("token".to_string()),
            scope: CredentialScope::ServiceAccount,
            tls_verify: true,
            rate_limit: RateLimit {
                requests_per_second: 1000,
                burst: 1000,
            },
            max_connections: 4,
        }
    }

    fn client(server: &MockServer) -> BackendClient {
        let settings = OperatorSettings {
            retry_max_attempts: 3,
            retry_initial_wait_ms: 1,
            ..Default::default()
        };
        BackendClient::new(&descriptor(&server.uri()), &settings).unwrap()
    }

    // ==========================================================================
    // Story Tests: Create, adopt and delete against a live HTTP server
    // ==========================================================================

    /// Story: Creating an alert records the id the backend assigns
    #[tokio::test]
    async fn story_create_reads_server_assigned_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/default/alerts"))
            .and(header_exists("authorization"))
            .and(body_partial_json(json!({"name": "cpu"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"alert_id": "7f3a"})))
            .expect(1)
            .mount(&server)
            .await;

        let created = client(&server)
            .create(ResourceKind::Alert, "cpu", &json!({"name": "cpu"}))
            .await
            .unwrap();
        assert_eq!(
            created,
            Created {
                remote_id: "7f3a".to_string(),
                adopted: false
            }
        );
    }

    /// Story: A create racing another writer adopts the existing object
    #[tokio::test]
    async fn story_create_conflict_adopts_existing_object() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/default/alerts"))
            .respond_with(
                ResponseTemplate::new(400)
                    .set_body_json(json!({"message": "Alert with name cpu already exists"})),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/default/alerts"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "list": [
                    {"name": "mem", "alert_id": "a1"},
                    {"name": "cpu", "alert_id": "a2"}
                ]
            })))
            .mount(&server)
            .await;

        let created = client(&server)
            .create(ResourceKind::Alert, "cpu", &json!({"name": "cpu"}))
            .await
            .unwrap();
        assert_eq!(created.remote_id, "a2");
        assert!(created.adopted);
    }

    /// Story: Name-keyed kinds use the resource name as their id
    #[tokio::test]
    async fn story_name_keyed_create_and_delete() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/default/alerts/templates"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"code": 200})))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/api/default/alerts/templates/slack"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let c = client(&server);
        let created = c
            .create(ResourceKind::Template, "slack", &json!({"name": "slack"}))
            .await
            .unwrap();
        assert_eq!(created.remote_id, "slack");
        assert_eq!(
            c.delete(ResourceKind::Template, "slack").await.unwrap(),
            Deleted::Removed
        );
    }

    // ==========================================================================
    // Unit Tests: Error classification
    // ==========================================================================

    #[tokio::test]
    async fn test_get_and_delete_treat_404_as_absent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/default/functions/redact"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/api/default/functions/redact"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let c = client(&server);
        assert_eq!(c.get(ResourceKind::Function, "redact").await.unwrap(), None);
        assert_eq!(
            c.delete(ResourceKind::Function, "redact").await.unwrap(),
            Deleted::NotFound
        );
    }

    #[tokio::test]
    async fn test_validation_4xx_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/api/default/pipelines/p1"))
            .respond_with(ResponseTemplate::new(422).set_body_string("bad node"))
            .expect(1)
            .mount(&server)
            .await;

        let err = client(&server)
            .update(ResourceKind::Pipeline, "p1", &json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::RemoteRejected { status: 422, .. }));
        assert!(err.is_terminal());
    }

    #[tokio::test]
    async fn test_5xx_is_retried_up_to_max_attempts() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/default/dashboards/d1"))
            .respond_with(ResponseTemplate::new(503))
            .expect(3)
            .mount(&server)
            .await;

        let err = client(&server)
            .get(ResourceKind::Dashboard, "d1")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::RemoteTransient { status: Some(503), .. }));
    }

    #[tokio::test]
    async fn test_unauthorized_is_auth_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/default/settings"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;

        let err = client(&server).verify_connection().await.unwrap_err();
        assert!(matches!(err, Error::RemoteAuth { status: 401, .. }));
    }

    #[tokio::test]
    async fn test_timeout_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/default/settings"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3)))
            .mount(&server)
            .await;

        let settings = OperatorSettings {
            http_timeout_secs: 1,
            retry_max_attempts: 1,
            ..Default::default()
        };
        let c = BackendClient::new(&descriptor(&server.uri()), &settings).unwrap();
        let err = c.verify_connection().await.unwrap_err();
        assert!(matches!(err, Error::RemoteTransient { .. }));
    }

    #[tokio::test]
    async fn test_function_output_extraction() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/default/functions/test"))
            .and(body_partial_json(json!({"function": ".a = 1"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "results": [{"event": {"a": 1}, "message": ""}]
            })))
            .mount(&server)
            .await;

        let out = client(&server)
            .test_function(".a = 1", &json!({}))
            .await
            .unwrap();
        assert_eq!(out, json!({"a": 1}));
    }

    #[test]
    fn test_function_output_fallbacks() {
        assert_eq!(function_output(json!({"results": [{"x": 1}]})), json!({"x": 1}));
        assert_eq!(function_output(json!({"x": 2})), json!({"x": 2}));
    }

    #[test]
    fn test_already_exists_detection() {
        let conflict = RawResponse {
            status: 409,
            body: String::new(),
        };
        assert!(conflict.already_exists());
        let message = RawResponse {
            status: 400,
            body: "Template Already Exists".to_string(),
        };
        assert!(message.already_exists());
        let other = RawResponse {
            status: 400,
            body: "invalid body".to_string(),
        };
        assert!(!other.already_exists());
    }

    #[test]
    fn test_url_keeps_endpoint_path_prefix() {
        let settings = OperatorSettings::default();
        let c = BackendClient::new(&descriptor("https://o2.example.com/base/"), &settings).unwrap();
        let url = c
            .kind_url(&RemoteKind::require(ResourceKind::Destination).unwrap(), Some("slack"))
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://o2.example.com/base/api/default/alerts/destinations/slack"
        );
    }

    #[tokio::test]
    async fn test_closed_client_rejects_requests() {
        let server = MockServer::start().await;
        let settings = OperatorSettings {
            retry_max_attempts: 1,
            ..Default::default()
        };
        let c = BackendClient::new(&descriptor(&server.uri()), &settings).unwrap();
        c.close();
        assert!(c.verify_connection().await.is_err());
    }
}
