//! Existence checks for referenced resources
//!
//! [`DependencyLookup`] is what kind validators see: the Config a resource
//! points at, alert templates, other managed resources and the backend's
//! function test endpoint. [`DependencyResolver`] answers from the resource
//! store first and asks the backend (read-only) when a dependency may exist
//! only remotely.

use std::sync::Arc;

use async_trait::async_trait;
use o2_common::crd::DestinationKind;
use o2_common::resource::AnySpec;
use o2_common::settings::OperatorSettings;
use o2_common::store::ResourceStore;
use o2_common::{Error, ManagedResource, ResourceKey, ResourceKind, Result};
use o2_remote::{ClientProvider, ConfigResolver};
use serde_json::Value;
use tracing::debug;

/// Lookups available to kind validators
#[async_trait]
pub trait DependencyLookup: Send + Sync {
    /// The Config `referrer` points at; must exist, be in scope and be Ready
    async fn ready_config(&self, referrer: &ManagedResource) -> Result<ManagedResource>;

    /// Whether an alert template called `name` exists in the organization of
    /// `referrer`'s Config
    async fn template_exists(&self, referrer: &ManagedResource, name: &str) -> Result<bool>;

    /// Run a transform through the backend of `referrer`'s Config
    async fn run_function(
        &self,
        referrer: &ManagedResource,
        transform_expr: &str,
        input: &Value,
    ) -> Result<Value>;

    /// Fetch any managed resource
    async fn resource(&self, key: &ResourceKey) -> Result<Option<ManagedResource>>;
}

/// [`DependencyLookup`] over the resource store and backend clients
pub struct DependencyResolver {
    store: Arc<dyn ResourceStore>,
    clients: Arc<dyn ClientProvider>,
    configs: ConfigResolver,
}

impl DependencyResolver {
    /// Create a resolver
    pub fn new(
        store: Arc<dyn ResourceStore>,
        clients: Arc<dyn ClientProvider>,
        settings: OperatorSettings,
    ) -> Self {
        Self {
            configs: ConfigResolver::new(Arc::clone(&store), settings),
            store,
            clients,
        }
    }

    /// Require every Destination and Function `resource` references to exist
    /// and be Ready
    ///
    /// Runs at reconcile time. Alert templates are checked by the Destination
    /// validator since they may exist only in the backend.
    pub async fn check_references(&self, resource: &ManagedResource) -> Result<()> {
        for key in resource.references() {
            if matches!(key.kind, ResourceKind::Config | ResourceKind::Template) {
                continue;
            }

            let dependency = self.store.get(&key).await?.ok_or_else(|| {
                Error::dependency_missing(resource.key.to_string(), key.to_string(), "not found")
            })?;
            if dependency.deletion_requested {
                return Err(Error::dependency_missing(
                    resource.key.to_string(),
                    key.to_string(),
                    "is being deleted",
                ));
            }
            check_destination_role(resource, &dependency)?;
            if !dependency.status.is_ready() {
                return Err(Error::dependency_missing(
                    resource.key.to_string(),
                    key.to_string(),
                    "not Ready",
                ));
            }
        }
        Ok(())
    }

    async fn same_organization(&self, config: &ManagedResource, other: &ResourceKey) -> Result<bool> {
        if &config.key == other {
            return Ok(true);
        }
        let Some(other) = self.store.get(other).await? else {
            return Ok(false);
        };
        Ok(match (&config.spec, &other.spec) {
            (AnySpec::Config(a), AnySpec::Config(b)) => {
                a.endpoint.trim_end_matches('/') == b.endpoint.trim_end_matches('/')
                    && a.organization == b.organization
            }
            _ => false,
        })
    }
}

/// Alerts notify alert destinations; pipelines write to pipeline destinations
fn check_destination_role(referrer: &ManagedResource, dependency: &ManagedResource) -> Result<()> {
    let AnySpec::Destination(dest) = &dependency.spec else {
        return Ok(());
    };
    let expected = match referrer.kind() {
        ResourceKind::Alert => DestinationKind::Alert,
        ResourceKind::Pipeline => DestinationKind::Pipeline,
        _ => return Ok(()),
    };
    if dest.kind != expected {
        let role = match expected {
            DestinationKind::Alert => "an alert",
            DestinationKind::Pipeline => "a pipeline",
        };
        return Err(Error::validation_for(
            referrer.key.to_string(),
            format!("destination {} is not {role} destination", dependency.name()),
        ));
    }
    Ok(())
}

#[async_trait]
impl DependencyLookup for DependencyResolver {
    async fn ready_config(&self, referrer: &ManagedResource) -> Result<ManagedResource> {
        self.configs.ready_config(referrer).await
    }

    async fn template_exists(&self, referrer: &ManagedResource, name: &str) -> Result<bool> {
        let config = self.configs.ready_config(referrer).await?;

        let key = ResourceKey::new(ResourceKind::Template, referrer.namespace(), name);
        if let Some(template) = self.store.get(&key).await? {
            if !template.deletion_requested {
                if let Some(template_config) = template.config_key() {
                    if self.same_organization(&config, &template_config).await? {
                        return Ok(true);
                    }
                }
            }
        }

        debug!(resource = %referrer.key, template = name, "Template not managed here, asking backend");
        let client = self.clients.client_for(referrer).await?;
        Ok(client.get(ResourceKind::Template, name).await?.is_some())
    }

    async fn run_function(
        &self,
        referrer: &ManagedResource,
        transform_expr: &str,
        input: &Value,
    ) -> Result<Value> {
        let client = self.clients.client_for(referrer).await?;
        client.test_function(transform_expr, input).await
    }

    async fn resource(&self, key: &ResourceKey) -> Result<Option<ManagedResource>> {
        self.store.get(key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use o2_common::crd::{
        Condition, ConditionStatus, HttpMethod, O2AlertSpec, O2DestinationSpec, O2TemplateSpec,
        QueryCondition, QueryType, ResourceStatus, StreamType, TransportType, CONDITION_READY,
    };
    use o2_common::resource::fixtures;
    use o2_common::store::MockResourceStore;
    use o2_remote::{MockClientProvider, MockRemoteSync};

    fn ready(mut r: ManagedResource) -> ManagedResource {
        r.status = ResourceStatus {
            conditions: vec![Condition::new(CONDITION_READY, ConditionStatus::True, "Synced", "")],
            ..Default::default()
        };
        r
    }

    fn config() -> ManagedResource {
        ready(fixtures::managed("main", AnySpec::Config(fixtures::config_spec())))
    }

    fn destination(name: &str, kind: DestinationKind) -> ManagedResource {
        fixtures::managed(
            name,
            AnySpec::Destination(O2DestinationSpec {
                config_ref: fixtures::config_ref(),
                kind,
                transport_type: TransportType::Http,
                url: Some("https://hooks.example.com".to_string()),
                method: HttpMethod::Post,
                skip_tls_verify: false,
                emails: vec![],
                template_ref: Some("slack".to_string()),
                destination_type_name: None,
                output_format: None,
                headers: Default::default(),
                metadata: Default::default(),
            }),
        )
    }

    fn template(name: &str) -> ManagedResource {
        fixtures::managed(
            name,
            AnySpec::Template(O2TemplateSpec {
                config_ref: fixtures::config_ref(),
                transport_type: TransportType::Http,
                title: None,
                body: "{alert_name}".to_string(),
            }),
        )
    }

    fn alert(destinations: &[&str]) -> ManagedResource {
        fixtures::managed(
            "cpu",
            AnySpec::Alert(O2AlertSpec {
                config_ref: fixtures::config_ref(),
                stream_name: "k8s".to_string(),
                stream_type: StreamType::Logs,
                is_real_time: true,
                query_condition: QueryCondition {
                    type_: QueryType::Sql,
                    conditions: vec![],
                    sql: Some("select 1".to_string()),
                    promql: None,
                },
                schedule: None,
                destinations: destinations.iter().map(|d| d.to_string()).collect(),
                deduplication: None,
                enabled: true,
                description: None,
            }),
        )
    }

    fn store(resources: Vec<ManagedResource>) -> Arc<dyn ResourceStore> {
        let by_key: HashMap<ResourceKey, ManagedResource> =
            resources.into_iter().map(|r| (r.key.clone(), r)).collect();
        let mut store = MockResourceStore::new();
        store
            .expect_get()
            .returning(move |key| Ok(by_key.get(key).cloned()));
        Arc::new(store)
    }

    fn resolver(store: Arc<dyn ResourceStore>, clients: MockClientProvider) -> DependencyResolver {
        DependencyResolver::new(store, Arc::new(clients), OperatorSettings::default())
    }

    // ==========================================================================
    // Story Tests: Reconcile-time reference checks
    // ==========================================================================

    /// Story: An alert waits until every destination it notifies is Ready
    #[tokio::test]
    async fn story_alert_waits_for_destination() {
        let resolver = resolver(
            store(vec![config(), destination("oncall", DestinationKind::Alert)]),
            MockClientProvider::new(),
        );
        let err = resolver.check_references(&alert(&["oncall"])).await.unwrap_err();
        assert!(matches!(err, Error::DependencyMissing { .. }));
        assert!(err.to_string().contains("not Ready"));

        let resolver = resolver_with_ready_destination();
        resolver.check_references(&alert(&["oncall"])).await.unwrap();
    }

    fn resolver_with_ready_destination() -> DependencyResolver {
        resolver(
            store(vec![config(), ready(destination("oncall", DestinationKind::Alert))]),
            MockClientProvider::new(),
        )
    }

    /// Story: Notifying a pipeline destination from an alert is a spec error
    #[tokio::test]
    async fn story_alert_cannot_use_pipeline_destination() {
        let resolver = resolver(
            store(vec![config(), ready(destination("sink", DestinationKind::Pipeline))]),
            MockClientProvider::new(),
        );
        let err = resolver.check_references(&alert(&["sink"])).await.unwrap_err();
        assert!(err.is_terminal());
        assert!(err.to_string().contains("not an alert destination"));
    }

    #[tokio::test]
    async fn test_missing_destination_is_dependency_missing() {
        let resolver = resolver(store(vec![config()]), MockClientProvider::new());
        let err = resolver.check_references(&alert(&["ghost"])).await.unwrap_err();
        assert!(err.to_string().contains("Destination/obs/ghost"));
    }

    // ==========================================================================
    // Story Tests: Template lookup
    // ==========================================================================

    /// Story: A managed template under the same Config satisfies the reference
    #[tokio::test]
    async fn story_local_template_found_without_backend_call() {
        let resolver = resolver(
            store(vec![config(), template("slack")]),
            MockClientProvider::new(),
        );
        let dest = destination("oncall", DestinationKind::Alert);
        assert!(resolver.template_exists(&dest, "slack").await.unwrap());
    }

    /// Story: A template created outside the operator is found in the backend
    #[tokio::test]
    async fn story_remote_only_template_found_in_backend() {
        let mut clients = MockClientProvider::new();
        clients.expect_client_for().returning(|_| {
            let mut remote = MockRemoteSync::new();
            remote.expect_get().returning(|kind, id| {
                assert_eq!(kind, ResourceKind::Template);
                assert_eq!(id, "legacy");
                Ok(Some(serde_json::json!({"name": "legacy"})))
            });
            Ok(Arc::new(remote) as Arc<dyn o2_remote::RemoteSync>)
        });
        let resolver = resolver(store(vec![config()]), clients);
        let dest = destination("oncall", DestinationKind::Alert);
        assert!(resolver.template_exists(&dest, "legacy").await.unwrap());
    }

    #[tokio::test]
    async fn test_absent_template_reports_false() {
        let mut clients = MockClientProvider::new();
        clients.expect_client_for().returning(|_| {
            let mut remote = MockRemoteSync::new();
            remote.expect_get().returning(|_, _| Ok(None));
            Ok(Arc::new(remote) as Arc<dyn o2_remote::RemoteSync>)
        });
        let resolver = resolver(store(vec![config()]), clients);
        let dest = destination("oncall", DestinationKind::Alert);
        assert!(!resolver.template_exists(&dest, "ghost").await.unwrap());
    }
}
