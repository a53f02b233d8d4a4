//! Kind-agnostic view of the seven custom resources
//!
//! Controllers, the admission path and the dependency index all work on
//! [`ManagedResource`], an envelope holding identity, lifecycle flags, status
//! and the typed spec. [`ManagedObject`] converts each CRD into the envelope.

use std::fmt::Debug;

use k8s_openapi::api::core::v1::ObjectReference;
use k8s_openapi::NamespaceResourceScope;
use kube::{Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::crd::{
    ConfigRef, DestinationKind, NodeKind, O2Alert, O2AlertSpec, O2Config, O2ConfigSpec,
    O2Dashboard, O2DashboardSpec, O2Destination, O2DestinationSpec, O2Function, O2FunctionSpec,
    O2Pipeline, O2PipelineSpec, O2Template, O2TemplateSpec, ResourceStatus,
};
use crate::{API_VERSION, FINALIZER};

/// The seven managed resource kinds
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceKind {
    /// Backend connection settings
    Config,
    /// Alert
    Alert,
    /// Pipeline
    Pipeline,
    /// Transform function
    Function,
    /// Alert or pipeline destination
    Destination,
    /// Notification template
    Template,
    /// Dashboard
    Dashboard,
}

impl ResourceKind {
    /// Every kind, in the order controllers are started
    pub const ALL: [ResourceKind; 7] = [
        ResourceKind::Config,
        ResourceKind::Template,
        ResourceKind::Destination,
        ResourceKind::Function,
        ResourceKind::Alert,
        ResourceKind::Pipeline,
        ResourceKind::Dashboard,
    ];

    /// Short kind name used in keys and logs
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Config => "Config",
            Self::Alert => "Alert",
            Self::Pipeline => "Pipeline",
            Self::Function => "Function",
            Self::Destination => "Destination",
            Self::Template => "Template",
            Self::Dashboard => "Dashboard",
        }
    }

    /// Kubernetes kind of the CRD
    pub fn crd_kind(&self) -> &'static str {
        match self {
            Self::Config => "O2Config",
            Self::Alert => "O2Alert",
            Self::Pipeline => "O2Pipeline",
            Self::Function => "O2Function",
            Self::Destination => "O2Destination",
            Self::Template => "O2Template",
            Self::Dashboard => "O2Dashboard",
        }
    }

    /// Look up a kind by CRD kind or short name
    pub fn from_kind_name(kind: &str) -> Option<Self> {
        let short = kind.strip_prefix("O2").unwrap_or(kind);
        Self::ALL
            .into_iter()
            .find(|k| k.as_str().eq_ignore_ascii_case(short))
    }

    /// Whether other kinds can reference this kind
    pub fn can_have_dependents(&self) -> bool {
        matches!(
            self,
            Self::Config | Self::Template | Self::Destination | Self::Function
        )
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of one managed resource: kind + namespace + name
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceKey {
    /// Resource kind
    pub kind: ResourceKind,
    /// Namespace
    pub namespace: String,
    /// Name
    pub name: String,
}

impl ResourceKey {
    /// Create a key
    pub fn new(kind: ResourceKind, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind,
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Key of the O2Config a `configRef` points at, relative to `namespace`
    pub fn config(config_ref: &ConfigRef, namespace: &str) -> Self {
        Self::new(
            ResourceKind::Config,
            config_ref.namespace_or(namespace),
            config_ref.name.clone(),
        )
    }
}

impl std::fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.kind, self.namespace, self.name)
    }
}

/// Typed spec of any managed kind
#[derive(Clone, Debug, PartialEq)]
pub enum AnySpec {
    /// O2Config spec
    Config(O2ConfigSpec),
    /// O2Alert spec
    Alert(O2AlertSpec),
    /// O2Pipeline spec
    Pipeline(O2PipelineSpec),
    /// O2Function spec
    Function(O2FunctionSpec),
    /// O2Destination spec
    Destination(O2DestinationSpec),
    /// O2Template spec
    Template(O2TemplateSpec),
    /// O2Dashboard spec
    Dashboard(O2DashboardSpec),
}

impl AnySpec {
    /// Kind of this spec
    pub fn kind(&self) -> ResourceKind {
        match self {
            Self::Config(_) => ResourceKind::Config,
            Self::Alert(_) => ResourceKind::Alert,
            Self::Pipeline(_) => ResourceKind::Pipeline,
            Self::Function(_) => ResourceKind::Function,
            Self::Destination(_) => ResourceKind::Destination,
            Self::Template(_) => ResourceKind::Template,
            Self::Dashboard(_) => ResourceKind::Dashboard,
        }
    }

    /// The `configRef` of every non-Config kind
    pub fn config_ref(&self) -> Option<&ConfigRef> {
        match self {
            Self::Config(_) => None,
            Self::Alert(s) => Some(&s.config_ref),
            Self::Pipeline(s) => Some(&s.config_ref),
            Self::Function(s) => Some(&s.config_ref),
            Self::Destination(s) => Some(&s.config_ref),
            Self::Template(s) => Some(&s.config_ref),
            Self::Dashboard(s) => Some(&s.config_ref),
        }
    }

    /// Deserialize the spec of a raw object of the given kind
    pub fn from_value(kind: ResourceKind, spec: serde_json::Value) -> crate::Result<Self> {
        let parsed = match kind {
            ResourceKind::Config => serde_json::from_value(spec).map(Self::Config),
            ResourceKind::Alert => serde_json::from_value(spec).map(Self::Alert),
            ResourceKind::Pipeline => serde_json::from_value(spec).map(Self::Pipeline),
            ResourceKind::Function => serde_json::from_value(spec).map(Self::Function),
            ResourceKind::Destination => serde_json::from_value(spec).map(Self::Destination),
            ResourceKind::Template => serde_json::from_value(spec).map(Self::Template),
            ResourceKind::Dashboard => serde_json::from_value(spec).map(Self::Dashboard),
        };
        parsed.map_err(|e| crate::Error::serialization_for_kind(kind.crd_kind(), e.to_string()))
    }
}

/// Kind-agnostic envelope around one custom resource
#[derive(Clone, Debug, PartialEq)]
pub struct ManagedResource {
    /// Identity
    pub key: ResourceKey,
    /// Kubernetes UID, when known
    pub uid: Option<String>,
    /// `metadata.generation`
    pub generation: i64,
    /// `metadata.deletionTimestamp` is set
    pub deletion_requested: bool,
    /// The operator finalizer is present
    pub finalizer_present: bool,
    /// Last written status
    pub status: ResourceStatus,
    /// Desired state
    pub spec: AnySpec,
}

impl ManagedResource {
    /// Build the envelope from a typed CRD object
    pub fn from_object<T: ManagedObject>(obj: &T) -> Self {
        let key = ResourceKey::new(
            T::KIND,
            obj.namespace().unwrap_or_default(),
            obj.name_any(),
        );
        Self {
            key,
            uid: obj.meta().uid.clone(),
            generation: obj.meta().generation.unwrap_or_default(),
            deletion_requested: obj.meta().deletion_timestamp.is_some(),
            finalizer_present: obj.finalizers().iter().any(|f| f == FINALIZER),
            status: obj.managed_status().cloned().unwrap_or_default(),
            spec: obj.any_spec(),
        }
    }

    /// Resource kind
    pub fn kind(&self) -> ResourceKind {
        self.key.kind
    }

    /// Name
    pub fn name(&self) -> &str {
        &self.key.name
    }

    /// Namespace
    pub fn namespace(&self) -> &str {
        &self.key.namespace
    }

    /// Backend identifier recorded on first successful sync
    pub fn remote_id(&self) -> Option<&str> {
        self.status.remote_id.as_deref().filter(|id| !id.is_empty())
    }

    /// Key of the referenced O2Config, if this kind has one
    pub fn config_key(&self) -> Option<ResourceKey> {
        self.spec
            .config_ref()
            .map(|r| ResourceKey::config(r, self.namespace()))
    }

    /// Every resource this one references, Config first
    pub fn references(&self) -> Vec<ResourceKey> {
        let ns = self.namespace();
        let mut refs: Vec<ResourceKey> = self.config_key().into_iter().collect();
        match &self.spec {
            AnySpec::Alert(spec) => {
                refs.extend(
                    spec.destinations
                        .iter()
                        .map(|d| ResourceKey::new(ResourceKind::Destination, ns, d.clone())),
                );
            }
            AnySpec::Destination(spec) if spec.kind == DestinationKind::Alert => {
                if let Some(template) = spec.template_ref.as_deref().filter(|t| !t.is_empty()) {
                    refs.push(ResourceKey::new(ResourceKind::Template, ns, template));
                }
            }
            AnySpec::Pipeline(spec) => {
                for node in &spec.nodes {
                    match node.kind {
                        NodeKind::Function => {
                            if let Some(f) = &node.config.function_ref {
                                refs.push(ResourceKey::new(ResourceKind::Function, ns, f.clone()));
                            }
                        }
                        NodeKind::Custom => {
                            if let Some(d) = &node.config.destination_ref {
                                refs.push(ResourceKey::new(
                                    ResourceKind::Destination,
                                    ns,
                                    d.clone(),
                                ));
                            }
                        }
                        _ => {}
                    }
                }
            }
            _ => {}
        }
        refs.sort();
        refs.dedup();
        refs
    }

    /// Object reference used when publishing Kubernetes events
    pub fn object_ref(&self) -> ObjectReference {
        ObjectReference {
            api_version: Some(API_VERSION.to_string()),
            kind: Some(self.kind().crd_kind().to_string()),
            name: Some(self.key.name.clone()),
            namespace: Some(self.key.namespace.clone()),
            uid: self.uid.clone(),
            ..Default::default()
        }
    }
}

/// A CRD type the operator manages
pub trait ManagedObject:
    Resource<DynamicType = (), Scope = NamespaceResourceScope>
    + Clone
    + Debug
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
    /// Kind of this CRD
    const KIND: ResourceKind;

    /// Clone the spec into the kind-agnostic enum
    fn any_spec(&self) -> AnySpec;

    /// Current status, if any has been written
    fn managed_status(&self) -> Option<&ResourceStatus>;
}

macro_rules! managed_object {
    ($ty:ty, $kind:ident) => {
        impl ManagedObject for $ty {
            const KIND: ResourceKind = ResourceKind::$kind;

            fn any_spec(&self) -> AnySpec {
                AnySpec::$kind(self.spec.clone())
            }

            fn managed_status(&self) -> Option<&ResourceStatus> {
                self.status.as_ref()
            }
        }
    };
}

managed_object!(O2Config, Config);
managed_object!(O2Alert, Alert);
managed_object!(O2Pipeline, Pipeline);
managed_object!(O2Function, Function);
managed_object!(O2Destination, Destination);
managed_object!(O2Template, Template);
managed_object!(O2Dashboard, Dashboard);

/// Test fixtures shared across crates
#[cfg(any(test, feature = "test-utils"))]
pub mod fixtures {
    use super::*;

    /// Envelope for a spec in namespace `obs` at generation 1 with the finalizer attached
    pub fn managed(kind_name: &str, spec: AnySpec) -> ManagedResource {
        ManagedResource {
            key: ResourceKey::new(spec.kind(), "obs", kind_name),
            uid: Some(format!("uid-{kind_name}")),
            generation: 1,
            deletion_requested: false,
            finalizer_present: true,
            status: ResourceStatus::default(),
            spec,
        }
    }

    /// Config spec pointing at a local backend
    pub fn config_spec() -> O2ConfigSpec {
        O2ConfigSpec {
            endpoint: "https://o2.example.com".to_string(),
            organization: "default".to_string(),
            credential_ref: crate::crd::SecretRef {
                name: "o2-credentials".to_string(),
                namespace: None,
            },
            tls_verify: true,
            rate_limit: None,
            max_connections: None,
        }
    }

    /// Reference to the `main` Config in the resource's namespace
    pub fn config_ref() -> ConfigRef {
        ConfigRef {
            name: "main".to_string(),
            namespace: None,
        }
    }
}
