//! Shared controller context

use std::sync::Arc;

use kube::Client;
use o2_admission::{AdmissionValidator, DependencyResolver};
use o2_common::events::{EventPublisher, KubeEventPublisher};
use o2_common::index::DependencyIndex;
use o2_common::settings::OperatorSettings;
use o2_common::store::{KubeResourceStore, ResourceStore};
use o2_common::FIELD_MANAGER;
use o2_remote::{ClientProvider, ClientRegistry};

use crate::backoff::RequeueBackoff;
use crate::finalizer::FinalizerManager;
use crate::locks::KeyedLocks;

/// State shared by every controller
///
/// Use [`ContextBuilder`] to construct instances:
///
/// ```text
/// let ctx = Context::builder(client, settings).build();
/// ```
pub struct Context {
    /// Reads of managed resources and controller-owned writes
    pub store: Arc<dyn ResourceStore>,
    /// Backend clients, one per Config
    pub clients: Arc<dyn ClientProvider>,
    /// Reconcile-time reference checks
    pub resolver: Arc<DependencyResolver>,
    /// Admission re-check run before every sync
    pub admission: Arc<AdmissionValidator>,
    /// Who references whom
    pub index: Arc<DependencyIndex>,
    /// Kubernetes Events
    pub events: Arc<dyn EventPublisher>,
    /// Finalizer protocol
    pub finalizers: FinalizerManager,
    /// Per-key reconcile exclusion
    pub locks: KeyedLocks,
    /// Per-key error backoff
    pub backoff: RequeueBackoff,
    /// Deployment settings
    pub settings: OperatorSettings,
}

impl Context {
    /// Create a builder for constructing a Context
    pub fn builder(client: Client, settings: OperatorSettings) -> ContextBuilder {
        ContextBuilder::new(client, settings)
    }

    /// Create a context from explicit collaborators, without a Kubernetes client
    pub fn for_testing(
        store: Arc<dyn ResourceStore>,
        clients: Arc<dyn ClientProvider>,
        events: Arc<dyn EventPublisher>,
        settings: OperatorSettings,
    ) -> Self {
        Self::assemble(store, clients, events, settings)
    }

    fn assemble(
        store: Arc<dyn ResourceStore>,
        clients: Arc<dyn ClientProvider>,
        events: Arc<dyn EventPublisher>,
        settings: OperatorSettings,
    ) -> Self {
        let index = Arc::new(DependencyIndex::new());
        let resolver = Arc::new(DependencyResolver::new(
            Arc::clone(&store),
            Arc::clone(&clients),
            settings.clone(),
        ));
        let admission = Arc::new(AdmissionValidator::new(resolver.clone()));
        let finalizers = FinalizerManager::new(
            Arc::clone(&store),
            Arc::clone(&clients),
            Arc::clone(&index),
        );
        Self {
            backoff: RequeueBackoff::new(settings.backoff_base(), settings.backoff_cap()),
            store,
            clients,
            resolver,
            admission,
            index,
            events,
            finalizers,
            locks: KeyedLocks::new(),
            settings,
        }
    }
}

/// Builder for [`Context`]
pub struct ContextBuilder {
    client: Client,
    settings: OperatorSettings,
    store: Option<Arc<dyn ResourceStore>>,
    clients: Option<Arc<dyn ClientProvider>>,
    events: Option<Arc<dyn EventPublisher>>,
}

impl ContextBuilder {
    fn new(client: Client, settings: OperatorSettings) -> Self {
        Self {
            client,
            settings,
            store: None,
            clients: None,
            events: None,
        }
    }

    /// Override the resource store
    pub fn store(mut self, store: Arc<dyn ResourceStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Override the backend client provider
    pub fn clients(mut self, clients: Arc<dyn ClientProvider>) -> Self {
        self.clients = Some(clients);
        self
    }

    /// Override the event publisher
    pub fn events(mut self, events: Arc<dyn EventPublisher>) -> Self {
        self.events = Some(events);
        self
    }

    /// Build the Context
    pub fn build(self) -> Context {
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(KubeResourceStore::new(self.client.clone())));
        let clients = self.clients.unwrap_or_else(|| {
            Arc::new(ClientRegistry::new(Arc::clone(&store), self.settings.clone()))
        });
        let events = self
            .events
            .unwrap_or_else(|| Arc::new(KubeEventPublisher::new(self.client.clone(), FIELD_MANAGER)));
        Context::assemble(store, clients, events, self.settings)
    }
}
