//! Per-Config client registry
//!
//! One [`BackendClient`] (and with it one rate limiter and connection cap)
//! exists per O2Config. It is built on first use, rebuilt when the resolved
//! descriptor changes and closed when the Config is released.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
#[cfg(any(test, feature = "test-utils"))]
use mockall::automock;
use o2_common::settings::OperatorSettings;
use o2_common::store::ResourceStore;
use o2_common::{ManagedResource, ResourceKey, Result};
use tracing::{debug, info};

use crate::client::{BackendClient, RemoteSync};
use crate::config::{ClientDescriptor, ConfigResolver};

/// Hands out backend clients for resources
#[cfg_attr(any(test, feature = "test-utils"), automock)]
#[async_trait]
pub trait ClientProvider: Send + Sync {
    /// Client for the Config `resource` references; the Config must be Ready
    async fn client_for(&self, resource: &ManagedResource) -> Result<Arc<dyn RemoteSync>>;

    /// Client for an O2Config itself, Ready or not
    async fn client_for_config(&self, config: &ManagedResource) -> Result<Arc<dyn RemoteSync>>;

    /// Close and forget the client of a Config
    fn dispose(&self, config_key: &ResourceKey);
}

struct CachedClient {
    descriptor: ClientDescriptor,
    client: Arc<BackendClient>,
}

/// [`ClientProvider`] caching one client per Config
pub struct ClientRegistry {
    resolver: ConfigResolver,
    settings: OperatorSettings,
    clients: DashMap<ResourceKey, CachedClient>,
}

impl ClientRegistry {
    /// Create a registry resolving Configs through `store`
    pub fn new(store: Arc<dyn ResourceStore>, settings: OperatorSettings) -> Self {
        Self {
            resolver: ConfigResolver::new(store, settings.clone()),
            settings,
            clients: DashMap::new(),
        }
    }

    /// The resolver used for `configRef`s
    pub fn resolver(&self) -> &ConfigResolver {
        &self.resolver
    }

    /// Number of live clients
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    /// Whether no client has been built
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    fn client_from(&self, descriptor: ClientDescriptor) -> Result<Arc<BackendClient>> {
        if let Some(cached) = self.clients.get(&descriptor.config_key) {
            if cached.descriptor == descriptor {
                return Ok(Arc::clone(&cached.client));
            }
        }

        let client = Arc::new(BackendClient::new(&descriptor, &self.settings)?);
        let key = descriptor.config_key.clone();
        let replaced = self
            .clients
            .insert(
                key.clone(),
                CachedClient {
                    descriptor,
                    client: Arc::clone(&client),
                },
            )
            .is_some();
        if replaced {
            // In-flight calls on the old client finish; new calls use the new one
            info!(config = %key, "Config changed, rebuilt backend client");
        } else {
            debug!(config = %key, "Built backend client");
        }
        Ok(client)
    }
}

#[async_trait]
impl ClientProvider for ClientRegistry {
    async fn client_for(&self, resource: &ManagedResource) -> Result<Arc<dyn RemoteSync>> {
        let descriptor = self.resolver.resolve(resource).await?;
        Ok(self.client_from(descriptor)?)
    }

    async fn client_for_config(&self, config: &ManagedResource) -> Result<Arc<dyn RemoteSync>> {
        let descriptor = self.resolver.resolve_config(config).await?;
        Ok(self.client_from(descriptor)?)
    }

    fn dispose(&self, config_key: &ResourceKey) {
        if let Some((_, cached)) = self.clients.remove(config_key) {
            cached.client.close();
            info!(config = %config_key, "Disposed backend client");
        }
    }
}
