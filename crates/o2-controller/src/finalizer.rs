//! Finalizer protocol
//!
//! A managed resource moves through [`FinalizerState`]: `Active` until
//! deletion is requested, `Deleting` while the finalizer is held and the
//! remote object is torn down, `Released` once the finalizer is gone.
//! Deletion order across kinds falls out of the dependency index: a resource
//! is only released when nothing references it any more.

use std::sync::Arc;

use o2_common::index::DependencyIndex;
use o2_common::store::ResourceStore;
use o2_common::{Error, ManagedResource, ResourceKind, Result};
use o2_remote::{ClientProvider, Deleted};
use tracing::{debug, info, warn};

/// Where a resource is in the deletion protocol
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FinalizerState {
    /// Not being deleted
    Active,
    /// Deletion requested, finalizer held
    Deleting,
    /// Finalizer removed; Kubernetes may purge the object
    Released,
}

impl FinalizerState {
    /// State of `resource` as last read
    pub fn of(resource: &ManagedResource) -> Self {
        match (resource.deletion_requested, resource.finalizer_present) {
            (false, _) => Self::Active,
            (true, true) => Self::Deleting,
            (true, false) => Self::Released,
        }
    }
}

/// Attaches and releases the operator finalizer
pub struct FinalizerManager {
    store: Arc<dyn ResourceStore>,
    clients: Arc<dyn ClientProvider>,
    index: Arc<DependencyIndex>,
}

impl FinalizerManager {
    /// Create a manager
    pub fn new(
        store: Arc<dyn ResourceStore>,
        clients: Arc<dyn ClientProvider>,
        index: Arc<DependencyIndex>,
    ) -> Self {
        Self {
            store,
            clients,
            index,
        }
    }

    /// Attach the finalizer; no-op when present
    pub async fn attach(&self, resource: &ManagedResource) -> Result<()> {
        if resource.finalizer_present {
            return Ok(());
        }
        self.store.add_finalizer(&resource.key).await?;
        debug!(resource = %resource.key, "Attached finalizer");
        Ok(())
    }

    /// Tear down the remote object and remove the finalizer
    ///
    /// Fails with `HasDependents` while another resource still references
    /// this one; the caller requeues.
    pub async fn release(&self, resource: &ManagedResource) -> Result<FinalizerState> {
        match FinalizerState::of(resource) {
            FinalizerState::Active => {
                return Err(Error::internal_with_context(
                    "finalizer",
                    format!("release of {} without a deletion request", resource.key),
                ))
            }
            FinalizerState::Released => return Ok(FinalizerState::Released),
            FinalizerState::Deleting => {}
        }

        if resource.kind().can_have_dependents() {
            let dependents = self.live_dependents(resource).await?;
            if !dependents.is_empty() {
                return Err(Error::has_dependents(
                    resource.key.to_string(),
                    dependents.iter().map(|k| k.to_string()).collect(),
                ));
            }
        }

        if resource.kind() != ResourceKind::Config {
            self.delete_remote(resource).await?;
        }

        self.store.remove_finalizer(&resource.key).await?;
        self.index.delete(&resource.key);
        if resource.kind() == ResourceKind::Config {
            self.clients.dispose(&resource.key);
        }
        info!(resource = %resource.key, "Released finalizer");
        Ok(FinalizerState::Released)
    }

    /// Dependents that still exist; stale index entries are dropped
    async fn live_dependents(
        &self,
        resource: &ManagedResource,
    ) -> Result<Vec<o2_common::ResourceKey>> {
        let mut live = Vec::new();
        for key in self.index.dependents(&resource.key) {
            match self.store.get(&key).await? {
                Some(dependent) if dependent.references().contains(&resource.key) => {
                    live.push(key)
                }
                Some(dependent) => self.index.put(&dependent),
                None => self.index.delete(&key),
            }
        }
        Ok(live)
    }

    async fn delete_remote(&self, resource: &ManagedResource) -> Result<()> {
        let Some(config_key) = resource.config_key() else {
            return Ok(());
        };
        let Some(config) = self.store.get(&config_key).await? else {
            warn!(
                resource = %resource.key,
                config = %config_key,
                "Config is gone, releasing without remote cleanup"
            );
            return Ok(());
        };
        let client = self.clients.client_for_config(&config).await?;

        let remote_id = match resource.remote_id() {
            Some(id) => Some(id.to_string()),
            None => {
                let found = client.find_by_name(resource.kind(), resource.name()).await?;
                if let Some(id) = &found {
                    info!(resource = %resource.key, remote_id = %id, "Adopting orphaned remote object for deletion");
                }
                found
            }
        };
        let Some(remote_id) = remote_id else {
            debug!(resource = %resource.key, "No remote object to delete");
            return Ok(());
        };

        match client.delete(resource.kind(), &remote_id).await? {
            Deleted::Removed => info!(resource = %resource.key, remote_id = %remote_id, "Deleted remote object"),
            Deleted::NotFound => debug!(resource = %resource.key, remote_id = %remote_id, "Remote object already gone"),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    use o2_common::crd::{O2TemplateSpec, ResourceStatus, TransportType};
    use o2_common::resource::{fixtures, AnySpec};
    use o2_common::store::MockResourceStore;
    use o2_common::ResourceKey;
    use o2_remote::{MockClientProvider, MockRemoteSync, RemoteSync};

    fn config() -> ManagedResource {
        fixtures::managed("main", AnySpec::Config(fixtures::config_spec()))
    }

    fn template(remote_id: Option<&str>) -> ManagedResource {
        let mut t = fixtures::managed(
            "slack",
            AnySpec::Template(O2TemplateSpec {
                config_ref: fixtures::config_ref(),
                transport_type: TransportType::Http,
                title: None,
                body: "{alert_name}".to_string(),
            }),
        );
        t.deletion_requested = true;
        t.status = ResourceStatus {
            remote_id: remote_id.map(str::to_string),
            ..Default::default()
        };
        t
    }

    /// Store holding `resources`, recording finalizer removals
    fn store(
        resources: Vec<ManagedResource>,
        removed: Arc<Mutex<Vec<ResourceKey>>>,
    ) -> Arc<dyn ResourceStore> {
        let by_key: HashMap<ResourceKey, ManagedResource> =
            resources.into_iter().map(|r| (r.key.clone(), r)).collect();
        let mut store = MockResourceStore::new();
        store
            .expect_get()
            .returning(move |key| Ok(by_key.get(key).cloned()));
        store.expect_remove_finalizer().returning(move |key| {
            removed.lock().unwrap().push(key.clone());
            Ok(())
        });
        Arc::new(store)
    }

    fn clients(remote: MockRemoteSync) -> Arc<dyn ClientProvider> {
        let remote: Arc<dyn RemoteSync> = Arc::new(remote);
        let mut clients = MockClientProvider::new();
        clients
            .expect_client_for_config()
            .returning(move |_| Ok(Arc::clone(&remote)));
        clients.expect_dispose().returning(|_| ());
        Arc::new(clients)
    }

    #[test]
    fn test_state_of() {
        let mut r = config();
        assert_eq!(FinalizerState::of(&r), FinalizerState::Active);
        r.deletion_requested = true;
        assert_eq!(FinalizerState::of(&r), FinalizerState::Deleting);
        r.finalizer_present = false;
        assert_eq!(FinalizerState::of(&r), FinalizerState::Released);
    }

    // ==========================================================================
    // Story Tests: Release
    // ==========================================================================

    /// Story: The finalizer is removed only after the backend confirms deletion
    #[tokio::test]
    async fn story_release_deletes_remote_then_finalizer() {
        let removed = Arc::new(Mutex::new(Vec::new()));
        let mut remote = MockRemoteSync::new();
        remote.expect_delete().times(1).returning(|kind, id| {
            assert_eq!(kind, ResourceKind::Template);
            assert_eq!(id, "slack");
            Ok(Deleted::Removed)
        });
        let manager = FinalizerManager::new(
            store(vec![config(), template(Some("slack"))], Arc::clone(&removed)),
            clients(remote),
            Arc::new(DependencyIndex::new()),
        );

        let state = manager.release(&template(Some("slack"))).await.unwrap();
        assert_eq!(state, FinalizerState::Released);
        assert_eq!(removed.lock().unwrap().len(), 1);
    }

    /// Story: A failed remote delete keeps the finalizer
    #[tokio::test]
    async fn story_failed_delete_keeps_finalizer() {
        let removed = Arc::new(Mutex::new(Vec::new()));
        let mut remote = MockRemoteSync::new();
        remote
            .expect_delete()
            .returning(|_, _| Err(Error::remote_transient("delete", "timed out", None)));
        let manager = FinalizerManager::new(
            store(vec![config()], Arc::clone(&removed)),
            clients(remote),
            Arc::new(DependencyIndex::new()),
        );

        assert!(manager.release(&template(Some("slack"))).await.is_err());
        assert!(removed.lock().unwrap().is_empty());
    }

    /// Story: NotFound from the backend counts as deleted
    #[tokio::test]
    async fn story_not_found_counts_as_deleted() {
        let removed = Arc::new(Mutex::new(Vec::new()));
        let mut remote = MockRemoteSync::new();
        remote
            .expect_delete()
            .returning(|_, _| Ok(Deleted::NotFound));
        let manager = FinalizerManager::new(
            store(vec![config()], Arc::clone(&removed)),
            clients(remote),
            Arc::new(DependencyIndex::new()),
        );
        manager.release(&template(Some("slack"))).await.unwrap();
        assert_eq!(removed.lock().unwrap().len(), 1);
    }

    /// Story: A referenced resource is not released until its referrers are gone
    #[tokio::test]
    async fn story_dependents_block_release() {
        let removed = Arc::new(Mutex::new(Vec::new()));
        let mut config_deleting = config();
        config_deleting.deletion_requested = true;
        let dependent = template(Some("slack"));

        let index = Arc::new(DependencyIndex::new());
        index.put(&dependent);
        let manager = FinalizerManager::new(
            store(vec![config_deleting.clone(), dependent], Arc::clone(&removed)),
            clients(MockRemoteSync::new()),
            index,
        );

        let err = manager.release(&config_deleting).await.unwrap_err();
        assert!(matches!(err, Error::HasDependents { .. }));
        assert!(err.to_string().contains("Template/obs/slack"));
        assert!(removed.lock().unwrap().is_empty());
    }

    /// Story: A stale index entry for a vanished referrer does not block forever
    #[tokio::test]
    async fn story_stale_dependent_is_pruned() {
        let removed = Arc::new(Mutex::new(Vec::new()));
        let mut config_deleting = config();
        config_deleting.deletion_requested = true;

        let index = Arc::new(DependencyIndex::new());
        index.put(&template(None));
        let manager = FinalizerManager::new(
            store(vec![config_deleting.clone()], Arc::clone(&removed)),
            clients(MockRemoteSync::new()),
            Arc::clone(&index),
        );

        manager.release(&config_deleting).await.unwrap();
        assert!(index.is_empty());
        assert_eq!(removed.lock().unwrap().as_slice(), &[config_deleting.key]);
    }

    /// Story: A resource without a recorded id still has its remote object removed
    #[tokio::test]
    async fn story_orphan_found_by_name_is_deleted() {
        let removed = Arc::new(Mutex::new(Vec::new()));
        let mut remote = MockRemoteSync::new();
        remote
            .expect_find_by_name()
            .returning(|_, name| Ok(Some(name.to_string())));
        remote
            .expect_delete()
            .times(1)
            .returning(|_, _| Ok(Deleted::Removed));
        let manager = FinalizerManager::new(
            store(vec![config()], Arc::clone(&removed)),
            clients(remote),
            Arc::new(DependencyIndex::new()),
        );
        manager.release(&template(None)).await.unwrap();
        assert_eq!(removed.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_release_of_active_resource_is_rejected() {
        let manager = FinalizerManager::new(
            store(vec![], Arc::new(Mutex::new(Vec::new()))),
            clients(MockRemoteSync::new()),
            Arc::new(DependencyIndex::new()),
        );
        assert!(manager.release(&config()).await.is_err());
    }
}
