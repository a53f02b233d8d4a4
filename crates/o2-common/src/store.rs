//! Access to managed resources and Secrets in the cluster
//!
//! [`ResourceStore`] is the seam between reconcile/admission logic and the
//! Kubernetes API. Reads return the kind-agnostic [`ManagedResource`]
//! envelope; writes are limited to what the controller owns: status and the
//! finalizer.

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::api::{Api, ListParams, Patch, PatchParams};
use kube::{Client, ResourceExt};
#[cfg(any(test, feature = "test-utils"))]
use mockall::automock;
use tracing::debug;

use crate::crd::{
    O2Alert, O2Config, O2Dashboard, O2Destination, O2Function, O2Pipeline, O2Template,
    ResourceStatus,
};
use crate::resource::{ManagedObject, ManagedResource, ResourceKey, ResourceKind};
use crate::{Error, Result, FIELD_MANAGER, FINALIZER};

/// Trait abstracting reads and controller-owned writes on managed resources
///
/// This trait allows mocking the Kubernetes API in tests while using the
/// real client in production.
#[cfg_attr(any(test, feature = "test-utils"), automock)]
#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// Fetch the freshest copy of a resource
    async fn get(&self, key: &ResourceKey) -> Result<Option<ManagedResource>>;

    /// List every resource of one kind across namespaces
    async fn list(&self, kind: ResourceKind) -> Result<Vec<ManagedResource>>;

    /// Read a Secret's data as UTF-8 strings
    async fn get_secret_data(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<BTreeMap<String, String>>>;

    /// Replace the status subresource
    async fn patch_status(&self, key: &ResourceKey, status: &ResourceStatus) -> Result<()>;

    /// Attach the operator finalizer (no-op when present)
    async fn add_finalizer(&self, key: &ResourceKey) -> Result<()>;

    /// Remove the operator finalizer (no-op when absent or the object is gone)
    async fn remove_finalizer(&self, key: &ResourceKey) -> Result<()>;
}

/// Status fields a merge patch must null out when unset
const CLEARABLE_STATUS_FIELDS: [&str; 6] = [
    "conditions",
    "observedGeneration",
    "remoteId",
    "lastSyncTime",
    "syncedFingerprint",
    "message",
];

/// Merge patch body that replaces the whole status with `status`
///
/// A merge patch keeps keys it does not mention, so unset fields are sent as
/// explicit nulls.
pub fn status_merge_patch(status: &ResourceStatus) -> Result<serde_json::Value> {
    let mut body = serde_json::to_value(status)?;
    if let Some(fields) = body.as_object_mut() {
        for field in CLEARABLE_STATUS_FIELDS {
            fields
                .entry(field)
                .or_insert(serde_json::Value::Null);
        }
    }
    Ok(serde_json::json!({ "status": body }))
}

/// Run `$body` with `$T` bound to the CRD type of `$kind`
macro_rules! with_crd_type {
    ($kind:expr, $T:ident => $body:expr) => {
        match $kind {
            ResourceKind::Config => {
                type $T = O2Config;
                $body
            }
            ResourceKind::Alert => {
                type $T = O2Alert;
                $body
            }
            ResourceKind::Pipeline => {
                type $T = O2Pipeline;
                $body
            }
            ResourceKind::Function => {
                type $T = O2Function;
                $body
            }
            ResourceKind::Destination => {
                type $T = O2Destination;
                $body
            }
            ResourceKind::Template => {
                type $T = O2Template;
                $body
            }
            ResourceKind::Dashboard => {
                type $T = O2Dashboard;
                $body
            }
        }
    };
}

/// Production store backed by the Kubernetes API
pub struct KubeResourceStore {
    client: Client,
}

impl KubeResourceStore {
    /// Create a store over the given client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    async fn get_typed<T: ManagedObject>(&self, key: &ResourceKey) -> Result<Option<ManagedResource>> {
        let api: Api<T> = Api::namespaced(self.client.clone(), &key.namespace);
        Ok(api
            .get_opt(&key.name)
            .await?
            .as_ref()
            .map(ManagedResource::from_object))
    }

    async fn list_typed<T: ManagedObject>(&self) -> Result<Vec<ManagedResource>> {
        let api: Api<T> = Api::all(self.client.clone());
        let list = api.list(&ListParams::default()).await?;
        Ok(list.items.iter().map(ManagedResource::from_object).collect())
    }

    async fn patch_status_typed<T: ManagedObject>(
        &self,
        key: &ResourceKey,
        status: &ResourceStatus,
    ) -> Result<()> {
        let api: Api<T> = Api::namespaced(self.client.clone(), &key.namespace);
        let status_patch = status_merge_patch(status)?;
        api.patch_status(
            &key.name,
            &PatchParams::apply(FIELD_MANAGER),
            &Patch::Merge(&status_patch),
        )
        .await?;
        Ok(())
    }

    async fn set_finalizer_typed<T: ManagedObject>(
        &self,
        key: &ResourceKey,
        present: bool,
    ) -> Result<()> {
        let api: Api<T> = Api::namespaced(self.client.clone(), &key.namespace);

        // Get current object to read existing finalizers
        let Some(obj) = api.get_opt(&key.name).await? else {
            debug!(resource = %key, "Object gone, skipping finalizer update");
            return Ok(());
        };
        let mut finalizers = obj.finalizers().to_vec();
        let has = finalizers.iter().any(|f| f == FINALIZER);
        if has == present {
            return Ok(());
        }
        if present {
            finalizers.push(FINALIZER.to_string());
        } else {
            finalizers.retain(|f| f != FINALIZER);
        }

        let patch = serde_json::json!({
            "metadata": {
                "finalizers": finalizers
            }
        });
        api.patch(
            &key.name,
            &PatchParams::apply(FIELD_MANAGER),
            &Patch::Merge(&patch),
        )
        .await?;
        Ok(())
    }
}

#[async_trait]
impl ResourceStore for KubeResourceStore {
    async fn get(&self, key: &ResourceKey) -> Result<Option<ManagedResource>> {
        with_crd_type!(key.kind, T => self.get_typed::<T>(key).await)
    }

    async fn list(&self, kind: ResourceKind) -> Result<Vec<ManagedResource>> {
        with_crd_type!(kind, T => self.list_typed::<T>().await)
    }

    async fn get_secret_data(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<BTreeMap<String, String>>> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let Some(secret) = api.get_opt(name).await? else {
            return Ok(None);
        };

        let mut data = BTreeMap::new();
        for (k, v) in secret.data.unwrap_or_default() {
            let value = String::from_utf8(v.0).map_err(|_| {
                Error::validation_for(
                    format!("Secret/{namespace}/{name}"),
                    format!("key {k} is not valid UTF-8"),
                )
            })?;
            data.insert(k, value);
        }
        // stringData is write-only, but fake clients and tests may return it
        for (k, v) in secret.string_data.unwrap_or_default() {
            data.entry(k).or_insert(v);
        }
        Ok(Some(data))
    }

    async fn patch_status(&self, key: &ResourceKey, status: &ResourceStatus) -> Result<()> {
        with_crd_type!(key.kind, T => self.patch_status_typed::<T>(key, status).await)
    }

    async fn add_finalizer(&self, key: &ResourceKey) -> Result<()> {
        with_crd_type!(key.kind, T => self.set_finalizer_typed::<T>(key, true).await)
    }

    async fn remove_finalizer(&self, key: &ResourceKey) -> Result<()> {
        with_crd_type!(key.kind, T => self.set_finalizer_typed::<T>(key, false).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{Condition, ConditionStatus, ResourcePhase, CONDITION_READY};
    use serde_json::json;

    fn applied(previous: serde_json::Value, status: &ResourceStatus) -> ResourceStatus {
        let mut object = json!({ "status": previous });
        json_patch::merge(&mut object, &status_merge_patch(status).unwrap());
        serde_json::from_value(object["status"].clone()).unwrap()
    }

    // ==========================================================================
    // Story Tests: Status Merge Patches
    // ==========================================================================

    /// Story: Recovering from an error clears the stale message on the server
    #[test]
    fn story_cleared_fields_are_removed_by_merge() {
        let previous = json!({
            "phase": "Error",
            "message": "backend unavailable",
            "remoteId": "alert-1",
            "syncedFingerprint": "abc",
        });
        let ready = ResourceStatus {
            phase: ResourcePhase::Ready,
            ..Default::default()
        };

        let merged = applied(previous, &ready);
        assert_eq!(merged, ready);
        assert_eq!(merged.message, None);
        assert_eq!(merged.remote_id, None);
    }

    /// Story: Applying the same status twice leaves nothing left to change
    #[test]
    fn story_merged_status_round_trips_exactly() {
        let status = ResourceStatus {
            phase: ResourcePhase::Ready,
            conditions: vec![Condition::new(
                CONDITION_READY,
                ConditionStatus::True,
                "Synced",
                "in sync",
            )],
            observed_generation: Some(3),
            remote_id: Some("alert-1".into()),
            synced_fingerprint: Some("abc".into()),
            ..Default::default()
        };

        let once = applied(json!({"phase": "Pending", "message": "waiting"}), &status);
        let twice = applied(serde_json::to_value(&once).unwrap(), &status);
        assert_eq!(once, status);
        assert_eq!(twice, status);
    }

    #[test]
    fn test_patch_nulls_every_unset_field() {
        let patch = status_merge_patch(&ResourceStatus::default()).unwrap();
        for field in CLEARABLE_STATUS_FIELDS {
            assert!(patch["status"][field].is_null(), "{field} not nulled");
        }
        assert_eq!(patch["status"]["phase"], "Pending");
    }
}
