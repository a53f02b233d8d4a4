//! Reconcile loop
//!
//! Every kind runs the same loop keyed by [`ResourceKey`]:
//!
//! 1. take the key's lock and re-read the freshest copy
//! 2. deleted: release through the [`FinalizerManager`](crate::FinalizerManager)
//! 3. otherwise attach the finalizer, re-run admission, check references
//! 4. converge the backend: read, compare fingerprints, write only on drift
//! 5. report status; requeue at the resync interval or with backoff

use std::sync::Arc;

use chrono::Utc;
use kube::runtime::controller::Action;
use kube::runtime::events::EventType;
use kube::{Resource, ResourceExt};
use o2_common::crd::{ResourcePhase, ResourceStatus};
use o2_common::events::{actions, reasons};
use o2_common::fingerprint::{fingerprint, matches_remote};
use o2_common::resource::ManagedObject;
use o2_common::{Error, ManagedResource, ResourceKey, ResourceKind, Result};
use o2_remote::{build_payload, IdScheme, RemoteKind, RemoteSync};
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::context::Context;
use crate::finalizer::FinalizerState;
use crate::status::{report, Outcome};

/// Result of converging one resource
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SyncResult {
    /// Backend id, when the kind has a remote object
    pub remote_id: Option<String>,
    /// Fingerprint of the desired payload
    pub fingerprint: Option<String>,
    /// A create or update was sent
    pub wrote: bool,
}

/// kube-runtime entry point for any managed kind
pub async fn reconcile<T: ManagedObject>(obj: Arc<T>, ctx: Arc<Context>) -> Result<Action> {
    let key = ResourceKey::new(T::KIND, obj.namespace().unwrap_or_default(), obj.name_any());
    reconcile_key(&ctx, &key).await
}

/// kube-runtime error policy for any managed kind
pub fn error_policy<T: ManagedObject>(obj: Arc<T>, error: &Error, ctx: Arc<Context>) -> Action {
    let key = ResourceKey::new(T::KIND, obj.namespace().unwrap_or_default(), obj.name_any());
    let deleting = obj.meta().deletion_timestamp.is_some();
    requeue_after_error(&ctx, &key, error, deleting)
}

/// Requeue decision after a failed reconcile
///
/// Terminal errors wait for a spec change, except during deletion, which
/// always retries.
pub fn requeue_after_error(
    ctx: &Context,
    key: &ResourceKey,
    error: &Error,
    deleting: bool,
) -> Action {
    if error.is_terminal() && !deleting {
        debug!(resource = %key, reason = error.reason(), "Waiting for a spec change");
        return Action::await_change();
    }
    let delay = ctx.backoff.next_delay(key);
    debug!(
        resource = %key,
        reason = error.reason(),
        failures = ctx.backoff.failures(key),
        delay_ms = delay.as_millis() as u64,
        "Requeueing with backoff"
    );
    Action::requeue(delay)
}

/// Reconcile the resource identified by `key`
#[instrument(skip(ctx), fields(resource = %key))]
pub async fn reconcile_key(ctx: &Context, key: &ResourceKey) -> Result<Action> {
    let guard = ctx.locks.lock(key).await;

    let Some(resource) = ctx.store.get(key).await? else {
        debug!("Resource no longer exists");
        ctx.index.delete(key);
        ctx.backoff.reset(key);
        drop(guard);
        ctx.locks.forget(key);
        return Ok(Action::await_change());
    };

    match FinalizerState::of(&resource) {
        FinalizerState::Active => {
            ctx.index.put(&resource);
            sync_and_report(ctx, &resource).await
        }
        FinalizerState::Deleting => {
            ctx.index.put(&resource);
            release_and_report(ctx, &resource).await
        }
        FinalizerState::Released => {
            ctx.index.delete(key);
            Ok(Action::await_change())
        }
    }
}

async fn sync_and_report(ctx: &Context, resource: &ManagedResource) -> Result<Action> {
    ctx.finalizers.attach(resource).await?;

    let mut current = resource.status.clone();
    if matches!(current.phase, ResourcePhase::Pending | ResourcePhase::Error) {
        current = write_status(ctx, resource, &current, Outcome::Syncing).await?;
    }

    match sync(ctx, resource).await {
        Ok(result) => {
            write_status(
                ctx,
                resource,
                &current,
                Outcome::Synced {
                    remote_id: result.remote_id.clone(),
                    fingerprint: result.fingerprint.clone(),
                    wrote: result.wrote,
                },
            )
            .await?;
            ctx.backoff.reset(&resource.key);
            if result.wrote {
                info!(remote_id = ?result.remote_id, "Synced");
                publish(ctx, resource, EventType::Normal, reasons::SYNC_SUCCEEDED, actions::RECONCILE, None).await;
            } else {
                debug!("Already in sync");
            }
            Ok(Action::requeue(ctx.settings.resync_interval()))
        }
        Err(err) => {
            warn!(reason = err.reason(), error = %err, "Sync failed");
            if let Err(status_err) =
                write_status(ctx, resource, &current, Outcome::Failed(&err)).await
            {
                warn!(error = %status_err, "Failed to record sync failure");
            }
            let reason = match &err {
                Error::Validation { .. } => reasons::VALIDATION_FAILED,
                Error::DependencyMissing { .. } => reasons::DEPENDENCY_MISSING,
                _ => reasons::SYNC_FAILED,
            };
            publish(ctx, resource, EventType::Warning, reason, actions::RECONCILE, Some(err.to_string())).await;
            Err(err)
        }
    }
}

async fn release_and_report(ctx: &Context, resource: &ManagedResource) -> Result<Action> {
    let current = if resource.status.phase != ResourcePhase::Deleting {
        publish(ctx, resource, EventType::Normal, reasons::DELETION_STARTED, actions::DELETE, None).await;
        write_status(ctx, resource, &resource.status, Outcome::Deleting).await?
    } else {
        resource.status.clone()
    };

    match ctx.finalizers.release(resource).await {
        Ok(_) => {
            ctx.backoff.reset(&resource.key);
            publish(ctx, resource, EventType::Normal, reasons::REMOTE_DELETED, actions::DELETE, None).await;
            Ok(Action::await_change())
        }
        Err(err) => {
            warn!(reason = err.reason(), error = %err, "Deletion blocked");
            if let Err(status_err) =
                write_status(ctx, resource, &current, Outcome::DeletionBlocked(&err)).await
            {
                warn!(error = %status_err, "Failed to record blocked deletion");
            }
            publish(
                ctx,
                resource,
                EventType::Warning,
                reasons::DELETION_BLOCKED,
                actions::DELETE,
                Some(err.to_string()),
            )
            .await;
            Err(err)
        }
    }
}

/// Bring the backend in line with `resource`
async fn sync(ctx: &Context, resource: &ManagedResource) -> Result<SyncResult> {
    ctx.admission.validate(resource).await?;
    ctx.resolver.check_references(resource).await?;

    if resource.kind() == ResourceKind::Config {
        let client = ctx.clients.client_for_config(resource).await?;
        client.verify_connection().await?;
        return Ok(SyncResult {
            remote_id: None,
            fingerprint: None,
            wrote: !resource.status.is_converged(resource.generation),
        });
    }

    let client = ctx.clients.client_for(resource).await?;
    let remote = RemoteKind::require(resource.kind())?;
    let payload = build_payload(resource.name(), &resource.spec)?;
    let fp = fingerprint(&payload);

    let (remote_id, wrote) = match resource.remote_id() {
        Some(id) => converge_existing(client.as_ref(), &remote, resource, id, &payload).await?,
        None => {
            let remote_name = payload
                .get(remote.name_field)
                .and_then(Value::as_str)
                .unwrap_or(resource.name());
            adopt_or_create(client.as_ref(), &remote, resource.kind(), remote_name, &payload).await?
        }
    };

    Ok(SyncResult {
        remote_id: Some(remote_id),
        fingerprint: Some(fp),
        wrote,
    })
}

/// Create the backend object, adopting one that already carries its name
///
/// Server-assigned ids are only returned by the create call, so an id lost
/// before the status write is recovered by listing before creating again.
async fn adopt_or_create(
    client: &dyn RemoteSync,
    remote: &RemoteKind,
    kind: ResourceKind,
    name: &str,
    payload: &Value,
) -> Result<(String, bool)> {
    if matches!(remote.id_scheme, IdScheme::ServerAssigned) {
        if let Some(remote_id) = client.find_by_name(kind, name).await? {
            info!(remote_id = %remote_id, "Adopted existing remote object");
            let wrote = converge(client, kind, &remote_id, payload).await?;
            return Ok((remote_id, wrote));
        }
    }

    let created = client.create(kind, name, payload).await?;
    let wrote = if created.adopted {
        info!(remote_id = %created.remote_id, "Adopted existing remote object");
        converge(client, kind, &created.remote_id, payload).await?
    } else {
        info!(remote_id = %created.remote_id, "Created remote object");
        true
    };
    Ok((created.remote_id, wrote))
}

/// Converge an object that has a recorded id, recreating it if it vanished
async fn converge_existing(
    client: &dyn RemoteSync,
    remote: &RemoteKind,
    resource: &ManagedResource,
    remote_id: &str,
    payload: &Value,
) -> Result<(String, bool)> {
    match client.get(resource.kind(), remote_id).await? {
        Some(observed) if matches_remote(payload, &observed) => Ok((remote_id.to_string(), false)),
        Some(_) => {
            client.update(resource.kind(), remote_id, payload).await?;
            info!(remote_id, "Updated drifted remote object");
            Ok((remote_id.to_string(), true))
        }
        None => match remote.id_scheme {
            IdScheme::Name => {
                warn!(remote_id, "Remote object vanished, recreating");
                let created = client.create(resource.kind(), resource.name(), payload).await?;
                Ok((created.remote_id, true))
            }
            IdScheme::ServerAssigned => Err(Error::remote_conflict(
                resource.key.to_string(),
                format!("remote object {remote_id} no longer exists; clear status.remoteId to recreate it"),
            )),
        },
    }
}

/// Update `remote_id` unless it already matches
async fn converge(
    client: &dyn RemoteSync,
    kind: ResourceKind,
    remote_id: &str,
    payload: &Value,
) -> Result<bool> {
    let matches = client
        .get(kind, remote_id)
        .await?
        .is_some_and(|observed| matches_remote(payload, &observed));
    if matches {
        return Ok(false);
    }
    client.update(kind, remote_id, payload).await?;
    Ok(true)
}

/// Patch the status when `outcome` changes it; returns the resulting status
async fn write_status(
    ctx: &Context,
    resource: &ManagedResource,
    current: &ResourceStatus,
    outcome: Outcome<'_>,
) -> Result<ResourceStatus> {
    let next = report(current, resource.generation, outcome, Utc::now());
    if next != *current {
        ctx.store.patch_status(&resource.key, &next).await?;
        debug!(phase = %next.phase, "Status updated");
    }
    Ok(next)
}

async fn publish(
    ctx: &Context,
    resource: &ManagedResource,
    type_: EventType,
    reason: &str,
    action: &str,
    note: Option<String>,
) {
    ctx.events
        .publish(&resource.object_ref(), type_, reason, action, note)
        .await;
}
