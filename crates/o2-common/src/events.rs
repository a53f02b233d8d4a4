//! Kubernetes Events for managed resources
//!
//! Events are fire-and-forget: a failed publish is logged and never fails
//! the reconcile that emitted it.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::{EventType, Recorder, Reporter};
use kube::Client;
use tracing::warn;

/// Publishes Events on managed resources
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish one Event about `resource_ref`
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    );
}

/// Publisher backed by `kube::runtime::events::Recorder`
pub struct KubeEventPublisher {
    recorder: Recorder,
}

impl KubeEventPublisher {
    /// Create a publisher reporting as `controller_name`
    pub fn new(client: Client, controller_name: &str) -> Self {
        let reporter = Reporter {
            controller: controller_name.to_string(),
            instance: None,
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait]
impl EventPublisher for KubeEventPublisher {
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        let event = kube::runtime::events::Event {
            type_,
            reason: reason.to_string(),
            note,
            action: action.to_string(),
            secondary: None,
        };
        if let Err(e) = self.recorder.publish(&event, resource_ref).await {
            warn!(
                reason,
                action,
                object = ?resource_ref.name,
                error = %e,
                "Failed to publish Kubernetes event"
            );
        }
    }
}

/// Publisher that drops every Event
pub struct NoopEventPublisher;

#[async_trait]
impl EventPublisher for NoopEventPublisher {
    async fn publish(
        &self,
        _resource_ref: &ObjectReference,
        _type_: EventType,
        _reason: &str,
        _action: &str,
        _note: Option<String>,
    ) {
    }
}

/// Publisher that keeps `(object name, reason)` pairs for assertions
#[cfg(any(test, feature = "test-utils"))]
#[derive(Default)]
pub struct RecordingEventPublisher {
    events: std::sync::Mutex<Vec<(String, String)>>,
}

#[cfg(any(test, feature = "test-utils"))]
impl RecordingEventPublisher {
    /// Reasons published so far, in order
    pub fn reasons(&self) -> Vec<String> {
        self.events
            .lock()
            .map(|e| e.iter().map(|(_, r)| r.clone()).collect())
            .unwrap_or_default()
    }
}

#[cfg(any(test, feature = "test-utils"))]
#[async_trait]
impl EventPublisher for RecordingEventPublisher {
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        _type_: EventType,
        reason: &str,
        _action: &str,
        _note: Option<String>,
    ) {
        if let Ok(mut events) = self.events.lock() {
            events.push((
                resource_ref.name.clone().unwrap_or_default(),
                reason.to_string(),
            ));
        }
    }
}

/// Event reasons (REASON column of `kubectl get events`)
pub mod reasons {
    /// Remote object created or updated
    pub const SYNC_SUCCEEDED: &str = "SyncSucceeded";
    /// Remote call failed
    pub const SYNC_FAILED: &str = "SyncFailed";
    /// Spec rejected at reconcile time
    pub const VALIDATION_FAILED: &str = "ValidationFailed";
    /// A referenced resource is missing or not ready
    pub const DEPENDENCY_MISSING: &str = "DependencyMissing";
    /// Deletion requested, remote cleanup started
    pub const DELETION_STARTED: &str = "DeletionStarted";
    /// Deletion waiting for dependents to go away
    pub const DELETION_BLOCKED: &str = "DeletionBlocked";
    /// Remote object removed, finalizer released
    pub const REMOTE_DELETED: &str = "RemoteDeleted";
}

/// Event actions (ACTION column of `kubectl get events`)
pub mod actions {
    /// Normal reconcile pass
    pub const RECONCILE: &str = "Reconcile";
    /// Finalizer-driven deletion
    pub const DELETE: &str = "Delete";
}
