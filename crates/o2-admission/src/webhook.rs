//! Validating admission webhook
//!
//! Serves `POST /validate` for all seven kinds and `GET /healthz`. DELETE is
//! always allowed since the finalizer protocol guards deletion, as is any
//! UPDATE of an object already marked for deletion. UPDATEs that leave the
//! spec untouched skip validation; `spec.configRef` cannot change once set.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use axum_server::tls_rustls::RustlsConfig;
use kube::api::DynamicObject;
use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview, Operation};
use o2_common::resource::AnySpec;
use o2_common::{Error, ManagedResource, ResourceKey, ResourceKind, FINALIZER};
use tracing::{debug, error, info, warn};

use crate::admission::{denial_message, AdmissionValidator};

/// Upper bound on one admission check; the API server gives up at 10s
const VALIDATION_TIMEOUT: Duration = Duration::from_secs(5);

/// Error type for webhook serving
#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    /// The certificate or key could not be loaded
    #[error("TLS config error: {0}")]
    Tls(String),

    /// The listener failed
    #[error("webhook server error: {0}")]
    Serve(#[from] std::io::Error),
}

/// Shared state for webhook handlers
pub struct WebhookState {
    /// Validator run on every create and update
    pub validator: Arc<AdmissionValidator>,
}

impl WebhookState {
    /// Create webhook state around a validator
    pub fn new(validator: Arc<AdmissionValidator>) -> Self {
        Self { validator }
    }
}

/// Create the webhook router
pub fn webhook_router(state: Arc<WebhookState>) -> Router {
    Router::new()
        .route("/validate", post(validate_handler))
        .route("/healthz", get(|| async { "ok" }))
        .with_state(state)
}

/// Serve `router` on `addr`, over TLS when both PEM files are given
pub async fn serve(
    addr: SocketAddr,
    cert: Option<PathBuf>,
    key: Option<PathBuf>,
    router: Router,
) -> Result<(), WebhookError> {
    match (cert, key) {
        (Some(cert), Some(key)) => {
            let tls = RustlsConfig::from_pem_file(&cert, &key)
                .await
                .map_err(|e| WebhookError::Tls(format!("{}: {e}", cert.display())))?;
            info!(addr = %addr, "Starting admission webhook (TLS)");
            axum_server::bind_rustls(addr, tls)
                .serve(router.into_make_service())
                .await?;
        }
        _ => {
            warn!(addr = %addr, "Starting admission webhook without TLS");
            axum_server::bind(addr)
                .serve(router.into_make_service())
                .await?;
        }
    }
    Ok(())
}

/// Handle a validating admission review
pub async fn validate_handler(
    State(state): State<Arc<WebhookState>>,
    Json(body): Json<AdmissionReview<DynamicObject>>,
) -> Json<AdmissionReview<DynamicObject>> {
    let req: AdmissionRequest<DynamicObject> = match body.try_into() {
        Ok(req) => req,
        Err(e) => {
            error!(error = %e, "Failed to parse admission request");
            return Json(AdmissionResponse::invalid(e.to_string()).into_review());
        }
    };

    let response = review(&state, &req).await;
    Json(response.into_review())
}

async fn review(state: &WebhookState, request: &AdmissionRequest<DynamicObject>) -> AdmissionResponse {
    let allow = || AdmissionResponse::from(request);

    if matches!(request.operation, Operation::Delete | Operation::Connect) {
        return allow();
    }
    let Some(kind) = ResourceKind::from_kind_name(&request.kind.kind) else {
        debug!(kind = %request.kind.kind, "Not a managed kind, allowing");
        return allow();
    };
    let Some(obj) = &request.object else {
        return allow();
    };

    // The finalizer removal on a deleting object must always go through
    if matches!(request.operation, Operation::Update) && obj.metadata.deletion_timestamp.is_some() {
        debug!(uid = %request.uid, "Object is being deleted, allowing");
        return allow();
    }

    let candidate = match candidate(kind, request, obj) {
        Ok(c) => c,
        Err(e) => return allow().deny(denial_message(&e)),
    };

    if matches!(request.operation, Operation::Update) {
        if let Some(old) = &request.old_object {
            if old.data.get("spec") == obj.data.get("spec") {
                debug!(uid = %request.uid, resource = %candidate.key, "Spec unchanged, allowing");
                return allow();
            }
            if let Err(e) = config_ref_unchanged(kind, request, old, &candidate) {
                info!(uid = %request.uid, resource = %candidate.key, "Denied configRef change");
                return allow().deny(denial_message(&e));
            }
        }
    }

    match tokio::time::timeout(VALIDATION_TIMEOUT, state.validator.validate(&candidate)).await {
        Ok(Ok(())) => {
            debug!(uid = %request.uid, resource = %candidate.key, "Admitted");
            allow()
        }
        Ok(Err(e)) => {
            info!(
                uid = %request.uid,
                resource = %candidate.key,
                reason = e.reason(),
                error = %e,
                "Denied"
            );
            allow().deny(denial_message(&e))
        }
        Err(_) => {
            warn!(uid = %request.uid, resource = %candidate.key, "Admission check timed out");
            allow().deny(format!(
                "validation of {} timed out after {}s",
                candidate.key,
                VALIDATION_TIMEOUT.as_secs()
            ))
        }
    }
}

/// Reject moving an existing object to another Config
///
/// The remote object lives in the old Config's backend; a new reference would
/// leave it orphaned there.
fn config_ref_unchanged(
    kind: ResourceKind,
    request: &AdmissionRequest<DynamicObject>,
    old: &DynamicObject,
    candidate: &ManagedResource,
) -> o2_common::Result<()> {
    let Ok(previous) = self::candidate(kind, request, old) else {
        return Ok(());
    };
    if previous.config_key() == candidate.config_key() {
        return Ok(());
    }
    Err(Error::validation_for_field(
        candidate.key.to_string(),
        "spec.configRef",
        "spec.configRef is immutable; delete and recreate the resource to use another Config",
    ))
}

/// Build the envelope for an incoming object
fn candidate(
    kind: ResourceKind,
    request: &AdmissionRequest<DynamicObject>,
    obj: &DynamicObject,
) -> o2_common::Result<ManagedResource> {
    let meta = &obj.metadata;
    let namespace = meta
        .namespace
        .clone()
        .or_else(|| request.namespace.clone())
        .unwrap_or_default();
    let name = meta
        .name
        .clone()
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| request.name.clone());

    let spec = obj.data.get("spec").cloned().ok_or_else(|| {
        Error::validation_for_field(
            format!("{kind}/{namespace}/{name}"),
            "spec",
            "spec is required",
        )
    })?;
    let spec = AnySpec::from_value(kind, spec).map_err(|e| {
        let detail = match e {
            Error::Serialization { message, .. } => message,
            other => other.to_string(),
        };
        Error::validation_for(
            format!("{kind}/{namespace}/{name}"),
            format!("invalid {} spec: {detail}", kind.crd_kind()),
        )
    })?;

    Ok(ManagedResource {
        key: ResourceKey::new(kind, namespace, name),
        uid: meta.uid.clone(),
        generation: meta.generation.unwrap_or_default(),
        deletion_requested: meta.deletion_timestamp.is_some(),
        finalizer_present: meta
            .finalizers
            .as_ref()
            .is_some_and(|f| f.iter().any(|f| f == FINALIZER)),
        status: Default::default(),
        spec,
    })
}
