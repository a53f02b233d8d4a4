//! Admission validation
//!
//! Runs on create and update, both from the webhook and at the start of
//! every reconcile. Order: the referenced Config, then the kind's structural
//! rules, then the alert destination ceiling.

use std::collections::HashMap;
use std::sync::Arc;

use o2_common::crd::MAX_ALERT_DESTINATIONS;
use o2_common::resource::AnySpec;
use o2_common::{Error, ManagedResource, ResourceKind, Result};
use tracing::debug;

use crate::deps::DependencyLookup;
use crate::validators::{builtin_validators, KindValidator};

/// Validates candidate resources before they are accepted or synced
pub struct AdmissionValidator {
    deps: Arc<dyn DependencyLookup>,
    validators: HashMap<ResourceKind, Box<dyn KindValidator>>,
}

impl AdmissionValidator {
    /// Create a validator with every built-in kind validator registered
    pub fn new(deps: Arc<dyn DependencyLookup>) -> Self {
        let validators = builtin_validators()
            .into_iter()
            .map(|v| (v.kind(), v))
            .collect();
        Self { deps, validators }
    }

    /// Lookups the validator consults
    pub fn deps(&self) -> &Arc<dyn DependencyLookup> {
        &self.deps
    }

    /// Check `candidate`
    ///
    /// Returns `Validation` for spec errors and `DependencyMissing` when the
    /// Config or an alert template is absent or not Ready.
    pub async fn validate(&self, candidate: &ManagedResource) -> Result<()> {
        let kind = candidate.kind();
        if kind != ResourceKind::Config {
            self.deps.ready_config(candidate).await?;
        }

        let validator = self.validators.get(&kind).ok_or_else(|| {
            Error::internal_with_context("admission", format!("no validator for {kind}"))
        })?;
        validator.validate(candidate, self.deps.as_ref()).await?;

        if let AnySpec::Alert(alert) = &candidate.spec {
            if alert.destinations.len() > MAX_ALERT_DESTINATIONS {
                return Err(Error::validation_for_field(
                    candidate.key.to_string(),
                    "spec.destinations",
                    format!("destinations exceed maximum of {MAX_ALERT_DESTINATIONS}"),
                ));
            }
        }

        debug!(resource = %candidate.key, "Admission passed");
        Ok(())
    }
}

/// Message shown to the user when a candidate is denied
pub fn denial_message(err: &Error) -> String {
    match err {
        Error::Validation { message, .. } => message.clone(),
        Error::DependencyMissing {
            dependency,
            message,
            ..
        } => format!("{dependency} {message}"),
        other => other.to_string(),
    }
}
