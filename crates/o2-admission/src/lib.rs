//! Admission for the OpenObserve operator
//!
//! Resolves references between managed resources, validates candidates kind
//! by kind and serves the validating admission webhook.

#![deny(missing_docs)]

pub mod admission;
pub mod deps;
pub mod validators;
pub mod webhook;

pub use admission::{denial_message, AdmissionValidator};
pub use deps::{DependencyLookup, DependencyResolver};
pub use validators::KindValidator;
pub use webhook::{serve, webhook_router, WebhookError, WebhookState};
