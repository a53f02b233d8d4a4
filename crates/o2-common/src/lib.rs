//! Common types for the OpenObserve operator: CRDs, errors, and utilities

#![deny(missing_docs)]

pub mod crd;
pub mod error;
pub mod events;
pub mod fingerprint;
pub mod graph;
pub mod index;
pub mod leader_election;
pub mod resource;
pub mod retry;
pub mod settings;
pub mod store;
pub mod telemetry;

pub use error::Error;
pub use resource::{ManagedResource, ResourceKey, ResourceKind};

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// API group of every managed kind
pub const API_GROUP: &str = "openobserve.ai";

/// `apiVersion` of every managed kind
pub const API_VERSION: &str = "openobserve.ai/v1alpha1";

/// Finalizer guarding remote cleanup
pub const FINALIZER: &str = "openobserve.ai/finalizer";

/// Field manager for status and finalizer patches
pub const FIELD_MANAGER: &str = "o2-operator";

/// Namespace the operator is installed into by default
pub const DEFAULT_OPERATOR_NAMESPACE: &str = "o2operator";
