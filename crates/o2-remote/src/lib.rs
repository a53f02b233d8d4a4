//! Backend side of the OpenObserve operator
//!
//! Resolves `configRef`s into authenticated client descriptors and talks to
//! the backend's REST API with per-Config rate limiting, a connection cap
//! and bounded retry.

#![deny(missing_docs)]

pub mod client;
pub mod config;
pub mod limiter;
pub mod payload;
pub mod registry;

pub use client::{BackendClient, Created, Deleted, RemoteSync};
pub use config::{ClientDescriptor, ConfigResolver, CredentialScope, RateLimit};
pub use payload::{build_payload, IdScheme, RemoteKind};
pub use registry::{ClientProvider, ClientRegistry};

#[cfg(any(test, feature = "test-utils"))]
pub use client::MockRemoteSync;
#[cfg(any(test, feature = "test-utils"))]
pub use registry::MockClientProvider;
