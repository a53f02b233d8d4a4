//! Reconcile loop for the OpenObserve operator
//!
//! One controller per managed kind drives every resource towards its spec:
//! attach the finalizer, validate, converge the backend object and report
//! status. Deletion runs the same loop through the [`FinalizerManager`].

#![deny(missing_docs)]

mod backoff;
mod context;
mod finalizer;
mod locks;
mod reconcile;
mod runner;
mod status;

pub use backoff::RequeueBackoff;
pub use context::{Context, ContextBuilder};
pub use finalizer::{FinalizerManager, FinalizerState};
pub use locks::KeyedLocks;
pub use reconcile::{error_policy, reconcile, reconcile_key, requeue_after_error, SyncResult};
pub use runner::{build_controllers, warm_index};
pub use status::{report, Outcome};
