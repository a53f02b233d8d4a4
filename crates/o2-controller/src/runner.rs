//! Controller runner - builds one controller future per managed kind
//!
//! Each controller watches its own kind through a generation filter so the
//! operator's status and finalizer writes do not re-trigger it, plus the
//! kinds it depends on so a dependency becoming Ready (or changing) requeues
//! its dependents through the [`DependencyIndex`](o2_common::index::DependencyIndex).

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use futures::{future, Stream, StreamExt, TryStreamExt};
use kube::runtime::controller::Config as ControllerConfig;
use kube::runtime::reflector::ObjectRef;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::{reflector, watcher, Controller, WatchStreamExt};
use kube::{Api, Client, Resource, ResourceExt};
use o2_common::crd::{
    O2Alert, O2Config, O2Dashboard, O2Destination, O2Function, O2Pipeline, O2Template,
};
use o2_common::resource::ManagedObject;
use o2_common::{ResourceKey, ResourceKind, Result};
use tracing::{debug, info};

use crate::context::Context;
use crate::reconcile::{error_policy, reconcile};

/// Watcher timeout (seconds) - must be less than client read_timeout (30s)
const WATCH_TIMEOUT_SECS: u32 = 25;

type ControllerFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

fn watcher_config() -> WatcherConfig {
    WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS)
}

/// Generation and deletion state last passed through for one object
type SpecMarker = (Option<i64>, bool);

/// Passes an object only when its generation or deletion state moved
///
/// Entries are dropped on delete events and pruned after every relist, so
/// objects deleted while the watch was down are forgotten too.
struct SpecFilter<K: ManagedObject> {
    seen: HashMap<ObjectRef<K>, SpecMarker>,
    relisted: Option<HashSet<ObjectRef<K>>>,
}

impl<K: ManagedObject> SpecFilter<K> {
    fn new() -> Self {
        Self {
            seen: HashMap::new(),
            relisted: None,
        }
    }

    fn admit(&mut self, event: watcher::Event<K>) -> Option<K> {
        match event {
            watcher::Event::Init => {
                self.relisted = Some(HashSet::new());
                None
            }
            watcher::Event::InitApply(obj) => {
                if let Some(relisted) = self.relisted.as_mut() {
                    relisted.insert(ObjectRef::from_obj(&obj));
                }
                self.changed(obj)
            }
            watcher::Event::InitDone => {
                if let Some(relisted) = self.relisted.take() {
                    self.seen.retain(|obj_ref, _| relisted.contains(obj_ref));
                }
                None
            }
            watcher::Event::Apply(obj) => self.changed(obj),
            watcher::Event::Delete(obj) => {
                self.seen.remove(&ObjectRef::from_obj(&obj));
                None
            }
        }
    }

    fn changed(&mut self, obj: K) -> Option<K> {
        let marker = (
            obj.meta().generation,
            obj.meta().deletion_timestamp.is_some(),
        );
        let previous = self.seen.insert(ObjectRef::from_obj(&obj), marker);
        (previous != Some(marker)).then_some(obj)
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.seen.len()
    }
}

/// Reflector-backed stream of `K` filtered to spec changes
fn spec_stream<K: ManagedObject>(
    api: Api<K>,
) -> (
    reflector::Store<K>,
    impl Stream<Item = std::result::Result<K, watcher::Error>> + Send + 'static,
) {
    let (reader, writer) = reflector::store();
    let mut filter = SpecFilter::<K>::new();
    let stream = reflector(writer, watcher(api, watcher_config()))
        .default_backoff()
        .try_filter_map(move |event| future::ready(Ok(filter.admit(event))));
    (reader, stream)
}

/// Controller for `K` with its configured concurrency
fn controller_for<K: ManagedObject>(client: &Client, ctx: &Context) -> Controller<K> {
    let (reader, stream) = spec_stream(Api::<K>::all(client.clone()));
    Controller::for_stream(stream, reader).with_config(
        ControllerConfig::default().concurrency(ctx.settings.concurrency(K::KIND)),
    )
}

/// Requeue every `K` that references a changed `D`
fn watch_dependency<K: ManagedObject, D: ManagedObject>(
    controller: Controller<K>,
    client: &Client,
    ctx: &Context,
) -> Controller<K> {
    let index = Arc::clone(&ctx.index);
    controller.watches(
        Api::<D>::all(client.clone()),
        watcher_config(),
        move |dependency: D| {
            let key = ResourceKey::new(
                D::KIND,
                dependency.namespace().unwrap_or_default(),
                dependency.name_any(),
            );
            let affected = index.dependents_of_kind(&key, K::KIND);
            if !affected.is_empty() {
                debug!(
                    dependency = %key,
                    affected_count = affected.len(),
                    "Triggering re-reconciliation of dependents"
                );
            }
            affected
                .into_iter()
                .map(|k| ObjectRef::<K>::new(&k.name).within(&k.namespace))
                .collect::<Vec<_>>()
        },
    )
}

fn run<K: ManagedObject>(controller: Controller<K>, ctx: &Arc<Context>) -> ControllerFuture {
    Box::pin(
        controller
            .shutdown_on_signal()
            .run(reconcile::<K>, error_policy::<K>, Arc::clone(ctx))
            .for_each(log_reconcile_result(K::KIND.crd_kind())),
    )
}

/// Load every managed resource into the dependency index
///
/// Run before the controllers start so dependents are known before their
/// dependencies are first reconciled.
pub async fn warm_index(ctx: &Context) -> Result<usize> {
    let mut loaded = 0;
    for kind in ResourceKind::ALL {
        for resource in ctx.store.list(kind).await? {
            ctx.index.put(&resource);
            loaded += 1;
        }
    }
    info!(resources = loaded, edges = ctx.index.len(), "Dependency index warmed");
    Ok(loaded)
}

/// Build the controller futures for every managed kind
pub fn build_controllers(client: Client, ctx: Arc<Context>) -> Vec<ControllerFuture> {
    info!("- O2Config controller");
    let configs = controller_for::<O2Config>(&client, &ctx);

    info!("- O2Template controller");
    let templates = controller_for::<O2Template>(&client, &ctx);
    let templates = watch_dependency::<O2Template, O2Config>(templates, &client, &ctx);

    info!("- O2Destination controller");
    let destinations = controller_for::<O2Destination>(&client, &ctx);
    let destinations = watch_dependency::<O2Destination, O2Config>(destinations, &client, &ctx);
    let destinations = watch_dependency::<O2Destination, O2Template>(destinations, &client, &ctx);

    info!("- O2Function controller");
    let functions = controller_for::<O2Function>(&client, &ctx);
    let functions = watch_dependency::<O2Function, O2Config>(functions, &client, &ctx);

    info!("- O2Alert controller");
    let alerts = controller_for::<O2Alert>(&client, &ctx);
    let alerts = watch_dependency::<O2Alert, O2Config>(alerts, &client, &ctx);
    let alerts = watch_dependency::<O2Alert, O2Destination>(alerts, &client, &ctx);

    info!("- O2Pipeline controller");
    let pipelines = controller_for::<O2Pipeline>(&client, &ctx);
    let pipelines = watch_dependency::<O2Pipeline, O2Config>(pipelines, &client, &ctx);
    let pipelines = watch_dependency::<O2Pipeline, O2Function>(pipelines, &client, &ctx);
    let pipelines = watch_dependency::<O2Pipeline, O2Destination>(pipelines, &client, &ctx);

    info!("- O2Dashboard controller");
    let dashboards = controller_for::<O2Dashboard>(&client, &ctx);
    let dashboards = watch_dependency::<O2Dashboard, O2Config>(dashboards, &client, &ctx);

    vec![
        run(configs, &ctx),
        run(templates, &ctx),
        run(destinations, &ctx),
        run(functions, &ctx),
        run(alerts, &ctx),
        run(pipelines, &ctx),
        run(dashboards, &ctx),
    ]
}

fn log_reconcile_result<T: std::fmt::Debug, E: std::fmt::Debug>(
    controller_name: &'static str,
) -> impl Fn(std::result::Result<T, E>) -> std::future::Ready<()> {
    move |result| {
        match result {
            Ok(action) => debug!(?action, "{} reconciliation completed", controller_name),
            Err(e) => tracing::error!(error = ?e, "{} reconciliation error", controller_name),
        }
        std::future::ready(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn template(name: &str, generation: i64, deleting: bool) -> O2Template {
        let mut metadata = json!({
            "name": name,
            "namespace": "obs",
            "generation": generation,
        });
        if deleting {
            metadata["deletionTimestamp"] = json!("2026-01-01T00:00:00Z");
        }
        serde_json::from_value(json!({
            "apiVersion": o2_common::API_VERSION,
            "kind": "O2Template",
            "metadata": metadata,
            "spec": {
                "configRef": {"name": "main"},
                "transportType": "http",
                "body": "{alert_name}",
            },
        }))
        .unwrap()
    }

    #[test]
    fn test_spec_filter_drops_status_only_updates() {
        let mut filter = SpecFilter::<O2Template>::new();
        assert!(filter.admit(watcher::Event::Apply(template("slack", 1, false))).is_some());
        assert!(filter.admit(watcher::Event::Apply(template("slack", 1, false))).is_none());
        assert!(filter.admit(watcher::Event::Apply(template("slack", 2, false))).is_some());
        assert!(filter.admit(watcher::Event::Apply(template("slack", 2, true))).is_some());
        assert!(filter.admit(watcher::Event::Apply(template("slack", 2, true))).is_none());
    }

    /// Story: Deleted objects do not stay in the filter's memory
    #[test]
    fn story_deleted_objects_are_forgotten() {
        let mut filter = SpecFilter::<O2Template>::new();
        filter.admit(watcher::Event::Apply(template("slack", 1, false)));
        filter.admit(watcher::Event::Apply(template("pager", 1, false)));
        filter.admit(watcher::Event::Apply(template("slack", 1, true)));
        assert_eq!(filter.len(), 2);

        assert!(filter.admit(watcher::Event::Delete(template("slack", 1, true))).is_none());
        assert_eq!(filter.len(), 1);

        // A recreated object with the same name is new again
        assert!(filter.admit(watcher::Event::Apply(template("slack", 1, false))).is_some());
    }

    /// Story: Objects deleted while the watch was down are pruned on relist
    #[test]
    fn story_relist_prunes_objects_missed_while_disconnected() {
        let mut filter = SpecFilter::<O2Template>::new();
        filter.admit(watcher::Event::Apply(template("slack", 1, false)));
        filter.admit(watcher::Event::Apply(template("pager", 3, false)));

        assert!(filter.admit(watcher::Event::Init).is_none());
        assert!(filter.admit(watcher::Event::InitApply(template("pager", 3, false))).is_none());
        assert!(filter.admit(watcher::Event::InitDone).is_none());

        assert_eq!(filter.len(), 1);
        assert!(filter.admit(watcher::Event::Apply(template("pager", 3, false))).is_none());
    }
}
