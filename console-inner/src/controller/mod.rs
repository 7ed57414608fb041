//! Event-driven convergence for the two custom resource kinds.
//!
//! Each kind gets a watcher-backed reflector store (the indexed cache) and
//! a reconcile loop fed by a channel. Child-object watchers translate
//! deletes back into parent reconciles via the `app` label, and
//! ConfigMap/Secret updates roll the owning deployment. Watch loops never
//! panic: stream errors are logged and retried with backoff.

mod combinator;
mod worker;

use futures::StreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Secret, Service};
use kube::api::{Api, DynamicObject, Patch, PatchParams};
use kube::runtime::reflector::{ObjectRef, Store};
use kube::runtime::watcher::{self, Event, watcher};
use kube::runtime::{reflector, WatchStreamExt};
use kube::ResourceExt;
use serde::de::DeserializeOwned;
use serde_json::json;
use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::pin::pin;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::cluster::crds::{CombinatorApp, WorkerApp};
use crate::cluster::{
    COMBINATOR_NAMESPACE, INGRESS_NAMESPACE, RESTARTED_AT_ANNOTATION, WORKER_NAMESPACE,
    ingress_route_resource,
};
use crate::env::Env;

/// Running controller. Holds every watch and reconcile task.
pub struct Controller {
    tasks: JoinSet<()>,
}

impl Controller {
    /// Spawns the informer and reconcile loops for both CR kinds and
    /// waits for the CR caches to sync before returning.
    pub async fn start(env: Arc<Env>) -> Self {
        let mut tasks = JoinSet::new();

        let (worker_tx, worker_rx) = mpsc::unbounded_channel::<String>();
        let (combinator_tx, combinator_rx) = mpsc::unbounded_channel::<String>();

        // WorkerApp informer + reconcile loop.
        let worker_api: Api<WorkerApp> = Api::namespaced(env.kube.clone(), WORKER_NAMESPACE);
        let (worker_store, worker_writer) = reflector::store::<WorkerApp>();
        tasks.spawn(watch_custom_resources(
            env.clone(),
            worker_api,
            worker_writer,
            worker_tx.clone(),
            worker::teardown,
        ));
        tasks.spawn(reconcile_loop(
            env.clone(),
            worker_store.clone(),
            WORKER_NAMESPACE,
            worker_rx,
            worker::reconcile,
        ));

        // CombinatorApp informer + reconcile loop.
        let combinator_api: Api<CombinatorApp> =
            Api::namespaced(env.kube.clone(), COMBINATOR_NAMESPACE);
        let (combinator_store, combinator_writer) = reflector::store::<CombinatorApp>();
        tasks.spawn(watch_custom_resources(
            env.clone(),
            combinator_api,
            combinator_writer,
            combinator_tx.clone(),
            combinator::teardown,
        ));
        tasks.spawn(reconcile_loop(
            env.clone(),
            combinator_store.clone(),
            COMBINATOR_NAMESPACE,
            combinator_rx,
            combinator::reconcile,
        ));

        // Child deletes re-reconcile the parent looked up by `app` label.
        spawn_child_delete_watcher::<Deployment>(
            &mut tasks,
            Api::namespaced(env.kube.clone(), WORKER_NAMESPACE),
            vec![worker_tx.clone()],
        );
        spawn_child_delete_watcher::<Service>(
            &mut tasks,
            Api::namespaced(env.kube.clone(), WORKER_NAMESPACE),
            vec![worker_tx.clone()],
        );
        spawn_child_delete_watcher::<Deployment>(
            &mut tasks,
            Api::namespaced(env.kube.clone(), COMBINATOR_NAMESPACE),
            vec![combinator_tx.clone()],
        );
        spawn_child_delete_watcher::<Service>(
            &mut tasks,
            Api::namespaced(env.kube.clone(), COMBINATOR_NAMESPACE),
            vec![combinator_tx.clone()],
        );
        // Ingress routes of both kinds live in one namespace; each
        // reconcile loop ignores names missing from its own cache.
        spawn_child_delete_watcher::<DynamicObject>(
            &mut tasks,
            Api::namespaced_with(env.kube.clone(), INGRESS_NAMESPACE, &ingress_route_resource()),
            vec![worker_tx.clone(), combinator_tx.clone()],
        );

        // ConfigMap/Secret updates roll the owning worker deployment so
        // pods observe the new data.
        spawn_config_update_watcher::<ConfigMap>(
            &mut tasks,
            env.clone(),
            Api::namespaced(env.kube.clone(), WORKER_NAMESPACE),
        );
        spawn_config_update_watcher::<Secret>(
            &mut tasks,
            env.clone(),
            Api::namespaced(env.kube.clone(), WORKER_NAMESPACE),
        );

        info!("controller starting informers");
        worker_store.wait_until_ready().await.ok();
        combinator_store.wait_until_ready().await.ok();
        info!("controller informer caches synced");

        Self { tasks }
    }

    /// Aborts every watch loop. Reconciles in flight finish on their own.
    pub fn shutdown(mut self) {
        self.tasks.abort_all();
    }
}

/// Watches one CR kind: applies reconcile, deletes tear children down.
async fn watch_custom_resources<K, TF, TFut>(
    env: Arc<Env>,
    api: Api<K>,
    writer: reflector::store::Writer<K>,
    reconcile_tx: mpsc::UnboundedSender<String>,
    teardown: TF,
) where
    K: kube::Resource + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
    K::DynamicType: Default + Eq + Hash + Clone,
    TF: Fn(Arc<Env>, K) -> TFut + Send + 'static,
    TFut: std::future::Future<Output = ()> + Send + 'static,
{
    let mut stream = pin!(watcher(api, watcher::Config::default()).default_backoff().reflect(writer));

    while let Some(event) = stream.next().await {
        match event {
            Ok(Event::Apply(cr)) | Ok(Event::InitApply(cr)) => {
                let _ = reconcile_tx.send(cr.name_any());
            }
            Ok(Event::Delete(cr)) => {
                info!(cr = %cr.name_any(), "custom resource deleted, removing children");
                teardown(env.clone(), cr).await;
            }
            Ok(Event::Init) | Ok(Event::InitDone) => {}
            Err(e) => warn!("cr watch error: {e}"),
        }
    }
}

/// Drains reconcile requests for one CR kind, resolving each name against
/// the reflector store so every pass sees the latest spec.
async fn reconcile_loop<K, RF, RFut>(
    env: Arc<Env>,
    store: Store<K>,
    namespace: &'static str,
    mut rx: mpsc::UnboundedReceiver<String>,
    reconcile: RF,
) where
    K: kube::Resource + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
    K::DynamicType: Default + Eq + Hash + Clone,
    RF: Fn(Arc<Env>, Arc<K>) -> RFut + Send + 'static,
    RFut: std::future::Future<Output = ()> + Send + 'static,
{
    while let Some(name) = rx.recv().await {
        let object_ref = ObjectRef::<K>::new(&name).within(namespace);
        let Some(cr) = store.get(&object_ref) else {
            // Deleted (or not ours); the delete handler owns cleanup.
            continue;
        };
        reconcile(env.clone(), cr).await;
    }
}

/// Watches one child kind and requests a parent reconcile on every delete.
fn spawn_child_delete_watcher<K>(
    tasks: &mut JoinSet<()>,
    api: Api<K>,
    reconcile_txs: Vec<mpsc::UnboundedSender<String>>,
) where
    K: kube::Resource + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
{
    tasks.spawn(async move {
        let mut stream = pin!(watcher(api, watcher::Config::default()).default_backoff());

        while let Some(event) = stream.next().await {
            match event {
                Ok(Event::Delete(obj)) => {
                    let Some(app) = obj.labels().get("app").cloned() else {
                        continue;
                    };
                    info!(app = %app, "sub-resource deleted, re-reconciling");
                    for tx in &reconcile_txs {
                        let _ = tx.send(app.clone());
                    }
                }
                Ok(_) => {}
                Err(e) => warn!("sub-resource watch error: {e}"),
            }
        }
    });
}

/// Watches ConfigMaps or Secrets and rolls the owning deployment when the
/// data actually changed. Re-list noise is skipped by tracking the last
/// seen `resourceVersion` per object.
fn spawn_config_update_watcher<K>(tasks: &mut JoinSet<()>, env: Arc<Env>, api: Api<K>)
where
    K: kube::Resource + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
{
    tasks.spawn(async move {
        let mut stream = pin!(watcher(api, watcher::Config::default()).default_backoff());
        let mut seen_versions: HashMap<String, String> = HashMap::new();

        while let Some(event) = stream.next().await {
            match event {
                Ok(Event::InitApply(obj)) => {
                    if let Some(version) = obj.resource_version() {
                        seen_versions.insert(obj.name_any(), version);
                    }
                }
                Ok(Event::Apply(obj)) => {
                    let name = obj.name_any();
                    let Some(version) = obj.resource_version() else {
                        continue;
                    };

                    let previous = seen_versions.insert(name.clone(), version.clone());
                    // First sighting is the controller's own create; only a
                    // genuine version change warrants a restart.
                    let Some(previous) = previous else {
                        continue;
                    };
                    if previous == version {
                        continue;
                    }

                    let Some(app) = obj.labels().get("app").cloned() else {
                        continue;
                    };
                    info!(app = %app, object = %name, "config updated, restarting deployment");
                    restart_deployment(&env, &app).await;
                }
                Ok(Event::Delete(obj)) => {
                    seen_versions.remove(&obj.name_any());
                }
                Ok(_) => {}
                Err(e) => warn!("config watch error: {e}"),
            }
        }
    });
}

/// Patches the pod-template annotation that triggers a rolling restart.
async fn restart_deployment(env: &Env, name: &str) {
    let api: Api<Deployment> = Api::namespaced(env.kube.clone(), WORKER_NAMESPACE);
    let patch = json!({
        "spec": {
            "template": {
                "metadata": {
                    "annotations": {
                        RESTARTED_AT_ANNOTATION: chrono::Utc::now().timestamp().to_string(),
                    }
                }
            }
        }
    });

    if let Err(e) = api
        .patch(name, &PatchParams::default(), &Patch::Merge(&patch))
        .await
    {
        warn!(deployment = %name, "restart deployment failed: {e}");
    }
}
