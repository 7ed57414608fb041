use kube::api::{Api, PostParams};
use kube::ResourceExt;
use std::sync::Arc;
use tracing::{info, warn};

use crate::cluster::WORKER_NAMESPACE;
use crate::cluster::crds::{WorkerApp, WorkerAppStatus, phase};
use crate::cluster::worker::WorkerWorkload;
use crate::env::Env;

fn workload(cr: &WorkerApp) -> WorkerWorkload {
    WorkerWorkload {
        worker_id: cr.spec.worker_id.clone(),
        owner_id: cr.spec.owner_id.clone(),
        image: cr.spec.image.clone(),
        port: cr.spec.port,
    }
}

/// Converges the five child objects of one `WorkerApp`.
///
/// Children are ensured in dependency order so the deployment never
/// references a ConfigMap or Secret that does not exist yet. The first
/// failing child ends the pass with a `Failed` status; a clean pass ends
/// `Running`.
pub async fn reconcile(env: Arc<Env>, cr: Arc<WorkerApp>) {
    let name = cr.name_any();
    let w = workload(&cr);

    update_status(&env, &name, phase::DEPLOYING, "").await;

    let result = async {
        w.ensure_config_map(&env.kube).await?;
        w.ensure_secret(&env.kube).await?;
        w.ensure_deployment(&env.kube).await?;
        w.ensure_service(&env.kube).await?;
        w.ensure_ingress_route(&env.kube, &env.domain).await?;
        Ok::<(), crate::cluster::ClusterError>(())
    }
    .await;

    if let Err(e) = result {
        warn!(cr = %name, "reconcile failed: {e}");
        update_status(&env, &name, phase::FAILED, &e.to_string()).await;
        return;
    }

    info!(cr = %name, "reconcile success");
    update_status(&env, &name, phase::RUNNING, "").await;
}

/// Removes every child object of a deleted `WorkerApp`, best-effort.
pub async fn teardown(env: Arc<Env>, cr: WorkerApp) {
    workload(&cr).delete_all(&env.kube).await;
}

/// Writes the status subresource, re-reading the latest CR first so the
/// write never races a concurrent spec update's resource version.
async fn update_status(env: &Env, name: &str, phase: &str, message: &str) {
    let api: Api<WorkerApp> = Api::namespaced(env.kube.clone(), WORKER_NAMESPACE);

    let mut latest = match api.get(name).await {
        Ok(latest) => latest,
        Err(e) => {
            warn!(cr = %name, "get latest for status update failed: {e}");
            return;
        }
    };

    latest.status = Some(WorkerAppStatus {
        phase: phase.to_string(),
        message: message.to_string(),
    });

    let payload = match serde_json::to_vec(&latest) {
        Ok(payload) => payload,
        Err(e) => {
            warn!(cr = %name, "serialize status update failed: {e}");
            return;
        }
    };

    if let Err(e) = api.replace_status(name, &PostParams::default(), payload).await {
        warn!(cr = %name, "update status failed: {e}");
    }
}
