use kube::api::{Api, PostParams};
use kube::ResourceExt;
use std::sync::Arc;
use tracing::{info, warn};

use crate::cluster::COMBINATOR_NAMESPACE;
use crate::cluster::combinator::CombinatorWorkload;
use crate::cluster::crds::{CombinatorApp, CombinatorAppStatus, phase};
use crate::env::Env;

fn workload(cr: &CombinatorApp) -> CombinatorWorkload {
    CombinatorWorkload {
        user_uid: cr.spec.owner_id.clone(),
        config: cr.spec.config.clone(),
    }
}

/// Converges the four child objects of one `CombinatorApp`, then pushes
/// the current config to the pod's reload endpoint.
///
/// The reload is advisory: the pod may not exist yet (first reconcile) and
/// the mounted ConfigMap catches it up anyway, so a reload failure logs
/// without failing the pass.
pub async fn reconcile(env: Arc<Env>, cr: Arc<CombinatorApp>) {
    let name = cr.name_any();
    let c = workload(&cr);

    update_status(&env, &name, phase::DEPLOYING, "").await;

    let result = async {
        c.ensure_config_map(&env.kube).await?;
        c.ensure_deployment(&env.kube).await?;
        c.ensure_service(&env.kube).await?;
        c.ensure_ingress_route(&env.kube, &env.domain).await?;
        Ok::<(), crate::cluster::ClusterError>(())
    }
    .await;

    if let Err(e) = result {
        warn!(cr = %name, "reconcile failed: {e}");
        update_status(&env, &name, phase::FAILED, &e.to_string()).await;
        return;
    }

    if let Err(e) = c.reload_config(&env.http).await {
        warn!(cr = %name, "config reload failed, pod will pick it up from the mount: {e}");
    }

    info!(cr = %name, "reconcile success");
    update_status(&env, &name, phase::RUNNING, "").await;
}

/// Removes every child object of a deleted `CombinatorApp`, best-effort.
pub async fn teardown(env: Arc<Env>, cr: CombinatorApp) {
    workload(&cr).delete_all(&env.kube).await;
}

/// Writes the status subresource after re-reading the latest CR.
async fn update_status(env: &Env, name: &str, phase: &str, message: &str) {
    let api: Api<CombinatorApp> = Api::namespaced(env.kube.clone(), COMBINATOR_NAMESPACE);

    let mut latest = match api.get(name).await {
        Ok(latest) => latest,
        Err(e) => {
            warn!(cr = %name, "get latest for status update failed: {e}");
            return;
        }
    };

    latest.status = Some(CombinatorAppStatus {
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
