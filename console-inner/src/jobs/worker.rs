use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use k8s_openapi::ByteString;
use kube::api::{Api, PostParams};
use kube::{Resource, ResourceExt};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

use console_core::db::deploy_versions::{self, VersionStatus};
use console_core::db::workers::{self, WorkerStatus};
use console_core::idents;
use console_core::jobs::{
    DeleteWorkerCrPayload, DeployWorkerPayload, JobKind, SyncEnvPayload, SyncSecretPayload,
};

use crate::cluster::WORKER_NAMESPACE;
use crate::cluster::crds::{WorkerApp, WorkerAppSpec};
use crate::env::Env;
use crate::processor::{Job, JobError};

/// Creates or updates the `WorkerApp` CR for a deploy version, then marks
/// the deploy successful. The controller picks the CR up from there.
pub struct DeployWorkerJob {
    env: Arc<Env>,
    payload: DeployWorkerPayload,
}

impl DeployWorkerJob {
    pub fn new(env: Arc<Env>, payload: DeployWorkerPayload) -> Self {
        Self { env, payload }
    }
}

#[async_trait::async_trait]
impl Job for DeployWorkerJob {
    fn kind(&self) -> JobKind {
        JobKind::DeployWorker
    }

    fn id(&self) -> String {
        format!(
            "{}-{}-{}",
            self.payload.worker_id, self.payload.user_uid, self.payload.version_id
        )
    }

    async fn run(&self) -> Result<(), JobError> {
        let version_id = self.payload.version_id;

        let Some((version, worker)) =
            deploy_versions::read_version_with_worker(&self.env.pool, version_id)
                .await
                .map_err(|e| JobError::new(e.to_string()))?
        else {
            let message = format!("deploy version {version_id} not found");
            let _ = deploy_versions::update_version_status(
                &self.env.pool,
                version_id,
                VersionStatus::Error,
                &message,
            )
            .await;
            return Err(JobError::new(message));
        };

        let name = idents::worker_name(&worker.worker_id, &worker.user_uid);
        let spec = WorkerAppSpec {
            worker_id: worker.worker_id.clone(),
            owner_id: worker.user_uid.clone(),
            image: version.image.clone(),
            port: version.port,
        };

        if let Err(e) = upsert_worker_app(&self.env, &name, spec).await {
            let message = e.to_string();
            let _ = deploy_versions::update_version_status(
                &self.env.pool,
                version_id,
                VersionStatus::Error,
                &message,
            )
            .await;
            let _ = workers::update_worker_status(
                &self.env.pool,
                &worker.worker_id,
                WorkerStatus::Error,
            )
            .await;
            return Err(JobError::new(format!("create CR for version {version_id}: {message}")));
        }

        info!(version_id, worker = %name, "worker CR created");

        deploy_versions::mark_deploy_success(&self.env.pool, version_id, &worker.worker_id)
            .await
            .map_err(|e| JobError::new(format!("update deploy status: {e}")))?;

        Ok(())
    }
}

async fn upsert_worker_app(env: &Env, name: &str, spec: WorkerAppSpec) -> Result<(), kube::Error> {
    let api: Api<WorkerApp> = Api::namespaced(env.kube.clone(), WORKER_NAMESPACE);
    let mut cr = WorkerApp::new(name, spec);
    cr.meta_mut().namespace = Some(WORKER_NAMESPACE.to_string());

    match api.get_opt(name).await? {
        None => {
            api.create(&PostParams::default(), &cr).await?;
        }
        Some(existing) => {
            cr.meta_mut().resource_version = existing.resource_version();
            api.replace(name, &PostParams::default(), &cr).await?;
        }
    }
    Ok(())
}

/// Replaces the worker's env ConfigMap data with the merged map from the
/// database row. A missing ConfigMap is not an error: the controller has
/// not created it yet and will pick the row up on the next sync.
pub struct SyncEnvJob {
    env: Arc<Env>,
    payload: SyncEnvPayload,
}

impl SyncEnvJob {
    pub fn new(env: Arc<Env>, payload: SyncEnvPayload) -> Self {
        Self { env, payload }
    }
}

#[async_trait::async_trait]
impl Job for SyncEnvJob {
    fn kind(&self) -> JobKind {
        JobKind::SyncEnv
    }

    fn id(&self) -> String {
        self.payload.worker_id.clone()
    }

    async fn run(&self) -> Result<(), JobError> {
        let name = idents::worker_env_config_map_name(&self.payload.worker_id, &self.payload.user_uid);
        let api: Api<ConfigMap> = Api::namespaced(self.env.kube.clone(), WORKER_NAMESPACE);

        let Some(mut config_map) = api
            .get_opt(&name)
            .await
            .map_err(|e| JobError::new(e.to_string()))?
        else {
            warn!(config_map = %name, "env configmap not found, skipping sync");
            return Ok(());
        };

        config_map.data = Some(self.payload.data.clone().into_iter().collect());

        if let Err(e) = api.replace(&name, &PostParams::default(), &config_map).await {
            let _ = workers::update_worker_status(
                &self.env.pool,
                &self.payload.worker_id,
                WorkerStatus::Error,
            )
            .await;
            return Err(JobError::new(format!("sync env configmap: {e}")));
        }

        workers::update_worker_status(&self.env.pool, &self.payload.worker_id, WorkerStatus::Active)
            .await
            .map_err(|e| JobError::new(e.to_string()))?;
        Ok(())
    }
}

/// Applies one secret entry to the worker's Secret, preserving the others
/// so the stored key list and the cluster Secret stay in lockstep.
pub struct SyncSecretJob {
    env: Arc<Env>,
    payload: SyncSecretPayload,
}

impl SyncSecretJob {
    pub fn new(env: Arc<Env>, payload: SyncSecretPayload) -> Self {
        Self { env, payload }
    }
}

#[async_trait::async_trait]
impl Job for SyncSecretJob {
    fn kind(&self) -> JobKind {
        JobKind::SyncSecret
    }

    fn id(&self) -> String {
        self.payload.worker_id.clone()
    }

    async fn run(&self) -> Result<(), JobError> {
        let name = idents::worker_secret_name(&self.payload.worker_id, &self.payload.user_uid);
        let api: Api<Secret> = Api::namespaced(self.env.kube.clone(), WORKER_NAMESPACE);

        let Some(mut secret) = api
            .get_opt(&name)
            .await
            .map_err(|e| JobError::new(e.to_string()))?
        else {
            warn!(secret = %name, "secret not found, skipping sync");
            return Ok(());
        };

        let mut data: BTreeMap<String, ByteString> = secret.data.take().unwrap_or_default();
        if self.payload.delete {
            data.remove(&self.payload.key);
        } else {
            data.insert(
                self.payload.key.clone(),
                ByteString(self.payload.value.clone().into_bytes()),
            );
        }
        secret.data = Some(data);

        if let Err(e) = api.replace(&name, &PostParams::default(), &secret).await {
            let _ = workers::update_worker_status(
                &self.env.pool,
                &self.payload.worker_id,
                WorkerStatus::Error,
            )
            .await;
            return Err(JobError::new(format!("sync secret: {e}")));
        }

        workers::update_worker_status(&self.env.pool, &self.payload.worker_id, WorkerStatus::Active)
            .await
            .map_err(|e| JobError::new(e.to_string()))?;
        Ok(())
    }
}

/// Deletes the `WorkerApp` CR; the controller tears down the children.
pub struct DeleteWorkerCrJob {
    env: Arc<Env>,
    payload: DeleteWorkerCrPayload,
}

impl DeleteWorkerCrJob {
    pub fn new(env: Arc<Env>, payload: DeleteWorkerCrPayload) -> Self {
        Self { env, payload }
    }
}

#[async_trait::async_trait]
impl Job for DeleteWorkerCrJob {
    fn kind(&self) -> JobKind {
        JobKind::DeleteWorkerCr
    }

    fn id(&self) -> String {
        self.payload.worker_id.clone()
    }

    async fn run(&self) -> Result<(), JobError> {
        let name = idents::worker_name(&self.payload.worker_id, &self.payload.user_uid);
        let api: Api<WorkerApp> = Api::namespaced(self.env.kube.clone(), WORKER_NAMESPACE);

        match api.delete(&name, &Default::default()).await {
            Ok(_) => Ok(()),
            // The worker may never have been deployed.
            Err(kube::Error::Api(e)) if e.code == 404 => Ok(()),
            Err(e) => Err(JobError::new(e.to_string())),
        }
    }
}
