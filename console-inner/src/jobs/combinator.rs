use kube::api::{Api, PostParams};
use kube::Resource;
use std::sync::Arc;
use tracing::{info, warn};

use console_core::db::combinator_resources::{self, ResourceStatus, ResourceType};
use console_core::idents;
use console_core::jobs::{
    CreateKvPayload, CreateRdbPayload, DeleteKvPayload, DeleteRdbPayload, JobKind,
};

use crate::cluster::COMBINATOR_NAMESPACE;
use crate::cluster::combinator::{CombinatorConfig, KvItem, RdbItem};
use crate::cluster::crds::{CombinatorApp, CombinatorAppSpec};
use crate::env::Env;
use crate::processor::{Job, JobError};

/// Rebuilds a tenant's combinator config from its active resource rows.
///
/// Relational handles get their connection string from the RDB manager;
/// key-value handles carry the URL the tenant registered. The `name`
/// column doubles as the backend flavor for key-value rows.
pub async fn rebuild_config(env: &Env, user_uid: &str) -> Result<String, JobError> {
    let resources = combinator_resources::list_active_resources(&env.pool, user_uid)
        .await
        .map_err(|e| JobError::new(e.to_string()))?;

    let mut config = CombinatorConfig::default();
    for resource in resources {
        match resource.resource_type {
            ResourceType::Rdb => {
                let url = env.rdb()?.dsn_with_schema(user_uid, &resource.resource_id);
                config.rdbs.push(RdbItem {
                    id: resource.resource_id,
                    name: resource.name,
                    url,
                });
            }
            ResourceType::Kv => {
                config.kvs.push(KvItem {
                    id: resource.resource_id,
                    url: resource.url,
                    kv_type: resource.name,
                });
            }
        }
    }

    Ok(config.to_json())
}

/// Creates or updates the tenant's `CombinatorApp` CR with a new config.
/// The controller propagates the config into the ConfigMap and calls the
/// pod's reload endpoint.
pub async fn upsert_combinator_app(env: &Env, user_uid: &str, config: String) -> Result<(), JobError> {
    let name = idents::combinator_name(user_uid);
    let api: Api<CombinatorApp> = Api::namespaced(env.kube.clone(), COMBINATOR_NAMESPACE);

    match api.get_opt(&name).await.map_err(|e| JobError::new(e.to_string()))? {
        None => {
            let mut cr = CombinatorApp::new(
                &name,
                CombinatorAppSpec {
                    owner_id: user_uid.to_string(),
                    config,
                },
            );
            cr.meta_mut().namespace = Some(COMBINATOR_NAMESPACE.to_string());
            api.create(&PostParams::default(), &cr)
                .await
                .map_err(|e| JobError::new(e.to_string()))?;
        }
        Some(mut existing) => {
            existing.spec.config = config;
            api.replace(&name, &PostParams::default(), &existing)
                .await
                .map_err(|e| JobError::new(e.to_string()))?;
        }
    }

    Ok(())
}

/// Provisions the tenant database and resource schema for a new
/// relational handle, then publishes the refreshed config.
pub struct CreateRdbJob {
    env: Arc<Env>,
    payload: CreateRdbPayload,
}

impl CreateRdbJob {
    pub fn new(env: Arc<Env>, payload: CreateRdbPayload) -> Self {
        Self { env, payload }
    }
}

#[async_trait::async_trait]
impl Job for CreateRdbJob {
    fn kind(&self) -> JobKind {
        JobKind::CreateRdb
    }

    fn id(&self) -> String {
        format!("{}_{}", self.payload.user_uid, self.payload.resource_id)
    }

    async fn run(&self) -> Result<(), JobError> {
        let uid = &self.payload.user_uid;
        let rid = &self.payload.resource_id;

        let provision = async {
            let rdb = self.env.rdb()?;
            rdb.init_user_rdb(uid).await.map_err(|e| JobError::new(format!("init user rdb: {e}")))?;
            rdb.create_schema(uid, rid)
                .await
                .map_err(|e| JobError::new(format!("create schema: {e}")))?;
            Ok::<(), JobError>(())
        };

        if let Err(e) = provision.await {
            let _ = combinator_resources::update_resource_status(
                &self.env.pool,
                uid,
                ResourceType::Rdb,
                rid,
                ResourceStatus::Error,
                &e.to_string(),
            )
            .await;
            return Err(e);
        }

        combinator_resources::update_resource_status(
            &self.env.pool,
            uid,
            ResourceType::Rdb,
            rid,
            ResourceStatus::Active,
            "",
        )
        .await
        .map_err(|e| JobError::new(e.to_string()))?;

        let config = rebuild_config(&self.env, uid).await?;
        upsert_combinator_app(&self.env, uid, config).await?;

        info!(user_uid = %uid, resource_id = %rid, "rdb resource created");
        Ok(())
    }
}

/// Drops the resource schema of a deleted relational handle and publishes
/// the refreshed config. The row is already gone.
pub struct DeleteRdbJob {
    env: Arc<Env>,
    payload: DeleteRdbPayload,
}

impl DeleteRdbJob {
    pub fn new(env: Arc<Env>, payload: DeleteRdbPayload) -> Self {
        Self { env, payload }
    }
}

#[async_trait::async_trait]
impl Job for DeleteRdbJob {
    fn kind(&self) -> JobKind {
        JobKind::DeleteRdb
    }

    fn id(&self) -> String {
        format!("{}_{}", self.payload.user_uid, self.payload.resource_id)
    }

    async fn run(&self) -> Result<(), JobError> {
        let uid = &self.payload.user_uid;
        let rid = &self.payload.resource_id;

        if let Ok(rdb) = self.env.rdb() {
            if let Err(e) = rdb.delete_schema(uid, rid).await {
                warn!(user_uid = %uid, resource_id = %rid, "delete schema failed: {e}");
            }
        }

        let config = rebuild_config(&self.env, uid).await?;
        upsert_combinator_app(&self.env, uid, config).await?;

        info!(user_uid = %uid, resource_id = %rid, "rdb resource deleted");
        Ok(())
    }
}

/// Activates a key-value handle and publishes the refreshed config. The
/// backend itself is tenant-provided; there is nothing to provision.
pub struct CreateKvJob {
    env: Arc<Env>,
    payload: CreateKvPayload,
}

impl CreateKvJob {
    pub fn new(env: Arc<Env>, payload: CreateKvPayload) -> Self {
        Self { env, payload }
    }
}

#[async_trait::async_trait]
impl Job for CreateKvJob {
    fn kind(&self) -> JobKind {
        JobKind::CreateKv
    }

    fn id(&self) -> String {
        format!("{}_{}", self.payload.user_uid, self.payload.resource_id)
    }

    async fn run(&self) -> Result<(), JobError> {
        combinator_resources::update_resource_status(
            &self.env.pool,
            &self.payload.user_uid,
            ResourceType::Kv,
            &self.payload.resource_id,
            ResourceStatus::Active,
            "",
        )
        .await
        .map_err(|e| JobError::new(e.to_string()))?;

        let config = rebuild_config(&self.env, &self.payload.user_uid).await?;
        upsert_combinator_app(&self.env, &self.payload.user_uid, config).await?;

        info!(
            user_uid = %self.payload.user_uid,
            resource_id = %self.payload.resource_id,
            "kv resource created"
        );
        Ok(())
    }
}

/// Publishes the refreshed config after a key-value handle was removed.
pub struct DeleteKvJob {
    env: Arc<Env>,
    payload: DeleteKvPayload,
}

impl DeleteKvJob {
    pub fn new(env: Arc<Env>, payload: DeleteKvPayload) -> Self {
        Self { env, payload }
    }
}

#[async_trait::async_trait]
impl Job for DeleteKvJob {
    fn kind(&self) -> JobKind {
        JobKind::DeleteKv
    }

    fn id(&self) -> String {
        format!("{}_{}", self.payload.user_uid, self.payload.resource_id)
    }

    async fn run(&self) -> Result<(), JobError> {
        let config = rebuild_config(&self.env, &self.payload.user_uid).await?;
        upsert_combinator_app(&self.env, &self.payload.user_uid, config).await?;

        info!(
            user_uid = %self.payload.user_uid,
            resource_id = %self.payload.resource_id,
            "kv resource deleted"
        );
        Ok(())
    }
}
