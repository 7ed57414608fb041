use kube::api::{Api, ListParams};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};

use console_core::db::users;
use console_core::idents::rdb_database;
use console_core::jobs::{JobKind, RegisterUserPayload};

use crate::cluster::combinator::CombinatorConfig;
use crate::cluster::crds::{CombinatorApp, WorkerApp};
use crate::cluster::{COMBINATOR_NAMESPACE, WORKER_NAMESPACE};
use crate::env::Env;
use crate::jobs::combinator::upsert_combinator_app;
use crate::processor::{Job, JobError};

/// Page size used when scanning the user table.
const USER_PAGE_SIZE: i64 = 1000;

/// Initializes cluster-side state for a freshly registered tenant: the
/// tenant database and an empty-config `CombinatorApp` CR. Failures are
/// logged, not fatal: the audit job heals whatever is missing.
pub struct RegisterUserJob {
    env: Arc<Env>,
    payload: RegisterUserPayload,
}

impl RegisterUserJob {
    pub fn new(env: Arc<Env>, payload: RegisterUserPayload) -> Self {
        Self { env, payload }
    }
}

#[async_trait::async_trait]
impl Job for RegisterUserJob {
    fn kind(&self) -> JobKind {
        JobKind::RegisterUser
    }

    fn id(&self) -> String {
        self.payload.user_uid.clone()
    }

    async fn run(&self) -> Result<(), JobError> {
        let uid = &self.payload.user_uid;

        match self.env.rdb() {
            Ok(rdb) => {
                if let Err(e) = rdb.init_user_rdb(uid).await {
                    warn!(user_uid = %uid, "failed to init rdb for user: {e}");
                }
            }
            Err(e) => warn!(user_uid = %uid, "{e}, skipping rdb init"),
        }

        upsert_combinator_app(&self.env, uid, CombinatorConfig::empty_json()).await?;
        Ok(())
    }
}

/// What one audit pass decided to do. Derived by forward construction from
/// the user set; never by reverse-parsing resource names.
#[derive(Debug, Default, PartialEq)]
pub struct AuditPlan {
    /// Users whose tenant database is missing.
    pub missing_databases: Vec<String>,
    /// Users without a `CombinatorApp` CR.
    pub missing_combinators: Vec<String>,
    /// `WorkerApp` CR names whose owner no longer exists.
    pub orphan_worker_crs: Vec<String>,
    /// Owner ids of `CombinatorApp` CRs whose owner no longer exists.
    pub orphan_combinators: Vec<String>,
    /// `db_*` database names owned by no user.
    pub orphan_databases: Vec<String>,
}

/// Computes an audit plan from the observed sets.
///
/// `worker_crs` is `(cr name, owner id)`; `combinator_owners` lists the
/// `ownerID` of every `CombinatorApp`; `databases` lists every `db_*` name.
pub fn plan_audit(
    users: &HashSet<String>,
    worker_crs: &[(String, String)],
    combinator_owners: &[String],
    databases: &[String],
) -> AuditPlan {
    let mut plan = AuditPlan::default();

    let valid_databases: HashSet<String> = users.iter().map(|uid| rdb_database(uid)).collect();
    let existing_databases: HashSet<&str> = databases.iter().map(String::as_str).collect();
    let combinator_set: HashSet<&str> = combinator_owners.iter().map(String::as_str).collect();

    let mut sorted_users: Vec<&String> = users.iter().collect();
    sorted_users.sort();
    for uid in sorted_users {
        if !existing_databases.contains(rdb_database(uid).as_str()) {
            plan.missing_databases.push(uid.clone());
        }
        if !combinator_set.contains(uid.as_str()) {
            plan.missing_combinators.push(uid.clone());
        }
    }

    for (name, owner) in worker_crs {
        if !owner.is_empty() && !users.contains(owner) {
            plan.orphan_worker_crs.push(name.clone());
        }
    }

    for owner in combinator_owners {
        if !owner.is_empty() && !users.contains(owner) {
            plan.orphan_combinators.push(owner.clone());
        }
    }

    for database in databases {
        if !valid_databases.contains(database) {
            plan.orphan_databases.push(database.clone());
        }
    }

    plan
}

/// Periodic cross-check of users, custom resources, and tenant databases.
///
/// Heals gaps (missing databases, missing combinator CRs) and deletes
/// orphans (worker CRs, combinator CRs, `db_*` databases). Every step is
/// idempotent and per-item failures only log.
pub struct UserAuditJob {
    env: Arc<Env>,
}

impl UserAuditJob {
    pub fn new(env: Arc<Env>) -> Self {
        Self { env }
    }

    async fn load_user_set(&self) -> Result<HashSet<String>, JobError> {
        let mut user_set = HashSet::new();
        let mut offset = 0;
        loop {
            let page = users::list_user_uids_paged(&self.env.pool, USER_PAGE_SIZE, offset)
                .await
                .map_err(|e| JobError::new(e.to_string()))?;
            let page_len = page.len() as i64;
            user_set.extend(page);
            if page_len < USER_PAGE_SIZE {
                return Ok(user_set);
            }
            offset += USER_PAGE_SIZE;
        }
    }
}

#[async_trait::async_trait]
impl Job for UserAuditJob {
    fn kind(&self) -> JobKind {
        JobKind::UserAudit
    }

    fn id(&self) -> String {
        "periodic".to_string()
    }

    async fn run(&self) -> Result<(), JobError> {
        let user_set = self.load_user_set().await?;
        info!(users = user_set.len(), "audit loaded users from database");

        let worker_api: Api<WorkerApp> = Api::namespaced(self.env.kube.clone(), WORKER_NAMESPACE);
        let worker_crs: Vec<(String, String)> = worker_api
            .list(&ListParams::default())
            .await
            .map_err(|e| JobError::new(format!("list worker CRs: {e}")))?
            .items
            .into_iter()
            .filter_map(|cr| cr.metadata.name.clone().map(|name| (name, cr.spec.owner_id)))
            .collect();
        info!(count = worker_crs.len(), "audit found worker CRs");

        let combinator_api: Api<CombinatorApp> =
            Api::namespaced(self.env.kube.clone(), COMBINATOR_NAMESPACE);
        let combinator_owners: Vec<String> = match combinator_api.list(&ListParams::default()).await
        {
            Ok(list) => list.items.into_iter().map(|cr| cr.spec.owner_id).collect(),
            Err(e) => {
                warn!("audit failed to list combinator CRs: {e}");
                user_set.iter().cloned().collect()
            }
        };

        let databases = match self.env.rdb() {
            Ok(rdb) => match rdb.root_list_user_databases().await {
                Ok(databases) => Some(databases),
                Err(e) => {
                    warn!("audit failed to list tenant databases: {e}");
                    None
                }
            },
            Err(_) => None,
        };

        // With no database listing, pretend every user's database exists so
        // the plan neither heals nor drops anything on that axis.
        let database_view = databases
            .clone()
            .unwrap_or_else(|| user_set.iter().map(|uid| rdb_database(uid)).collect());

        let plan = plan_audit(&user_set, &worker_crs, &combinator_owners, &database_view);

        for uid in &plan.missing_databases {
            info!(user_uid = %uid, "audit: user missing database, initializing");
            if let Ok(rdb) = self.env.rdb() {
                if let Err(e) = rdb.init_user_rdb(uid).await {
                    warn!(user_uid = %uid, "audit: init rdb failed: {e}");
                }
            }
        }

        for uid in &plan.missing_combinators {
            info!(user_uid = %uid, "audit: user missing combinator CR, creating");
            if let Err(e) = upsert_combinator_app(&self.env, uid, CombinatorConfig::empty_json()).await {
                warn!(user_uid = %uid, "audit: create combinator CR failed: {e}");
            }
        }

        for name in &plan.orphan_worker_crs {
            info!(cr = %name, "audit: orphan worker CR, deleting");
            if let Err(e) = worker_api.delete(name, &Default::default()).await {
                warn!(cr = %name, "audit: delete worker CR failed: {e}");
            }
        }

        for owner in &plan.orphan_combinators {
            let name = console_core::idents::combinator_name(owner);
            info!(cr = %name, "audit: orphan combinator CR, deleting");
            if let Err(e) = combinator_api.delete(&name, &Default::default()).await {
                warn!(cr = %name, "audit: delete combinator CR failed: {e}");
            }
        }

        for database in &plan.orphan_databases {
            info!(database = %database, "audit: orphan database, dropping");
            if let Ok(rdb) = self.env.rdb() {
                if let Err(e) = rdb.drop_database(database).await {
                    warn!(database = %database, "audit: drop database failed: {e}");
                }
            }
        }

        info!("user audit completed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(items: &[&str]) -> HashSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn audit_plan_heals_gaps_and_drops_orphans() {
        let users = set(&["u1", "u2"]);
        let worker_crs = vec![
            ("w-u1".to_string(), "u1".to_string()),
            ("w-u3".to_string(), "u3".to_string()),
        ];
        let combinators = vec!["u1".to_string(), "u2".to_string()];
        let databases = vec!["db_u2".to_string(), "db_u4".to_string()];

        let plan = plan_audit(&users, &worker_crs, &combinators, &databases);

        assert_eq!(plan.missing_databases, vec!["u1"]);
        assert_eq!(plan.orphan_worker_crs, vec!["w-u3"]);
        assert_eq!(plan.orphan_databases, vec!["db_u4"]);
        assert!(plan.missing_combinators.is_empty());
        assert!(plan.orphan_combinators.is_empty());
    }

    #[test]
    fn audit_plan_is_empty_when_everything_matches() {
        let users = set(&["u1"]);
        let worker_crs = vec![("w-u1".to_string(), "u1".to_string())];
        let combinators = vec!["u1".to_string()];
        let databases = vec!["db_u1".to_string()];

        let plan = plan_audit(&users, &worker_crs, &combinators, &databases);
        assert_eq!(plan, AuditPlan::default());
    }

    #[test]
    fn audit_plan_builds_validity_forward_from_uids() {
        // A database whose suffix happens to collide with a sanitized uid
        // is kept; reverse-parsing is never attempted.
        let users = set(&["User-1"]);
        let databases = vec!["db_user_1".to_string(), "db_stray".to_string()];

        let plan = plan_audit(&users, &[], &["User-1".to_string()], &databases);
        assert_eq!(plan.orphan_databases, vec!["db_stray"]);
        assert!(plan.missing_databases.is_empty());
    }

    #[test]
    fn audit_plan_creates_missing_combinators() {
        let users = set(&["u1", "u2"]);
        let plan = plan_audit(
            &users,
            &[],
            &["u1".to_string()],
            &["db_u1".to_string(), "db_u2".to_string()],
        );
        assert_eq!(plan.missing_combinators, vec!["u2"]);
    }
}
