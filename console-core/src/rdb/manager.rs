use console_config::shared::RdbConnectionConfig;
use lru::LruCache;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::idents::{rdb_database, rdb_schema, rdb_username};

/// Capacity of the per-tenant connection pool.
const TENANT_POOL_CAPACITY: usize = 64;

/// Health-check deadline for cached connections.
const PING_DEADLINE: Duration = Duration::from_secs(2);

/// Health-check deadline when establishing a fresh connection.
const CONNECT_PING_DEADLINE: Duration = Duration::from_secs(5);

/// Reconnect attempts before a connection is reported unreachable.
const CONNECT_ATTEMPTS: u32 = 3;

/// Connections held per sqlx pool. One is enough: the manager itself is the
/// pooling layer, keyed by tenant.
const POOL_MAX_CONNECTIONS: u32 = 1;

/// Total size of a tenant database, from the latest statistics snapshot.
const DATABASE_SIZE_SQL: &str = r#"
SELECT SUM((s."rowCount" * s."avgSize")::INT8) AS total_bytes
FROM system.table_statistics AS s
JOIN system.namespace AS n ON s."tableID" = n.id
JOIN system.namespace AS db ON n."parentID" = db.id
WHERE db.name = $1
  AND s."createdAt" = (SELECT MAX("createdAt") FROM system.table_statistics WHERE "tableID" = s."tableID")
"#;

/// Total size of one schema, from the latest statistics snapshot.
const SCHEMA_SIZE_SQL: &str = r#"
SELECT SUM((s."rowCount" * s."avgSize")::INT8) AS schema_bytes
FROM system.table_statistics AS s
JOIN system.namespace AS n ON s."tableID" = n.id
JOIN system.namespace AS sc ON n."parentSchemaID" = sc.id
JOIN system.namespace AS db ON n."parentID" = db.id
WHERE db.name = $1
  AND sc.name = $2
  AND s."createdAt" = (SELECT MAX("createdAt") FROM system.table_statistics WHERE "tableID" = s."tableID")
"#;

/// Tables of a tenant database, visible to the admin connection.
const LIST_TABLES_SQL: &str = r#"
SELECT sc.name AS schema_name, n.name AS table_name
FROM system.namespace AS n
JOIN system.namespace AS sc ON n."parentSchemaID" = sc.id
JOIN system.namespace AS db ON n."parentID" = db.id
WHERE db.name = $1
ORDER BY schema_name, table_name
"#;

#[derive(Debug, Error)]
pub enum RdbError {
    /// The admin endpoint did not answer a ping after all reconnect
    /// attempts. Health endpoints surface this as 503.
    #[error("rdb root unreachable after {CONNECT_ATTEMPTS} attempts: {0}")]
    RootUnreachable(String),

    /// A tenant endpoint did not answer a ping after all reconnect
    /// attempts. The owning job fails and is retried later.
    #[error("rdb connection for tenant {0} unreachable after {CONNECT_ATTEMPTS} attempts: {1}")]
    TenantUnreachable(String, String),

    #[error("rdb statement failed: {0}")]
    Sql(#[from] sqlx::Error),
}

/// A cached tenant connection.
///
/// Each entry carries its own lock so that closing one tenant's dead
/// connection never blocks acquisition of another's.
struct TenantEntry {
    pool: RwLock<Option<PgPool>>,
}

impl TenantEntry {
    fn new(pool: PgPool) -> Self {
        Self {
            pool: RwLock::new(Some(pool)),
        }
    }

    async fn pool(&self) -> Option<PgPool> {
        self.pool.read().await.clone()
    }

    async fn close(&self) {
        if let Some(pool) = self.pool.write().await.take() {
            pool.close().await;
        }
    }
}

/// Connection manager for the shared relational cluster.
///
/// Holds a lazily (re)opened admin connection plus an LRU-bounded cache of
/// per-tenant connections. Both layers use a read-fast / write-slow locking
/// pattern with double-checked revalidation, and every cached handle is
/// pinged before use.
pub struct RdbManager {
    config: RdbConnectionConfig,
    root: RwLock<Option<PgPool>>,
    tenants: RwLock<LruCache<String, Arc<TenantEntry>>>,
}

impl RdbManager {
    pub fn new(config: RdbConnectionConfig) -> Self {
        Self {
            config,
            root: RwLock::new(None),
            tenants: RwLock::new(LruCache::new(
                NonZeroUsize::new(TENANT_POOL_CAPACITY).expect("capacity is non-zero"),
            )),
        }
    }

    /// Opens the root connection eagerly so startup can report whether the
    /// cluster is reachable.
    pub async fn connect(config: RdbConnectionConfig) -> Result<Self, RdbError> {
        let manager = Self::new(config);
        manager.root_pool().await?;
        Ok(manager)
    }

    /// Reports whether the admin endpoint currently answers pings.
    pub async fn root_healthy(&self) -> bool {
        self.root_pool().await.is_ok()
    }

    /// Returns a healthy admin connection, reconnecting if needed.
    async fn root_pool(&self) -> Result<PgPool, RdbError> {
        // Fast path: reuse the cached handle when it still answers.
        {
            let root = self.root.read().await;
            if let Some(pool) = root.as_ref() {
                if ping(pool, PING_DEADLINE).await.is_ok() {
                    return Ok(pool.clone());
                }
            }
        }

        // Slow path: reconnect under the write guard, double-checking first.
        let mut root = self.root.write().await;
        if let Some(pool) = root.as_ref() {
            if ping(pool, PING_DEADLINE).await.is_ok() {
                return Ok(pool.clone());
            }
            warn!("rdb root connection lost, reconnecting");
            if let Some(pool) = root.take() {
                pool.close().await;
            }
        }

        let mut last_error = String::new();
        for attempt in 1..=CONNECT_ATTEMPTS {
            let pool = PgPoolOptions::new()
                .max_connections(POOL_MAX_CONNECTIONS)
                .connect_lazy_with(self.config.admin_options());

            match ping(&pool, CONNECT_PING_DEADLINE).await {
                Ok(()) => {
                    info!(attempt, "rdb root connected");
                    *root = Some(pool.clone());
                    return Ok(pool);
                }
                Err(e) => {
                    warn!(attempt, "rdb root ping failed: {e}");
                    last_error = e;
                    pool.close().await;
                }
            }
        }

        Err(RdbError::RootUnreachable(last_error))
    }

    /// Returns a healthy tenant connection, reconnecting or evicting as
    /// needed.
    async fn tenant_pool(&self, user_uid: &str) -> Result<PgPool, RdbError> {
        // Fast path: peek without touching the LRU order, ping outside the
        // cache lock, then bump recency on success.
        let cached = {
            let tenants = self.tenants.read().await;
            tenants.peek(user_uid).cloned()
        };
        if let Some(entry) = cached {
            if let Some(pool) = entry.pool().await {
                if ping(&pool, PING_DEADLINE).await.is_ok() {
                    self.tenants.write().await.get(user_uid);
                    return Ok(pool);
                }
                warn!(user_uid, "rdb tenant connection lost, reconnecting");
            }
        }

        // Slow path: rebuild under the write guard.
        let mut tenants = self.tenants.write().await;

        if let Some(entry) = tenants.get(user_uid).cloned() {
            if let Some(pool) = entry.pool().await {
                if ping(&pool, PING_DEADLINE).await.is_ok() {
                    return Ok(pool);
                }
            }
            entry.close().await;
            tenants.pop(user_uid);
        }

        let username = rdb_username(user_uid);
        let database = rdb_database(user_uid);

        let mut last_error = String::new();
        for attempt in 1..=CONNECT_ATTEMPTS {
            let pool = PgPoolOptions::new()
                .max_connections(POOL_MAX_CONNECTIONS)
                .connect_lazy_with(self.config.tenant_options(&username, &database));

            match ping(&pool, PING_DEADLINE).await {
                Ok(()) => {
                    info!(user_uid, attempt, "rdb tenant connected");
                    // Strict LRU: pushing at capacity evicts the coldest
                    // entry, whose handle is closed before being dropped.
                    if let Some((evicted_uid, evicted)) =
                        tenants.push(user_uid.to_string(), Arc::new(TenantEntry::new(pool.clone())))
                    {
                        if evicted_uid != user_uid {
                            info!(user_uid = %evicted_uid, "evicted lru tenant connection");
                            evicted.close().await;
                        }
                    }
                    return Ok(pool);
                }
                Err(e) => {
                    warn!(user_uid, attempt, "rdb tenant ping failed: {e}");
                    last_error = e;
                    pool.close().await;
                }
            }
        }

        Err(RdbError::TenantUnreachable(user_uid.to_string(), last_error))
    }

    /// Closes the admin connection and every cached tenant connection.
    pub async fn close(&self) {
        if let Some(pool) = self.root.write().await.take() {
            pool.close().await;
        }

        let mut tenants = self.tenants.write().await;
        while let Some((_, entry)) = tenants.pop_lru() {
            entry.close().await;
        }
    }

    /// Database name for a tenant, exposed for the audit job's forward
    /// construction.
    pub fn database_name(&self, user_uid: &str) -> String {
        rdb_database(user_uid)
    }

    /// Connection string a combinator pod uses to reach one logical
    /// resource inside the tenant's database.
    pub fn dsn_with_schema(&self, user_uid: &str, resource_id: &str) -> String {
        self.config.tenant_dsn(
            &rdb_username(user_uid),
            &rdb_database(user_uid),
            Some(&rdb_schema(resource_id)),
        )
    }

    /// Creates the database and role for a new tenant. Idempotent.
    pub async fn init_user_rdb(&self, user_uid: &str) -> Result<(), RdbError> {
        let pool = self.root_pool().await?;
        let database = rdb_database(user_uid);
        let username = rdb_username(user_uid);

        sqlx::query(&format!("CREATE DATABASE IF NOT EXISTS {database}"))
            .execute(&pool)
            .await?;
        sqlx::query(&format!("CREATE USER IF NOT EXISTS {username}"))
            .execute(&pool)
            .await?;
        sqlx::query(&format!("GRANT ALL ON DATABASE {database} TO {username}"))
            .execute(&pool)
            .await?;

        Ok(())
    }

    /// Drops a tenant's database and role. A failed role drop is logged and
    /// not fatal: the database is the billable resource.
    pub async fn delete_user_rdb(&self, user_uid: &str) -> Result<(), RdbError> {
        let pool = self.root_pool().await?;
        let database = rdb_database(user_uid);
        let username = rdb_username(user_uid);

        sqlx::query(&format!("DROP DATABASE IF EXISTS {database} CASCADE"))
            .execute(&pool)
            .await?;
        if let Err(e) = sqlx::query(&format!("DROP USER IF EXISTS {username}"))
            .execute(&pool)
            .await
        {
            warn!(user_uid, "drop user failed: {e}");
        }

        Ok(())
    }

    /// Drops a database by name. Used by the audit job on orphans, which
    /// cannot reverse-parse a uid out of the name.
    pub async fn drop_database(&self, database: &str) -> Result<(), RdbError> {
        let pool = self.root_pool().await?;
        sqlx::query(&format!("DROP DATABASE IF EXISTS {database} CASCADE"))
            .execute(&pool)
            .await?;
        Ok(())
    }

    /// Lists every tenant database name (`db_` prefix).
    pub async fn root_list_user_databases(&self) -> Result<Vec<String>, RdbError> {
        let pool = self.root_pool().await?;
        let names: Vec<String> =
            sqlx::query_scalar("SELECT database_name FROM [SHOW DATABASES] WHERE database_name LIKE 'db_%'")
                .fetch_all(&pool)
                .await?;
        Ok(names)
    }

    /// Creates a resource schema in the tenant's database and grants the
    /// tenant role full access to it.
    pub async fn create_schema(&self, user_uid: &str, resource_id: &str) -> Result<(), RdbError> {
        let pool = self.tenant_pool(user_uid).await?;
        let schema = rdb_schema(resource_id);
        let username = rdb_username(user_uid);

        sqlx::query(&format!("CREATE SCHEMA IF NOT EXISTS {schema}"))
            .execute(&pool)
            .await?;
        sqlx::query(&format!("GRANT ALL ON SCHEMA {schema} TO {username}"))
            .execute(&pool)
            .await?;

        Ok(())
    }

    pub async fn delete_schema(&self, user_uid: &str, resource_id: &str) -> Result<(), RdbError> {
        let pool = self.tenant_pool(user_uid).await?;
        let schema = rdb_schema(resource_id);
        sqlx::query(&format!("DROP SCHEMA IF EXISTS {schema} CASCADE"))
            .execute(&pool)
            .await?;
        Ok(())
    }

    pub async fn schema_exists(&self, user_uid: &str, resource_id: &str) -> Result<bool, RdbError> {
        let pool = self.tenant_pool(user_uid).await?;
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM information_schema.schemata WHERE schema_name = $1",
        )
        .bind(rdb_schema(resource_id))
        .fetch_one(&pool)
        .await?;
        Ok(count > 0)
    }

    /// Lists resource ids that have a schema in the tenant's database.
    pub async fn list_schemas(&self, user_uid: &str) -> Result<Vec<String>, RdbError> {
        let pool = self.tenant_pool(user_uid).await?;
        let names: Vec<String> = sqlx::query_scalar(
            "SELECT schema_name FROM information_schema.schemata WHERE schema_name LIKE 'schema_%'",
        )
        .fetch_all(&pool)
        .await?;

        Ok(names
            .into_iter()
            .map(|name| name.trim_start_matches("schema_").to_string())
            .collect())
    }

    /// Total bytes used by a tenant's database. Stale by design: reads the
    /// latest statistics snapshot instead of scanning tables.
    pub async fn database_size(&self, user_uid: &str) -> Result<i64, RdbError> {
        let pool = self.root_pool().await?;
        let size: Option<i64> = sqlx::query_scalar(DATABASE_SIZE_SQL)
            .bind(rdb_database(user_uid))
            .fetch_one(&pool)
            .await?;
        Ok(size.unwrap_or(0))
    }

    /// Total bytes used by one resource schema. Same staleness as
    /// [`RdbManager::database_size`].
    pub async fn schema_size(&self, user_uid: &str, resource_id: &str) -> Result<i64, RdbError> {
        let pool = self.root_pool().await?;
        let size: Option<i64> = sqlx::query_scalar(SCHEMA_SIZE_SQL)
            .bind(rdb_database(user_uid))
            .bind(rdb_schema(resource_id))
            .fetch_one(&pool)
            .await?;
        Ok(size.unwrap_or(0))
    }

    /// Refreshes statistics for every table in the tenant's database.
    ///
    /// The admin connection can only enumerate tables; ANALYZE has to run on
    /// the tenant connection, one table at a time.
    pub async fn force_analyze(&self, user_uid: &str) -> Result<(), RdbError> {
        let root = self.root_pool().await?;
        let database = rdb_database(user_uid);

        let tables: Vec<(String, String)> = sqlx::query_as(LIST_TABLES_SQL)
            .bind(&database)
            .fetch_all(&root)
            .await?;

        let tenant = self.tenant_pool(user_uid).await?;
        for (schema, table) in tables {
            let full_name = format!("{database}.{schema}.{table}");
            info!(user_uid, table = %full_name, "running analyze");
            sqlx::query(&format!("ANALYZE {full_name}")).execute(&tenant).await?;
        }

        Ok(())
    }
}

/// Short-deadline health check for a pooled connection.
async fn ping(pool: &PgPool, deadline: Duration) -> Result<(), String> {
    match tokio::time::timeout(deadline, sqlx::query("SELECT 1").execute(pool)).await {
        Ok(Ok(_)) => Ok(()),
        Ok(Err(e)) => Err(e.to_string()),
        Err(_) => Err(format!("ping timed out after {deadline:?}")),
    }
}
