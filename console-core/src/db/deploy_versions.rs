use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgExecutor, PgPool};
use std::fmt;
use thiserror::Error;

use crate::db::workers::{Worker, WorkerStatus};

#[derive(Debug, Error)]
pub enum DeployVersionsDbError {
    #[error("Error while interacting with Postgres for deploy versions: {0}")]
    Database(#[from] sqlx::Error),
}

/// Status of a single deploy attempt. Append-only rows; only the status and
/// message columns ever change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VersionStatus {
    Loading,
    Success,
    Error,
}

impl VersionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VersionStatus::Loading => "loading",
            VersionStatus::Success => "success",
            VersionStatus::Error => "error",
        }
    }
}

impl fmt::Display for VersionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for VersionStatus {
    type Error = String;

    fn try_from(value: String) -> Result<Self, String> {
        match value.as_str() {
            "loading" => Ok(VersionStatus::Loading),
            "success" => Ok(VersionStatus::Success),
            "error" => Ok(VersionStatus::Error),
            other => Err(format!("unknown deploy version status: {other}")),
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
pub struct DeployVersion {
    pub id: i64,
    pub worker_id: String,
    pub image: String,
    pub port: i32,
    #[sqlx(try_from = "String")]
    pub status: VersionStatus,
    pub msg: String,
    pub created_at: DateTime<Utc>,
}

/// Creates a deploy version for an owned worker.
///
/// Single transaction: the worker moves to `loading` (zero rows means the
/// worker is not owned by the caller and the transaction aborts), then the
/// version row is inserted with status `loading`.
pub async fn create_deploy_version(
    pool: &PgPool,
    worker_id: &str,
    user_uid: &str,
    image: &str,
    port: i32,
) -> Result<Option<i64>, DeployVersionsDbError> {
    let mut txn = pool.begin().await?;

    let owned: Option<i64> = sqlx::query_scalar(
        r#"
        update workers
        set status = 'loading'
        where worker_id = $1 and user_uid = $2
        returning id
        "#,
    )
    .bind(worker_id)
    .bind(user_uid)
    .fetch_optional(&mut *txn)
    .await?;

    if owned.is_none() {
        txn.rollback().await?;
        return Ok(None);
    }

    let version_id: i64 = sqlx::query_scalar(
        r#"
        insert into worker_deploy_versions (worker_id, image, port, status, msg)
        values ($1, $2, $3, 'loading', '')
        returning id
        "#,
    )
    .bind(worker_id)
    .bind(image)
    .bind(port)
    .fetch_one(&mut *txn)
    .await?;

    txn.commit().await?;

    Ok(Some(version_id))
}

pub async fn update_version_status<'c, E>(
    executor: E,
    version_id: i64,
    status: VersionStatus,
    msg: &str,
) -> Result<(), DeployVersionsDbError>
where
    E: PgExecutor<'c>,
{
    sqlx::query(
        r#"
        update worker_deploy_versions
        set status = $1, msg = $2
        where id = $3
        "#,
    )
    .bind(status.as_str())
    .bind(msg)
    .bind(version_id)
    .execute(executor)
    .await?;

    Ok(())
}

/// Reads a deploy version joined with its worker, in one statement.
pub async fn read_version_with_worker<'c, E>(
    executor: E,
    version_id: i64,
) -> Result<Option<(DeployVersion, Worker)>, DeployVersionsDbError>
where
    E: PgExecutor<'c>,
{
    let record = sqlx::query_as::<
        _,
        (
            i64,
            String,
            String,
            i32,
            String,
            String,
            DateTime<Utc>,
            String,
            String,
            String,
            String,
            Option<i64>,
            String,
            String,
            DateTime<Utc>,
        ),
    >(
        r#"
        select v.id, v.worker_id, v.image, v.port, v.status, v.msg, v.created_at,
               w.worker_id, w.user_uid, w.worker_name, w.status, w.active_version_id,
               w.env_json, w.secrets_json, w.created_at
        from worker_deploy_versions v
        join workers w on w.worker_id = v.worker_id
        where v.id = $1
        "#,
    )
    .bind(version_id)
    .fetch_optional(executor)
    .await?;

    let Some(record) = record else {
        return Ok(None);
    };

    let version = DeployVersion {
        id: record.0,
        worker_id: record.1,
        image: record.2,
        port: record.3,
        status: VersionStatus::try_from(record.4).map_err(invalid_status)?,
        msg: record.5,
        created_at: record.6,
    };
    let worker = Worker {
        worker_id: record.7,
        user_uid: record.8,
        worker_name: record.9,
        status: WorkerStatus::try_from(record.10).map_err(invalid_status)?,
        active_version_id: record.11,
        env_json: record.12,
        secrets_json: record.13,
        created_at: record.14,
    };

    Ok(Some((version, worker)))
}

fn invalid_status(message: String) -> DeployVersionsDbError {
    DeployVersionsDbError::Database(sqlx::Error::Decode(message.into()))
}

/// Marks a deploy as succeeded.
///
/// Single transaction: the version becomes `success` with a cleared message
/// and the worker becomes `active` pointing at it.
pub async fn mark_deploy_success(
    pool: &PgPool,
    version_id: i64,
    worker_id: &str,
) -> Result<(), DeployVersionsDbError> {
    let mut txn = pool.begin().await?;

    sqlx::query(
        r#"
        update worker_deploy_versions
        set status = 'success', msg = ''
        where id = $1
        "#,
    )
    .bind(version_id)
    .execute(&mut *txn)
    .await?;

    sqlx::query(
        r#"
        update workers
        set active_version_id = $1, status = 'active'
        where worker_id = $2
        "#,
    )
    .bind(version_id)
    .bind(worker_id)
    .execute(&mut *txn)
    .await?;

    txn.commit().await?;

    Ok(())
}

pub async fn list_versions_paged<'c, E>(
    executor: E,
    worker_id: &str,
    limit: i64,
    offset: i64,
) -> Result<Vec<DeployVersion>, DeployVersionsDbError>
where
    E: PgExecutor<'c>,
{
    let versions = sqlx::query_as::<_, DeployVersion>(
        r#"
        select id, worker_id, image, port, status, msg, created_at
        from worker_deploy_versions
        where worker_id = $1
        order by created_at desc
        limit $2 offset $3
        "#,
    )
    .bind(worker_id)
    .bind(limit)
    .bind(offset)
    .fetch_all(executor)
    .await?;

    Ok(versions)
}
