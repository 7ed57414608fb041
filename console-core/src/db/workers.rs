use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgExecutor;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WorkersDbError {
    #[error("Error while interacting with Postgres for workers: {0}")]
    Database(#[from] sqlx::Error),
}

/// Observational worker status. The deploy pipeline moves it between
/// states; the authoritative shape lives in the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerStatus {
    Unloaded,
    Loading,
    Active,
    Error,
}

impl WorkerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerStatus::Unloaded => "unloaded",
            WorkerStatus::Loading => "loading",
            WorkerStatus::Active => "active",
            WorkerStatus::Error => "error",
        }
    }
}

impl fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for WorkerStatus {
    type Error = String;

    fn try_from(value: String) -> Result<Self, String> {
        match value.as_str() {
            "unloaded" => Ok(WorkerStatus::Unloaded),
            "loading" => Ok(WorkerStatus::Loading),
            "active" => Ok(WorkerStatus::Active),
            "error" => Ok(WorkerStatus::Error),
            other => Err(format!("unknown worker status: {other}")),
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
pub struct Worker {
    pub worker_id: String,
    pub user_uid: String,
    pub worker_name: String,
    #[sqlx(try_from = "String")]
    pub status: WorkerStatus,
    pub active_version_id: Option<i64>,
    pub env_json: String,
    pub secrets_json: String,
    pub created_at: DateTime<Utc>,
}

const WORKER_COLUMNS: &str =
    "worker_id, user_uid, worker_name, status, active_version_id, env_json, secrets_json, created_at";

pub async fn create_worker<'c, E>(
    executor: E,
    user_uid: &str,
    worker_id: &str,
    worker_name: &str,
) -> Result<(), WorkersDbError>
where
    E: PgExecutor<'c>,
{
    sqlx::query(
        r#"
        insert into workers (worker_id, user_uid, worker_name, status, env_json, secrets_json)
        values ($1, $2, $3, 'unloaded', '{}', '[]')
        "#,
    )
    .bind(worker_id)
    .bind(user_uid)
    .bind(worker_name)
    .execute(executor)
    .await?;

    Ok(())
}

pub async fn list_workers_by_user<'c, E>(
    executor: E,
    user_uid: &str,
) -> Result<Vec<Worker>, WorkersDbError>
where
    E: PgExecutor<'c>,
{
    let workers = sqlx::query_as::<_, Worker>(&format!(
        r#"
        select {WORKER_COLUMNS}
        from workers
        where user_uid = $1
        order by created_at desc
        "#,
    ))
    .bind(user_uid)
    .fetch_all(executor)
    .await?;

    Ok(workers)
}

/// Reads a worker, verifying ownership in the same statement.
pub async fn read_worker_by_owner<'c, E>(
    executor: E,
    worker_id: &str,
    user_uid: &str,
) -> Result<Option<Worker>, WorkersDbError>
where
    E: PgExecutor<'c>,
{
    let worker = sqlx::query_as::<_, Worker>(&format!(
        r#"
        select {WORKER_COLUMNS}
        from workers
        where worker_id = $1 and user_uid = $2
        "#,
    ))
    .bind(worker_id)
    .bind(user_uid)
    .fetch_optional(executor)
    .await?;

    Ok(worker)
}

pub async fn read_worker_env<'c, E>(
    executor: E,
    worker_id: &str,
    user_uid: &str,
) -> Result<Option<String>, WorkersDbError>
where
    E: PgExecutor<'c>,
{
    let env: Option<String> = sqlx::query_scalar(
        r#"
        select env_json
        from workers
        where worker_id = $1 and user_uid = $2
        "#,
    )
    .bind(worker_id)
    .bind(user_uid)
    .fetch_optional(executor)
    .await?;

    Ok(env)
}

pub async fn update_worker_env<'c, E>(
    executor: E,
    worker_id: &str,
    user_uid: &str,
    env_json: &str,
) -> Result<Option<()>, WorkersDbError>
where
    E: PgExecutor<'c>,
{
    let result = sqlx::query(
        r#"
        update workers
        set env_json = $1
        where worker_id = $2 and user_uid = $3
        "#,
    )
    .bind(env_json)
    .bind(worker_id)
    .bind(user_uid)
    .execute(executor)
    .await?;

    Ok((result.rows_affected() > 0).then_some(()))
}

pub async fn read_worker_secrets<'c, E>(
    executor: E,
    worker_id: &str,
    user_uid: &str,
) -> Result<Option<String>, WorkersDbError>
where
    E: PgExecutor<'c>,
{
    let secrets: Option<String> = sqlx::query_scalar(
        r#"
        select secrets_json
        from workers
        where worker_id = $1 and user_uid = $2
        "#,
    )
    .bind(worker_id)
    .bind(user_uid)
    .fetch_optional(executor)
    .await?;

    Ok(secrets)
}

pub async fn update_worker_secrets<'c, E>(
    executor: E,
    worker_id: &str,
    user_uid: &str,
    secrets_json: &str,
) -> Result<Option<()>, WorkersDbError>
where
    E: PgExecutor<'c>,
{
    let result = sqlx::query(
        r#"
        update workers
        set secrets_json = $1
        where worker_id = $2 and user_uid = $3
        "#,
    )
    .bind(secrets_json)
    .bind(worker_id)
    .bind(user_uid)
    .execute(executor)
    .await?;

    Ok((result.rows_affected() > 0).then_some(()))
}

pub async fn update_worker_status<'c, E>(
    executor: E,
    worker_id: &str,
    status: WorkerStatus,
) -> Result<(), WorkersDbError>
where
    E: PgExecutor<'c>,
{
    sqlx::query(
        r#"
        update workers
        set status = $1
        where worker_id = $2
        "#,
    )
    .bind(status.as_str())
    .bind(worker_id)
    .execute(executor)
    .await?;

    Ok(())
}

pub async fn delete_worker_by_owner<'c, E>(
    executor: E,
    worker_id: &str,
    user_uid: &str,
) -> Result<Option<()>, WorkersDbError>
where
    E: PgExecutor<'c>,
{
    let result = sqlx::query(
        r#"
        delete from workers
        where worker_id = $1 and user_uid = $2
        "#,
    )
    .bind(worker_id)
    .bind(user_uid)
    .execute(executor)
    .await?;

    Ok((result.rows_affected() > 0).then_some(()))
}

/// Applies one `{key, value, delete}` mutation to an env map.
///
/// The map is ordered so the serialized form is stable across round trips.
pub fn merge_env_entry(
    env: &mut BTreeMap<String, String>,
    key: &str,
    value: &str,
    delete: bool,
) {
    if delete {
        env.remove(key);
    } else {
        env.insert(key.to_string(), value.to_string());
    }
}

/// Applies one `{key, delete}` mutation to the stored list of secret keys.
///
/// Values never enter the control-plane database; only key names are kept.
pub fn merge_secret_key(keys: &mut Vec<String>, key: &str, delete: bool) {
    if delete {
        keys.retain(|k| k != key);
    } else if !keys.iter().any(|k| k == key) {
        keys.push(key.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_env_sets_overwrites_and_deletes() {
        let mut env = BTreeMap::new();
        merge_env_entry(&mut env, "K", "V", false);
        assert_eq!(env.get("K").map(String::as_str), Some("V"));

        merge_env_entry(&mut env, "K", "V2", false);
        assert_eq!(env.get("K").map(String::as_str), Some("V2"));

        merge_env_entry(&mut env, "K", "", true);
        assert!(env.is_empty());
    }

    #[test]
    fn merge_env_delete_of_missing_key_is_noop() {
        let mut env = BTreeMap::new();
        merge_env_entry(&mut env, "ABSENT", "", true);
        assert!(env.is_empty());
    }

    #[test]
    fn merge_secret_key_deduplicates() {
        let mut keys = vec![];
        merge_secret_key(&mut keys, "TOKEN", false);
        merge_secret_key(&mut keys, "TOKEN", false);
        assert_eq!(keys, vec!["TOKEN"]);

        merge_secret_key(&mut keys, "OTHER", false);
        merge_secret_key(&mut keys, "TOKEN", true);
        assert_eq!(keys, vec!["OTHER"]);
    }

    #[test]
    fn worker_status_round_trips() {
        for status in [
            WorkerStatus::Unloaded,
            WorkerStatus::Loading,
            WorkerStatus::Active,
            WorkerStatus::Error,
        ] {
            let parsed = WorkerStatus::try_from(status.as_str().to_string()).unwrap();
            assert_eq!(parsed, status);
        }
        assert!(WorkerStatus::try_from("bogus".to_string()).is_err());
    }
}
