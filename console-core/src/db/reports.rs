use serde::{Deserialize, Serialize};
use sqlx::PgExecutor;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReportsDbError {
    #[error("Error while interacting with Postgres for resource reports: {0}")]
    Database(#[from] sqlx::Error),
}

/// One usage sample reported by a tenant's combinator pod.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceReport {
    pub user_uid: String,
    pub resource_type: String,
    pub resource_id: String,
    pub used_bytes: i64,
}

/// Inserts a batch of usage reports with a single statement.
pub async fn batch_save_reports<'c, E>(
    executor: E,
    reports: &[ResourceReport],
) -> Result<u64, ReportsDbError>
where
    E: PgExecutor<'c>,
{
    let user_uids: Vec<&str> = reports.iter().map(|r| r.user_uid.as_str()).collect();
    let resource_types: Vec<&str> = reports.iter().map(|r| r.resource_type.as_str()).collect();
    let resource_ids: Vec<&str> = reports.iter().map(|r| r.resource_id.as_str()).collect();
    let used_bytes: Vec<i64> = reports.iter().map(|r| r.used_bytes).collect();

    let result = sqlx::query(
        r#"
        insert into combinator_resource_reports (user_uid, resource_type, resource_id, used_bytes)
        select * from unnest($1::text[], $2::text[], $3::text[], $4::bigint[])
        "#,
    )
    .bind(&user_uids)
    .bind(&resource_types)
    .bind(&resource_ids)
    .bind(&used_bytes)
    .execute(executor)
    .await?;

    Ok(result.rows_affected())
}
