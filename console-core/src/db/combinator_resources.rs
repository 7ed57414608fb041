use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgExecutor;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CombinatorResourcesDbError {
    #[error("Error while interacting with Postgres for combinator resources: {0}")]
    Database(#[from] sqlx::Error),
}

/// Kind of data backend a combinator resource points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceType {
    Rdb,
    Kv,
}

impl ResourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::Rdb => "rdb",
            ResourceType::Kv => "kv",
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for ResourceType {
    type Error = String;

    fn try_from(value: String) -> Result<Self, String> {
        match value.as_str() {
            "rdb" => Ok(ResourceType::Rdb),
            "kv" => Ok(ResourceType::Kv),
            other => Err(format!("unknown resource type: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceStatus {
    Loading,
    Active,
    Error,
}

impl ResourceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceStatus::Loading => "loading",
            ResourceStatus::Active => "active",
            ResourceStatus::Error => "error",
        }
    }
}

impl TryFrom<String> for ResourceStatus {
    type Error = String;

    fn try_from(value: String) -> Result<Self, String> {
        match value.as_str() {
            "loading" => Ok(ResourceStatus::Loading),
            "active" => Ok(ResourceStatus::Active),
            "error" => Ok(ResourceStatus::Error),
            other => Err(format!("unknown resource status: {other}")),
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
pub struct CombinatorResource {
    pub user_uid: String,
    #[sqlx(try_from = "String")]
    pub resource_type: ResourceType,
    pub resource_id: String,
    pub name: String,
    pub url: String,
    #[sqlx(try_from = "String")]
    pub status: ResourceStatus,
    pub msg: String,
    pub created_at: DateTime<Utc>,
}

const RESOURCE_COLUMNS: &str =
    "user_uid, resource_type, resource_id, name, url, status, msg, created_at";

pub async fn create_resource<'c, E>(
    executor: E,
    user_uid: &str,
    resource_type: ResourceType,
    resource_id: &str,
    name: &str,
    url: &str,
) -> Result<(), CombinatorResourcesDbError>
where
    E: PgExecutor<'c>,
{
    sqlx::query(
        r#"
        insert into combinator_resources (user_uid, resource_type, resource_id, name, url, status, msg)
        values ($1, $2, $3, $4, $5, 'loading', '')
        "#,
    )
    .bind(user_uid)
    .bind(resource_type.as_str())
    .bind(resource_id)
    .bind(name)
    .bind(url)
    .execute(executor)
    .await?;

    Ok(())
}

pub async fn update_resource_status<'c, E>(
    executor: E,
    user_uid: &str,
    resource_type: ResourceType,
    resource_id: &str,
    status: ResourceStatus,
    msg: &str,
) -> Result<(), CombinatorResourcesDbError>
where
    E: PgExecutor<'c>,
{
    sqlx::query(
        r#"
        update combinator_resources
        set status = $1, msg = $2
        where user_uid = $3 and resource_type = $4 and resource_id = $5
        "#,
    )
    .bind(status.as_str())
    .bind(msg)
    .bind(user_uid)
    .bind(resource_type.as_str())
    .bind(resource_id)
    .execute(executor)
    .await?;

    Ok(())
}

pub async fn delete_resource<'c, E>(
    executor: E,
    user_uid: &str,
    resource_type: ResourceType,
    resource_id: &str,
) -> Result<Option<()>, CombinatorResourcesDbError>
where
    E: PgExecutor<'c>,
{
    let result = sqlx::query(
        r#"
        delete from combinator_resources
        where user_uid = $1 and resource_type = $2 and resource_id = $3
        "#,
    )
    .bind(user_uid)
    .bind(resource_type.as_str())
    .bind(resource_id)
    .execute(executor)
    .await?;

    Ok((result.rows_affected() > 0).then_some(()))
}

pub async fn list_resources_by_user<'c, E>(
    executor: E,
    user_uid: &str,
    resource_type: ResourceType,
) -> Result<Vec<CombinatorResource>, CombinatorResourcesDbError>
where
    E: PgExecutor<'c>,
{
    let resources = sqlx::query_as::<_, CombinatorResource>(&format!(
        r#"
        select {RESOURCE_COLUMNS}
        from combinator_resources
        where user_uid = $1 and resource_type = $2
        order by created_at
        "#,
    ))
    .bind(user_uid)
    .bind(resource_type.as_str())
    .fetch_all(executor)
    .await?;

    Ok(resources)
}

/// Lists every active resource of a tenant, both kinds. Used to rebuild the
/// combinator config and to answer the internal secret-retrieval endpoint.
pub async fn list_active_resources<'c, E>(
    executor: E,
    user_uid: &str,
) -> Result<Vec<CombinatorResource>, CombinatorResourcesDbError>
where
    E: PgExecutor<'c>,
{
    let resources = sqlx::query_as::<_, CombinatorResource>(&format!(
        r#"
        select {RESOURCE_COLUMNS}
        from combinator_resources
        where user_uid = $1 and status = 'active'
        order by created_at
        "#,
    ))
    .bind(user_uid)
    .fetch_all(executor)
    .await?;

    Ok(resources)
}
