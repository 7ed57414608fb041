use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgExecutor;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CustomDomainsDbError {
    #[error("Error while interacting with Postgres for custom domains: {0}")]
    Database(#[from] sqlx::Error),
}

/// Verification status of a custom domain binding.
///
/// `error` is terminal; recovering requires the tenant to delete and
/// re-create the binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DomainStatus {
    Pending,
    Success,
    Error,
}

impl DomainStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DomainStatus::Pending => "pending",
            DomainStatus::Success => "success",
            DomainStatus::Error => "error",
        }
    }
}

impl fmt::Display for DomainStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for DomainStatus {
    type Error = String;

    fn try_from(value: String) -> Result<Self, String> {
        match value.as_str() {
            "pending" => Ok(DomainStatus::Pending),
            "success" => Ok(DomainStatus::Success),
            "error" => Ok(DomainStatus::Error),
            other => Err(format!("unknown domain status: {other}")),
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
pub struct CustomDomain {
    pub cdid: String,
    pub user_uid: String,
    pub domain: String,
    pub target: String,
    pub txt_name: String,
    pub txt_value: String,
    #[sqlx(try_from = "String")]
    pub status: DomainStatus,
    pub created_at: DateTime<Utc>,
}

const DOMAIN_COLUMNS: &str =
    "cdid, user_uid, domain, target, txt_name, txt_value, status, created_at";

pub async fn create_custom_domain<'c, E>(
    executor: E,
    cdid: &str,
    user_uid: &str,
    domain: &str,
    target: &str,
    txt_name: &str,
    txt_value: &str,
) -> Result<(), CustomDomainsDbError>
where
    E: PgExecutor<'c>,
{
    sqlx::query(
        r#"
        insert into custom_domains (cdid, user_uid, domain, target, txt_name, txt_value, status)
        values ($1, $2, $3, $4, $5, $6, 'pending')
        "#,
    )
    .bind(cdid)
    .bind(user_uid)
    .bind(domain)
    .bind(target)
    .bind(txt_name)
    .bind(txt_value)
    .execute(executor)
    .await?;

    Ok(())
}

pub async fn read_custom_domain<'c, E>(
    executor: E,
    cdid: &str,
) -> Result<Option<CustomDomain>, CustomDomainsDbError>
where
    E: PgExecutor<'c>,
{
    let domain = sqlx::query_as::<_, CustomDomain>(&format!(
        r#"
        select {DOMAIN_COLUMNS}
        from custom_domains
        where cdid = $1
        "#,
    ))
    .bind(cdid)
    .fetch_optional(executor)
    .await?;

    Ok(domain)
}

pub async fn list_custom_domains_by_user<'c, E>(
    executor: E,
    user_uid: &str,
) -> Result<Vec<CustomDomain>, CustomDomainsDbError>
where
    E: PgExecutor<'c>,
{
    let domains = sqlx::query_as::<_, CustomDomain>(&format!(
        r#"
        select {DOMAIN_COLUMNS}
        from custom_domains
        where user_uid = $1
        order by created_at desc
        "#,
    ))
    .bind(user_uid)
    .fetch_all(executor)
    .await?;

    Ok(domains)
}

/// Lists every verified domain, across all tenants. The recurring DNS
/// recheck walks this set.
pub async fn list_verified_domains<'c, E>(
    executor: E,
) -> Result<Vec<CustomDomain>, CustomDomainsDbError>
where
    E: PgExecutor<'c>,
{
    let domains = sqlx::query_as::<_, CustomDomain>(&format!(
        r#"
        select {DOMAIN_COLUMNS}
        from custom_domains
        where status = 'success'
        order by created_at
        "#,
    ))
    .fetch_all(executor)
    .await?;

    Ok(domains)
}

pub async fn update_domain_status<'c, E>(
    executor: E,
    cdid: &str,
    status: DomainStatus,
) -> Result<(), CustomDomainsDbError>
where
    E: PgExecutor<'c>,
{
    sqlx::query(
        r#"
        update custom_domains
        set status = $1
        where cdid = $2
        "#,
    )
    .bind(status.as_str())
    .bind(cdid)
    .execute(executor)
    .await?;

    Ok(())
}

pub async fn delete_custom_domain<'c, E>(
    executor: E,
    cdid: &str,
    user_uid: &str,
) -> Result<Option<()>, CustomDomainsDbError>
where
    E: PgExecutor<'c>,
{
    let result = sqlx::query(
        r#"
        delete from custom_domains
        where cdid = $1 and user_uid = $2
        "#,
    )
    .bind(cdid)
    .bind(user_uid)
    .execute(executor)
    .await?;

    Ok((result.rows_affected() > 0).then_some(()))
}
