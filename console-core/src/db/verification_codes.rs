use chrono::{DateTime, Utc};
use sqlx::PgExecutor;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum VerificationCodesDbError {
    #[error("Error while interacting with Postgres for verification codes: {0}")]
    Database(#[from] sqlx::Error),
}

pub struct VerificationCode {
    pub id: i64,
    pub expires_at: DateTime<Utc>,
}

pub async fn save_verification_code<'c, E>(
    executor: E,
    email: &str,
    code: &str,
    expires_at: DateTime<Utc>,
) -> Result<(), VerificationCodesDbError>
where
    E: PgExecutor<'c>,
{
    sqlx::query(
        r#"
        insert into verification_codes (email, code, expires_at)
        values ($1, $2, $3)
        "#,
    )
    .bind(email)
    .bind(code)
    .bind(expires_at)
    .execute(executor)
    .await?;

    Ok(())
}

/// Reads an unused code for the email, if one exists.
pub async fn read_unused_code<'c, E>(
    executor: E,
    email: &str,
    code: &str,
) -> Result<Option<VerificationCode>, VerificationCodesDbError>
where
    E: PgExecutor<'c>,
{
    let record = sqlx::query_as::<_, (i64, DateTime<Utc>)>(
        r#"
        select id, expires_at
        from verification_codes
        where email = $1 and code = $2 and used = false
        "#,
    )
    .bind(email)
    .bind(code)
    .fetch_optional(executor)
    .await?;

    Ok(record.map(|(id, expires_at)| VerificationCode { id, expires_at }))
}

pub async fn mark_code_used<'c, E>(
    executor: E,
    code_id: i64,
) -> Result<(), VerificationCodesDbError>
where
    E: PgExecutor<'c>,
{
    sqlx::query(
        r#"
        update verification_codes
        set used = true
        where id = $1
        "#,
    )
    .bind(code_id)
    .execute(executor)
    .await?;

    Ok(())
}
