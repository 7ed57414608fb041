use sqlx::PgExecutor;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum UsersDbError {
    #[error("Error while interacting with Postgres for users: {0}")]
    Database(#[from] sqlx::Error),
}

pub struct User {
    pub uid: String,
    pub email: String,
    pub password_hash: String,
    pub secret_key: String,
}

/// Inserts a user and returns its uid.
///
/// A unique violation on the email column bubbles up as a database error;
/// the route layer maps it to a conflict response.
pub async fn create_user<'c, E>(
    executor: E,
    uid: &str,
    email: &str,
    password_hash: &str,
    secret_key: &str,
) -> Result<String, UsersDbError>
where
    E: PgExecutor<'c>,
{
    let uid: String = sqlx::query_scalar(
        r#"
        insert into users (uid, email, password_hash, secret_key)
        values ($1, $2, $3, $4)
        returning uid
        "#,
    )
    .bind(uid)
    .bind(email)
    .bind(password_hash)
    .bind(secret_key)
    .fetch_one(executor)
    .await?;

    Ok(uid)
}

pub async fn read_user_by_email<'c, E>(
    executor: E,
    email: &str,
) -> Result<Option<User>, UsersDbError>
where
    E: PgExecutor<'c>,
{
    let record = sqlx::query_as::<_, (String, String, String, String)>(
        r#"
        select uid, email, password_hash, secret_key
        from users
        where email = $1
        "#,
    )
    .bind(email)
    .fetch_optional(executor)
    .await?;

    Ok(record.map(|(uid, email, password_hash, secret_key)| User {
        uid,
        email,
        password_hash,
        secret_key,
    }))
}

/// Returns the signing key issued to a tenant at registration.
pub async fn read_user_secret_key<'c, E>(
    executor: E,
    user_uid: &str,
) -> Result<Option<String>, UsersDbError>
where
    E: PgExecutor<'c>,
{
    let record: Option<String> = sqlx::query_scalar(
        r#"
        select secret_key
        from users
        where uid = $1
        "#,
    )
    .bind(user_uid)
    .fetch_optional(executor)
    .await?;

    Ok(record)
}

pub async fn update_user_password<'c, E>(
    executor: E,
    email: &str,
    password_hash: &str,
) -> Result<Option<String>, UsersDbError>
where
    E: PgExecutor<'c>,
{
    let record: Option<String> = sqlx::query_scalar(
        r#"
        update users
        set password_hash = $1
        where email = $2
        returning uid
        "#,
    )
    .bind(password_hash)
    .bind(email)
    .fetch_optional(executor)
    .await?;

    Ok(record)
}

/// Reads one page of user uids on a stable order.
///
/// The audit job walks the whole table with this; the `id` order keeps pages
/// disjoint while rows are appended concurrently.
pub async fn list_user_uids_paged<'c, E>(
    executor: E,
    limit: i64,
    offset: i64,
) -> Result<Vec<String>, UsersDbError>
where
    E: PgExecutor<'c>,
{
    let uids: Vec<String> = sqlx::query_scalar(
        r#"
        select uid
        from users
        order by id
        limit $1 offset $2
        "#,
    )
    .bind(limit)
    .bind(offset)
    .fetch_all(executor)
    .await?;

    Ok(uids)
}
