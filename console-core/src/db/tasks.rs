use chrono::{DateTime, Utc};
use sqlx::PgExecutor;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TasksDbError {
    #[error("Error while interacting with Postgres for console tasks: {0}")]
    Database(#[from] sqlx::Error),
}

/// Audit-trail row for a task accepted over the wire. The processor flips
/// the status after the job runs; the row is never consulted for dispatch.
#[derive(Debug, sqlx::FromRow)]
pub struct ConsoleTask {
    pub id: i64,
    pub task_type: String,
    pub task_status: String,
    pub task_detailed_status: String,
    pub task_info: String,
    pub created_at: DateTime<Utc>,
}

pub async fn create_task<'c, E>(
    executor: E,
    task_type: &str,
    status: &str,
    detailed_status: &str,
    task_info: &str,
) -> Result<i64, TasksDbError>
where
    E: PgExecutor<'c>,
{
    let id: i64 = sqlx::query_scalar(
        r#"
        insert into console_tasks (task_type, task_status, task_detailed_status, task_info)
        values ($1, $2, $3, $4)
        returning id
        "#,
    )
    .bind(task_type)
    .bind(status)
    .bind(detailed_status)
    .bind(task_info)
    .fetch_one(executor)
    .await?;

    Ok(id)
}

pub async fn update_task_status<'c, E>(
    executor: E,
    task_id: i64,
    status: &str,
    detailed_status: &str,
) -> Result<(), TasksDbError>
where
    E: PgExecutor<'c>,
{
    sqlx::query(
        r#"
        update console_tasks
        set task_status = $1, task_detailed_status = $2
        where id = $3
        "#,
    )
    .bind(status)
    .bind(detailed_status)
    .bind(task_id)
    .execute(executor)
    .await?;

    Ok(())
}

pub async fn read_task<'c, E>(
    executor: E,
    task_id: i64,
) -> Result<Option<ConsoleTask>, TasksDbError>
where
    E: PgExecutor<'c>,
{
    let task = sqlx::query_as::<_, ConsoleTask>(
        r#"
        select id, task_type, task_status, task_detailed_status, task_info, created_at
        from console_tasks
        where id = $1
        "#,
    )
    .bind(task_id)
    .fetch_optional(executor)
    .await?;

    Ok(task)
}
