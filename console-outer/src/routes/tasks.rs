use actix_web::{
    HttpResponse, Responder, ResponseError, get,
    http::{StatusCode, header::ContentType},
    web::{Data, Json, Path},
};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use thiserror::Error;
use utoipa::ToSchema;

use console_core::db::tasks::{self, TasksDbError};

use crate::authentication::AuthedUser;
use crate::routes::ErrorMessage;

#[derive(Debug, Error)]
pub enum TaskRouteError {
    #[error("task not found")]
    TaskNotFound,

    #[error(transparent)]
    TasksDb(#[from] TasksDbError),
}

impl TaskRouteError {
    fn to_message(&self) -> String {
        match self {
            TaskRouteError::TasksDb(_) => "internal server error".to_string(),
            e => e.to_string(),
        }
    }
}

impl ResponseError for TaskRouteError {
    fn status_code(&self) -> StatusCode {
        match self {
            TaskRouteError::TaskNotFound => StatusCode::NOT_FOUND,
            TaskRouteError::TasksDb(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let error_message = ErrorMessage {
            error: self.to_message(),
        };
        let body =
            serde_json::to_string(&error_message).expect("failed to serialize error message");
        HttpResponse::build(self.status_code())
            .insert_header(ContentType::json())
            .body(body)
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ReadTaskResponse {
    pub task_id: i64,
    #[schema(example = "completed")]
    pub status: String,
    pub error: String,
}

#[utoipa::path(
    params(
        ("task_id" = i64, Path, description = "Id of the task"),
    ),
    responses(
        (status = 200, description = "Read the status of an accepted task", body = ReadTaskResponse),
        (status = 404, description = "Task not found", body = ErrorMessage),
        (status = 500, description = "Internal server error", body = ErrorMessage),
    ),
    tag = "Tasks"
)]
#[get("/api/task/{task_id}")]
pub async fn read_task_status(
    pool: Data<PgPool>,
    _user: AuthedUser,
    task_id: Path<i64>,
) -> Result<impl Responder, TaskRouteError> {
    let task_id = task_id.into_inner();

    let task = tasks::read_task(&**pool, task_id)
        .await?
        .ok_or(TaskRouteError::TaskNotFound)?;

    Ok(Json(ReadTaskResponse {
        task_id: task.id,
        status: task.task_status,
        error: task.task_detailed_status,
    }))
}
