use actix_web::{
    HttpResponse, Responder, ResponseError, post,
    http::{StatusCode, header::ContentType},
    web::{Data, Json},
};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use thiserror::Error;

use console_core::db::tasks::{self, TasksDbError};
use console_core::jobs::{AcceptTaskRequest, JobKind};

use crate::jobs::{JobRegistry, RegistryError};
use crate::processor::JobProcessor;
use crate::routes::ErrorMessage;

#[derive(Debug, Error)]
pub enum AcceptTaskError {
    #[error("invalid timestamp")]
    InvalidTimestamp,

    #[error("failed to deserialize job: {0}")]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    TasksDb(#[from] TasksDbError),
}

impl AcceptTaskError {
    fn to_message(&self) -> String {
        match self {
            AcceptTaskError::TasksDb(TasksDbError::Database(_)) => {
                "internal server error".to_string()
            }
            e => e.to_string(),
        }
    }
}

impl ResponseError for AcceptTaskError {
    fn status_code(&self) -> StatusCode {
        match self {
            AcceptTaskError::InvalidTimestamp | AcceptTaskError::Registry(_) => {
                StatusCode::BAD_REQUEST
            }
            AcceptTaskError::TasksDb(_) => StatusCode::INTERNAL_SERVER_ERROR,
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

#[derive(Debug, Serialize, Deserialize)]
pub struct AcceptTaskResponse {
    pub message: String,
    pub task_type: JobKind,
    pub timestamp: i64,
    pub received_at: i64,
}

/// Accepts a serialized job from the outer gateway and feeds it to the
/// local processor. The persisted task row is the audit trail the
/// processor updates after the job runs.
#[post("/api/acceptTask")]
pub async fn accept_task(
    pool: Data<PgPool>,
    processor: Data<JobProcessor>,
    registry: Data<JobRegistry>,
    request: Json<AcceptTaskRequest>,
) -> Result<impl Responder, AcceptTaskError> {
    let request = request.into_inner();

    if request.timestamp <= 0 {
        return Err(AcceptTaskError::InvalidTimestamp);
    }

    let job = registry.build(request.task_type, request.data)?;

    let task_id = tasks::create_task(
        &**pool,
        request.task_type.as_str(),
        "accepted",
        "",
        &job.id(),
    )
    .await?;

    processor.submit_with_task(job, Some(task_id)).await;

    let response = AcceptTaskResponse {
        message: "task accepted".to_string(),
        task_type: request.task_type,
        timestamp: request.timestamp,
        received_at: chrono::Utc::now().timestamp(),
    };

    Ok(Json(response))
}
