use actix_web::{
    HttpResponse, Responder, ResponseError, post,
    http::{StatusCode, header::ContentType},
    web::{Data, Json},
};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::sync::Arc;
use thiserror::Error;

use console_core::db::deploy_versions::{self, DeployVersionsDbError};
use console_core::jobs::DeployWorkerPayload;

use crate::env::Env;
use crate::jobs::worker::DeployWorkerJob;
use crate::processor::JobProcessor;
use crate::routes::ErrorMessage;

#[derive(Debug, Error)]
pub enum DeployError {
    #[error("worker not found")]
    WorkerNotFound,

    #[error(transparent)]
    DeployVersionsDb(#[from] DeployVersionsDbError),
}

impl DeployError {
    fn to_message(&self) -> String {
        match self {
            DeployError::DeployVersionsDb(DeployVersionsDbError::Database(_)) => {
                "internal server error".to_string()
            }
            e => e.to_string(),
        }
    }
}

impl ResponseError for DeployError {
    fn status_code(&self) -> StatusCode {
        match self {
            DeployError::WorkerNotFound => StatusCode::NOT_FOUND,
            DeployError::DeployVersionsDb(_) => StatusCode::INTERNAL_SERVER_ERROR,
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
pub struct DeployWorkerRequest {
    pub user_uid: String,
    pub worker_id: String,
    pub image: String,
    pub port: i32,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DeployWorkerResponse {
    pub worker_id: String,
    pub version_id: i64,
    pub status: String,
}

/// Cluster-internal deploy trigger: records the deploy version and submits
/// the job directly to the local processor.
#[post("/api/worker/deploy")]
pub async fn deploy_worker(
    pool: Data<PgPool>,
    env: Data<Arc<Env>>,
    processor: Data<JobProcessor>,
    request: Json<DeployWorkerRequest>,
) -> Result<impl Responder, DeployError> {
    let request = request.into_inner();

    let version_id = deploy_versions::create_deploy_version(
        &pool,
        &request.worker_id,
        &request.user_uid,
        &request.image,
        request.port,
    )
    .await?
    .ok_or(DeployError::WorkerNotFound)?;

    let payload = DeployWorkerPayload {
        worker_id: request.worker_id.clone(),
        user_uid: request.user_uid,
        version_id,
    };
    processor
        .submit(Box::new(DeployWorkerJob::new(env.get_ref().clone(), payload)))
        .await;

    let response = DeployWorkerResponse {
        worker_id: request.worker_id,
        version_id,
        status: "loading".to_string(),
    };

    Ok(Json(response))
}
