use actix_web::{
    HttpRequest, HttpResponse, Responder, ResponseError, delete, get, post,
    http::{StatusCode, header::ContentType},
    web::{Bytes, Data, Json, Path, Query},
};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::collections::BTreeMap;
use thiserror::Error;
use utoipa::ToSchema;

use console_core::db::deploy_versions::{self, DeployVersion, DeployVersionsDbError, VersionStatus};
use console_core::db::workers::{self, WorkerStatus, WorkersDbError};
use console_core::idents;
use console_core::jobs::{
    DeleteWorkerCrPayload, DeployWorkerPayload, JobKind, SyncEnvPayload, SyncSecretPayload,
};

use crate::authentication::{AuthedUser, SignatureError, verify_signed_request};
use crate::env::OuterEnv;
use crate::routes::ErrorMessage;

/// Page size for embedded deploy-version listings.
const VERSION_PAGE_SIZE: i64 = 10;

#[derive(Debug, Error)]
pub enum WorkerRouteError {
    #[error("worker not found")]
    WorkerNotFound,

    #[error("invalid request body")]
    BadBody,

    #[error(transparent)]
    Signature(#[from] SignatureError),

    #[error(transparent)]
    WorkersDb(#[from] WorkersDbError),

    #[error(transparent)]
    DeployVersionsDb(#[from] DeployVersionsDbError),
}

impl WorkerRouteError {
    fn to_message(&self) -> String {
        match self {
            WorkerRouteError::WorkersDb(_) | WorkerRouteError::DeployVersionsDb(_) => {
                "internal server error".to_string()
            }
            e => e.to_string(),
        }
    }
}

impl ResponseError for WorkerRouteError {
    fn status_code(&self) -> StatusCode {
        match self {
            WorkerRouteError::WorkerNotFound => StatusCode::NOT_FOUND,
            WorkerRouteError::BadBody => StatusCode::BAD_REQUEST,
            WorkerRouteError::Signature(SignatureError::Database) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            WorkerRouteError::Signature(_) => StatusCode::UNAUTHORIZED,
            WorkerRouteError::WorkersDb(_) | WorkerRouteError::DeployVersionsDb(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
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

fn worker_url(worker_id: &str, user_uid: &str, domain: &str) -> String {
    format!("https://{}", idents::worker_host(worker_id, user_uid, domain))
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CreateWorkerRequest {
    #[schema(example = "my-worker", required = true)]
    pub worker_name: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CreateWorkerResponse {
    #[schema(example = "3f7a9c1d")]
    pub worker_id: String,
    #[schema(example = "my-worker")]
    pub worker_name: String,
}

#[utoipa::path(
    request_body = CreateWorkerRequest,
    responses(
        (status = 200, description = "Create a worker record", body = CreateWorkerResponse),
        (status = 500, description = "Internal server error", body = ErrorMessage),
    ),
    tag = "Workers"
)]
#[post("/api/worker")]
pub async fn create_worker(
    pool: Data<PgPool>,
    user: AuthedUser,
    request: Json<CreateWorkerRequest>,
) -> Result<impl Responder, WorkerRouteError> {
    let request = request.into_inner();
    let worker_id = uuid::Uuid::new_v4().to_string()[..8].to_string();

    workers::create_worker(&**pool, &user.0, &worker_id, &request.worker_name).await?;

    Ok(Json(CreateWorkerResponse {
        worker_id,
        worker_name: request.worker_name,
    }))
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct WorkerSummary {
    pub worker_id: String,
    pub worker_name: String,
    #[schema(value_type = String, example = "active")]
    pub status: WorkerStatus,
    pub active_version_id: Option<i64>,
    pub url: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ListWorkersResponse {
    pub workers: Vec<WorkerSummary>,
}

#[utoipa::path(
    responses(
        (status = 200, description = "List the tenant's workers", body = ListWorkersResponse),
        (status = 500, description = "Internal server error", body = ErrorMessage),
    ),
    tag = "Workers"
)]
#[get("/api/worker")]
pub async fn list_workers(
    pool: Data<PgPool>,
    env: Data<OuterEnv>,
    user: AuthedUser,
) -> Result<impl Responder, WorkerRouteError> {
    let workers = workers::list_workers_by_user(&**pool, &user.0)
        .await?
        .into_iter()
        .map(|w| WorkerSummary {
            url: worker_url(&w.worker_id, &w.user_uid, &env.domain),
            worker_id: w.worker_id,
            worker_name: w.worker_name,
            status: w.status,
            active_version_id: w.active_version_id,
        })
        .collect();

    Ok(Json(ListWorkersResponse { workers }))
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct DeployVersionView {
    pub id: i64,
    pub image: String,
    pub port: i32,
    #[schema(value_type = String, example = "loading")]
    pub status: VersionStatus,
    pub msg: String,
}

impl From<DeployVersion> for DeployVersionView {
    fn from(v: DeployVersion) -> Self {
        Self {
            id: v.id,
            image: v.image,
            port: v.port,
            status: v.status,
            msg: v.msg,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ReadWorkerResponse {
    pub worker_id: String,
    pub worker_name: String,
    #[schema(value_type = String, example = "active")]
    pub status: WorkerStatus,
    pub active_version_id: Option<i64>,
    pub url: String,
    pub versions: Vec<DeployVersionView>,
}

#[derive(Debug, Deserialize)]
pub struct VersionsPageQuery {
    #[serde(default)]
    pub offset: i64,
}

#[utoipa::path(
    params(
        ("worker_id" = String, Path, description = "Id of the worker"),
        ("offset" = Option<i64>, Query, description = "Offset into the version history"),
    ),
    responses(
        (status = 200, description = "Read one worker with its recent versions", body = ReadWorkerResponse),
        (status = 404, description = "Worker not found", body = ErrorMessage),
        (status = 500, description = "Internal server error", body = ErrorMessage),
    ),
    tag = "Workers"
)]
#[get("/api/worker/{worker_id}")]
pub async fn read_worker(
    pool: Data<PgPool>,
    env: Data<OuterEnv>,
    user: AuthedUser,
    worker_id: Path<String>,
    page: Query<VersionsPageQuery>,
) -> Result<impl Responder, WorkerRouteError> {
    let worker_id = worker_id.into_inner();
    let offset = page.into_inner().offset.max(0);

    let worker = workers::read_worker_by_owner(&**pool, &worker_id, &user.0)
        .await?
        .ok_or(WorkerRouteError::WorkerNotFound)?;

    let versions =
        deploy_versions::list_versions_paged(&**pool, &worker_id, VERSION_PAGE_SIZE, offset)
            .await?
            .into_iter()
            .map(DeployVersionView::from)
            .collect();

    Ok(Json(ReadWorkerResponse {
        url: worker_url(&worker.worker_id, &worker.user_uid, &env.domain),
        worker_id: worker.worker_id,
        worker_name: worker.worker_name,
        status: worker.status,
        active_version_id: worker.active_version_id,
        versions,
    }))
}

#[utoipa::path(
    params(
        ("worker_id" = String, Path, description = "Id of the worker"),
    ),
    responses(
        (status = 200, description = "Delete a worker and its cluster state"),
        (status = 404, description = "Worker not found", body = ErrorMessage),
        (status = 500, description = "Internal server error", body = ErrorMessage),
    ),
    tag = "Workers"
)]
#[delete("/api/worker/{worker_id}")]
pub async fn delete_worker(
    pool: Data<PgPool>,
    env: Data<OuterEnv>,
    user: AuthedUser,
    worker_id: Path<String>,
) -> Result<impl Responder, WorkerRouteError> {
    let worker_id = worker_id.into_inner();

    workers::delete_worker_by_owner(&**pool, &worker_id, &user.0)
        .await?
        .ok_or(WorkerRouteError::WorkerNotFound)?;

    // Row first, then the CR delete job: the audit loop removes the CR
    // anyway if this send is lost.
    env.tasks
        .send_or_log(
            JobKind::DeleteWorkerCr,
            &DeleteWorkerCrPayload {
                worker_id,
                user_uid: user.0,
            },
        )
        .await;

    Ok(HttpResponse::Ok().json(serde_json::json!({ "message": "worker deleted" })))
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct DeployRequest {
    #[schema(example = "tenant147008", required = true)]
    pub user_uid: String,
    #[schema(example = "3f7a9c1d", required = true)]
    pub worker_id: String,
    #[schema(example = "ghcr.io/acme/app:v3", required = true)]
    pub image: String,
    #[schema(example = 8080, required = true)]
    pub port: i32,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct DeployResponse {
    pub worker_id: String,
    pub version_id: i64,
    #[schema(example = "loading")]
    pub status: String,
}

#[utoipa::path(
    request_body = DeployRequest,
    responses(
        (status = 200, description = "Trigger a deploy", body = DeployResponse),
        (status = 401, description = "Bad signature", body = ErrorMessage),
        (status = 404, description = "Worker not found", body = ErrorMessage),
        (status = 500, description = "Internal server error", body = ErrorMessage),
    ),
    tag = "Workers"
)]
#[post("/api/worker/deploy")]
pub async fn deploy_worker(
    pool: Data<PgPool>,
    env: Data<OuterEnv>,
    http_request: HttpRequest,
    body: Bytes,
) -> Result<impl Responder, WorkerRouteError> {
    // Deploys are machine-to-machine: authentication is an HMAC over the
    // raw body plus timestamp, keyed by the tenant's secret key.
    let signer = verify_signed_request(&pool, &http_request, &body).await?;

    let request: DeployRequest =
        serde_json::from_slice(&body).map_err(|_| WorkerRouteError::BadBody)?;
    if request.user_uid != signer {
        return Err(WorkerRouteError::Signature(SignatureError::BadSignature));
    }

    let version_id = deploy_versions::create_deploy_version(
        &pool,
        &request.worker_id,
        &request.user_uid,
        &request.image,
        request.port,
    )
    .await?
    .ok_or(WorkerRouteError::WorkerNotFound)?;

    env.tasks
        .send_or_log(
            JobKind::DeployWorker,
            &DeployWorkerPayload {
                worker_id: request.worker_id.clone(),
                user_uid: request.user_uid,
                version_id,
            },
        )
        .await;

    Ok(Json(DeployResponse {
        worker_id: request.worker_id,
        version_id,
        status: "loading".to_string(),
    }))
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SetEntryRequest {
    #[schema(example = "DATABASE_URL", required = true)]
    pub key: String,
    #[serde(default)]
    #[schema(example = "postgres://...")]
    pub value: String,
    #[serde(default)]
    pub delete: bool,
}

#[utoipa::path(
    params(
        ("worker_id" = String, Path, description = "Id of the worker"),
    ),
    responses(
        (status = 200, description = "Read the worker's environment map"),
        (status = 404, description = "Worker not found", body = ErrorMessage),
        (status = 500, description = "Internal server error", body = ErrorMessage),
    ),
    tag = "Workers"
)]
#[get("/api/worker/{worker_id}/env")]
pub async fn read_worker_env(
    pool: Data<PgPool>,
    user: AuthedUser,
    worker_id: Path<String>,
) -> Result<impl Responder, WorkerRouteError> {
    let worker_id = worker_id.into_inner();

    let env_json = workers::read_worker_env(&**pool, &worker_id, &user.0)
        .await?
        .ok_or(WorkerRouteError::WorkerNotFound)?;

    let env: BTreeMap<String, String> = serde_json::from_str(&env_json).unwrap_or_default();
    Ok(Json(env))
}

#[utoipa::path(
    request_body = SetEntryRequest,
    params(
        ("worker_id" = String, Path, description = "Id of the worker"),
    ),
    responses(
        (status = 200, description = "Merge one entry into the environment map"),
        (status = 404, description = "Worker not found", body = ErrorMessage),
        (status = 500, description = "Internal server error", body = ErrorMessage),
    ),
    tag = "Workers"
)]
#[post("/api/worker/{worker_id}/env")]
pub async fn set_worker_env(
    pool: Data<PgPool>,
    env: Data<OuterEnv>,
    user: AuthedUser,
    worker_id: Path<String>,
    request: Json<SetEntryRequest>,
) -> Result<impl Responder, WorkerRouteError> {
    let worker_id = worker_id.into_inner();
    let request = request.into_inner();

    let env_json = workers::read_worker_env(&**pool, &worker_id, &user.0)
        .await?
        .ok_or(WorkerRouteError::WorkerNotFound)?;

    let mut env_map: BTreeMap<String, String> = serde_json::from_str(&env_json).unwrap_or_default();
    workers::merge_env_entry(&mut env_map, &request.key, &request.value, request.delete);

    let merged = serde_json::to_string(&env_map).expect("env map serialization cannot fail");
    workers::update_worker_env(&**pool, &worker_id, &user.0, &merged)
        .await?
        .ok_or(WorkerRouteError::WorkerNotFound)?;

    env.tasks
        .send_or_log(
            JobKind::SyncEnv,
            &SyncEnvPayload {
                worker_id,
                user_uid: user.0,
                data: env_map.clone(),
            },
        )
        .await;

    Ok(Json(env_map))
}

#[utoipa::path(
    params(
        ("worker_id" = String, Path, description = "Id of the worker"),
    ),
    responses(
        (status = 200, description = "Read the worker's secret key names"),
        (status = 404, description = "Worker not found", body = ErrorMessage),
        (status = 500, description = "Internal server error", body = ErrorMessage),
    ),
    tag = "Workers"
)]
#[get("/api/worker/{worker_id}/secret")]
pub async fn read_worker_secrets(
    pool: Data<PgPool>,
    user: AuthedUser,
    worker_id: Path<String>,
) -> Result<impl Responder, WorkerRouteError> {
    let worker_id = worker_id.into_inner();

    let secrets_json = workers::read_worker_secrets(&**pool, &worker_id, &user.0)
        .await?
        .ok_or(WorkerRouteError::WorkerNotFound)?;

    let keys: Vec<String> = serde_json::from_str(&secrets_json).unwrap_or_default();
    Ok(Json(keys))
}

#[utoipa::path(
    request_body = SetEntryRequest,
    params(
        ("worker_id" = String, Path, description = "Id of the worker"),
    ),
    responses(
        (status = 200, description = "Set or delete one secret entry"),
        (status = 404, description = "Worker not found", body = ErrorMessage),
        (status = 500, description = "Internal server error", body = ErrorMessage),
    ),
    tag = "Workers"
)]
#[post("/api/worker/{worker_id}/secret")]
pub async fn set_worker_secrets(
    pool: Data<PgPool>,
    env: Data<OuterEnv>,
    user: AuthedUser,
    worker_id: Path<String>,
    request: Json<SetEntryRequest>,
) -> Result<impl Responder, WorkerRouteError> {
    let worker_id = worker_id.into_inner();
    let request = request.into_inner();

    let secrets_json = workers::read_worker_secrets(&**pool, &worker_id, &user.0)
        .await?
        .ok_or(WorkerRouteError::WorkerNotFound)?;

    // Only key names are persisted; the value goes straight to the
    // cluster secret through the sync job.
    let mut keys: Vec<String> = serde_json::from_str(&secrets_json).unwrap_or_default();
    workers::merge_secret_key(&mut keys, &request.key, request.delete);

    let merged = serde_json::to_string(&keys).expect("key list serialization cannot fail");
    workers::update_worker_secrets(&**pool, &worker_id, &user.0, &merged)
        .await?
        .ok_or(WorkerRouteError::WorkerNotFound)?;

    env.tasks
        .send_or_log(
            JobKind::SyncSecret,
            &SyncSecretPayload {
                worker_id,
                user_uid: user.0,
                key: request.key,
                value: request.value,
                delete: request.delete,
            },
        )
        .await;

    Ok(Json(keys))
}
