use actix_web::{
    HttpResponse, Responder, ResponseError, get, post,
    http::{StatusCode, header::ContentType},
    web::{Data, Json, Query},
};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use thiserror::Error;

use console_core::db::combinator_resources::{self, CombinatorResourcesDbError};
use console_core::db::reports::{self, ReportsDbError, ResourceReport};
use console_core::db::users::{self, UsersDbError};

use crate::routes::ErrorMessage;

#[derive(Debug, Error)]
pub enum CombinatorInternalError {
    #[error("The user with id {0} was not found")]
    UserNotFound(String),

    #[error("empty reports array")]
    EmptyReports,

    #[error(transparent)]
    UsersDb(#[from] UsersDbError),

    #[error(transparent)]
    ResourcesDb(#[from] CombinatorResourcesDbError),

    #[error(transparent)]
    ReportsDb(#[from] ReportsDbError),
}

impl CombinatorInternalError {
    fn to_message(&self) -> String {
        match self {
            CombinatorInternalError::UsersDb(UsersDbError::Database(_))
            | CombinatorInternalError::ResourcesDb(CombinatorResourcesDbError::Database(_))
            | CombinatorInternalError::ReportsDb(ReportsDbError::Database(_)) => {
                "internal server error".to_string()
            }
            e => e.to_string(),
        }
    }
}

impl ResponseError for CombinatorInternalError {
    fn status_code(&self) -> StatusCode {
        match self {
            CombinatorInternalError::UserNotFound(_) => StatusCode::NOT_FOUND,
            CombinatorInternalError::EmptyReports => StatusCode::BAD_REQUEST,
            CombinatorInternalError::UsersDb(_)
            | CombinatorInternalError::ResourcesDb(_)
            | CombinatorInternalError::ReportsDb(_) => StatusCode::INTERNAL_SERVER_ERROR,
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

#[derive(Debug, Deserialize)]
pub struct RetrieveSecretQuery {
    pub user_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ResourceRef {
    pub resource_type: String,
    pub resource_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RetrieveSecretResponse {
    pub resources: Vec<ResourceRef>,
    pub secret_key: String,
}

/// Hands a combinator pod its tenant's active resources plus the signing
/// key the pod uses to sign its own usage reports.
#[get("/api/combinator/retrieveSecretByID")]
pub async fn retrieve_secret_by_id(
    pool: Data<PgPool>,
    query: Query<RetrieveSecretQuery>,
) -> Result<impl Responder, CombinatorInternalError> {
    let user_uid = query.into_inner().user_id;

    let secret_key = users::read_user_secret_key(&**pool, &user_uid)
        .await?
        .ok_or_else(|| CombinatorInternalError::UserNotFound(user_uid.clone()))?;

    let resources = combinator_resources::list_active_resources(&**pool, &user_uid)
        .await?
        .into_iter()
        .map(|resource| ResourceRef {
            resource_type: resource.resource_type.as_str().to_string(),
            resource_id: resource.resource_id,
        })
        .collect();

    Ok(Json(RetrieveSecretResponse {
        resources,
        secret_key,
    }))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReportUsageResponse {
    pub message: String,
    pub count: usize,
}

/// Accepts a batch of usage samples from a combinator pod.
#[post("/api/combinator/reportUsage")]
pub async fn report_usage(
    pool: Data<PgPool>,
    reports: Json<Vec<ResourceReport>>,
) -> Result<impl Responder, CombinatorInternalError> {
    let reports = reports.into_inner();

    if reports.is_empty() {
        return Err(CombinatorInternalError::EmptyReports);
    }

    let count = reports.len();
    reports::batch_save_reports(&**pool, &reports).await?;

    Ok(Json(ReportUsageResponse {
        message: "reports processed successfully".to_string(),
        count,
    }))
}
