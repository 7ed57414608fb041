use actix_web::{
    HttpResponse, Responder, ResponseError, delete, get, post,
    http::{StatusCode, header::ContentType},
    web::{Data, Json, Path},
};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use thiserror::Error;
use utoipa::ToSchema;

use console_core::auth;
use console_core::db::custom_domains::{self, CustomDomain, CustomDomainsDbError, DomainStatus};
use console_core::idents;
use console_core::jobs::{DomainDetachPayload, DomainVerifyPayload, JobKind};

use crate::authentication::AuthedUser;
use crate::env::OuterEnv;
use crate::routes::ErrorMessage;

#[derive(Debug, Error)]
pub enum DomainRouteError {
    #[error("domain not found")]
    DomainNotFound,

    #[error(transparent)]
    DomainsDb(#[from] CustomDomainsDbError),
}

impl DomainRouteError {
    fn to_message(&self) -> String {
        match self {
            DomainRouteError::DomainsDb(_) => "internal server error".to_string(),
            e => e.to_string(),
        }
    }
}

impl ResponseError for DomainRouteError {
    fn status_code(&self) -> StatusCode {
        match self {
            DomainRouteError::DomainNotFound => StatusCode::NOT_FOUND,
            DomainRouteError::DomainsDb(_) => StatusCode::INTERNAL_SERVER_ERROR,
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
pub struct AddDomainRequest {
    #[schema(example = "shop.example.com", required = true)]
    pub domain: String,
    #[schema(example = "tenant147008.combinator.app238.com", required = true)]
    pub target: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct DomainView {
    #[schema(example = "9c1d3f7a")]
    pub id: String,
    pub domain: String,
    pub target: String,
    #[schema(example = "_combinator-verify.shop.example.com")]
    pub txt_name: String,
    #[schema(example = "combinator-verify=6b86b273ff34fce19d6b804eff5a3f57")]
    pub txt_value: String,
    #[schema(value_type = String, example = "pending")]
    pub status: DomainStatus,
}

impl From<CustomDomain> for DomainView {
    fn from(cd: CustomDomain) -> Self {
        Self {
            id: cd.cdid,
            domain: cd.domain,
            target: cd.target,
            txt_name: cd.txt_name,
            txt_value: cd.txt_value,
            status: cd.status,
        }
    }
}

#[utoipa::path(
    request_body = AddDomainRequest,
    responses(
        (status = 200, description = "Register a custom domain and start verification", body = DomainView),
        (status = 500, description = "Internal server error", body = ErrorMessage),
    ),
    tag = "Domains"
)]
#[post("/api/domain")]
pub async fn add_custom_domain(
    pool: Data<PgPool>,
    env: Data<OuterEnv>,
    user: AuthedUser,
    request: Json<AddDomainRequest>,
) -> Result<impl Responder, DomainRouteError> {
    let request = request.into_inner();

    let token = auth::generate_verify_token();
    let cdid = token[..8].to_string();
    let txt_name = idents::domain_txt_name(&request.domain);
    let txt_value = idents::domain_txt_value(&auth::generate_verify_token());

    custom_domains::create_custom_domain(
        &**pool,
        &cdid,
        &user.0,
        &request.domain,
        &request.target,
        &txt_name,
        &txt_value,
    )
    .await?;

    env.tasks
        .send_or_log(JobKind::DomainVerify, &DomainVerifyPayload { cdid: cdid.clone() })
        .await;

    Ok(Json(DomainView {
        id: cdid,
        domain: request.domain,
        target: request.target,
        txt_name,
        txt_value,
        status: DomainStatus::Pending,
    }))
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ListDomainsResponse {
    pub domains: Vec<DomainView>,
}

#[utoipa::path(
    responses(
        (status = 200, description = "List the tenant's custom domains", body = ListDomainsResponse),
        (status = 500, description = "Internal server error", body = ErrorMessage),
    ),
    tag = "Domains"
)]
#[get("/api/domain")]
pub async fn list_custom_domains(
    pool: Data<PgPool>,
    user: AuthedUser,
) -> Result<impl Responder, DomainRouteError> {
    let domains = custom_domains::list_custom_domains_by_user(&**pool, &user.0)
        .await?
        .into_iter()
        .map(DomainView::from)
        .collect();

    Ok(Json(ListDomainsResponse { domains }))
}

#[utoipa::path(
    params(
        ("cdid" = String, Path, description = "Id of the domain binding"),
    ),
    responses(
        (status = 200, description = "Read one custom domain", body = DomainView),
        (status = 404, description = "Domain not found", body = ErrorMessage),
        (status = 500, description = "Internal server error", body = ErrorMessage),
    ),
    tag = "Domains"
)]
#[get("/api/domain/{cdid}")]
pub async fn read_custom_domain(
    pool: Data<PgPool>,
    user: AuthedUser,
    cdid: Path<String>,
) -> Result<impl Responder, DomainRouteError> {
    let cdid = cdid.into_inner();

    let domain = custom_domains::read_custom_domain(&**pool, &cdid)
        .await?
        .filter(|cd| cd.user_uid == user.0)
        .ok_or(DomainRouteError::DomainNotFound)?;

    Ok(Json(DomainView::from(domain)))
}

#[utoipa::path(
    params(
        ("cdid" = String, Path, description = "Id of the domain binding"),
    ),
    responses(
        (status = 200, description = "Delete a custom domain binding"),
        (status = 404, description = "Domain not found", body = ErrorMessage),
        (status = 500, description = "Internal server error", body = ErrorMessage),
    ),
    tag = "Domains"
)]
#[delete("/api/domain/{cdid}")]
pub async fn delete_custom_domain(
    pool: Data<PgPool>,
    env: Data<OuterEnv>,
    user: AuthedUser,
    cdid: Path<String>,
) -> Result<impl Responder, DomainRouteError> {
    let cdid = cdid.into_inner();

    custom_domains::delete_custom_domain(&**pool, &cdid, &user.0)
        .await?
        .ok_or(DomainRouteError::DomainNotFound)?;

    env.tasks
        .send_or_log(JobKind::DomainDetach, &DomainDetachPayload { cdid })
        .await;

    Ok(HttpResponse::Ok().json(serde_json::json!({ "message": "deleted" })))
}
