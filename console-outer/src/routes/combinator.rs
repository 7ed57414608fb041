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
use console_core::db::combinator_resources::{
    self, CombinatorResourcesDbError, ResourceStatus, ResourceType,
};
use console_core::jobs::{
    CreateKvPayload, CreateRdbPayload, DeleteKvPayload, DeleteRdbPayload, JobKind,
};

use crate::authentication::AuthedUser;
use crate::env::OuterEnv;
use crate::routes::ErrorMessage;

#[derive(Debug, Error)]
pub enum CombinatorRouteError {
    #[error("resource not found")]
    ResourceNotFound,

    #[error(transparent)]
    ResourcesDb(#[from] CombinatorResourcesDbError),
}

impl CombinatorRouteError {
    fn to_message(&self) -> String {
        match self {
            CombinatorRouteError::ResourcesDb(_) => "internal server error".to_string(),
            e => e.to_string(),
        }
    }
}

impl ResponseError for CombinatorRouteError {
    fn status_code(&self) -> StatusCode {
        match self {
            CombinatorRouteError::ResourceNotFound => StatusCode::NOT_FOUND,
            CombinatorRouteError::ResourcesDb(_) => StatusCode::INTERNAL_SERVER_ERROR,
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
pub struct CreateRdbRequest {
    #[schema(example = "orders", required = true)]
    pub name: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CreateResourceResponse {
    #[schema(example = "303737e93eb57281")]
    pub id: String,
    #[schema(value_type = String, example = "loading")]
    pub status: ResourceStatus,
}

#[utoipa::path(
    request_body = CreateRdbRequest,
    responses(
        (status = 200, description = "Create a relational-schema handle", body = CreateResourceResponse),
        (status = 500, description = "Internal server error", body = ErrorMessage),
    ),
    tag = "Combinator"
)]
#[post("/api/rdb")]
pub async fn create_rdb(
    pool: Data<PgPool>,
    env: Data<OuterEnv>,
    user: AuthedUser,
    request: Json<CreateRdbRequest>,
) -> Result<impl Responder, CombinatorRouteError> {
    let request = request.into_inner();
    let resource_id = auth::generate_resource_id();

    combinator_resources::create_resource(
        &**pool,
        &user.0,
        ResourceType::Rdb,
        &resource_id,
        &request.name,
        "",
    )
    .await?;

    env.tasks
        .send_or_log(
            JobKind::CreateRdb,
            &CreateRdbPayload {
                user_uid: user.0,
                resource_id: resource_id.clone(),
                name: request.name,
            },
        )
        .await;

    Ok(Json(CreateResourceResponse {
        id: resource_id,
        status: ResourceStatus::Loading,
    }))
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct RdbView {
    pub id: String,
    pub name: String,
    #[schema(value_type = String, example = "active")]
    pub status: ResourceStatus,
    pub msg: String,
    /// Latest known schema size in bytes, from the statistics snapshot.
    pub size: i64,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ListRdbsResponse {
    pub rdbs: Vec<RdbView>,
    pub database_size: i64,
}

#[utoipa::path(
    responses(
        (status = 200, description = "List relational handles with sizes", body = ListRdbsResponse),
        (status = 500, description = "Internal server error", body = ErrorMessage),
    ),
    tag = "Combinator"
)]
#[get("/api/rdb")]
pub async fn list_rdbs(
    pool: Data<PgPool>,
    env: Data<OuterEnv>,
    user: AuthedUser,
) -> Result<impl Responder, CombinatorRouteError> {
    let resources =
        combinator_resources::list_resources_by_user(&**pool, &user.0, ResourceType::Rdb).await?;

    // Sizes are best-effort billing reads; an unreachable cluster shows
    // up as zero rather than failing the listing.
    let database_size = env.rdb.database_size(&user.0).await.unwrap_or(0);

    let mut rdbs = Vec::with_capacity(resources.len());
    for resource in resources {
        let size = env
            .rdb
            .schema_size(&user.0, &resource.resource_id)
            .await
            .unwrap_or(0);
        rdbs.push(RdbView {
            id: resource.resource_id,
            name: resource.name,
            status: resource.status,
            msg: resource.msg,
            size,
        });
    }

    Ok(Json(ListRdbsResponse {
        rdbs,
        database_size,
    }))
}

#[utoipa::path(
    params(
        ("resource_id" = String, Path, description = "Id of the relational handle"),
    ),
    responses(
        (status = 200, description = "Read one relational handle", body = RdbView),
        (status = 404, description = "Resource not found", body = ErrorMessage),
        (status = 500, description = "Internal server error", body = ErrorMessage),
    ),
    tag = "Combinator"
)]
#[get("/api/rdb/{resource_id}")]
pub async fn read_rdb(
    pool: Data<PgPool>,
    env: Data<OuterEnv>,
    user: AuthedUser,
    resource_id: Path<String>,
) -> Result<impl Responder, CombinatorRouteError> {
    let resource_id = resource_id.into_inner();

    let resource =
        combinator_resources::list_resources_by_user(&**pool, &user.0, ResourceType::Rdb)
            .await?
            .into_iter()
            .find(|r| r.resource_id == resource_id)
            .ok_or(CombinatorRouteError::ResourceNotFound)?;

    let size = env.rdb.schema_size(&user.0, &resource_id).await.unwrap_or(0);

    Ok(Json(RdbView {
        id: resource.resource_id,
        name: resource.name,
        status: resource.status,
        msg: resource.msg,
        size,
    }))
}

#[utoipa::path(
    params(
        ("resource_id" = String, Path, description = "Id of the relational handle"),
    ),
    responses(
        (status = 200, description = "Delete a relational handle"),
        (status = 404, description = "Resource not found", body = ErrorMessage),
        (status = 500, description = "Internal server error", body = ErrorMessage),
    ),
    tag = "Combinator"
)]
#[delete("/api/rdb/{resource_id}")]
pub async fn delete_rdb(
    pool: Data<PgPool>,
    env: Data<OuterEnv>,
    user: AuthedUser,
    resource_id: Path<String>,
) -> Result<impl Responder, CombinatorRouteError> {
    let resource_id = resource_id.into_inner();

    combinator_resources::delete_resource(&**pool, &user.0, ResourceType::Rdb, &resource_id)
        .await?
        .ok_or(CombinatorRouteError::ResourceNotFound)?;

    env.tasks
        .send_or_log(
            JobKind::DeleteRdb,
            &DeleteRdbPayload {
                user_uid: user.0,
                resource_id,
            },
        )
        .await;

    Ok(HttpResponse::Ok().json(serde_json::json!({ "message": "deleted" })))
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CreateKvRequest {
    #[schema(example = "redis", required = true)]
    pub kv_type: String,
    #[schema(example = "redis://kv.internal:6379/0", required = true)]
    pub url: String,
}

#[utoipa::path(
    request_body = CreateKvRequest,
    responses(
        (status = 200, description = "Register a key-value handle", body = CreateResourceResponse),
        (status = 500, description = "Internal server error", body = ErrorMessage),
    ),
    tag = "Combinator"
)]
#[post("/api/kv")]
pub async fn create_kv(
    pool: Data<PgPool>,
    env: Data<OuterEnv>,
    user: AuthedUser,
    request: Json<CreateKvRequest>,
) -> Result<impl Responder, CombinatorRouteError> {
    let request = request.into_inner();
    let resource_id = auth::generate_resource_id();

    // Key-value backends are tenant-provided: the `name` column carries
    // the backend flavor and `url` the registered endpoint.
    combinator_resources::create_resource(
        &**pool,
        &user.0,
        ResourceType::Kv,
        &resource_id,
        &request.kv_type,
        &request.url,
    )
    .await?;

    env.tasks
        .send_or_log(
            JobKind::CreateKv,
            &CreateKvPayload {
                user_uid: user.0,
                resource_id: resource_id.clone(),
            },
        )
        .await;

    Ok(Json(CreateResourceResponse {
        id: resource_id,
        status: ResourceStatus::Loading,
    }))
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct KvView {
    pub id: String,
    pub kv_type: String,
    pub url: String,
    #[schema(value_type = String, example = "active")]
    pub status: ResourceStatus,
    pub msg: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ListKvsResponse {
    pub kvs: Vec<KvView>,
}

#[utoipa::path(
    responses(
        (status = 200, description = "List key-value handles", body = ListKvsResponse),
        (status = 500, description = "Internal server error", body = ErrorMessage),
    ),
    tag = "Combinator"
)]
#[get("/api/kv")]
pub async fn list_kvs(
    pool: Data<PgPool>,
    user: AuthedUser,
) -> Result<impl Responder, CombinatorRouteError> {
    let kvs = combinator_resources::list_resources_by_user(&**pool, &user.0, ResourceType::Kv)
        .await?
        .into_iter()
        .map(|r| KvView {
            id: r.resource_id,
            kv_type: r.name,
            url: r.url,
            status: r.status,
            msg: r.msg,
        })
        .collect();

    Ok(Json(ListKvsResponse { kvs }))
}

#[utoipa::path(
    params(
        ("resource_id" = String, Path, description = "Id of the key-value handle"),
    ),
    responses(
        (status = 200, description = "Delete a key-value handle"),
        (status = 404, description = "Resource not found", body = ErrorMessage),
        (status = 500, description = "Internal server error", body = ErrorMessage),
    ),
    tag = "Combinator"
)]
#[delete("/api/kv/{resource_id}")]
pub async fn delete_kv(
    pool: Data<PgPool>,
    env: Data<OuterEnv>,
    user: AuthedUser,
    resource_id: Path<String>,
) -> Result<impl Responder, CombinatorRouteError> {
    let resource_id = resource_id.into_inner();

    combinator_resources::delete_resource(&**pool, &user.0, ResourceType::Kv, &resource_id)
        .await?
        .ok_or(CombinatorRouteError::ResourceNotFound)?;

    env.tasks
        .send_or_log(
            JobKind::DeleteKv,
            &DeleteKvPayload {
                user_uid: user.0,
                resource_id,
            },
        )
        .await;

    Ok(HttpResponse::Ok().json(serde_json::json!({ "message": "deleted" })))
}
