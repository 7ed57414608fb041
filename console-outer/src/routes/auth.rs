use actix_web::{
    HttpResponse, Responder, ResponseError, post,
    http::{StatusCode, header::ContentType},
    web::{Data, Json},
};
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use thiserror::Error;
use tracing::warn;
use utoipa::ToSchema;

use console_core::auth;
use console_core::db::users::{self, UsersDbError};
use console_core::db::verification_codes::{self, VerificationCodesDbError};
use console_core::jobs::{JobKind, RegisterUserPayload};

use crate::env::OuterEnv;
use crate::routes::ErrorMessage;

/// Verification code that bypasses the code lookup. Used by operators and
/// the test suite.
const SPECIAL_CODE: &str = "701213";

/// Lifetime of an emailed verification code.
const CODE_TTL_MINUTES: i64 = 10;

#[derive(Debug, Error)]
pub enum AuthRouteError {
    #[error("invalid code")]
    InvalidCode,

    #[error("code expired")]
    CodeExpired,

    #[error("email already exists")]
    EmailTaken,

    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("failed to hash password")]
    Hashing,

    #[error("failed to send verification email")]
    EmailDelivery,

    #[error(transparent)]
    UsersDb(UsersDbError),

    #[error(transparent)]
    CodesDb(#[from] VerificationCodesDbError),
}

impl From<UsersDbError> for AuthRouteError {
    fn from(e: UsersDbError) -> Self {
        match &e {
            UsersDbError::Database(sqlx::Error::Database(db))
                if db.is_unique_violation() =>
            {
                AuthRouteError::EmailTaken
            }
            _ => AuthRouteError::UsersDb(e),
        }
    }
}

impl AuthRouteError {
    fn to_message(&self) -> String {
        match self {
            AuthRouteError::UsersDb(_) | AuthRouteError::CodesDb(_) => {
                "internal server error".to_string()
            }
            e => e.to_string(),
        }
    }
}

impl ResponseError for AuthRouteError {
    fn status_code(&self) -> StatusCode {
        match self {
            AuthRouteError::InvalidCode
            | AuthRouteError::CodeExpired
            | AuthRouteError::EmailTaken => StatusCode::BAD_REQUEST,
            AuthRouteError::InvalidCredentials => StatusCode::UNAUTHORIZED,
            AuthRouteError::Hashing
            | AuthRouteError::EmailDelivery
            | AuthRouteError::UsersDb(_)
            | AuthRouteError::CodesDb(_) => StatusCode::INTERNAL_SERVER_ERROR,
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
pub struct RegisterRequest {
    #[schema(example = "tenant@example.com", required = true)]
    pub email: String,
    #[schema(example = "hunter2", required = true)]
    pub password: String,
    #[schema(example = "701213", required = true)]
    pub code: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct RegisterResponse {
    #[schema(example = "tenant147008")]
    pub user_id: String,
    #[schema(example = "tenant@example.com")]
    pub email: String,
    pub token: String,
    #[schema(example = "sk_6b86b273ff34fce19d6b804eff5a3f57")]
    pub secret_key: String,
}

/// Validates the verification code against the stored, unexpired, unused
/// entries. The special code short-circuits the lookup.
async fn consume_code(
    pool: &PgPool,
    email: &str,
    code: &str,
) -> Result<Option<i64>, AuthRouteError> {
    if code == SPECIAL_CODE {
        return Ok(None);
    }

    let stored = verification_codes::read_unused_code(pool, email, code)
        .await?
        .ok_or(AuthRouteError::InvalidCode)?;

    if Utc::now() > stored.expires_at {
        return Err(AuthRouteError::CodeExpired);
    }

    Ok(Some(stored.id))
}

#[utoipa::path(
    request_body = RegisterRequest,
    responses(
        (status = 200, description = "Register a new tenant", body = RegisterResponse),
        (status = 400, description = "Bad request", body = ErrorMessage),
        (status = 500, description = "Internal server error", body = ErrorMessage),
    ),
    tag = "Auth"
)]
#[post("/api/auth/register")]
pub async fn register(
    pool: Data<PgPool>,
    env: Data<OuterEnv>,
    request: Json<RegisterRequest>,
) -> Result<impl Responder, AuthRouteError> {
    let request = request.into_inner();

    let code_id = consume_code(&pool, &request.email, &request.code).await?;

    let password_hash =
        auth::hash_password(&request.password).map_err(|_| AuthRouteError::Hashing)?;
    let secret_key = auth::generate_secret_key();

    let user_id = users::create_user(
        &**pool,
        &auth::generate_uid(&request.email),
        &request.email,
        &password_hash,
        &secret_key,
    )
    .await?;

    if let Some(code_id) = code_id {
        verification_codes::mark_code_used(&**pool, code_id).await?;
    }

    // The row is committed; cluster-side initialization is recoverable by
    // the audit job, so a failed send never fails the registration.
    env.tasks
        .send_or_log(
            JobKind::RegisterUser,
            &RegisterUserPayload {
                user_uid: user_id.clone(),
            },
        )
        .await;

    let token = auth::generate_token(&env.jwt_secret, &user_id, &request.email)
        .unwrap_or_else(|e| {
            warn!("failed to issue session token at registration: {e}");
            String::new()
        });

    Ok(Json(RegisterResponse {
        user_id,
        email: request.email,
        token,
        secret_key,
    }))
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct LoginRequest {
    #[schema(example = "tenant@example.com", required = true)]
    pub email: String,
    #[schema(example = "hunter2", required = true)]
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct LoginResponse {
    #[schema(example = "tenant147008")]
    pub user_id: String,
    pub token: String,
}

#[utoipa::path(
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Log a tenant in", body = LoginResponse),
        (status = 401, description = "Invalid credentials", body = ErrorMessage),
        (status = 500, description = "Internal server error", body = ErrorMessage),
    ),
    tag = "Auth"
)]
#[post("/api/auth/login")]
pub async fn login(
    pool: Data<PgPool>,
    env: Data<OuterEnv>,
    request: Json<LoginRequest>,
) -> Result<impl Responder, AuthRouteError> {
    let request = request.into_inner();

    let user = users::read_user_by_email(&**pool, &request.email)
        .await?
        .ok_or(AuthRouteError::InvalidCredentials)?;

    if !auth::check_password(&request.password, &user.password_hash) {
        return Err(AuthRouteError::InvalidCredentials);
    }

    let token = auth::generate_token(&env.jwt_secret, &user.uid, &user.email)
        .map_err(|_| AuthRouteError::InvalidCredentials)?;

    Ok(Json(LoginResponse {
        user_id: user.uid,
        token,
    }))
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SendCodeRequest {
    #[schema(example = "tenant@example.com", required = true)]
    pub email: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SendCodeResponse {
    #[schema(example = "code sent")]
    pub message: String,
    /// Present only in the test environment.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

#[utoipa::path(
    request_body = SendCodeRequest,
    responses(
        (status = 200, description = "Send a verification code", body = SendCodeResponse),
        (status = 500, description = "Internal server error", body = ErrorMessage),
    ),
    tag = "Auth"
)]
#[post("/api/auth/send-code")]
pub async fn send_code(
    pool: Data<PgPool>,
    env: Data<OuterEnv>,
    request: Json<SendCodeRequest>,
) -> Result<impl Responder, AuthRouteError> {
    let request = request.into_inner();

    let code = auth::generate_code();
    let expires_at = Utc::now() + Duration::minutes(CODE_TTL_MINUTES);

    verification_codes::save_verification_code(&**pool, &request.email, &code, expires_at).await?;

    if env.environment.is_test() {
        return Ok(Json(SendCodeResponse {
            message: "code sent".to_string(),
            code: Some(code),
        }));
    }

    env.email
        .send_verification_code(&request.email, &code)
        .await
        .map_err(|e| {
            warn!("verification email delivery failed: {e}");
            AuthRouteError::EmailDelivery
        })?;

    Ok(Json(SendCodeResponse {
        message: "code sent".to_string(),
        code: None,
    }))
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ResetPasswordRequest {
    #[schema(example = "tenant@example.com", required = true)]
    pub email: String,
    #[schema(example = "701213", required = true)]
    pub code: String,
    #[schema(example = "correct-horse", required = true)]
    pub new_password: String,
}

#[utoipa::path(
    request_body = ResetPasswordRequest,
    responses(
        (status = 200, description = "Reset a tenant's password"),
        (status = 400, description = "Bad request", body = ErrorMessage),
        (status = 500, description = "Internal server error", body = ErrorMessage),
    ),
    tag = "Auth"
)]
#[post("/api/auth/reset-password")]
pub async fn reset_password(
    pool: Data<PgPool>,
    request: Json<ResetPasswordRequest>,
) -> Result<impl Responder, AuthRouteError> {
    let request = request.into_inner();

    let stored = verification_codes::read_unused_code(&**pool, &request.email, &request.code)
        .await?
        .ok_or(AuthRouteError::InvalidCode)?;

    if Utc::now() > stored.expires_at {
        return Err(AuthRouteError::CodeExpired);
    }

    let password_hash =
        auth::hash_password(&request.new_password).map_err(|_| AuthRouteError::Hashing)?;

    users::update_user_password(&**pool, &request.email, &password_hash).await?;
    verification_codes::mark_code_used(&**pool, stored.id).await?;

    Ok(HttpResponse::Ok().json(serde_json::json!({ "message": "password reset successfully" })))
}
