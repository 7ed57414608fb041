//! Session-token and request-signature validation.

use actix_web::dev::{Payload, ServiceRequest};
use actix_web::web::Data;
use actix_web::{Error, FromRequest, HttpMessage, HttpRequest, error::ErrorUnauthorized};
use actix_web_httpauth::extractors::bearer::BearerAuth;
use std::future::{Ready, ready};

use console_core::auth;
use console_core::db::users;
use sqlx::PgPool;

use crate::env::OuterEnv;

/// Header carrying the HMAC signature of a signed request.
pub const SIGNATURE_HEADER: &str = "X-Combinator-Signature";

/// Header carrying the signing tenant's id.
pub const USER_ID_HEADER: &str = "X-Combinator-User-ID";

/// Header carrying the timestamp the signature covers.
pub const TIMESTAMP_HEADER: &str = "X-Combinator-Timestamp";

/// Bearer-token validator for the protected route scope.
///
/// On success the authenticated tenant id is stored in the request
/// extensions for [`AuthedUser`] to pick up.
pub async fn auth_validator(
    req: ServiceRequest,
    credentials: BearerAuth,
) -> Result<ServiceRequest, (Error, ServiceRequest)> {
    let Some(env) = req.app_data::<Data<OuterEnv>>() else {
        return Err((ErrorUnauthorized("unauthorized"), req));
    };

    match auth::validate_token(&env.jwt_secret, credentials.token()) {
        Ok(user_id) => {
            req.extensions_mut().insert(AuthedUser(user_id));
            Ok(req)
        }
        Err(_) => Err((ErrorUnauthorized("invalid token"), req)),
    }
}

/// The tenant id carried by a validated session token.
#[derive(Debug, Clone)]
pub struct AuthedUser(pub String);

impl FromRequest for AuthedUser {
    type Error = Error;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        let user = req.extensions().get::<AuthedUser>().cloned();
        ready(user.ok_or_else(|| ErrorUnauthorized("unauthorized")))
    }
}

/// Errors produced while checking a signed request.
#[derive(Debug, thiserror::Error)]
pub enum SignatureError {
    #[error("missing signature headers")]
    MissingHeaders,

    #[error("unknown signing user")]
    UnknownUser,

    #[error("bad signature")]
    BadSignature,

    #[error("database error during signature check")]
    Database,
}

/// Verifies the HMAC of a signed request body.
///
/// The signature covers `body || timestamp` and is keyed by the tenant's
/// `secret_key`. Returns the authenticated tenant id.
pub async fn verify_signed_request(
    pool: &PgPool,
    req: &HttpRequest,
    body: &[u8],
) -> Result<String, SignatureError> {
    let header = |name: &str| {
        req.headers()
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
    };

    let signature = header(SIGNATURE_HEADER).ok_or(SignatureError::MissingHeaders)?;
    let user_uid = header(USER_ID_HEADER).ok_or(SignatureError::MissingHeaders)?;
    let timestamp = header(TIMESTAMP_HEADER).ok_or(SignatureError::MissingHeaders)?;

    let secret_key = users::read_user_secret_key(pool, &user_uid)
        .await
        .map_err(|_| SignatureError::Database)?
        .ok_or(SignatureError::UnknownUser)?;

    auth::verify_signature(&secret_key, body, &timestamp, &signature)
        .map_err(|_| SignatureError::BadSignature)?;

    Ok(user_uid)
}
