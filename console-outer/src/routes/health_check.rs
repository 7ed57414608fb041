use actix_web::{HttpResponse, Responder, get, web::Data};
use serde_json::json;
use sqlx::PgPool;

/// Liveness of the outer gateway: only the control-plane database is a
/// hard dependency here.
#[utoipa::path(
    responses(
        (status = 200, description = "Gateway is healthy"),
        (status = 503, description = "Database unreachable"),
    ),
    tag = "Health"
)]
#[get("/health")]
pub async fn health_check(pool: Data<PgPool>) -> impl Responder {
    let mut status = json!({
        "status": "ok",
        "timestamp": chrono::Utc::now().timestamp(),
    });

    match sqlx::query("SELECT 1").execute(&**pool).await {
        Ok(_) => {
            status["database"] = "healthy".into();
            HttpResponse::Ok().json(status)
        }
        Err(e) => {
            status["status"] = "degraded".into();
            status["database"] = "unhealthy".into();
            status["database_error"] = e.to_string().into();
            HttpResponse::ServiceUnavailable().json(status)
        }
    }
}
