use actix_web::{HttpResponse, Responder, get, web::Data};
use serde_json::json;
use sqlx::PgPool;
use std::sync::Arc;

use crate::env::Env;

/// Liveness and dependency health of the inner gateway.
///
/// The control-plane database and (when configured) the RDB root
/// connection are hard dependencies: either failing yields a 503 so the
/// orchestrator restarts or deroutes this instance.
#[get("/health")]
pub async fn health_check(pool: Data<PgPool>, env: Data<Arc<Env>>) -> impl Responder {
    let mut healthy = true;
    let mut status = json!({
        "status": "ok",
        "timestamp": chrono::Utc::now().timestamp(),
        "kubernetes": "healthy",
    });

    match sqlx::query("SELECT 1").execute(&**pool).await {
        Ok(_) => status["database"] = "healthy".into(),
        Err(e) => {
            healthy = false;
            status["database"] = "unhealthy".into();
            status["database_error"] = e.to_string().into();
        }
    }

    match &env.rdb {
        Some(rdb) => {
            if rdb.root_healthy().await {
                status["rdb"] = "healthy".into();
            } else {
                healthy = false;
                status["rdb"] = "unreachable".into();
            }
        }
        None => status["rdb"] = "not_initialized".into(),
    }

    if healthy {
        HttpResponse::Ok().json(status)
    } else {
        status["status"] = "degraded".into();
        HttpResponse::ServiceUnavailable().json(status)
    }
}
