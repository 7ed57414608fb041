//! Cluster-internal HTTP surface.
//!
//! No authentication: these endpoints are only reachable from inside the
//! cluster network. Errors use the same `{error}` JSON body as the outer
//! gateway.

pub mod accept_task;
pub mod combinator_internal;
pub mod deploy;
pub mod health_check;

use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorMessage {
    pub error: String,
}
