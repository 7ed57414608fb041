//! Tenant-facing HTTP surface.
//!
//! Every route follows the same contract: 200 with a JSON payload on
//! success, `{error}` bodies on failure, 404 when an ownership-scoped
//! lookup matches nothing, and database details never leak into error
//! messages.

pub mod auth;
pub mod combinator;
pub mod domains;
pub mod health_check;
pub mod tasks;
pub mod workers;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorMessage {
    #[schema(example = "an error occurred in the api")]
    pub error: String,
}
