//! Shared state of the outer gateway, constructed once in `main` and
//! handed to every handler through actix app data.

use console_config::Environment;
use console_core::jobs::TaskSender;
use console_core::rdb::RdbManager;
use std::sync::Arc;

use crate::email::EmailClient;

pub struct OuterEnv {
    /// Platform apex domain for tenant-facing URLs.
    pub domain: String,
    /// Secret for session tokens.
    pub jwt_secret: Vec<u8>,
    /// Client for forwarding jobs to the inner gateway.
    pub tasks: TaskSender,
    /// Billing-size reads against the relational cluster. The outer
    /// gateway never mutates it.
    pub rdb: Arc<RdbManager>,
    /// Transactional email delivery.
    pub email: EmailClient,
    pub environment: Environment,
}
