//! Shared process environment.
//!
//! Clients are constructed once in `main` and threaded explicitly into the
//! handlers, the controller, and the job registry. Nothing in this crate
//! reaches for process-global state.

use kube::Client;
use sqlx::PgPool;
use std::sync::Arc;

use console_core::rdb::RdbManager;

use crate::dns::TxtLookup;

/// Everything a job or handler needs to act on the platform.
pub struct Env {
    /// Control-plane database.
    pub pool: PgPool,
    /// Cluster API client. The inner gateway refuses to start without one.
    pub kube: Client,
    /// Per-tenant relational fabric. Absent when the cluster was not
    /// reachable at startup; jobs that need it fail and are retried.
    pub rdb: Option<Arc<RdbManager>>,
    /// Platform apex domain for hostname construction.
    pub domain: String,
    /// Shared outbound HTTP client (combinator reloads).
    pub http: reqwest::Client,
    /// TXT resolver for domain verification.
    pub resolver: Arc<dyn TxtLookup>,
}

impl Env {
    /// Returns the RDB manager or a descriptive job error.
    pub fn rdb(&self) -> Result<&Arc<RdbManager>, crate::processor::JobError> {
        self.rdb
            .as_ref()
            .ok_or_else(|| crate::processor::JobError::new("rdb manager not available"))
    }
}
