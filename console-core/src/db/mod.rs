//! Typed persistence actions for the control-plane database.
//!
//! Accessors follow a common contract: they take any [`sqlx::PgExecutor`]
//! so callers can pass a pool or an open transaction, ownership-scoped
//! statements filter on `(worker_id, user_uid)` in a single statement, and
//! zero affected rows surfaces as `Ok(None)` which the route layer turns
//! into a 404.

pub mod combinator_resources;
pub mod custom_domains;
pub mod deploy_versions;
pub mod reports;
pub mod tasks;
pub mod users;
pub mod verification_codes;
pub mod workers;
