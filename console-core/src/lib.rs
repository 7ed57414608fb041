//! Shared building blocks for the console control plane.
//!
//! This crate is linked by both gateways, so it deliberately knows nothing
//! about the cluster API: identifier rules, authentication glue, the typed
//! persistence actions, job payloads and their HTTP transport, and the
//! per-tenant relational database manager all live here. Everything that
//! talks to Kubernetes lives in `console-inner`.

pub mod auth;
pub mod db;
pub mod idents;
pub mod jobs;
pub mod rdb;
