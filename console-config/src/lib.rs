//! Shared configuration primitives for the console control plane.
//!
//! Both gateways load their settings from command line flags and environment
//! variables; this crate holds the pieces they have in common: the runtime
//! [`Environment`], a serde-aware secret string wrapper, and the connection
//! configuration for the per-tenant relational cluster.

mod environment;
mod secret;
pub mod shared;

pub use environment::Environment;
pub use secret::SerializableSecretString;
