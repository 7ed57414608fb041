//! Per-tenant relational database fabric.
//!
//! One admin connection handles tenant lifecycle and billing reads; a
//! bounded LRU of per-tenant connections handles schema work inside each
//! tenant's own database. See [`RdbManager`].

mod manager;

pub use manager::{RdbError, RdbManager};
