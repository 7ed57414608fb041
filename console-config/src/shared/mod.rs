//! Configuration types shared between the outer and inner gateways.

mod connection;

pub use connection::*;
