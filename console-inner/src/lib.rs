//! Cluster-internal gateway of the console control plane.
//!
//! This is the only process that holds cluster credentials. It runs the
//! reconciling controller for the two custom resource kinds, the job
//! processor and cron scheduler, and the internal HTTP surface that the
//! outer gateway and the combinator pods talk to.

pub mod cluster;
pub mod config;
pub mod controller;
pub mod cron;
pub mod dns;
pub mod env;
pub mod jobs;
pub mod processor;
pub mod routes;
pub mod startup;
