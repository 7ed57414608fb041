//! Tracing initialization for the console binaries.
//!
//! Production emits JSON lines on stdout for the log collector; development
//! and test emit human-readable output. Call [`init_tracing`] once per
//! process, before anything logs.

use console_config::Environment;
use std::sync::Once;
use thiserror::Error;
use tracing::subscriber::{SetGlobalDefaultError, set_global_default};
use tracing_log::{LogTracer, log_tracer::SetLoggerError};
use tracing_subscriber::{EnvFilter, Registry, fmt, layer::SubscriberExt};

/// Errors that can occur during tracing initialization.
#[derive(Debug, Error)]
pub enum TracingError {
    #[error("failed to init log tracer: {0}")]
    InitLogTracer(#[from] SetLoggerError),

    #[error("failed to set global default subscriber: {0}")]
    SetGlobalDefault(#[from] SetGlobalDefaultError),

    #[error("failed to load environment: {0}")]
    Environment(#[from] std::io::Error),
}

/// Initializes tracing for the named binary.
///
/// The filter defaults to `info` for the binary and the console crates and
/// can be overridden with `RUST_LOG`.
pub fn init_tracing(service: &str) -> Result<(), TracingError> {
    let environment = Environment::load()?;

    // Route `log` records from actix and friends into tracing.
    LogTracer::init()?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("info,{service}=info,console_core=info,sqlx=warn"))
    });

    if environment.is_prod() {
        let subscriber = Registry::default()
            .with(filter)
            .with(fmt::layer().json().with_current_span(true));
        set_global_default(subscriber)?;
    } else {
        let subscriber = Registry::default().with(filter).with(fmt::layer());
        set_global_default(subscriber)?;
    }

    Ok(())
}

static INIT_TEST_TRACING: Once = Once::new();

/// Initializes tracing for test environments.
///
/// Call once at the beginning of tests. Set `ENABLE_TRACING=1` to view
/// tracing output:
/// ```bash
/// ENABLE_TRACING=1 cargo test test_name
/// ```
pub fn init_test_tracing() {
    INIT_TEST_TRACING.call_once(|| {
        if std::env::var("ENABLE_TRACING").is_ok() {
            Environment::Test.set();
            init_tracing("test").expect("Failed to initialize tracing for tests");
        }
    });
}
