use clap::Parser;
use tracing::info;

use console_inner::config::{InnerArgs, InnerConfig};
use console_inner::startup::Application;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    console_telemetry::init_tracing("inner")?;

    let args = InnerArgs::parse();
    let config = InnerConfig::resolve(args)?;

    info!(listen = %config.listen, domain = %config.domain, "inner gateway starting");

    let application = Application::build(config).await?;
    application.run_until_stopped().await?;

    Ok(())
}
