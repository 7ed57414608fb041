use clap::Parser;
use tracing::info;

use console_outer::config::{OuterArgs, OuterConfig};
use console_outer::startup::Application;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    console_telemetry::init_tracing("outer")?;

    let args = OuterArgs::parse();
    let config = OuterConfig::resolve(args)?;

    info!(listen = %config.listen, domain = %config.domain, "outer gateway starting");

    let application = Application::build(config).await?;
    application.run_until_stopped().await?;

    Ok(())
}
