use clap::Parser;
use sgn_agent::{logging, Cli};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = cli.load_config()?;

    let _guard = logging::init(&config.logging, cli.log_level.as_deref())?;
    info!(state_dir = %config.storage.state_dir.display(), "starting sgn-agent");

    cli.execute(config).await
}
