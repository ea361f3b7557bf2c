use anyhow::{Context, Result};
use inboxflow_server::config::{monitoring_config_from_env, ServerConfig};

#[tokio::main]
async fn main() -> Result<()> {
    // Set up monitoring
    let monitoring_config = monitoring_config_from_env();
    inboxflow_monitoring::init(&monitoring_config).context("Failed to initialize monitoring")?;

    // Load configuration from environment variables
    let config = ServerConfig::load().context("Failed to load configuration")?;

    // Run the server using the library's run function
    inboxflow_server::run(config).await.context("Server error")?;

    Ok(())
}
