//! # Realtime Chat Server
//!
//! Entry point: initializes logging, loads configuration and serves the
//! gateway until SIGINT/SIGTERM.

use anyhow::Result;
use tracing::info;

use realtime_chat::config::Settings;
use realtime_chat::startup::Application;

#[tokio::main]
async fn main() -> Result<()> {
    realtime_chat::telemetry::init_tracing();

    info!("Starting realtime chat server...");

    let settings = Settings::load()?;
    info!(
        host = %settings.server.host,
        port = %settings.server.port,
        environment = %settings.environment,
        "Configuration loaded"
    );

    let application = Application::build(settings).await?;

    info!(addr = ?application.local_addr()?, "Server ready to accept connections");
    application.run_until_stopped().await?;

    Ok(())
}
