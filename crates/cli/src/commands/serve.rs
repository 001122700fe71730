//! `aicarpool serve` — start the HTTP gateway.

use aicarpool_config::AppConfig;

pub async fn run(port: Option<u16>, host: Option<String>) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = AppConfig::load().map_err(|e| format!("failed to load config: {e}"))?;

    if let Some(port) = port {
        config.server.bind_port = port;
    }
    if let Some(host) = host {
        config.server.bind_host = host;
    }

    tracing::info!(
        host = %config.server.bind_host,
        port = config.server.bind_port,
        "starting gateway"
    );

    aicarpool_gateway::start(config).await?;
    Ok(())
}
