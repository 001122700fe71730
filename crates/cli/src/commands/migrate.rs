//! `aicarpool migrate` — apply the gateway's relational schema.

use aicarpool_config::AppConfig;
use aicarpool_store::PostgresStore;

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("failed to load config: {e}"))?;

    tracing::info!("connecting to primary store");
    let store = PostgresStore::connect(&config.store.database_url, config.store.max_connections).await?;

    tracing::info!("applying gateway schema");
    store.migrate().await?;

    println!("migration complete");
    Ok(())
}
