//! `aicarpool config` — inspect the resolved configuration.

use aicarpool_config::AppConfig;

pub async fn validate() -> Result<(), Box<dyn std::error::Error>> {
    match AppConfig::load() {
        Ok(config) => {
            println!("config OK");
            println!("  bind:      {}:{}", config.server.bind_host, config.server.bind_port);
            println!("  redis:     {}", config.cache.redis_url);
            println!("  database:  {}", config.store.database_url);
            println!("  jobs:      max_concurrent={} timeout={}s", config.scheduler.max_concurrent_jobs, config.scheduler.job_timeout_secs);
            if config.credentials_passphrase.is_none() {
                println!("  warning: AICARPOOL_CREDENTIALS_PASSPHRASE is not set");
            }
            Ok(())
        }
        Err(e) => {
            println!("config error: {e}");
            Err(e.into())
        }
    }
}

pub async fn show() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("failed to load config: {e}"))?;
    println!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}

pub async fn path() -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", AppConfig::config_dir().join("config.toml").display());
    Ok(())
}
