use std::sync::Arc;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use readthrough::cache::{CacheClient, RedisConnector};
use readthrough::{Config, ReadThrough, Server};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::parse();

    let connector = RedisConnector::new(&config.redis_url)?;
    let cache = Arc::new(CacheClient::new(connector, config.cache_timeout()));
    info!(endpoint = %cache.endpoint(), timeout = ?config.cache_timeout(), "cache configured");

    let app = Arc::new(ReadThrough::home(cache).on_write_failure(config.write_failure_policy));

    let server = Server::bind(config.listen_addr()).await?;
    info!(
        env = %config.environment,
        port = server.local_addr().port(),
        "listening"
    );

    server
        .run(move |req| {
            let app = Arc::clone(&app);
            async move { app.handle(req).await }
        })
        .await?;

    Ok(())
}
