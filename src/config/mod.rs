//! Process configuration.
//!
//! Everything is read from the environment at startup; each variable also
//! has a command-line flag, which wins when both are given.

use std::time::Duration;

use clap::Parser;

use crate::handler::WriteFailurePolicy;

#[derive(Debug, Clone, Parser)]
#[command(name = "readthrough", version, about = "Serves pages through a Redis read-through cache")]
pub struct Config {
    /// Redis URL, e.g. `redis://:password@127.0.0.1:6379/0`.
    #[arg(long, env = "REDIS_URL")]
    pub redis_url: String,

    /// Port to listen on.
    #[arg(long, env = "PORT")]
    pub port: u16,

    /// Interface to listen on.
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Deployment name shown in the startup log.
    #[arg(long = "env", env = "APP_ENV", default_value = "development")]
    pub environment: String,

    /// Upper bound for connecting to the cache and for each cache command.
    #[arg(long, env = "CACHE_TIMEOUT_MS", default_value_t = 2000)]
    pub cache_timeout_ms: u64,

    /// Answer to give when a computed page cannot be written to the cache.
    #[arg(long, env = "WRITE_FAILURE_POLICY", value_enum, default_value_t = WriteFailurePolicy::Fail)]
    pub write_failure_policy: WriteFailurePolicy,
}

impl Config {
    /// `host:port` to bind.
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn cache_timeout(&self) -> Duration {
        Duration::from_millis(self.cache_timeout_ms)
    }
}
