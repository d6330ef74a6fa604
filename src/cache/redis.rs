//! Redis backend.
//!
//! Uses [`ConnectionManager`], a multiplexed connection that reconnects on
//! its own after the link drops. A command issued while the link is down
//! fails with [`ConnectionError::Command`]; the next one goes through once
//! the manager has reconnected.

use std::sync::Arc;

use redis::AsyncCommands;
use redis::aio::ConnectionManager;

use super::{ConnectionError, Connector, Store, StoreFuture, redact_endpoint};

/// Connects to the Redis instance named by a `redis://` or `rediss://` URL.
#[derive(Debug, Clone)]
pub struct RedisConnector {
    client: redis::Client,
    endpoint: String,
}

impl RedisConnector {
    /// Parses `url` without connecting.
    ///
    /// Host, port, database and credentials all come from the URL, e.g.
    /// `redis://:password@cache.internal:6379/0`.
    ///
    /// # Errors
    ///
    /// [`ConnectionError::Connect`] if the URL is not a usable Redis URL.
    pub fn new(url: &str) -> Result<Self, ConnectionError> {
        let endpoint = redact_endpoint(url);
        let client = redis::Client::open(url).map_err(|e| ConnectionError::Connect {
            endpoint: endpoint.clone(),
            source: Box::new(e),
        })?;
        Ok(Self { client, endpoint })
    }
}

impl Connector for RedisConnector {
    fn connect(&self) -> StoreFuture<'_, Arc<dyn Store>> {
        Box::pin(self.open())
    }

    fn endpoint(&self) -> String {
        self.endpoint.clone()
    }
}

impl RedisConnector {
    async fn open(&self) -> Result<Arc<dyn Store>, ConnectionError> {
        let manager = ConnectionManager::new(self.client.clone())
            .await
            .map_err(|e| ConnectionError::Connect {
                endpoint: self.endpoint.clone(),
                source: Box::new(e),
            })?;
        Ok(Arc::new(RedisStore { manager }))
    }
}

/// A live Redis connection. Cheap to share; each command runs on a clone of
/// the manager, so concurrent commands are pipelined on one socket.
#[derive(Clone)]
pub struct RedisStore {
    manager: ConnectionManager,
}

fn command_error(op: &'static str, err: redis::RedisError) -> ConnectionError {
    ConnectionError::Command {
        op,
        source: Box::new(err),
    }
}

impl RedisStore {
    async fn fetch(&self, key: &str) -> Result<Option<String>, ConnectionError> {
        let mut conn = self.manager.clone();
        conn.get(key).await.map_err(|e| command_error("GET", e))
    }

    async fn store(&self, key: &str, value: &str) -> Result<(), ConnectionError> {
        let mut conn = self.manager.clone();
        conn.set(key, value)
            .await
            .map_err(|e| command_error("SET", e))
    }
}

impl Store for RedisStore {
    fn get<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<String>> {
        Box::pin(self.fetch(key))
    }

    fn set<'a>(&'a self, key: &'a str, value: &'a str) -> StoreFuture<'a, ()> {
        Box::pin(self.store(key, value))
    }
}
