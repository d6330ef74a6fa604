//! # readthrough
//!
//! A small async HTTP/1.1 service whose pages go through a read-through cache.
//!
//! Each `GET` is keyed by its request target. A cached value is served as-is;
//! on a miss the page is computed, written to the cache, then served. The
//! cache lives in Redis and is reached through a single lazily-established
//! connection.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use readthrough::cache::{CacheClient, RedisConnector};
//! use readthrough::handler::ReadThrough;
//! use readthrough::server::Server;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let connector = RedisConnector::new("redis://127.0.0.1:6379")?;
//!     let cache = Arc::new(CacheClient::new(connector, Duration::from_secs(2)));
//!     let app = Arc::new(ReadThrough::home(cache));
//!
//!     let server = Server::bind("127.0.0.1:8080").await?;
//!     server
//!         .run(move |req| {
//!             let app = Arc::clone(&app);
//!             async move { app.handle(req).await }
//!         })
//!         .await?;
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod config;
pub mod handler;
pub mod http;
pub mod server;

pub use cache::{CacheClient, ConnectionError};
pub use config::Config;
pub use handler::{HOME_MESSAGE, ReadThrough, WriteFailurePolicy};
pub use http::{Method, Request, Response, StatusCode};
pub use server::{Server, ServerError};
