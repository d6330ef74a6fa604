//! Read-through request handling.
//!
//! For every `GET`, the handler looks the request target up in the cache and
//! answers from it on a hit. On a miss it computes the body, writes it back,
//! then answers. Any cache failure turns into a bare `500`; the error itself
//! only goes to the log.

use std::sync::Arc;

use tracing::{debug, error, warn};

use crate::cache::CacheClient;
use crate::http::{Method, Request, Response, StatusCode};

/// Body served for every page.
pub const HOME_MESSAGE: &str = "Home page is working :)";

/// What to answer when the value was computed but could not be cached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum WriteFailurePolicy {
    /// Respond `500`, same as a failed read.
    #[default]
    Fail,
    /// Respond `200` with the computed value anyway.
    Serve,
}

/// Produces the response body for a request that missed the cache.
pub type Compute = Arc<dyn Fn(&Request) -> String + Send + Sync>;

/// Cache-aside handler shared by all connections.
///
/// ```
/// use std::sync::Arc;
/// use std::time::Duration;
/// use readthrough::cache::{CacheClient, MemoryConnector, MemoryStore};
/// use readthrough::handler::{ReadThrough, HOME_MESSAGE};
/// use readthrough::http::{Request, StatusCode};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let store = Arc::new(MemoryStore::new());
/// let cache = CacheClient::new(MemoryConnector::new(store.clone()), Duration::from_secs(1));
/// let handler = ReadThrough::home(Arc::new(cache));
///
/// let (request, _) = Request::parse(b"GET / HTTP/1.1\r\n\r\n").unwrap();
/// let response = handler.handle(request).await;
///
/// assert_eq!(response.status(), StatusCode::Ok);
/// assert_eq!(store.peek("/").as_deref(), Some(HOME_MESSAGE));
/// # }
/// ```
pub struct ReadThrough {
    cache: Arc<CacheClient>,
    compute: Compute,
    on_write_failure: WriteFailurePolicy,
}

impl ReadThrough {
    pub fn new<F>(cache: Arc<CacheClient>, compute: F) -> Self
    where
        F: Fn(&Request) -> String + Send + Sync + 'static,
    {
        Self {
            cache,
            compute: Arc::new(compute),
            on_write_failure: WriteFailurePolicy::default(),
        }
    }

    /// Serves [`HOME_MESSAGE`] for every path.
    pub fn home(cache: Arc<CacheClient>) -> Self {
        Self::new(cache, |_| HOME_MESSAGE.to_owned())
    }

    #[must_use]
    pub fn on_write_failure(mut self, policy: WriteFailurePolicy) -> Self {
        self.on_write_failure = policy;
        self
    }

    pub async fn handle(&self, request: Request) -> Response {
        if *request.method() != Method::Get {
            debug!(method = %request.method(), target = request.target(), "method not allowed");
            return Response::generic(StatusCode::MethodNotAllowed).header("Allow", "GET");
        }

        let key = cache_key(&request);

        match self.cache.get(&key).await {
            Ok(Some(cached)) => {
                debug!(%key, "cache hit");
                return Response::new(StatusCode::Ok).body(cached);
            }
            Ok(None) => debug!(%key, "cache miss"),
            Err(e) => {
                error!(%key, error = %e, "cache read failed");
                return Response::generic(StatusCode::InternalServerError);
            }
        }

        let value = (self.compute)(&request);

        if let Err(e) = self.cache.set(&key, &value).await {
            match self.on_write_failure {
                WriteFailurePolicy::Fail => {
                    error!(%key, error = %e, "cache write failed");
                    return Response::generic(StatusCode::InternalServerError);
                }
                WriteFailurePolicy::Serve => {
                    warn!(%key, error = %e, "cache write failed, serving uncached value");
                }
            }
        }

        Response::new(StatusCode::Ok).body(value)
    }
}

/// The full request target, query string included, so distinct URLs never
/// share an entry.
pub fn cache_key(request: &Request) -> String {
    request.target().to_owned()
}
