//! Async TCP server using Tokio.
//!
//! One task per connection, HTTP/1.1 keep-alive, requests handed to an async
//! handler one at a time per connection.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::BytesMut;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

use crate::http::{
    StatusCode,
    request::{Request, RequestError},
    response::Response,
};

/// Errors produced by the server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to bind to {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
}

/// Largest request (headers plus body) buffered before answering `413`.
/// Pages are served for `GET` only, so this stays small.
const MAX_REQUEST_SIZE: usize = 64 * 1024;

/// Initial read buffer capacity per connection.
const INITIAL_BUF_SIZE: usize = 4096;

/// A bound listener waiting for [`run`](Self::run).
///
/// ```rust,no_run
/// use readthrough::http::{Response, StatusCode};
/// use readthrough::server::Server;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let server = Server::bind("127.0.0.1:8080").await?;
///     server
///         .run(|_req| async { Response::new(StatusCode::Ok).body("up") })
///         .await?;
///     Ok(())
/// }
/// ```
pub struct Server {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl Server {
    /// Binds to `addr`. Port `0` picks a free port; see [`local_addr`](Self::local_addr).
    ///
    /// # Errors
    ///
    /// [`ServerError::Bind`] if the address cannot be bound.
    pub async fn bind(addr: impl AsRef<str>) -> Result<Self, ServerError> {
        let addr = addr.as_ref();
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: addr.to_owned(),
                source,
            })?;
        let local_addr = listener.local_addr()?;
        Ok(Self {
            listener,
            local_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accepts connections until the process ends, dispatching every parsed
    /// request to `handler`.
    ///
    /// Failed accepts are logged and skipped; per-connection errors only
    /// close that connection.
    pub async fn run<H, F>(self, handler: H) -> Result<(), ServerError>
    where
        H: Fn(Request) -> F + Send + Sync + 'static,
        F: Future<Output = Response> + Send + 'static,
    {
        let handler = Arc::new(handler);
        info!(address = %self.local_addr, "accepting connections");

        loop {
            let (stream, peer) = match self.listener.accept().await {
                Ok(pair) => pair,
                Err(e) => {
                    error!(error = %e, "failed to accept connection");
                    continue;
                }
            };

            debug!(%peer, "connection accepted");
            let handler = Arc::clone(&handler);

            tokio::spawn(async move {
                if let Err(e) = serve_connection(stream, peer, handler).await {
                    warn!(%peer, error = %e, "connection closed with error");
                }
            });
        }
    }
}

async fn serve_connection<H, F>(
    mut stream: TcpStream,
    peer: SocketAddr,
    handler: Arc<H>,
) -> Result<(), std::io::Error>
where
    H: Fn(Request) -> F + Send + Sync + 'static,
    F: Future<Output = Response> + Send + 'static,
{
    let mut buf = BytesMut::with_capacity(INITIAL_BUF_SIZE);

    loop {
        if stream.read_buf(&mut buf).await? == 0 {
            debug!(%peer, "connection closed by peer");
            return Ok(());
        }

        if buf.len() > MAX_REQUEST_SIZE {
            warn!(%peer, size = buf.len(), "request too large");
            return reject(&mut stream, StatusCode::PayloadTooLarge).await;
        }

        // Serve every complete request already buffered (pipelining).
        loop {
            let (request, body_offset) = match Request::parse(&buf) {
                Ok(parsed) => parsed,
                Err(RequestError::Incomplete) => break,
                Err(e) => {
                    warn!(%peer, error = %e, "malformed request");
                    return reject(&mut stream, StatusCode::BadRequest).await;
                }
            };

            let consumed = match body_offset.checked_add(request.content_length().unwrap_or(0)) {
                Some(total) if total <= MAX_REQUEST_SIZE => total,
                _ => {
                    warn!(%peer, "declared body too large");
                    return reject(&mut stream, StatusCode::PayloadTooLarge).await;
                }
            };
            if buf.len() < consumed {
                break;
            }

            let keep_alive = request.is_keep_alive();
            debug!(
                %peer,
                method = %request.method(),
                target = request.target(),
                "dispatching request"
            );

            let mut response = handler(request).await;
            if !keep_alive {
                response = response.keep_alive(false);
            }
            debug!(%peer, status = response.status().as_u16(), "responding");

            stream.write_all(&response.into_bytes()).await?;
            stream.flush().await?;
            let _ = buf.split_to(consumed);

            if !keep_alive {
                debug!(%peer, "closing after response");
                return Ok(());
            }
        }
    }
}

async fn reject(stream: &mut TcpStream, status: StatusCode) -> Result<(), std::io::Error> {
    let response = Response::generic(status).keep_alive(false);
    stream.write_all(&response.into_bytes()).await?;
    stream.flush().await
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    use super::*;

    async fn spawn_echo_target() -> SocketAddr {
        let server = Server::bind("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr();
        tokio::spawn(server.run(|req: Request| async move {
            Response::new(StatusCode::Ok).body(req.target().to_owned())
        }));
        addr
    }

    async fn roundtrip(addr: SocketAddr, raw: &[u8]) -> String {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(raw).await.unwrap();
        let mut out = Vec::new();
        stream.read_to_end(&mut out).await.unwrap();
        String::from_utf8(out).unwrap()
    }

    #[tokio::test]
    async fn bind_reports_taken_port() {
        let first = Server::bind("127.0.0.1:0").await.unwrap();
        let addr = first.local_addr().to_string();
        let err = Server::bind(&addr).await.err().unwrap();
        assert!(matches!(err, ServerError::Bind { .. }));
    }

    #[tokio::test]
    async fn serves_and_closes_on_request() {
        let addr = spawn_echo_target().await;
        let out = roundtrip(addr, b"GET /x?y=1 HTTP/1.1\r\nConnection: close\r\n\r\n").await;
        assert!(out.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(out.contains("Connection: close\r\n"));
        assert!(out.ends_with("\r\n\r\n/x?y=1"));
    }

    #[tokio::test]
    async fn pipelined_requests_share_a_connection() {
        let addr = spawn_echo_target().await;
        let out = roundtrip(
            addr,
            b"GET /one HTTP/1.1\r\n\r\nGET /two HTTP/1.1\r\nConnection: close\r\n\r\n",
        )
        .await;
        assert_eq!(out.matches("HTTP/1.1 200 OK").count(), 2);
        assert!(out.ends_with("/two"));
    }

    #[tokio::test]
    async fn malformed_request_gets_400() {
        let addr = spawn_echo_target().await;
        let out = roundtrip(addr, b"GET / HTTP/1.1\r\nno colon here\r\n\r\n").await;
        assert!(out.starts_with("HTTP/1.1 400 Bad Request\r\n"));
        assert!(out.ends_with("Bad Request"));
    }

    #[tokio::test]
    async fn oversized_request_gets_413() {
        let addr = spawn_echo_target().await;
        // Exactly one byte over the limit, so the server has read everything
        // before it answers and closes.
        let mut raw = b"GET / HTTP/1.1\r\nX-Filler: ".to_vec();
        raw.resize(MAX_REQUEST_SIZE + 1, b'a');
        let out = roundtrip(addr, &raw).await;
        assert!(out.starts_with("HTTP/1.1 413 Payload Too Large\r\n"));
    }

    #[tokio::test]
    async fn huge_content_length_gets_413() {
        let addr = spawn_echo_target().await;
        let out = roundtrip(
            addr,
            b"GET / HTTP/1.1\r\nContent-Length: 18446744073709551615\r\nConnection: close\r\n\r\n",
        )
        .await;
        assert!(out.starts_with("HTTP/1.1 413 Payload Too Large\r\n"));
        assert!(out.contains("Connection: close\r\n"));
    }

    #[tokio::test]
    async fn content_length_over_limit_is_rejected_before_the_body() {
        let addr = spawn_echo_target().await;
        let raw = format!(
            "POST / HTTP/1.1\r\nContent-Length: {}\r\n\r\n",
            MAX_REQUEST_SIZE
        );
        let out = roundtrip(addr, raw.as_bytes()).await;
        assert!(out.starts_with("HTTP/1.1 413 Payload Too Large\r\n"));
    }
}
