//! HTTP/1.1 request parsing using the [`httparse`] crate.

use thiserror::Error;

use super::{Headers, Method};

/// Errors that can occur while parsing an HTTP/1.1 request.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("request is incomplete, more data needed")]
    Incomplete,

    #[error("HTTP parse error: {0}")]
    Parse(#[from] httparse::Error),

    #[error("missing required field: {field}")]
    MissingField { field: &'static str },
}

/// A parsed HTTP/1.1 request.
///
/// The request target is kept whole, because the read-through handler keys
/// the cache on it; [`path`](Self::path) and
/// [`query_string`](Self::query_string) are views into it.
///
/// # Examples
///
/// ```
/// use readthrough::http::request::Request;
///
/// let raw = b"GET /prices?region=eu HTTP/1.1\r\nHost: localhost\r\n\r\n";
/// let (request, _offset) = Request::parse(raw).unwrap();
///
/// assert_eq!(request.method().as_str(), "GET");
/// assert_eq!(request.target(), "/prices?region=eu");
/// assert_eq!(request.path(), "/prices");
/// assert_eq!(request.query_string(), Some("region=eu"));
/// ```
#[derive(Debug)]
pub struct Request {
    method: Method,
    target: String,
    /// Byte index of `?` in `target`, if any.
    query_start: Option<usize>,
    /// HTTP minor version: 0 for HTTP/1.0, 1 for HTTP/1.1.
    version: u8,
    headers: Headers,
}

impl Request {
    /// Maximum number of headers we support per request.
    const MAX_HEADERS: usize = 64;

    /// Parse a raw HTTP/1.1 request from a byte slice.
    ///
    /// Returns the parsed `Request` and the byte offset at which the body begins
    /// in `buf` (immediately after the `\r\n\r\n` header terminator).
    ///
    /// # Errors
    ///
    /// - [`RequestError::Incomplete`]: the header block has not fully arrived.
    /// - [`RequestError::Parse`]: the data is malformed.
    /// - [`RequestError::MissingField`]: method, target or version is absent.
    pub fn parse(buf: &[u8]) -> Result<(Self, usize), RequestError> {
        let mut headers = [httparse::EMPTY_HEADER; Self::MAX_HEADERS];
        let mut raw = httparse::Request::new(&mut headers);

        let body_offset = match raw.parse(buf)? {
            httparse::Status::Complete(offset) => offset,
            httparse::Status::Partial => return Err(RequestError::Incomplete),
        };

        let method = match raw.method {
            Some(token) => token.parse::<Method>().unwrap_or_else(|never| match never {}),
            None => return Err(RequestError::MissingField { field: "method" }),
        };

        let target = raw
            .path
            .ok_or(RequestError::MissingField { field: "target" })?
            .to_owned();

        let version = raw
            .version
            .ok_or(RequestError::MissingField { field: "version" })?;

        let mut header_map = Headers::with_capacity(raw.headers.len());
        for header in raw.headers.iter() {
            if let Ok(value) = std::str::from_utf8(header.value) {
                header_map.insert(header.name, value);
            }
        }

        let query_start = target.find('?');

        Ok((
            Self {
                method,
                target,
                query_start,
                version,
                headers: header_map,
            },
            body_offset,
        ))
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    /// The request target exactly as received, query string included.
    pub fn target(&self) -> &str {
        &self.target
    }

    /// The path component of the target (without the query string).
    pub fn path(&self) -> &str {
        match self.query_start {
            Some(pos) => &self.target[..pos],
            None => &self.target,
        }
    }

    /// The raw query string without the leading `?`, if any.
    pub fn query_string(&self) -> Option<&str> {
        self.query_start.map(|pos| &self.target[pos + 1..])
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Returns `true` if the connection should be kept alive after this request.
    ///
    /// HTTP/1.1 defaults to keep-alive. HTTP/1.0 defaults to close unless
    /// `Connection: keep-alive` is explicitly set.
    pub fn is_keep_alive(&self) -> bool {
        match self.headers.get("connection") {
            Some(conn) => conn.eq_ignore_ascii_case("keep-alive"),
            None => self.version == 1,
        }
    }

    /// The `Content-Length` header parsed as a `usize`, if present and valid.
    pub fn content_length(&self) -> Option<usize> {
        self.headers.get("content-length")?.parse().ok()
    }
}
