//! Transport trait definition
//!
//! This trait is the boundary between the session logic in this crate and
//! the HTTP client that actually talks to the service. It keeps stack-core
//! independent of any particular HTTP library and lets tests substitute a
//! mock.

use std::fmt;
use std::path::PathBuf;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::de::DeserializeOwned;

use crate::error::{Error, Result};
use crate::profile::Credentials;

/// Stream of body chunks from a streaming response
pub type ByteStream = BoxStream<'static, Result<Vec<u8>>>;

/// HTTP methods used by the service, including the WebDAV extensions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Mkcol,
    Move,
}

impl Method {
    /// Method name as sent on the wire
    pub const fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Mkcol => "MKCOL",
            Method::Move => "MOVE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request body
#[derive(Clone, PartialEq)]
pub enum Body {
    /// No body
    Empty,
    /// `application/x-www-form-urlencoded` fields
    Form(Vec<(String, String)>),
    /// JSON document
    Json(serde_json::Value),
    /// Raw bytes held in memory
    Bytes(Vec<u8>),
    /// Local file streamed from disk
    File { path: PathBuf, len: u64 },
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Body::Empty => f.write_str("Empty"),
            // form bodies carry the login password
            Body::Form(fields) => f
                .debug_list()
                .entries(fields.iter().map(|(k, _)| k))
                .finish(),
            Body::Json(value) => write!(f, "Json({value})"),
            Body::Bytes(bytes) => write!(f, "Bytes({} bytes)", bytes.len()),
            Body::File { path, len } => write!(f, "File({}, {len} bytes)", path.display()),
        }
    }
}

/// A request against the service, relative to its base URL
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    /// HTTP method
    pub method: Method,
    /// Path beneath the base URL, starting with `/`, already percent-encoded
    pub endpoint: String,
    /// Query parameters
    pub query: Vec<(String, String)>,
    /// Extra headers
    pub headers: Vec<(String, String)>,
    /// Request body
    pub body: Body,
    /// HTTP basic authentication (WebDAV only)
    pub basic_auth: Option<Credentials>,
}

impl Request {
    /// Create a request with no query, headers or body
    pub fn new(method: Method, endpoint: impl Into<String>) -> Self {
        Self {
            method,
            endpoint: endpoint.into(),
            query: Vec::new(),
            headers: Vec::new(),
            body: Body::Empty,
            basic_auth: None,
        }
    }

    /// Shorthand for a GET request
    pub fn get(endpoint: impl Into<String>) -> Self {
        Self::new(Method::Get, endpoint)
    }

    /// Shorthand for a POST request
    pub fn post(endpoint: impl Into<String>) -> Self {
        Self::new(Method::Post, endpoint)
    }

    /// Append a query parameter
    pub fn query(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.query.push((key.into(), value.to_string()));
        self
    }

    /// Append a header
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Set a form body
    pub fn form<K, V>(mut self, fields: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.body = Body::Form(
            fields
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        );
        self
    }

    /// Set a JSON body
    pub fn json(mut self, value: serde_json::Value) -> Self {
        self.body = Body::Json(value);
        self
    }

    /// Set an arbitrary body
    pub fn body(mut self, body: Body) -> Self {
        self.body = body;
        self
    }

    /// Look up a query parameter by name
    pub fn query_value(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Look up a header by name (case-insensitive)
    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// A fully buffered response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// HTTP status code
    pub status: u16,
    /// Response body
    pub body: Vec<u8>,
}

impl Response {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// 2xx status
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// 3xx status
    pub fn is_redirect(&self) -> bool {
        (300..400).contains(&self.status)
    }

    /// Body decoded as UTF-8, lossily
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Body decoded as JSON
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.body).map_err(Error::Json)
    }
}

/// A response whose body is consumed incrementally
pub struct StreamingResponse {
    /// HTTP status code
    pub status: u16,
    /// Body chunks
    pub body: ByteStream,
}

impl fmt::Debug for StreamingResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamingResponse")
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

/// HTTP transport used by a [`Session`](crate::Session)
///
/// Implementations own the cookie store, must not follow redirects, and
/// report failures below the HTTP layer as [`Error::Connection`]. Any HTTP
/// status, including 4xx and 5xx, is a successful transport result.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a request and buffer the whole response body
    async fn send(&self, request: Request) -> Result<Response>;

    /// Send a request and return the body as a chunk stream
    async fn open(&self, request: Request) -> Result<StreamingResponse>;
}
