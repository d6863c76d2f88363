//! reqwest implementation of the [`Transport`] trait
//!
//! One `reqwest::Client` per session: it holds the cookie jar that carries the
//! login cookie, and it never follows redirects because the login endpoint
//! answers a successful form post with a 3xx.

use std::time::Duration;

use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use reqwest::header::CONTENT_LENGTH;
use reqwest::redirect::Policy;
use reqwest::{Client, RequestBuilder};
use stack_core::{
    Body, Error, Method, Profile, Request, Response, Result, StreamingResponse, Transport,
};

const USER_AGENT: &str = concat!("stack-client/", env!("CARGO_PKG_VERSION"));

/// HTTP transport backed by reqwest
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    base_url: String,
}

impl HttpTransport {
    /// Build a transport for `profile`, honouring its timeouts and TLS setting
    pub fn new(profile: &Profile) -> Result<Self> {
        let timeout = profile.timeout_config();
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .cookie_store(true)
            .redirect(Policy::none())
            .connect_timeout(Duration::from_millis(timeout.connect_ms))
            .timeout(Duration::from_millis(timeout.read_ms))
            .danger_accept_invalid_certs(profile.insecure)
            .build()
            .map_err(|e| Error::Connection(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: profile.base_url(),
        })
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}{}", self.base_url, endpoint)
    }

    async fn prepare(&self, request: Request) -> Result<RequestBuilder> {
        let method = match request.method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            dav @ (Method::Mkcol | Method::Move) => {
                reqwest::Method::from_bytes(dav.as_str().as_bytes())
                    .map_err(|e| Error::Connection(format!("Invalid method {dav}: {e}")))?
            }
        };

        let url = self.url(&request.endpoint);
        tracing::debug!(method = %request.method, url = %url, "Sending request");

        let mut builder = self.client.request(method, url);
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(credentials) = &request.basic_auth {
            builder = builder.basic_auth(&credentials.username, Some(&credentials.password));
        }

        builder = match request.body {
            Body::Empty => builder,
            Body::Form(fields) => builder.form(&fields),
            Body::Json(value) => builder.json(&value),
            Body::Bytes(bytes) => builder
                .header(CONTENT_LENGTH, bytes.len())
                .body(bytes),
            Body::File { path, len } => {
                let file = tokio::fs::File::open(&path).await?;
                builder
                    .header(CONTENT_LENGTH, len)
                    .body(reqwest::Body::from(file))
            }
        };
        Ok(builder)
    }
}

fn connection_error(err: reqwest::Error) -> Error {
    if err.is_timeout() {
        Error::Connection(format!("Request timed out: {err}"))
    } else if err.is_connect() {
        Error::Connection(format!("Cannot connect: {err}"))
    } else {
        Error::Connection(format!("Request failed: {err}"))
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: Request) -> Result<Response> {
        let response = self
            .prepare(request)
            .await?
            .send()
            .await
            .map_err(connection_error)?;

        let status = response.status().as_u16();
        let body = response.bytes().await.map_err(connection_error)?;
        tracing::debug!(status, bytes = body.len(), "Received response");
        Ok(Response::new(status, body.to_vec()))
    }

    async fn open(&self, request: Request) -> Result<StreamingResponse> {
        let response = self
            .prepare(request)
            .await?
            .send()
            .await
            .map_err(connection_error)?;

        let status = response.status().as_u16();
        let body = response
            .bytes_stream()
            .map_ok(|chunk| chunk.to_vec())
            .map_err(connection_error)
            .boxed();
        Ok(StreamingResponse { status, body })
    }
}
