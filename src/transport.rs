use std::{error::Error as _, future::Future, pin::Pin};

use reqwest::redirect;
use url::Url;

use crate::{CoordKvError, HttpRequest, HttpResponse};

/// Boxed `Send` future used at the transport seam.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Failure of a single exchange, before any response was decoded.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// Connection could not be established (refused, DNS, TLS).
    #[error("connect failed: {0}")]
    Connect(String),
    /// The exchange exceeded the request timeout.
    #[error("timed out")]
    Timeout,
    /// The connection dropped before the response was complete.
    #[error("disconnected: {0}")]
    Disconnected(String),
    /// The request could not be built or sent; no server was contacted.
    #[error("request rejected: {0}")]
    Rejected(String),
    /// The server answered but its body could not be read back.
    #[error("undecodable response body: {0}")]
    Body(String),
}

impl TransportError {
    pub(crate) fn into_error(self, target: &Url) -> CoordKvError {
        let endpoint = target.to_string();
        match self {
            Self::Connect(message) => CoordKvError::Connect { endpoint, message },
            Self::Timeout => CoordKvError::Timeout { endpoint },
            Self::Disconnected(message) => CoordKvError::PrematureDisconnect { endpoint, message },
            Self::Rejected(message) => CoordKvError::Request { endpoint, message },
            Self::Body(message) => {
                CoordKvError::Decode(format!("response body from {endpoint}: {message}"))
            }
        }
    }
}

/// One request/response exchange against a target URL.
///
/// Implementations must not follow redirects themselves; redirect statuses
/// are handed back to the client, which re-targets the request.
pub trait Transport: Send + Sync + 'static {
    fn execute(
        &self,
        target: Url,
        request: HttpRequest,
    ) -> BoxFuture<'static, Result<HttpResponse, TransportError>>;
}

/// Default transport on top of `reqwest`.
#[derive(Clone, Debug)]
pub struct ReqwestTransport {
    http: reqwest::Client,
}

impl ReqwestTransport {
    /// Builds a transport with automatic redirects disabled.
    pub fn new() -> Result<Self, CoordKvError> {
        let http = reqwest::Client::builder()
            .redirect(redirect::Policy::none())
            .build()
            .map_err(|err| CoordKvError::Config(format!("failed to build http client: {err}")))?;
        Ok(Self { http })
    }

    /// Wraps a preconfigured client (TLS roots, proxies, ...).
    ///
    /// The client must be built with `redirect::Policy::none()`.
    pub fn from_client(http: reqwest::Client) -> Self {
        Self { http }
    }
}

impl Transport for ReqwestTransport {
    fn execute(
        &self,
        target: Url,
        request: HttpRequest,
    ) -> BoxFuture<'static, Result<HttpResponse, TransportError>> {
        let http = self.http.clone();
        Box::pin(async move {
            let mut builder = http
                .request(request.method, target)
                .headers(request.headers);
            if let Some(timeout) = request.timeout {
                builder = builder.timeout(timeout);
            }
            if let Some(body) = request.body {
                builder = builder.body(body);
            }

            let response = builder.send().await.map_err(classify)?;
            let status = response.status();
            let headers = response.headers().clone();
            let body = response.bytes().await.map_err(classify)?;

            Ok(HttpResponse {
                status,
                headers,
                body: body.to_vec(),
            })
        })
    }
}

/// Only failures where no server gave a complete answer are retryable.
fn classify(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        return TransportError::Timeout;
    }

    let message = describe(&err);
    if err.is_connect() {
        TransportError::Connect(message)
    } else if err.is_builder() || err.is_redirect() || err.is_status() {
        TransportError::Rejected(message)
    } else if err.is_decode() {
        TransportError::Body(message)
    } else {
        TransportError::Disconnected(message)
    }
}

fn describe(err: &reqwest::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
