//! `coordkv-http` is a resilient async HTTP client driver for key/value
//! coordination services reachable through several endpoints.
//!
//! A request is sent with [`CoordKvClient::send`], which returns a
//! [`ResponsePromise`] that resolves exactly once:
//! - connect failures, timeouts and premature disconnects are retried
//!   across the endpoint set under a [`RetryPolicy`]
//! - redirects are followed without consuming retries
//! - decode and server errors are surfaced immediately
//!
//! Retry policies: [`RetryNTimes`], [`RetryOnce`], [`RetryWithTimeout`],
//! [`ExponentialBackoff`].

mod client;
mod decode;
mod endpoints;
mod error;
mod options;
mod orchestrator;
mod params;
mod promise;
mod request;
mod retry;
mod state;
mod timer;
mod transport;
mod types;
mod wire;

pub use client::CoordKvClient;
pub use decode::{decode_error_response, Decoder, JsonDecoder, TextDecoder};
pub use endpoints::EndpointSet;
pub use error::CoordKvError;
pub use options::ClientOptions;
pub use params::Params;
pub use promise::{ListenerId, ResponsePromise};
pub use request::KvRequest;
pub use retry::{
    ExponentialBackoff, RetryDecision, RetryNTimes, RetryOnce, RetryPolicy, RetryWithTimeout,
};
pub use state::ConnectionState;
pub use timer::Timer;
pub use transport::{BoxFuture, ReqwestTransport, Transport, TransportError};
pub use types::{HttpRequest, HttpResponse};

pub type Result<T> = std::result::Result<T, CoordKvError>;
