/// Error type returned by this crate.
///
/// Errors are `Clone` so a resolved [`ResponsePromise`](crate::ResponsePromise)
/// can hand the same failure to every consumer.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum CoordKvError {
    /// The transport could not establish a connection to the endpoint.
    #[error("connect error to {endpoint}: {message}")]
    Connect { endpoint: String, message: String },
    /// No response arrived within the configured request timeout.
    #[error("timed out waiting for response from {endpoint}")]
    Timeout { endpoint: String },
    /// The connection closed before a complete response was delivered.
    #[error("connection to {endpoint} closed before a response arrived: {message}")]
    PrematureDisconnect { endpoint: String, message: String },
    /// The server answered with a redirect status but no `Location` header.
    #[error("redirect status {status} from {endpoint} without location")]
    RedirectWithoutLocation { endpoint: String, status: u16 },
    /// The `Location` of a redirect is unusable as a request target.
    #[error("invalid redirect from {endpoint} to '{location}': {reason}")]
    InvalidRedirect {
        endpoint: String,
        location: String,
        reason: String,
    },
    /// The transport refused to send the request, so no server saw it.
    #[error("request to {endpoint} rejected before sending: {message}")]
    Request { endpoint: String, message: String },
    /// The request kept being redirected past the configured limit.
    #[error("too many redirects (limit {limit})")]
    TooManyRedirects { limit: u32 },
    /// Response decoding or protocol-shape validation error.
    #[error("decode error: {0}")]
    Decode(String),
    /// Structured error reported by the coordination service.
    #[error("server error {error_code}: {message}")]
    Server {
        /// Service-specific error code.
        error_code: u32,
        /// Error message text from the server.
        message: String,
        /// Optional subject of the error (usually the key).
        cause: Option<String>,
        /// Store index at the time of the error.
        index: Option<u64>,
    },
    /// Non-success HTTP status code with raw response body.
    #[error("http error {status}: {body}")]
    Http { status: u16, body: String },
    /// The request was cancelled by the caller.
    #[error("request cancelled: {0}")]
    Cancelled(String),
    /// Invalid endpoint list or client configuration.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl CoordKvError {
    /// Returns `true` for failures that are routed through the retry policy.
    ///
    /// These are the cases where no server gave a definitive answer.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Connect { .. } | Self::Timeout { .. } | Self::PrematureDisconnect { .. }
        )
    }

    /// Returns `true` if the request was cancelled by the caller.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }

    pub(crate) fn cancelled() -> Self {
        Self::Cancelled("cancelled by caller".to_owned())
    }
}
