use std::{
    fmt,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

use reqwest::header::HeaderValue;
use tokio::runtime::{self, Handle, Runtime};

use crate::{
    orchestrator::Call, timer::Timer, ClientOptions, ConnectionState, CoordKvError, Decoder,
    EndpointSet, ExponentialBackoff, KvRequest, ReqwestTransport, ResponsePromise, Result,
    RetryPolicy, Transport,
};

/// Runtime that attempts and retry timers run on.
#[derive(Clone)]
pub(crate) struct ClientRuntime {
    pub(crate) handle: Handle,
    _owned: Option<Arc<OwnedRuntime>>,
}

struct OwnedRuntime(Option<Runtime>);

impl Drop for OwnedRuntime {
    fn drop(&mut self) {
        if let Some(runtime) = self.0.take() {
            runtime.shutdown_background();
        }
    }
}

impl ClientRuntime {
    fn current_or_owned(worker_threads: usize) -> Result<Self> {
        if let Ok(handle) = Handle::try_current() {
            return Ok(Self::from_handle(handle));
        }

        let runtime = runtime::Builder::new_multi_thread()
            .worker_threads(worker_threads.max(1))
            .thread_name("coordkv-io")
            .enable_all()
            .build()
            .map_err(|err| CoordKvError::Config(format!("failed to start runtime: {err}")))?;
        Ok(Self {
            handle: runtime.handle().clone(),
            _owned: Some(Arc::new(OwnedRuntime(Some(runtime)))),
        })
    }

    fn from_handle(handle: Handle) -> Self {
        Self {
            handle,
            _owned: None,
        }
    }
}

#[derive(Clone)]
/// Client for a key/value coordination service spread over several endpoints.
///
/// Every request is retried across the endpoint set according to its retry
/// policy and follows server redirects. Results are delivered through a
/// [`ResponsePromise`].
///
/// When built outside a tokio runtime the client starts its own; dropping
/// the last clone of such a client shuts it down and cancels pending
/// requests.
pub struct CoordKvClient {
    pub(crate) endpoints: EndpointSet,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) options: ClientOptions,
    pub(crate) retry_policy: Arc<dyn RetryPolicy>,
    pub(crate) authorization: Option<HeaderValue>,
    pub(crate) last_good: Arc<AtomicUsize>,
    pub(crate) runtime: ClientRuntime,
    pub(crate) timer: Timer,
}

impl fmt::Debug for CoordKvClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoordKvClient")
            .field("endpoints", &self.endpoints)
            .field(
                "authorization",
                &self.authorization.as_ref().map(|_| "<redacted>"),
            )
            .field("options", &self.options)
            .field("retry_policy", &self.retry_policy)
            .finish()
    }
}

impl CoordKvClient {
    /// Creates a client with default options.
    ///
    /// Uses the current tokio runtime if there is one.
    pub fn new(endpoints: EndpointSet) -> Result<Self> {
        Self::with_config(endpoints, ClientOptions::default())
    }

    /// Creates a client from endpoint URLs such as `http://10.0.0.1:2379`.
    pub fn from_uris<I, S>(uris: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self::new(EndpointSet::new(uris)?)
    }

    /// Creates a client with explicit options.
    ///
    /// `options.worker_threads` sizes the runtime created when no tokio
    /// runtime is current.
    pub fn with_config(endpoints: EndpointSet, options: ClientOptions) -> Result<Self> {
        let transport = ReqwestTransport::new()?;
        let runtime = ClientRuntime::current_or_owned(options.worker_threads)?;
        let timer = Timer::new(runtime.handle.clone());

        Ok(Self {
            endpoints,
            transport: Arc::new(transport),
            options,
            retry_policy: Arc::new(ExponentialBackoff::default()),
            authorization: None,
            last_good: Arc::new(AtomicUsize::new(0)),
            runtime,
            timer,
        })
    }

    /// Creates a client from environment variables.
    ///
    /// Reads:
    /// - `COORDKV_ENDPOINTS`: comma separated endpoint URLs (required)
    /// - `COORDKV_TIMEOUT_MS`: per-request timeout in milliseconds
    /// - `COORDKV_TOKEN`: access token (Bearer prefix optional)
    pub fn from_env() -> Result<Self> {
        let endpoints = std::env::var("COORDKV_ENDPOINTS").map_err(|_| {
            CoordKvError::Config("missing COORDKV_ENDPOINTS environment variable".to_owned())
        })?;
        let endpoints = EndpointSet::parse(&endpoints)?;

        let mut options = ClientOptions::default();
        if let Ok(raw) = std::env::var("COORDKV_TIMEOUT_MS") {
            options.timeout_ms = raw.trim().parse().map_err(|err| {
                CoordKvError::Config(format!("invalid COORDKV_TIMEOUT_MS '{raw}': {err}"))
            })?;
        }

        let client = Self::with_config(endpoints, options)?;
        match std::env::var("COORDKV_TOKEN") {
            Ok(token) if !token.trim().is_empty() => client.with_bearer_token(&token),
            _ => Ok(client),
        }
    }

    /// Applies timeout and redirect options to subsequent requests.
    pub fn with_options(mut self, opts: ClientOptions) -> Self {
        self.options = opts;
        self
    }

    /// Sets the policy used by requests that do not carry their own.
    pub fn with_retry_policy<P: RetryPolicy + 'static>(mut self, policy: P) -> Self {
        self.retry_policy = Arc::new(policy);
        self
    }

    /// Replaces the HTTP transport.
    pub fn with_transport<T: Transport>(mut self, transport: T) -> Self {
        self.transport = Arc::new(transport);
        self
    }

    /// Runs attempts and retry timers on `handle`.
    pub fn with_runtime(mut self, handle: Handle) -> Self {
        self.timer = Timer::new(handle.clone());
        self.runtime = ClientRuntime::from_handle(handle);
        self
    }

    /// Sends `authorization` verbatim as the `Authorization` header.
    pub fn with_authorization(mut self, authorization: &str) -> Result<Self> {
        let mut value = HeaderValue::from_str(authorization)
            .map_err(|err| CoordKvError::Config(format!("invalid authorization value: {err}")))?;
        value.set_sensitive(true);
        self.authorization = Some(value);
        Ok(self)
    }

    /// Authenticates with a bearer token.
    ///
    /// If the token is missing the `Bearer ` prefix, it is added automatically.
    pub fn with_bearer_token(self, token: &str) -> Result<Self> {
        let authorization = normalize_bearer_authorization(token);
        self.with_authorization(&authorization)
    }

    pub fn endpoints(&self) -> &EndpointSet {
        &self.endpoints
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    /// Index of the endpoint the next request tries first.
    pub fn preferred_endpoint(&self) -> usize {
        self.last_good.load(Ordering::Relaxed)
    }

    /// Issues `request` and returns the promise for its single result.
    ///
    /// The first attempt starts before this returns. Connect failures,
    /// timeouts and premature disconnects are retried under the request's
    /// policy; redirects are followed without consuming retries; anything
    /// `decoder` rejects fails the request immediately.
    pub fn send<T, D>(&self, request: KvRequest, decoder: D) -> ResponsePromise<T>
    where
        T: Clone + Send + 'static,
        D: Decoder<T>,
    {
        let promise = ResponsePromise::new();
        let state = ConnectionState::new(&self.endpoints, self.preferred_endpoint());

        #[cfg(feature = "tracing")]
        tracing::debug!(
            method = %request.method(),
            path = request.path(),
            first_endpoint = %state.current_uri(),
            "sending request"
        );

        let call = Arc::new(Call::new(self, request, Box::new(decoder), promise.clone()));
        call.attempt(state);
        promise
    }

    /// Sends `request` and waits for its result.
    pub async fn execute<T, D>(&self, request: KvRequest, decoder: D) -> Result<T>
    where
        T: Clone + Send + 'static,
        D: Decoder<T>,
    {
        self.send(request, decoder).wait().await
    }
}

fn normalize_bearer_authorization(token: &str) -> String {
    let trimmed = token.trim();
    let prefix = trimmed.get(..7);
    if prefix.is_some_and(|value| value.eq_ignore_ascii_case("bearer ")) {
        trimmed.to_owned()
    } else {
        format!("Bearer {trimmed}")
    }
}
