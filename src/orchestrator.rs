//! Attempt loop for one logical request: endpoint selection, reconnection,
//! redirect handling and failure classification.
//!
//! Only the [`Call`] of a request ever starts its attempts, and each attempt
//! carries the promise generation it was started under, so at most one
//! attempt is current at any time.

use std::{
    sync::{
        atomic::{AtomicU32, AtomicUsize, Ordering},
        Arc, Mutex, PoisonError,
    },
    time::Duration,
};

use reqwest::header::{HeaderValue, LOCATION};
use tokio::runtime::Handle;
use url::Url;

use crate::{
    retry,
    timer::Timer,
    transport::BoxFuture,
    ConnectionState, CoordKvClient, CoordKvError, Decoder, HttpResponse, KvRequest,
    ResponsePromise, RetryPolicy, Transport,
};

pub(crate) struct Call<T: Clone + Send + 'static> {
    transport: Arc<dyn Transport>,
    handle: Handle,
    timer: Timer,
    last_good: Arc<AtomicUsize>,
    default_timeout: Option<Duration>,
    authorization: Option<HeaderValue>,
    max_redirects: u32,
    request: KvRequest,
    decoder: Box<dyn Decoder<T>>,
    policy: Arc<dyn RetryPolicy>,
    promise: ResponsePromise<T>,
    redirect: Mutex<Option<Url>>,
    redirects: AtomicU32,
}

impl<T> Call<T>
where
    T: Clone + Send + 'static,
{
    pub(crate) fn new(
        client: &CoordKvClient,
        request: KvRequest,
        decoder: Box<dyn Decoder<T>>,
        promise: ResponsePromise<T>,
    ) -> Self {
        let policy = request
            .policy()
            .cloned()
            .unwrap_or_else(|| Arc::clone(&client.retry_policy));
        Self {
            transport: Arc::clone(&client.transport),
            handle: client.runtime.handle.clone(),
            timer: client.timer.clone(),
            last_good: Arc::clone(&client.last_good),
            default_timeout: client.options.timeout(),
            authorization: client.authorization.clone(),
            max_redirects: client.options.max_redirects,
            request,
            decoder,
            policy,
            promise,
            redirect: Mutex::new(None),
            redirects: AtomicU32::new(0),
        }
    }

    /// Starts one attempt against the endpoint selected by `state`, or the
    /// pending redirect target.
    pub(crate) fn attempt(self: &Arc<Self>, state: ConnectionState) {
        let Some(generation) = self.promise.begin_attempt() else {
            #[cfg(feature = "tracing")]
            tracing::debug!("request already resolved, skipping attempt");
            return;
        };

        let (target, redirected) = match self.target(&state) {
            Ok(target) => target,
            Err(err) => {
                self.promise.complete(generation, Err(err));
                return;
            }
        };

        #[cfg(feature = "tracing")]
        tracing::debug!(
            generation,
            target = %target,
            retry_count = state.retry_count(),
            method = %self.request.method(),
            "starting attempt"
        );

        let task = self
            .handle
            .spawn(Arc::clone(self).run_attempt(generation, state, target, redirected));
        self.promise.attach(generation, task.abort_handle());
    }

    fn target(&self, state: &ConnectionState) -> crate::Result<(Url, bool)> {
        let redirect = self
            .redirect
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        match redirect {
            Some(target) => Ok((target, true)),
            None => Ok((self.request.url_for(state.current_uri())?, false)),
        }
    }

    fn run_attempt(
        self: Arc<Self>,
        generation: u64,
        state: ConnectionState,
        target: Url,
        redirected: bool,
    ) -> BoxFuture<'static, ()> {
        Box::pin(async move {
            let request = self
                .request
                .to_http(self.default_timeout, self.authorization.as_ref());
            let exchange = self.transport.execute(target.clone(), request).await;
            // No await point follows, so a late abort cannot interrupt routing.

            if !self.promise.detach(generation) {
                // Superseded or cancelled; dropping the response closes it.
                #[cfg(feature = "tracing")]
                tracing::debug!(generation, target = %target, "discarding stale attempt");
                return;
            }

            match exchange {
                Err(err) => {
                    let cause = err.into_error(&target);
                    #[cfg(feature = "tracing")]
                    tracing::debug!(generation, error = %cause, "attempt failed");
                    if cause.is_retryable() {
                        self.handle_failure(generation, state, cause);
                    } else {
                        self.promise.complete(generation, Err(cause));
                    }
                }
                Ok(response) => {
                    if !redirected {
                        self.last_good.store(state.uri_index(), Ordering::Relaxed);
                    }
                    self.handle_response(generation, state, &target, response);
                }
            }
        })
    }

    fn handle_failure(self: &Arc<Self>, generation: u64, state: ConnectionState, cause: CoordKvError) {
        let call = Arc::clone(self);
        self.promise.handle_attempt_failure(generation, cause, move || {
            let policy = Arc::clone(&call.policy);
            let timer = call.timer.clone();
            retry::retry(policy.as_ref(), state, &timer, move |next| call.attempt(next))
        });
    }

    fn handle_response(
        self: &Arc<Self>,
        generation: u64,
        state: ConnectionState,
        target: &Url,
        response: HttpResponse,
    ) {
        if !response.is_redirect() {
            let outcome = self.decoder.decode(&response);
            self.promise.complete(generation, outcome);
            return;
        }

        let Some(location) = response.header(LOCATION) else {
            self.promise.complete(
                generation,
                Err(CoordKvError::RedirectWithoutLocation {
                    endpoint: target.to_string(),
                    status: response.status.as_u16(),
                }),
            );
            return;
        };

        let next = match redirect_target(target, location) {
            Ok(next) => next,
            Err(err) => {
                #[cfg(feature = "tracing")]
                tracing::debug!(error = %err, "refusing redirect");
                self.promise.complete(generation, Err(err));
                return;
            }
        };

        let followed = self.redirects.fetch_add(1, Ordering::SeqCst) + 1;
        if followed > self.max_redirects {
            self.promise.complete(
                generation,
                Err(CoordKvError::TooManyRedirects {
                    limit: self.max_redirects,
                }),
            );
            return;
        }

        #[cfg(feature = "tracing")]
        tracing::debug!(from = %target, to = %next, followed, "following redirect");

        *self.redirect.lock().unwrap_or_else(PoisonError::into_inner) = Some(next);
        drop(response);
        self.attempt(state);
    }
}

/// Resolves `location` against `target`; only http(s) URLs with a host qualify.
fn redirect_target(target: &Url, location: &str) -> crate::Result<Url> {
    let invalid = |reason: String| CoordKvError::InvalidRedirect {
        endpoint: target.to_string(),
        location: location.to_owned(),
        reason,
    };

    let next = target
        .join(location)
        .map_err(|err| invalid(err.to_string()))?;
    if !matches!(next.scheme(), "http" | "https") {
        return Err(invalid(format!("unsupported scheme '{}'", next.scheme())));
    }
    if next.host_str().map_or(true, str::is_empty) {
        return Err(invalid("missing host".to_owned()));
    }
    Ok(next)
}

impl<T: Clone + Send + 'static> Drop for Call<T> {
    fn drop(&mut self) {
        // Only reachable while pending if the runtime dropped our tasks.
        if !self.promise.is_done() {
            self.promise
                .cancel_with("client runtime shut down before the request completed");
        }
    }
}
