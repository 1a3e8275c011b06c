//! Rebindable result handle for one logical request.
//!
//! A request may go through several transport attempts (retries, redirects)
//! but its [`ResponsePromise`] resolves exactly once. Each attempt is tagged
//! with a generation number; only the current generation may resolve the
//! promise or trigger a retry, and starting a new attempt aborts the previous
//! one.

use std::{
    fmt,
    sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError},
    time::{Duration, Instant},
};

use tokio::{sync::Notify, task::AbortHandle};

use crate::{retry::RetryDecision, CoordKvError, Result};

type Listener<T> = Box<dyn FnOnce(&Result<T>) + Send>;

/// Handle returned by [`ResponsePromise::add_listener`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

struct State<T> {
    generation: u64,
    attempt: Option<AbortHandle>,
    outcome: Option<Result<T>>,
    listeners: Vec<(ListenerId, Listener<T>)>,
    next_listener: u64,
}

struct Shared<T> {
    state: Mutex<State<T>>,
    settled: Condvar,
    notify: Notify,
}

/// Future-like handle delivering exactly one terminal result per request.
///
/// Supports blocking ([`get`](Self::get)), async ([`wait`](Self::wait)) and
/// callback ([`add_listener`](Self::add_listener)) consumption. Clones share
/// the same underlying request.
pub struct ResponsePromise<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for ResponsePromise<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> fmt::Debug for ResponsePromise<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        let status = match &state.outcome {
            None => "pending",
            Some(Ok(_)) => "succeeded",
            Some(Err(err)) if err.is_cancelled() => "cancelled",
            Some(Err(_)) => "failed",
        };
        f.debug_struct("ResponsePromise")
            .field("status", &status)
            .field("generation", &state.generation)
            .field("listeners", &state.listeners.len())
            .finish()
    }
}

impl<T> ResponsePromise<T> {
    fn lock(&self) -> MutexGuard<'_, State<T>> {
        self.shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T> Default for ResponsePromise<T>
where
    T: Clone + Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ResponsePromise<T>
where
    T: Clone + Send + 'static,
{
    /// Creates a pending promise with no attempt attached.
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    generation: 0,
                    attempt: None,
                    outcome: None,
                    listeners: Vec::new(),
                    next_listener: 0,
                }),
                settled: Condvar::new(),
                notify: Notify::new(),
            }),
        }
    }

    /// Starts a new attempt generation, aborting the attempt it supersedes.
    ///
    /// Returns `None` once the promise is terminal.
    pub(crate) fn begin_attempt(&self) -> Option<u64> {
        let (generation, superseded) = {
            let mut state = self.lock();
            if state.outcome.is_some() {
                return None;
            }
            state.generation += 1;
            (state.generation, state.attempt.take())
        };

        if let Some(attempt) = superseded {
            attempt.abort();
        }
        Some(generation)
    }

    /// Binds the running attempt of `generation` to this promise.
    ///
    /// An attempt that was superseded, or that raced with a terminal
    /// transition, is aborted right away.
    pub(crate) fn attach(&self, generation: u64, attempt: AbortHandle) {
        {
            let mut state = self.lock();
            if state.outcome.is_none() && state.generation == generation {
                state.attempt = Some(attempt);
                return;
            }
        }
        attempt.abort();
    }

    /// Releases the abort handle of a finished attempt without aborting it.
    ///
    /// Returns `false` if the attempt is no longer current.
    pub(crate) fn detach(&self, generation: u64) -> bool {
        let mut state = self.lock();
        if state.outcome.is_some() || state.generation != generation {
            return false;
        }
        state.attempt = None;
        true
    }

    pub(crate) fn is_current(&self, generation: u64) -> bool {
        let state = self.lock();
        state.outcome.is_none() && state.generation == generation
    }

    /// Resolves on behalf of the attempt `generation`; stale attempts are ignored.
    pub(crate) fn complete(&self, generation: u64, outcome: Result<T>) -> bool {
        self.settle(Some(generation), outcome)
    }

    /// Routes a retryable failure of `generation` through `retry`.
    ///
    /// On exhaustion the promise fails with the original `cause`.
    pub(crate) fn handle_attempt_failure<F>(&self, generation: u64, cause: CoordKvError, retry: F)
    where
        F: FnOnce() -> RetryDecision,
    {
        if !self.is_current(generation) {
            #[cfg(feature = "tracing")]
            tracing::debug!(generation, error = %cause, "dropping failure of superseded attempt");
            return;
        }

        if retry() == RetryDecision::Exhausted {
            #[cfg(feature = "tracing")]
            tracing::debug!(generation, error = %cause, "retries exhausted");
            self.complete(generation, Err(cause));
        }
    }

    /// Resolves the promise with a value. Returns `false` if already terminal.
    pub fn set_success(&self, value: T) -> bool {
        self.settle(None, Ok(value))
    }

    /// Resolves the promise with an error. Returns `false` if already terminal.
    pub fn set_failure(&self, err: CoordKvError) -> bool {
        self.settle(None, Err(err))
    }

    /// Cancels the request with a generic cancellation error.
    pub fn cancel(&self) -> bool {
        self.settle(None, Err(CoordKvError::cancelled()))
    }

    /// Cancels the request, recording `reason` in the cancellation error.
    pub fn cancel_with(&self, reason: impl Into<String>) -> bool {
        self.settle(None, Err(CoordKvError::Cancelled(reason.into())))
    }

    fn settle(&self, generation: Option<u64>, outcome: Result<T>) -> bool {
        let (attempt, listeners) = {
            let mut state = self.lock();
            if state.outcome.is_some() {
                return false;
            }
            if generation.is_some_and(|generation| generation != state.generation) {
                return false;
            }
            state.outcome = Some(outcome.clone());
            (
                state.attempt.take(),
                std::mem::take(&mut state.listeners),
            )
        };

        if let Some(attempt) = attempt {
            #[cfg(feature = "tracing")]
            tracing::debug!("aborting in-flight attempt of resolved request");
            attempt.abort();
        }

        self.shared.settled.notify_all();
        self.shared.notify.notify_waiters();

        for (_, listener) in listeners {
            listener(&outcome);
        }
        true
    }

    /// Registers a callback for the terminal result.
    ///
    /// If the promise is already terminal, `listener` runs immediately on
    /// the calling thread.
    pub fn add_listener<F>(&self, listener: F) -> ListenerId
    where
        F: FnOnce(&Result<T>) + Send + 'static,
    {
        let (id, outcome) = {
            let mut state = self.lock();
            let id = ListenerId(state.next_listener);
            state.next_listener += 1;
            match &state.outcome {
                Some(outcome) => (id, outcome.clone()),
                None => {
                    state.listeners.push((id, Box::new(listener)));
                    return id;
                }
            }
        };

        listener(&outcome);
        id
    }

    /// Unregisters a listener that has not fired yet.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut state = self.lock();
        let before = state.listeners.len();
        state.listeners.retain(|(registered, _)| *registered != id);
        state.listeners.len() != before
    }

    /// Returns the terminal result if there is one.
    pub fn get_now(&self) -> Option<Result<T>> {
        self.lock().outcome.clone()
    }

    pub fn is_done(&self) -> bool {
        self.lock().outcome.is_some()
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(&self.lock().outcome, Some(Err(err)) if err.is_cancelled())
    }

    /// Blocks the calling thread until the request is terminal.
    ///
    /// Attempts swapped in by retries or redirects do not wake the caller;
    /// only the terminal transition does. Must not be called from an async
    /// task; use [`wait`](Self::wait) there.
    pub fn get(&self) -> Result<T> {
        let mut state = self.lock();
        loop {
            if let Some(outcome) = &state.outcome {
                return outcome.clone();
            }
            state = self
                .shared
                .settled
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Like [`get`](Self::get) but gives up after `timeout`, returning `None`.
    pub fn get_timeout(&self, timeout: Duration) -> Option<Result<T>> {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();
        loop {
            if let Some(outcome) = &state.outcome {
                return Some(outcome.clone());
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return None;
            }
            state = self
                .shared
                .settled
                .wait_timeout(state, remaining)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    /// Waits asynchronously for the terminal result.
    pub async fn wait(&self) -> Result<T> {
        loop {
            let notified = self.shared.notify.notified();
            if let Some(outcome) = self.get_now() {
                return outcome;
            }
            notified.await;
        }
    }
}
