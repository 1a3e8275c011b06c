use std::{sync::Arc, time::Instant};

use url::Url;

use crate::EndpointSet;

/// Per-request retry bookkeeping threaded through every attempt.
///
/// A state is created once per logical request and moved from attempt to
/// attempt; it is never shared between requests. Only the retry driver
/// mutates it between attempts.
#[derive(Clone, Debug)]
pub struct ConnectionState {
    pub(crate) uris: Arc<[Url]>,
    pub(crate) uri_index: usize,
    pub(crate) retry_count: u32,
    /// Delay before the next attempt, in whole milliseconds.
    pub ms_before_retry: u64,
    pub(crate) start_time: Instant,
    /// Set once a [`RetryOnce`](crate::RetryOnce) policy has spent its retry.
    pub retried_once: bool,
}

impl ConnectionState {
    /// Creates a state starting at `uri_index`, clamped into range.
    ///
    /// An [`EndpointSet`] is never empty, so every index maps to an endpoint.
    pub fn new(endpoints: &EndpointSet, uri_index: usize) -> Self {
        Self {
            uris: endpoints.shared(),
            uri_index: uri_index % endpoints.len(),
            retry_count: 0,
            ms_before_retry: 0,
            start_time: Instant::now(),
            retried_once: false,
        }
    }

    pub fn uri_index(&self) -> usize {
        self.uri_index
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn start_time(&self) -> Instant {
        self.start_time
    }

    /// Endpoint the next attempt targets when no redirect is pending.
    pub fn current_uri(&self) -> &Url {
        &self.uris[self.uri_index]
    }

    /// Counts one more retry and moves to the endpoint it maps to.
    pub(crate) fn advance(&mut self) {
        self.retry_count = self.retry_count.saturating_add(1);
        self.uri_index = self.retry_count as usize % self.uris.len();
    }
}
