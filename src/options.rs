use std::time::Duration;

/// Configures timeout, redirect and runtime behavior.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ClientOptions {
    /// Per-request timeout in milliseconds; `0` disables it.
    pub timeout_ms: u64,
    /// Maximum number of redirects followed for one request.
    pub max_redirects: u32,
    /// Worker threads of the runtime the client creates when it is built
    /// outside a tokio runtime. Ignored otherwise.
    pub worker_threads: usize,
}

impl ClientOptions {
    pub(crate) fn timeout(&self) -> Option<Duration> {
        (self.timeout_ms > 0).then(|| Duration::from_millis(self.timeout_ms))
    }
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            timeout_ms: 10_000,
            max_redirects: 10,
            worker_threads: 2,
        }
    }
}
