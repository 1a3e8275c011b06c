use std::time::Duration;

use tokio::runtime::Handle;

/// Shared delay facility used to schedule retries.
///
/// Scheduling spawns a sleeping task on the client runtime, so no thread is
/// occupied while the delay elapses.
#[derive(Clone, Debug)]
pub struct Timer {
    handle: Handle,
}

impl Timer {
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// Runs `f` on the runtime after `delay`.
    pub fn schedule<F>(&self, delay: Duration, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.handle.spawn(async move {
            tokio::time::sleep(delay).await;
            f();
        });
    }
}
