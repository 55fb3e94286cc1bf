//! Engine shutdown: listeners stop accepting, in-flight requests drain, then
//! tracked background tasks (the KV snapshot writer) finish.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};
use tokio_util::task::TaskTracker;

/// Shared stop switch plus the background tasks that must finish before exit.
///
/// A signal obtained after [`trigger`](Shutdown::trigger) resolves at once,
/// so late listeners and tasks still stop.
#[derive(Debug, Default)]
pub struct Shutdown {
    token: CancellationToken,
    tasks: TaskTracker,
}

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolves once shutdown has been triggered.
    pub fn signal(&self) -> WaitForCancellationFutureOwned {
        self.token.clone().cancelled_owned()
    }

    pub fn trigger(&self, reason: &str) {
        if !self.token.is_cancelled() {
            tracing::info!(reason = %reason, "Shutdown triggered");
        }
        self.token.cancel();
    }

    pub fn is_triggered(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Spawn a task that [`drain`](Shutdown::drain) waits for.
    pub fn spawn_task<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tasks.spawn(task);
    }

    /// Wait up to `timeout` for tracked tasks. `false` if some were still running.
    pub async fn drain(&self, timeout: Duration) -> bool {
        self.tasks.close();
        let finished = tokio::time::timeout(timeout, self.tasks.wait()).await.is_ok();
        if !finished {
            tracing::warn!(pending = self.tasks.len(), "Background tasks still running at exit");
        }
        finished
    }
}
