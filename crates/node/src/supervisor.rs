//! Task supervision.
//!
//! Every long-lived service task registers here with the root cancellation
//! token's child. Shutdown cancels the tree and waits for each task within
//! the configured timeout; stragglers are aborted.

use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub struct Supervisor {
    root: CancellationToken,
    tasks: Vec<(String, JoinHandle<()>)>,
}

impl Supervisor {
    pub fn new() -> Self {
        Self {
            root: CancellationToken::new(),
            tasks: Vec::new(),
        }
    }

    /// Token for a service to select on. Cancelling the root cancels all.
    pub fn child_token(&self) -> CancellationToken {
        self.root.child_token()
    }

    pub fn register(&mut self, name: impl Into<String>, handle: JoinHandle<()>) {
        self.tasks.push((name.into(), handle));
    }

    pub fn register_all(
        &mut self,
        name: impl Into<String>,
        handles: impl IntoIterator<Item = JoinHandle<()>>,
    ) {
        let name = name.into();
        for (i, handle) in handles.into_iter().enumerate() {
            self.tasks.push((format!("{name}-{i}"), handle));
        }
    }

    /// Cancel everything and wait up to `timeout` for a graceful exit.
    pub async fn shutdown(self, timeout: Duration) {
        self.root.cancel();
        let deadline = tokio::time::Instant::now() + timeout;
        for (name, mut handle) in self.tasks {
            match tokio::time::timeout_at(deadline, &mut handle).await {
                Ok(Ok(())) => debug!(task = %name, "task exited cleanly"),
                Ok(Err(e)) if e.is_cancelled() => {}
                Ok(Err(e)) => warn!(task = %name, error = %e, "task exited with error"),
                Err(_) => {
                    warn!(task = %name, "task did not stop within the shutdown timeout, aborting");
                    handle.abort();
                }
            }
        }
    }
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new()
    }
}
