//! Task supervision for the node.
//!
//! Every long-running task (event loop, delegate workers, metrics server)
//! is spawned through a [`NodeSupervisor`]. Tasks share one
//! `CancellationToken`; a critical task that fails cancels it, which brings
//! the rest of the node down.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};

/// Default time allowed for tasks to stop after cancellation
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Result type for supervised tasks
pub type SupervisedResult = Result<(), anyhow::Error>;

/// Owns the node's tasks and their shared shutdown signal
#[derive(Clone)]
pub struct NodeSupervisor {
    tracker: TaskTracker,
    token: CancellationToken,
    shutting_down: Arc<AtomicBool>,
    /// Set when a critical task failed
    failed: Arc<AtomicBool>,
    shutdown_timeout: Duration,
}

impl Default for NodeSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeSupervisor {
    /// Create a supervisor with the default shutdown timeout
    pub fn new() -> Self {
        Self::with_timeout(DEFAULT_SHUTDOWN_TIMEOUT)
    }

    /// Create a supervisor with a custom shutdown timeout
    pub fn with_timeout(shutdown_timeout: Duration) -> Self {
        Self {
            tracker: TaskTracker::new(),
            token: CancellationToken::new(),
            shutting_down: Arc::new(AtomicBool::new(false)),
            failed: Arc::new(AtomicBool::new(false)),
            shutdown_timeout,
        }
    }

    /// Token cancelled on shutdown
    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// True once shutdown started
    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// True if a critical task failed
    pub fn has_failed(&self) -> bool {
        self.failed.load(Ordering::SeqCst)
    }

    /// Spawn a task that is dropped at its next await point on shutdown
    pub fn spawn<F>(&self, name: &'static str, future: F)
    where
        F: Future<Output = SupervisedResult> + Send + 'static,
    {
        let token = self.token.clone();
        let shutting_down = self.shutting_down.clone();

        self.tracker.spawn(async move {
            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    info!(task = name, "Task stopped by shutdown");
                }
                result = future => log_outcome(name, result, &shutting_down),
            }
        });
    }

    /// Spawn a task that watches the token itself and stops on its own
    pub fn spawn_cancellable<F, Fut>(&self, name: &'static str, f: F)
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = SupervisedResult> + Send + 'static,
    {
        let token = self.token.clone();
        let shutting_down = self.shutting_down.clone();

        self.tracker.spawn(async move {
            let result = f(token).await;
            log_outcome(name, result, &shutting_down);
        });
    }

    /// Spawn a task whose failure shuts the whole node down.
    ///
    /// The task receives the token and is expected to return once it fires.
    pub fn spawn_critical<F, Fut>(&self, name: &'static str, f: F)
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = SupervisedResult> + Send + 'static,
    {
        let token = self.token.clone();
        let shutting_down = self.shutting_down.clone();
        let failed = self.failed.clone();

        self.tracker.spawn(async move {
            match f(token.clone()).await {
                Ok(()) => info!(task = name, "Critical task finished"),
                Err(e) if shutting_down.load(Ordering::SeqCst) => {
                    info!(task = name, error = %e, "Critical task stopped during shutdown");
                }
                Err(e) => {
                    error!(task = name, error = ?e, "Critical task failed, shutting down");
                    failed.store(true, Ordering::SeqCst);
                    token.cancel();
                }
            }
        });
    }

    /// Cancel every task and wait for them, up to the shutdown timeout
    pub async fn shutdown(&self) -> Result<(), ShutdownError> {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            warn!("Shutdown already in progress");
            return Ok(());
        }
        info!(tasks = self.tracker.len(), "Shutting down");

        self.tracker.close();
        self.token.cancel();

        match tokio::time::timeout(self.shutdown_timeout, self.tracker.wait()).await {
            Ok(()) => {
                info!("All tasks stopped");
                Ok(())
            }
            Err(_) => {
                error!(
                    timeout = ?self.shutdown_timeout,
                    "Tasks still running after shutdown timeout"
                );
                Err(ShutdownError::Timeout)
            }
        }
    }

    /// Wait until the token is cancelled, by shutdown or a failed task
    pub async fn cancelled(&self) {
        self.token.cancelled().await;
    }

    /// Number of tracked tasks
    pub fn task_count(&self) -> usize {
        self.tracker.len()
    }
}

fn log_outcome(name: &'static str, result: SupervisedResult, shutting_down: &AtomicBool) {
    match result {
        Ok(()) => info!(task = name, "Task finished"),
        Err(e) if shutting_down.load(Ordering::SeqCst) => {
            info!(task = name, error = %e, "Task stopped during shutdown");
        }
        Err(e) => error!(task = name, error = ?e, "Task failed"),
    }
}

/// Errors that can occur during shutdown
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ShutdownError {
    /// Tasks did not stop within the shutdown timeout
    #[error("shutdown timeout exceeded")]
    Timeout,
}
