//! Catchup watchdog
//!
//! The watchdog never touches catchup state. It only ticks: every
//! `check_interval` it sends a [`CatchupTick`] into the node's event loop,
//! where the coordinator decides whether a timeout has elapsed. Each tick
//! carries the attempt number it was armed for, so ticks from a superseded
//! watchdog that are still queued are recognizably stale.

use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// A timer tick for the catchup coordinator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CatchupTick {
    /// Catchup attempt the ticking watchdog belongs to
    pub attempt: u64,
}

/// Handle to a running watchdog; cancels the task on drop
#[derive(Debug)]
pub struct WatchdogHandle {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl WatchdogHandle {
    /// Stop ticking
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// True once the task has exited
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for WatchdogHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Spawn a watchdog that ticks every `check_interval` until cancelled or
/// until the receiving side is gone.
///
/// `parent` is the node shutdown token; the watchdog stops with it.
pub fn spawn_watchdog(
    attempt: u64,
    check_interval: Duration,
    ticks: mpsc::Sender<CatchupTick>,
    parent: &CancellationToken,
) -> WatchdogHandle {
    let cancel = parent.child_token();
    let task_cancel = cancel.clone();

    let handle = tokio::spawn(async move {
        let mut interval = tokio::time::interval(check_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // first tick completes immediately
        interval.tick().await;

        loop {
            tokio::select! {
                biased;
                _ = task_cancel.cancelled() => break,
                _ = interval.tick() => {
                    trace!(attempt, "Catchup watchdog tick");
                    if ticks.send(CatchupTick { attempt }).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    WatchdogHandle {
        cancel,
        handle,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_ticks_carry_attempt() {
        let (tx, mut rx) = mpsc::channel(8);
        let root = CancellationToken::new();
        let _wd = spawn_watchdog(7, Duration::from_millis(100), tx, &root);

        let tick = rx.recv().await.unwrap();
        assert_eq!(tick, CatchupTick { attempt: 7 });
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_ticks() {
        let (tx, mut rx) = mpsc::channel(8);
        let root = CancellationToken::new();
        let wd = spawn_watchdog(1, Duration::from_millis(50), tx, &root);

        assert!(rx.recv().await.is_some());
        wd.cancel();
        // the sender is dropped once the task exits
        while rx.recv().await.is_some() {}
        tokio::task::yield_now().await;
        assert!(wd.is_finished());
    }

    #[tokio::test(start_paused = true)]
    async fn test_parent_cancellation_propagates() {
        let (tx, mut rx) = mpsc::channel(8);
        let root = CancellationToken::new();
        let _wd = spawn_watchdog(2, Duration::from_millis(50), tx, &root);

        root.cancel();
        while rx.recv().await.is_some() {}
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_cancels() {
        let (tx, mut rx) = mpsc::channel(8);
        let root = CancellationToken::new();
        let wd = spawn_watchdog(3, Duration::from_millis(50), tx, &root);
        drop(wd);
        while rx.recv().await.is_some() {}
    }
}
