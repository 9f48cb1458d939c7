//! Caller-owned periodic tasks
//!
//! Nothing in cgate starts a timer on its own; a caller that wants periodic
//! rescans spawns a [`ScheduledTask`] and keeps the handle.

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Periodic task with explicit cancellation
#[derive(Debug)]
pub struct ScheduledTask {
    cancel: watch::Sender<bool>,
    handle: JoinHandle<u64>,
}

impl ScheduledTask {
    /// Run `tick` every `period`, first after one full period
    ///
    /// Ticks never overlap; a slow tick delays the next one instead of
    /// queueing a burst.
    pub fn spawn<F, Fut>(name: &'static str, period: Duration, mut tick: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let (cancel, mut cancelled) = watch::channel(false);
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut runs = 0u64;
            loop {
                tokio::select! {
                    biased;
                    changed = cancelled.changed() => {
                        if changed.is_err() || *cancelled.borrow() {
                            break;
                        }
                    }
                    _ = interval.tick() => {
                        tick().await;
                        runs += 1;
                        tracing::trace!(task = name, runs, "scheduled tick");
                    }
                }
            }
            tracing::debug!(task = name, runs, "scheduled task stopped");
            runs
        });
        Self { cancel, handle }
    }

    /// Whether the task has exited
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Stop after the current tick, returning the number of completed ticks
    pub async fn cancel(self) -> u64 {
        let _ = self.cancel.send(true);
        self.handle.await.unwrap_or_else(|e| {
            tracing::warn!(error = %e, "scheduled task panicked");
            0
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn ticks_until_cancelled() {
        let count = Arc::new(AtomicU32::new(0));
        let seen = Arc::clone(&count);
        let task = ScheduledTask::spawn("count", Duration::from_secs(10), move || {
            let seen = Arc::clone(&seen);
            async move {
                seen.fetch_add(1, Ordering::SeqCst);
            }
        });

        tokio::time::sleep(Duration::from_secs(35)).await;
        let runs = task.cancel().await;
        assert_eq!(runs, 3);
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_before_first_tick() {
        let task = ScheduledTask::spawn("idle", Duration::from_secs(60), || async {});
        assert!(!task.is_finished());
        assert_eq!(task.cancel().await, 0);
    }
}
