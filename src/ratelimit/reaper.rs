//! Background eviction of idle token buckets.
//!
//! Limiters keyed by client address grow one bucket per client ever seen.
//! The reaper periodically drops buckets nobody has touched for a while; a
//! key that comes back simply starts again from a full bucket.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::registry::Registry;
use crate::config::ReaperConfig;

/// Periodically sweeps every limiter in a [`Registry`].
#[derive(Debug, Clone)]
pub struct Reaper {
    registry: Arc<Registry>,
    /// Time between sweeps
    interval: Duration,
    /// Buckets idle for longer than this are evicted
    idle_threshold: Duration,
}

impl Reaper {
    /// Create a reaper for `registry`.
    pub fn new(registry: Arc<Registry>, interval: Duration, idle_threshold: Duration) -> Self {
        Self {
            registry,
            interval,
            idle_threshold,
        }
    }

    /// Create a reaper from configuration.
    pub fn from_config(registry: Arc<Registry>, config: &ReaperConfig) -> Self {
        Self::new(registry, config.interval(), config.idle_threshold())
    }

    /// Run one pass over every limiter. Returns the number of buckets evicted.
    ///
    /// Each limiter is judged against its own clock.
    pub fn sweep(&self) -> usize {
        let mut evicted = 0;
        let mut remaining = 0;

        for limiter in self.registry.limiters() {
            evicted += limiter.evict_idle(self.idle_threshold);
            remaining += limiter.bucket_count();
        }

        if evicted > 0 {
            info!(evicted = evicted, remaining = remaining, "Reaped idle token buckets");
        } else {
            debug!(remaining = remaining, "No idle token buckets to reap");
        }

        evicted
    }

    /// Run [`Reaper::sweep`] on a fixed interval in a background task.
    ///
    /// The first sweep happens one full interval after spawning.
    pub fn spawn(self) -> ReaperHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        info!(
            interval_secs = self.interval.as_secs(),
            idle_threshold_secs = self.idle_threshold.as_secs(),
            "Starting bucket reaper"
        );

        let task = tokio::spawn(async move {
            let mut ticker = interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.sweep();
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() {
                            debug!("Reaper handle dropped");
                        }
                        break;
                    }
                }
            }

            info!("Bucket reaper stopped");
        });

        ReaperHandle { shutdown_tx, task }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn idle_threshold(&self) -> Duration {
        self.idle_threshold
    }
}

/// Handle to a running reaper task.
///
/// Dropping the handle also stops the task at its next wake-up.
#[derive(Debug)]
pub struct ReaperHandle {
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ReaperHandle {
    /// Signal the reaper to stop and wait for it to exit.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.task.await {
            warn!(error = %e, "Bucket reaper task failed");
        }
    }

    /// Whether the reaper task has exited.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}
