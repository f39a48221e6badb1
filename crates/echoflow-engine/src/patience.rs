//! Stall filling while capabilities run.
//!
//! The monitor polls elapsed time at a fixed interval and fires each
//! threshold of an ascending ladder at most once, in order, never
//! re-arming.  Cancellation is observed at every poll; a message whose
//! delivery began before the token was observed is allowed to finish.

use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::{PatienceConfig, PatienceThreshold};

pub struct PatienceMonitor {
    thresholds: Vec<PatienceThreshold>,
    poll_interval: Duration,
}

impl PatienceMonitor {
    pub fn new(config: &PatienceConfig) -> Self {
        Self {
            thresholds: config.thresholds.clone(),
            poll_interval: config.poll_interval(),
        }
    }

    /// Watch the clock from `started` until `cancel` fires or the ladder is
    /// exhausted.  Returns the number of thresholds fired.
    ///
    /// At most one threshold fires per poll, so a ladder whose rungs are
    /// closer together than the poll interval catches up one tick at a time.
    pub async fn watch<F>(
        &self,
        started: Instant,
        cancel: CancellationToken,
        mut notify: F,
    ) -> usize
    where
        F: FnMut(&PatienceThreshold),
    {
        let mut next = 0;

        while let Some(threshold) = self.thresholds.get(next) {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(self.poll_interval) => {}
            }
            if cancel.is_cancelled() {
                break;
            }

            let elapsed = started.elapsed();
            if elapsed >= threshold.after() {
                info!(
                    threshold_secs = threshold.after_secs,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "patience threshold reached"
                );
                notify(threshold);
                next += 1;
            }
        }

        debug!(fired = next, "patience monitor stopped");
        next
    }
}
