//! Stage timing helpers

use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Logs the wall-clock duration of a pipeline stage when dropped.
///
/// ```
/// use credit_scoring_core::log::StageTimer;
///
/// let _timer = StageTimer::start("aggregate bureau");
/// // ... work ...
/// ```
#[derive(Debug)]
pub struct StageTimer {
    label: String,
    started: Instant,
}

impl StageTimer {
    pub fn start(label: impl Into<String>) -> Self {
        let label = label.into();
        debug!(stage = %label, "stage started");
        Self {
            label,
            started: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

impl Drop for StageTimer {
    fn drop(&mut self) {
        info!(
            stage = %self.label,
            seconds = self.started.elapsed().as_secs_f64(),
            "stage completed"
        );
    }
}
