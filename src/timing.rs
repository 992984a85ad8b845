//! Stage timing.

use std::time::{Duration, Instant};

/// Measures the duration of one pipeline stage.
pub struct Timer {
    name: String,
    start: Instant,
}

impl Timer {
    /// Start a new timer for the named stage.
    pub fn start(name: &str) -> Self {
        tracing::debug!(stage = name, "Stage started");
        Self {
            name: name.to_string(),
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Stop the timer and log the elapsed time.
    pub fn finish(self) -> Duration {
        let elapsed = self.elapsed();
        tracing::info!(stage = %self.name, "{} done in {}", self.name, format_duration(elapsed));
        elapsed
    }
}

/// `12.3s` below a minute, `2.5m` above.
pub fn format_duration(elapsed: Duration) -> String {
    let secs = elapsed.as_secs_f64();
    if secs >= 60.0 {
        format!("{:.1}m", secs / 60.0)
    } else {
        format!("{:.1}s", secs)
    }
}
