//! Phase timing and frame arithmetic.
//!
//! Every job is timed against a monotonic epoch taken at creation. This
//! module provides:
//! - A phase clock that records per-phase laps
//! - Frame count and tolerance helpers tied to an output frame rate
//! - Engine-style time formatting

use std::time::{Duration, Instant};

/// Monotonic job clock with per-phase laps.
#[derive(Debug, Clone)]
pub struct PhaseClock {
    /// The instant the job started.
    epoch: Instant,

    /// Wall-clock time at epoch (RFC 3339).
    epoch_wall: String,

    /// End of the previous lap.
    last: Instant,

    /// Completed laps, in order.
    laps: Vec<(String, Duration)>,
}

impl PhaseClock {
    /// Create a clock anchored to now.
    pub fn start() -> Self {
        let now = Instant::now();
        Self {
            epoch: now,
            epoch_wall: chrono::Utc::now().to_rfc3339(),
            last: now,
            laps: Vec::new(),
        }
    }

    /// Close the current lap under `phase` and return its length.
    pub fn lap(&mut self, phase: impl Into<String>) -> Duration {
        let now = Instant::now();
        let took = now.duration_since(self.last);
        self.last = now;
        self.laps.push((phase.into(), took));
        took
    }

    /// Seconds since the clock started.
    pub fn elapsed_secs(&self) -> f64 {
        self.epoch.elapsed().as_secs_f64()
    }

    /// Wall-clock time at start.
    pub fn epoch_wall(&self) -> &str {
        &self.epoch_wall
    }

    pub fn laps(&self) -> &[(String, Duration)] {
        &self.laps
    }

    /// `phase=1.234s` pairs for a single log field.
    pub fn summary(&self) -> String {
        self.laps
            .iter()
            .map(|(phase, took)| format!("{phase}={:.3}s", took.as_secs_f64()))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Frames needed to cover `duration_secs` at `fps`.
pub fn frames_for(duration_secs: f64, fps: u32) -> u64 {
    if !duration_secs.is_finite() || duration_secs <= 0.0 {
        return 0;
    }
    (duration_secs * fps as f64).ceil() as u64
}

/// Length of one frame in seconds.
pub fn frame_interval_secs(fps: u32) -> f64 {
    1.0 / fps.max(1) as f64
}

/// Whether two durations differ by no more than one frame.
pub fn within_one_frame(a_secs: f64, b_secs: f64, fps: u32) -> bool {
    (a_secs - b_secs).abs() <= frame_interval_secs(fps) + 1e-9
}

/// Format seconds the way the engine accepts them for `-t`.
pub fn format_engine_secs(secs: f64) -> String {
    format!("{secs:.6}")
}

/// Convert microseconds to seconds.
pub fn us_to_secs(us: u64) -> f64 {
    us as f64 / 1_000_000.0
}
