//! Time-based zoom curve.
//!
//! The zoom grows linearly per output frame from 1.0 and holds once it
//! reaches the ceiling, so short and long clips share the same motion speed.

use serde::{Deserialize, Serialize};

/// Linear zoom-in clamped at a ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ZoomFunction {
    /// Zoom added per output frame.
    pub rate_per_frame: f64,

    /// Maximum zoom factor.
    pub ceiling: f64,
}

impl ZoomFunction {
    pub fn new(rate_per_frame: f64, ceiling: f64) -> Self {
        Self {
            rate_per_frame,
            ceiling,
        }
    }

    /// Zoom factor for output frame `n` (0-based).
    pub fn factor_at_frame(&self, n: u64) -> f64 {
        (1.0 + self.rate_per_frame * n as f64).min(self.ceiling)
    }

    /// Zoom factor at `t` seconds into a clip rendered at `fps`.
    pub fn factor_at_time(&self, t: f64, fps: u32) -> f64 {
        let frame = (t.max(0.0) * fps as f64).floor() as u64;
        self.factor_at_frame(frame)
    }

    /// First frame at which the ceiling is reached.
    pub fn frames_to_ceiling(&self) -> u64 {
        if self.rate_per_frame <= 0.0 {
            return u64::MAX;
        }
        ((self.ceiling - 1.0) / self.rate_per_frame).ceil().max(0.0) as u64
    }

    /// `zoompan` z-expression. `on` is the output frame number.
    pub fn expression(&self) -> String {
        format!(
            "min(1+{rate}*on,{ceiling})",
            rate = format_decimal(self.rate_per_frame),
            ceiling = format_decimal(self.ceiling)
        )
    }

    /// `zoompan` pan expressions that keep the zoom centred.
    pub fn center_expressions() -> (&'static str, &'static str) {
        ("iw/2-(iw/zoom/2)", "ih/2-(ih/zoom/2)")
    }
}

/// Shortest decimal rendering without exponent notation.
fn format_decimal(value: f64) -> String {
    let text = format!("{value:.6}");
    let text = text.trim_end_matches('0').trim_end_matches('.');
    if text.is_empty() || text == "-" {
        "0".to_string()
    } else {
        text.to_string()
    }
}
