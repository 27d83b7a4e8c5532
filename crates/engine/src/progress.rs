//! Encoder progress parsing and reporting.
//!
//! The engine runs with `-progress pipe:2`, so stderr interleaves `key=value`
//! progress blocks with error output. Known progress keys update a
//! [`ProgressState`]; everything else is kept as diagnostic text.

use std::sync::Arc;

use stillreel_common::clock::us_to_secs;

/// Progress callback for encoding.
pub type ProgressCallback = Arc<dyn Fn(EncodeProgress) + Send + Sync>;

/// Encode progress report.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodeProgress {
    /// Current progress [0.0, 1.0].
    pub progress: f64,

    /// Frames rendered so far.
    pub frames_rendered: u64,

    /// Total frames to render.
    pub total_frames: u64,

    /// Estimated time remaining in seconds.
    pub eta_secs: f64,

    /// Current stage.
    pub stage: EncodeStage,
}

impl EncodeProgress {
    pub fn at_stage(stage: EncodeStage, total_frames: u64) -> Self {
        let done = matches!(stage, EncodeStage::Complete);
        Self {
            progress: if done { 1.0 } else { 0.0 },
            frames_rendered: if done { total_frames } else { 0 },
            total_frames,
            eta_secs: 0.0,
            stage,
        }
    }
}

/// Stages of an encode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodeStage {
    Preparing,
    Encoding,
    Finalizing,
    Complete,
    Failed,
}

/// Keys the engine emits in a progress block.
const PROGRESS_KEYS: &[&str] = &[
    "frame",
    "fps",
    "bitrate",
    "total_size",
    "out_time_us",
    "out_time_ms",
    "out_time",
    "dup_frames",
    "drop_frames",
    "speed",
    "progress",
];

/// Whether a stderr line belongs to a progress block.
pub fn parse_progress_line(line: &str) -> Option<(&str, &str)> {
    let (key, value) = line.trim().split_once('=')?;
    let key = key.trim();
    if PROGRESS_KEYS.contains(&key) || key.starts_with("stream_") {
        Some((key, value.trim()))
    } else {
        None
    }
}

#[derive(Debug, Default, Clone)]
pub struct ProgressState {
    pub out_time_secs: f64,
    pub frame: u64,
    pub complete: bool,
}

impl ProgressState {
    pub fn update(&mut self, key: &str, value: &str) {
        match key {
            // `out_time_ms` is reported in microseconds as well.
            "out_time_us" | "out_time_ms" => {
                if let Ok(us) = value.parse::<u64>() {
                    self.out_time_secs = us_to_secs(us);
                }
            }
            "frame" => {
                if let Ok(frame) = value.parse::<u64>() {
                    self.frame = frame;
                }
            }
            "progress" => {
                self.complete = value == "end";
            }
            _ => {}
        }
    }
}

pub fn progress_report(
    state: &ProgressState,
    total_frames: u64,
    expected_duration_secs: f64,
    elapsed_secs: f64,
) -> EncodeProgress {
    let progress = if expected_duration_secs <= 0.0 {
        0.0
    } else {
        (state.out_time_secs / expected_duration_secs).clamp(0.0, 1.0)
    };

    let frames_rendered = if state.frame > 0 {
        state.frame.min(total_frames)
    } else {
        (progress * total_frames as f64).round() as u64
    };
    let eta_secs = if progress > 0.0 {
        (elapsed_secs / progress) - elapsed_secs
    } else {
        0.0
    }
    .max(0.0);

    EncodeProgress {
        progress: if state.complete { 1.0 } else { progress },
        frames_rendered,
        total_frames,
        eta_secs,
        stage: if state.complete {
            EncodeStage::Finalizing
        } else {
            EncodeStage::Encoding
        },
    }
}
