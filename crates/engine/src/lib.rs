//! Stillreel Engine
//!
//! Runs one synthesis job end to end:
//! - **Fetch:** Download the image and audio concurrently, with size caps
//! - **Probe:** Read the audio duration through `ffprobe`, pipe first, file as fallback
//! - **Encode:** Drive `ffmpeg` in disk-backed or fully streamed mode
//! - **Lifecycle:** Track every transient resource and release it exactly once
//! - **Pipeline:** Sequence the phases and hand the result to delivery

pub mod encode;
pub mod fetch;
pub mod lifecycle;
pub mod pipeline;
pub mod probe;
pub mod progress;

pub use encode::{command_exists, EncodeOrchestrator};
pub use fetch::{AssetFetcher, FetchedAssets};
pub use lifecycle::{ReleaseReport, ResourceId, ResourceKind, TrackedPath, Workspace};
pub use pipeline::{ErrorResponse, JobFailure, SynthesisPipeline};
pub use probe::DurationProber;
pub use progress::{EncodeProgress, EncodeStage, ProgressCallback};
