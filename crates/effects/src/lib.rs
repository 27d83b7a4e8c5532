//! Stillreel Effects: the effect plan builder
//!
//! Turns a target duration and static configuration into everything the
//! encoding engine needs to animate a still image:
//! - **Zoom:** A clamped, per-frame zoom curve expressed for `zoompan`
//! - **Vertical Framing:** Cover-scale and centre-crop into a 9:16 frame
//! - **Plan:** The full video filter chain plus codec/container arguments
//!
//! This crate is pure computation. No I/O, no subprocesses.
//! All inputs are data; all outputs are data.

pub mod plan;
pub mod vertical;
pub mod zoom;

pub use plan::{build_plan, EffectConfig, EffectPlan, PlanError};
pub use vertical::VerticalFrame;
pub use zoom::ZoomFunction;
