//! Stillreel Job Model
//!
//! Defines the core data contracts for a synthesis job:
//! - **Request:** What the caller asked for (sources, fulfillment, delivery)
//! - **Assets:** Fetched image/audio buffers with size and media type hints
//! - **Job:** Per-request state machine from creation to completion
//! - **Artifact:** The finished video, either in memory or on disk
//!
//! This crate is pure data: no I/O, no subprocesses.

pub mod artifact;
pub mod asset;
pub mod job;
pub mod request;

pub use artifact::*;
pub use asset::*;
pub use job::*;
pub use request::*;
