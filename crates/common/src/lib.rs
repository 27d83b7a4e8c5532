//! Stillreel Common Utilities
//!
//! Shared infrastructure for all Stillreel crates:
//! - Error types, error kinds, and result aliases
//! - Phase timing and frame arithmetic
//! - Tracing/logging initialization
//! - Configuration loading

pub mod clock;
pub mod config;
pub mod error;
pub mod logging;

pub use clock::*;
pub use config::*;
pub use error::*;
