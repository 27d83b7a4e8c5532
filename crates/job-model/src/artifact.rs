//! The finished video artifact.

use std::path::PathBuf;

use bytes::Bytes;

/// Content type of every artifact the pipeline produces.
pub const VIDEO_CONTENT_TYPE: &str = "video/mp4";

/// Encoded output, held where the fulfillment mode put it.
#[derive(Debug, Clone)]
pub enum VideoArtifact {
    /// Captured from the engine's stdout.
    InMemory { bytes: Bytes },
    /// Written by the engine to a workspace temp file.
    OnDisk { path: PathBuf, size_bytes: u64 },
}

impl VideoArtifact {
    pub fn size_bytes(&self) -> u64 {
        match self {
            Self::InMemory { bytes } => bytes.len() as u64,
            Self::OnDisk { size_bytes, .. } => *size_bytes,
        }
    }

    pub fn content_type(&self) -> &'static str {
        VIDEO_CONTENT_TYPE
    }

    pub fn disk_path(&self) -> Option<&PathBuf> {
        match self {
            Self::OnDisk { path, .. } => Some(path),
            Self::InMemory { .. } => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.size_bytes() == 0
    }
}
