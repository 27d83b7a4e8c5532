//! Delivery strategies.
//!
//! Inline and download transfers stream the artifact to a [`ResponseChannel`]
//! in fixed-size chunks; uploads forward it to an [`ArtifactSink`]. A
//! download always removes the on-disk artifact once the transfer ends,
//! whether the caller received it or went away.

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use stillreel_job_model::{DeliveryMode, VideoArtifact};
use tokio::io::AsyncReadExt;

use crate::channel::{ResponseChannel, ResponseHead};
use crate::sink::{ArtifactSink, ArtifactUpload, SinkError};

/// Body chunk size for channel transfers.
pub const CHUNK_SIZE: usize = 64 * 1024;

/// Where a finished artifact goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryTarget {
    pub mode: DeliveryMode,
    pub filename: String,
    pub destination: Option<String>,
}

/// Acknowledgment returned to the caller after an upload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadAck {
    pub message: String,
    pub sink_response: serde_json::Value,
}

/// Outcome of a successful delivery.
#[derive(Debug, Clone, PartialEq)]
pub enum DeliveryResult {
    Inline { bytes: u64 },
    Download { filename: String, bytes: u64 },
    Uploaded(UploadAck),
}

/// Errors from delivery.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("Client disconnected: {0}")]
    Disconnected(std::io::Error),

    #[error("Failed to read artifact: {0}")]
    Artifact(std::io::Error),

    #[error(transparent)]
    Sink(#[from] SinkError),
}

/// Routes artifacts to their delivery target.
#[derive(Clone, Default)]
pub struct DeliverySink {
    sink: Option<Arc<dyn ArtifactSink>>,
}

impl DeliverySink {
    pub fn new(sink: Option<Arc<dyn ArtifactSink>>) -> Self {
        Self { sink }
    }

    pub async fn deliver(
        &self,
        artifact: &VideoArtifact,
        target: &DeliveryTarget,
        channel: &mut dyn ResponseChannel,
    ) -> Result<DeliveryResult, DeliveryError> {
        match target.mode {
            DeliveryMode::InlineStream => {
                let bytes = send(artifact, None, channel).await?;
                tracing::info!(bytes, "Artifact streamed inline");
                Ok(DeliveryResult::Inline { bytes })
            }
            DeliveryMode::FileDownload => {
                let sent = send(artifact, Some(target.filename.clone()), channel).await;
                if let Some(path) = artifact.disk_path() {
                    remove_artifact(path).await;
                }
                let bytes = sent?;
                tracing::info!(bytes, filename = %target.filename, "Artifact downloaded");
                Ok(DeliveryResult::Download {
                    filename: target.filename.clone(),
                    bytes,
                })
            }
            DeliveryMode::ExternalUpload => {
                let sink = self.sink.as_ref().ok_or(SinkError::NotConfigured)?;
                let payload = match artifact {
                    VideoArtifact::InMemory { bytes } => bytes.clone(),
                    VideoArtifact::OnDisk { path, .. } => tokio::fs::read(path)
                        .await
                        .map_err(DeliveryError::Artifact)?
                        .into(),
                };
                let size = payload.len();
                let sink_response = sink
                    .upload(ArtifactUpload {
                        payload,
                        filename: target.filename.clone(),
                        content_type: artifact.content_type().to_string(),
                        destination: target.destination.clone(),
                    })
                    .await?;
                tracing::info!(size, filename = %target.filename, "Artifact uploaded");
                Ok(DeliveryResult::Uploaded(UploadAck {
                    message: format!("Uploaded {} ({} bytes)", target.filename, size),
                    sink_response,
                }))
            }
        }
    }
}

/// Stream the artifact through `channel` and flush. Returns bytes written.
async fn send(
    artifact: &VideoArtifact,
    attachment_filename: Option<String>,
    channel: &mut dyn ResponseChannel,
) -> Result<u64, DeliveryError> {
    channel
        .begin(ResponseHead {
            content_type: artifact.content_type().to_string(),
            content_length: artifact.size_bytes(),
            attachment_filename,
        })
        .await
        .map_err(DeliveryError::Disconnected)?;

    let mut written = 0u64;
    match artifact {
        VideoArtifact::InMemory { bytes } => {
            for chunk in bytes.chunks(CHUNK_SIZE) {
                channel
                    .write_chunk(chunk)
                    .await
                    .map_err(DeliveryError::Disconnected)?;
                written += chunk.len() as u64;
            }
        }
        VideoArtifact::OnDisk { path, .. } => {
            let mut file = tokio::fs::File::open(path)
                .await
                .map_err(DeliveryError::Artifact)?;
            let mut buf = vec![0u8; CHUNK_SIZE];
            loop {
                let n = file.read(&mut buf).await.map_err(DeliveryError::Artifact)?;
                if n == 0 {
                    break;
                }
                channel
                    .write_chunk(&buf[..n])
                    .await
                    .map_err(DeliveryError::Disconnected)?;
                written += n as u64;
            }
        }
    }

    channel.finish().await.map_err(DeliveryError::Disconnected)?;
    Ok(written)
}

async fn remove_artifact(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => tracing::debug!(?path, "Removed downloaded artifact"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(?path, "Failed to remove downloaded artifact: {}", e),
    }
}
