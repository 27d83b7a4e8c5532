//! Audio duration probing.
//!
//! Streamed jobs probe over stdin first. Some containers cannot be probed
//! from a non-seekable pipe, so a failed pipe probe falls back to a
//! short-lived temp file that is removed as soon as the probe returns.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use bytes::Bytes;
use serde::Deserialize;
use stillreel_common::error::{StillreelError, StillreelResult};
use stillreel_job_model::{FulfillmentMode, MediaAsset};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::lifecycle::Workspace;

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    format: Option<ProbeFormat>,
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
}

/// Reads container duration through `ffprobe`.
#[derive(Debug, Clone)]
pub struct DurationProber {
    ffprobe: PathBuf,
    timeout: Duration,
}

impl DurationProber {
    pub fn new(ffprobe: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            ffprobe: ffprobe.into(),
            timeout,
        }
    }

    /// Duration of `audio` in seconds. Always finite and positive.
    pub async fn probe(
        &self,
        audio: &MediaAsset,
        mode: FulfillmentMode,
        workspace: &Workspace,
    ) -> StillreelResult<f64> {
        match mode {
            FulfillmentMode::DiskBacked => self.probe_via_file(audio, workspace).await,
            FulfillmentMode::Streamed => match self.run("pipe:0", Some(audio.bytes())).await {
                Ok(duration) => Ok(duration),
                Err(pipe_err) => {
                    tracing::warn!(
                        error = %pipe_err,
                        "Pipe probe failed, retrying from a temp file"
                    );
                    self.probe_via_file(audio, workspace)
                        .await
                        .map_err(|file_err| merge_attempts(&pipe_err, file_err))
                }
            },
        }
    }

    /// Probe a file that already exists on disk.
    pub async fn probe_path(&self, path: &Path) -> StillreelResult<f64> {
        self.run(&path.to_string_lossy(), None).await
    }

    async fn probe_via_file(&self, audio: &MediaAsset, workspace: &Workspace) -> StillreelResult<f64> {
        let file = workspace
            .write_temp_file("probe", audio.file_extension(), audio.as_slice())
            .await
            .map_err(|e| StillreelError::probe(format!("failed to stage probe file: {e}")))?;
        let result = self.probe_path(&file.path).await;
        if let Err(e) = workspace.release(file.id) {
            tracing::warn!(path = %file.path.display(), "Failed to remove probe file: {}", e);
        }
        result
    }

    async fn run(&self, input: &str, stdin: Option<Bytes>) -> StillreelResult<f64> {
        let mut cmd = Command::new(&self.ffprobe);
        cmd.args([
            "-v",
            "error",
            "-show_entries",
            "format=duration",
            "-of",
            "json",
            "-i",
            input,
        ])
        .stdin(if stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

        tracing::debug!(ffprobe = %self.ffprobe.display(), input, "Running ffprobe");
        let mut child = cmd.spawn().map_err(|e| {
            StillreelError::probe(format!(
                "failed to start {}: {e}",
                self.ffprobe.display()
            ))
        })?;

        let feeder = match (stdin, child.stdin.take()) {
            (Some(bytes), Some(mut pipe)) => Some(tokio::spawn(async move {
                match pipe.write_all(&bytes).await {
                    Ok(()) => {}
                    // ffprobe stops reading once it has what it needs.
                    Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {}
                    Err(e) => tracing::debug!("ffprobe stdin write failed: {}", e),
                }
                drop(pipe);
            })),
            _ => None,
        };

        let output = tokio::time::timeout(self.timeout, child.wait_with_output()).await;
        if let Some(feeder) = feeder {
            feeder.abort();
        }

        let output = match output {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Err(StillreelError::probe(format!("ffprobe I/O error: {e}"))),
            Err(_) => {
                return Err(StillreelError::probe(format!(
                    "ffprobe timed out after {}s",
                    self.timeout.as_secs()
                )))
            }
        };

        let stderr = String::from_utf8_lossy(&output.stderr);
        if !output.status.success() {
            return Err(StillreelError::probe_with_diagnostic(
                format!("ffprobe exited with {}", output.status),
                &stderr,
            ));
        }

        parse_duration(&output.stdout)
            .map_err(|message| StillreelError::probe_with_diagnostic(message, &stderr))
    }
}

/// Fold the pipe attempt's diagnostic into the fallback error.
fn merge_attempts(pipe_err: &StillreelError, file_err: StillreelError) -> StillreelError {
    let pipe_diagnostic = pipe_err.diagnostic().unwrap_or_default();
    let file_diagnostic = file_err.diagnostic().unwrap_or_default();
    let message = match &file_err {
        StillreelError::Probe { message, .. } => message.clone(),
        other => other.to_string(),
    };
    let diagnostic = [pipe_diagnostic, file_diagnostic]
        .into_iter()
        .filter(|d| !d.is_empty())
        .collect::<Vec<_>>()
        .join("\n");
    StillreelError::probe_with_diagnostic(message, &diagnostic)
}

/// Extract `format.duration` from ffprobe JSON output.
pub fn parse_duration(stdout: &[u8]) -> Result<f64, String> {
    let parsed: ProbeOutput =
        serde_json::from_slice(stdout).map_err(|e| format!("unparsable ffprobe output: {e}"))?;
    let raw = parsed
        .format
        .and_then(|f| f.duration)
        .ok_or_else(|| "ffprobe reported no duration".to_string())?;
    let duration: f64 = raw
        .trim()
        .parse()
        .map_err(|_| format!("ffprobe reported duration {raw:?}"))?;
    if !duration.is_finite() || duration <= 0.0 {
        return Err(format!("duration must be positive, got {duration}"));
    }
    Ok(duration)
}
