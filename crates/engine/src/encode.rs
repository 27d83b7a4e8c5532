//! Encode orchestration.
//!
//! Both fulfillment modes run the same `ffmpeg` filter and output arguments;
//! they differ only in how inputs arrive and where output goes.
//!
//! - Disk-backed: inputs are workspace temp files, output is a reserved
//!   workspace path.
//! - Streamed: the image is fed on stdin, the audio through a named pipe,
//!   and the output is read from stdout into memory.
//!
//! Feeders and drains are independent tasks so the engine never stalls on a
//! full pipe. The exit status decides success; partial output from a failed
//! run is discarded.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use stillreel_common::config::EngineConfig;
use stillreel_common::error::{StillreelError, StillreelResult};
use stillreel_effects::EffectPlan;
use stillreel_job_model::{FulfillmentMode, MediaAsset, VideoArtifact};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::lifecycle::Workspace;
use crate::progress::{
    parse_progress_line, progress_report, EncodeProgress, EncodeStage, ProgressCallback,
    ProgressState,
};

/// Engine flags shared by every invocation.
const BASE_FLAGS: &[&str] = &[
    "-y",
    "-hide_banner",
    "-loglevel",
    "error",
    "-nostats",
    "-progress",
    "pipe:2",
];

/// Diagnostic lines kept from stderr while the engine runs.
const MAX_DIAGNOSTIC_LINES: usize = 64;

/// How long drains may take to finish after the engine exits.
const DRAIN_GRACE: Duration = Duration::from_secs(5);

const STALL_WARNING: Duration = Duration::from_secs(10);

/// Inputs and outputs wired to one engine run.
#[derive(Default)]
struct EngineIo {
    stdin: Option<Bytes>,
    fifo: Option<(PathBuf, Bytes)>,
    capture_stdout: bool,
}

enum Outcome {
    Exited(std::io::Result<ExitStatus>),
    PipeNeverOpened,
    TimedOut,
    Cancelled,
}

/// Runs `ffmpeg` for a job, bounded by a shared permit pool.
#[derive(Clone)]
pub struct EncodeOrchestrator {
    ffmpeg: PathBuf,
    permits: Arc<Semaphore>,
    timeout: Duration,
    max_output_bytes: u64,
    pipe_open_timeout: Duration,
    progress: Option<ProgressCallback>,
}

impl EncodeOrchestrator {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            ffmpeg: config.ffmpeg_path.clone(),
            permits: Arc::new(Semaphore::new(config.max_concurrent_encodes.max(1))),
            timeout: Duration::from_secs(config.encode_timeout_secs),
            max_output_bytes: config.max_output_bytes,
            pipe_open_timeout: Duration::from_millis(config.pipe_open_timeout_ms),
            progress: None,
        }
    }

    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress = Some(callback);
        self
    }

    /// Encoder slots currently free.
    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }

    /// Render `image` + `audio` according to `plan`.
    pub async fn encode(
        &self,
        image: &MediaAsset,
        audio: &MediaAsset,
        plan: &EffectPlan,
        mode: FulfillmentMode,
        workspace: &Workspace,
        cancel: &CancellationToken,
    ) -> StillreelResult<VideoArtifact> {
        let _permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(StillreelError::cancelled("encoding")),
            permit = self.permits.clone().acquire_owned() => permit
                .map_err(|_| StillreelError::encode("encoder pool closed"))?,
        };

        self.report(EncodeProgress::at_stage(EncodeStage::Preparing, plan.total_frames));
        let result = match mode {
            FulfillmentMode::DiskBacked => {
                self.encode_disk(image, audio, plan, workspace, cancel).await
            }
            FulfillmentMode::Streamed => {
                self.encode_streamed(image, audio, plan, workspace, cancel)
                    .await
            }
        };

        match &result {
            Ok(artifact) => {
                tracing::info!(
                    mode = mode.as_str(),
                    size = artifact.size_bytes(),
                    "Encode finished"
                );
                self.report(EncodeProgress::at_stage(EncodeStage::Complete, plan.total_frames));
            }
            Err(_) => {
                self.report(EncodeProgress::at_stage(EncodeStage::Failed, plan.total_frames));
            }
        }
        result
    }

    async fn encode_disk(
        &self,
        image: &MediaAsset,
        audio: &MediaAsset,
        plan: &EffectPlan,
        workspace: &Workspace,
        cancel: &CancellationToken,
    ) -> StillreelResult<VideoArtifact> {
        let image_file = workspace
            .write_temp_file("image", image.file_extension(), image.as_slice())
            .await?;
        let audio_file = workspace
            .write_temp_file("audio", audio.file_extension(), audio.as_slice())
            .await?;
        let output = workspace.reserve_path("output", "mp4");

        let args = engine_args(
            plan,
            &image_file.path.to_string_lossy(),
            &audio_file.path.to_string_lossy(),
            false,
            &output.path.to_string_lossy(),
        );
        let run = self
            .run_engine(args, EngineIo::default(), plan, workspace, cancel)
            .await;

        release_logged(workspace, image_file.id);
        release_logged(workspace, audio_file.id);

        if let Err(e) = run {
            release_logged(workspace, output.id);
            return Err(e);
        }

        let size_bytes = match tokio::fs::metadata(&output.path).await {
            Ok(meta) => meta.len(),
            Err(_) => 0,
        };
        if size_bytes == 0 {
            release_logged(workspace, output.id);
            return Err(StillreelError::encode("engine exited cleanly but wrote no output"));
        }

        Ok(VideoArtifact::OnDisk {
            path: output.path,
            size_bytes,
        })
    }

    #[cfg(unix)]
    async fn encode_streamed(
        &self,
        image: &MediaAsset,
        audio: &MediaAsset,
        plan: &EffectPlan,
        workspace: &Workspace,
        cancel: &CancellationToken,
    ) -> StillreelResult<VideoArtifact> {
        let fifo = workspace.create_fifo("audio")?;

        let args = engine_args(
            plan,
            "pipe:0",
            &fifo.path.to_string_lossy(),
            true,
            "pipe:1",
        );
        let io = EngineIo {
            stdin: Some(image.bytes()),
            fifo: Some((fifo.path.clone(), audio.bytes())),
            capture_stdout: true,
        };
        let run = self.run_engine(args, io, plan, workspace, cancel).await;
        release_logged(workspace, fifo.id);

        let bytes = run?.unwrap_or_default();
        if bytes.is_empty() {
            return Err(StillreelError::encode("engine exited cleanly but wrote no output"));
        }
        workspace.track_buffer("output", bytes.len());
        Ok(VideoArtifact::InMemory { bytes })
    }

    #[cfg(not(unix))]
    async fn encode_streamed(
        &self,
        _image: &MediaAsset,
        _audio: &MediaAsset,
        _plan: &EffectPlan,
        _workspace: &Workspace,
        _cancel: &CancellationToken,
    ) -> StillreelResult<VideoArtifact> {
        Err(StillreelError::encode(
            "streamed mode needs named pipes, which are unavailable on this platform",
        ))
    }

    async fn run_engine(
        &self,
        args: Vec<String>,
        io: EngineIo,
        plan: &EffectPlan,
        workspace: &Workspace,
        cancel: &CancellationToken,
    ) -> StillreelResult<Option<Bytes>> {
        tracing::debug!(ffmpeg = %self.ffmpeg.display(), args = ?args, "Running ffmpeg");

        let mut cmd = Command::new(&self.ffmpeg);
        cmd.args(&args)
            .stdin(if io.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(if io.capture_stdout {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let start = Instant::now();
        let mut child = cmd.spawn().map_err(|e| {
            StillreelError::encode(format!("failed to start {}: {e}", self.ffmpeg.display()))
        })?;
        let process = workspace.track_process("ffmpeg", child.id());

        tracing::info!(
            pid = child.id(),
            args_len = args.len(),
            total_frames = plan.total_frames,
            "ffmpeg process started"
        );

        let stdin_feeder = match (io.stdin, child.stdin.take()) {
            (Some(bytes), Some(stdin)) => Some(tokio::spawn(feed_stdin(stdin, bytes))),
            _ => None,
        };
        let mut fifo_feeder = io
            .fifo
            .map(|(path, bytes)| spawn_fifo_feeder(path, bytes, self.pipe_open_timeout));

        let max_output = self.max_output_bytes;
        let stdout_task = child
            .stdout
            .take()
            .map(|stdout| tokio::spawn(drain_stdout(stdout, max_output)));
        let stderr_task = child.stderr.take().map(|stderr| {
            tokio::spawn(drain_stderr(
                stderr,
                self.progress.clone(),
                plan.total_frames,
                plan.duration_secs,
                start,
            ))
        });

        let outcome = tokio::select! {
            status = child.wait() => Outcome::Exited(status),
            _ = pipe_open_failed(&mut fifo_feeder) => Outcome::PipeNeverOpened,
            _ = tokio::time::sleep(self.timeout) => Outcome::TimedOut,
            _ = cancel.cancelled() => Outcome::Cancelled,
        };

        let exit = match outcome {
            Outcome::Exited(status) => status
                .map_err(|e| StillreelError::encode(format!("failed to wait on ffmpeg: {e}"))),
            Outcome::PipeNeverOpened => {
                tracing::warn!(
                    timeout_ms = self.pipe_open_timeout.as_millis() as u64,
                    "ffmpeg never opened the audio pipe, killing"
                );
                kill(&mut child).await;
                Err(StillreelError::encode("audio pipe was never opened by the engine"))
            }
            Outcome::TimedOut => {
                tracing::warn!(timeout_secs = self.timeout.as_secs(), "ffmpeg timed out, killing");
                kill(&mut child).await;
                Err(StillreelError::encode(format!(
                    "ffmpeg timed out after {}s",
                    self.timeout.as_secs()
                )))
            }
            Outcome::Cancelled => {
                tracing::info!("Encode cancelled, killing ffmpeg");
                kill(&mut child).await;
                Err(StillreelError::cancelled("encoding"))
            }
        };

        // Input left unwritten once the engine is gone is of no use.
        if let Some(feeder) = &stdin_feeder {
            feeder.abort();
        }
        if let Some(feeder) = &fifo_feeder {
            feeder.abort();
        }

        let diagnostic = match stderr_task {
            Some(task) => join_with_grace(task).await.unwrap_or_default(),
            None => String::new(),
        };
        let stdout = match stdout_task {
            Some(task) => join_with_grace(task).await,
            None => None,
        };
        release_logged(workspace, process);

        let status = match exit {
            Ok(status) => status,
            Err(StillreelError::Encode { message, .. }) => {
                return Err(StillreelError::encode_with_diagnostic(message, &diagnostic))
            }
            Err(e) => return Err(e),
        };

        if let Some(Err(message)) = &stdout {
            return Err(StillreelError::encode_with_diagnostic(message.clone(), &diagnostic));
        }

        if !status.success() {
            tracing::debug!(diagnostic = %diagnostic, "ffmpeg failed");
            return Err(StillreelError::encode_with_diagnostic(
                format!("ffmpeg exited with {status}"),
                &diagnostic,
            ));
        }

        tracing::debug!(elapsed_secs = start.elapsed().as_secs_f64(), "ffmpeg exited cleanly");
        Ok(stdout.and_then(Result::ok))
    }

    fn report(&self, progress: EncodeProgress) {
        if let Some(cb) = &self.progress {
            cb(progress);
        }
    }
}

/// Full argument list for one engine run. The output target comes last.
pub fn engine_args(
    plan: &EffectPlan,
    image_input: &str,
    audio_input: &str,
    streamed: bool,
    output: &str,
) -> Vec<String> {
    let mut args: Vec<String> = BASE_FLAGS.iter().map(|s| s.to_string()).collect();
    if streamed {
        args.push("-f".to_string());
        args.push("image2pipe".to_string());
    } else {
        args.push("-nostdin".to_string());
    }
    args.extend(plan.image_input_args());
    args.extend([
        "-i".to_string(),
        image_input.to_string(),
        "-i".to_string(),
        audio_input.to_string(),
    ]);
    args.extend(plan.output_args());
    args.push(output.to_string());
    args
}

/// Check whether a binary is runnable, either as a path or on `PATH`.
pub fn command_exists(binary: &std::path::Path) -> bool {
    if binary.components().count() > 1 {
        return binary.is_file();
    }
    std::process::Command::new("sh")
        .arg("-c")
        .arg(format!("command -v {} >/dev/null 2>&1", binary.display()))
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}

fn release_logged(workspace: &Workspace, id: crate::lifecycle::ResourceId) {
    if let Err(e) = workspace.release(id) {
        tracing::warn!(?id, "Failed to release resource: {}", e);
    }
}

async fn kill(child: &mut Child) {
    if let Err(e) = child.start_kill() {
        tracing::debug!("ffmpeg kill failed: {}", e);
    }
    if let Err(e) = child.wait().await {
        tracing::warn!("Failed to reap ffmpeg: {}", e);
    }
}

async fn join_with_grace<T>(mut task: JoinHandle<T>) -> Option<T> {
    match tokio::time::timeout(DRAIN_GRACE, &mut task).await {
        Ok(Ok(value)) => Some(value),
        Ok(Err(e)) => {
            tracing::debug!("Drain task failed: {}", e);
            None
        }
        Err(_) => {
            task.abort();
            None
        }
    }
}

async fn feed_stdin(mut stdin: ChildStdin, bytes: Bytes) {
    match stdin.write_all(&bytes).await {
        Ok(()) => {
            if let Err(e) = stdin.shutdown().await {
                tracing::debug!("Closing ffmpeg stdin failed: {}", e);
            }
        }
        Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {
            tracing::debug!("ffmpeg closed stdin early");
        }
        Err(e) => tracing::debug!("Writing ffmpeg stdin failed: {}", e),
    }
}

/// Resolves only when the audio pipe feeder gave up waiting for a reader.
async fn pipe_open_failed(feeder: &mut Option<JoinHandle<Result<(), String>>>) {
    let failed = match feeder.as_mut() {
        Some(handle) => matches!(handle.await, Ok(Err(_))),
        None => false,
    };
    if !failed {
        // A finished handle must not be polled again.
        *feeder = None;
        std::future::pending::<()>().await;
    }
}

/// Write `bytes` into the named pipe at `path`. Fails only when no reader
/// opens the pipe within `open_timeout`.
#[cfg(unix)]
fn spawn_fifo_feeder(
    path: PathBuf,
    bytes: Bytes,
    open_timeout: Duration,
) -> JoinHandle<Result<(), String>> {
    tokio::spawn(async move {
        use tokio::net::unix::pipe;

        let deadline = Instant::now() + open_timeout;
        // Opening the write side fails with ENXIO until the engine opens the read side.
        let mut sender = loop {
            match pipe::OpenOptions::new().open_sender(&path) {
                Ok(sender) => break sender,
                Err(e) if e.raw_os_error() == Some(libc::ENXIO) && Instant::now() < deadline => {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), "Failed to open audio pipe: {}", e);
                    return Err(format!("failed to open audio pipe: {e}"));
                }
            }
        };

        match sender.write_all(&bytes).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {
                tracing::debug!("ffmpeg closed the audio pipe early");
            }
            Err(e) => tracing::debug!("Writing audio pipe failed: {}", e),
        }
        Ok(())
    })
}

#[cfg(not(unix))]
fn spawn_fifo_feeder(
    _path: PathBuf,
    _bytes: Bytes,
    _open_timeout: Duration,
) -> JoinHandle<Result<(), String>> {
    tokio::spawn(async { Ok(()) })
}

async fn drain_stdout(mut stdout: ChildStdout, max_bytes: u64) -> Result<Bytes, String> {
    let mut output: Vec<u8> = Vec::new();
    let mut chunk = vec![0u8; 64 * 1024];
    loop {
        match stdout.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => {
                if (output.len() + n) as u64 > max_bytes {
                    return Err(format!("encoded output exceeds limit of {max_bytes} bytes"));
                }
                output.extend_from_slice(&chunk[..n]);
            }
            Err(e) => return Err(format!("failed to read ffmpeg output: {e}")),
        }
    }
    Ok(Bytes::from(output))
}

async fn drain_stderr(
    stderr: ChildStderr,
    progress: Option<ProgressCallback>,
    total_frames: u64,
    expected_duration_secs: f64,
    start: Instant,
) -> String {
    let mut reader = BufReader::new(stderr);
    let mut raw = Vec::new();
    let mut diagnostic: VecDeque<String> = VecDeque::new();

    let mut state = ProgressState::default();
    let mut last_progress_secs = 0.0f64;
    let mut last_progress_wall = Instant::now();

    loop {
        raw.clear();
        match reader.read_until(b'\n', &mut raw).await {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                diagnostic.push_back(format!("<failed to read ffmpeg stderr: {e}>"));
                break;
            }
        }
        let line = String::from_utf8_lossy(&raw);
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let Some((key, value)) = parse_progress_line(trimmed) else {
            if diagnostic.len() == MAX_DIAGNOSTIC_LINES {
                diagnostic.pop_front();
            }
            diagnostic.push_back(trimmed.to_string());
            continue;
        };

        state.update(key, value);
        if key != "progress" {
            continue;
        }

        if state.out_time_secs > last_progress_secs + 0.001 {
            last_progress_secs = state.out_time_secs;
            last_progress_wall = Instant::now();
        }
        let report = progress_report(
            &state,
            total_frames,
            expected_duration_secs,
            start.elapsed().as_secs_f64(),
        );
        tracing::debug!(
            progress = report.progress,
            frames = report.frames_rendered,
            eta_secs = report.eta_secs,
            "ffmpeg progress"
        );
        if let Some(cb) = &progress {
            cb(report);
        }
        if last_progress_wall.elapsed() >= STALL_WARNING {
            tracing::warn!(
                out_time_secs = state.out_time_secs,
                elapsed_secs = start.elapsed().as_secs_f64(),
                "No ffmpeg progress advancement for 10s"
            );
            last_progress_wall = Instant::now();
        }
    }

    Vec::from(diagnostic).join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use stillreel_effects::{build_plan, EffectConfig};

    fn plan() -> EffectPlan {
        build_plan(10.0, &EffectConfig::default()).unwrap()
    }

    fn after<'a>(args: &'a [String], flag: &str) -> &'a [String] {
        let i = args.iter().position(|a| a == flag).unwrap();
        &args[i..]
    }

    #[test]
    fn test_disk_args() {
        let args = engine_args(&plan(), "/tmp/a-image.jpg", "/tmp/a-audio.mp3", false, "/tmp/a-output.mp4");
        assert!(args.contains(&"-nostdin".to_string()));
        assert!(!args.contains(&"image2pipe".to_string()));
        assert_eq!(args.last().unwrap(), "/tmp/a-output.mp4");
        let inputs = after(&args, "-framerate");
        assert_eq!(inputs[1], "25");
        assert_eq!(inputs[2..6], ["-i", "/tmp/a-image.jpg", "-i", "/tmp/a-audio.mp3"]);
    }

    #[test]
    fn test_streamed_args() {
        let args = engine_args(&plan(), "pipe:0", "/tmp/a-audio.fifo", true, "pipe:1");
        assert!(!args.contains(&"-nostdin".to_string()));
        let image = after(&args, "image2pipe");
        assert_eq!(image[1..5], ["-framerate", "25", "-i", "pipe:0"]);
        assert_eq!(args.last().unwrap(), "pipe:1");
    }

    #[test]
    fn test_modes_share_filter_and_output_args() {
        let plan = plan();
        let disk = engine_args(&plan, "img", "aud", false, "out.mp4");
        let streamed = engine_args(&plan, "pipe:0", "aud.fifo", true, "pipe:1");
        let tail = |args: &[String]| {
            let start = args.iter().position(|a| a == "-filter_complex").unwrap();
            args[start..args.len() - 1].to_vec()
        };
        assert_eq!(tail(&disk), tail(&streamed));
        assert_eq!(tail(&disk), plan.output_args());
    }

    #[tokio::test]
    async fn test_pipe_open_failure_resolves_only_on_error() {
        let mut failed: Option<JoinHandle<Result<(), String>>> =
            Some(tokio::spawn(async { Err("no reader".to_string()) }));
        tokio::time::timeout(Duration::from_secs(1), pipe_open_failed(&mut failed))
            .await
            .unwrap();

        let mut fed: Option<JoinHandle<Result<(), String>>> = Some(tokio::spawn(async { Ok(()) }));
        let waited =
            tokio::time::timeout(Duration::from_millis(200), pipe_open_failed(&mut fed)).await;
        assert!(waited.is_err());
        assert!(fed.is_none());

        let mut absent: Option<JoinHandle<Result<(), String>>> = None;
        let waited =
            tokio::time::timeout(Duration::from_millis(50), pipe_open_failed(&mut absent)).await;
        assert!(waited.is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_fifo_feeder_gives_up_without_reader() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audio.fifo");
        let c_path = std::ffi::CString::new(path.to_string_lossy().as_bytes()).unwrap();
        assert_eq!(unsafe { libc::mkfifo(c_path.as_ptr(), 0o600) }, 0);

        let result = spawn_fifo_feeder(path, Bytes::from_static(b"audio"), Duration::from_millis(100))
            .await
            .unwrap();
        assert!(result.unwrap_err().contains("audio pipe"));
    }

    #[test]
    fn test_command_exists_for_paths() {
        assert!(!command_exists(std::path::Path::new("/definitely/not/here/ffmpeg")));
        assert!(command_exists(std::path::Path::new("sh")));
    }
}
