//! Job pipeline.
//!
//! Drives a [`Job`] through fetch, probe, encode, and delivery. Every exit
//! path fails the job when needed and tears its workspace down before
//! returning.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use stillreel_common::clock::{format_engine_secs, PhaseClock};
use stillreel_common::config::AppConfig;
use stillreel_common::error::{ErrorKind, StillreelError, StillreelResult};
use stillreel_delivery::{
    ArtifactSink, DeliveryResult, DeliverySink, DeliveryTarget, HttpArtifactSink, ResponseChannel,
};
use stillreel_effects::{build_plan, EffectConfig};
use stillreel_job_model::{AssetRole, Job, JobDefaults, JobId, JobSpec, JobState, SynthesisRequest};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::encode::EncodeOrchestrator;
use crate::fetch::{check_scheme, AssetFetcher};
use crate::lifecycle::Workspace;
use crate::probe::DurationProber;
use crate::progress::ProgressCallback;

/// A failed job: where it stopped and why.
#[derive(Debug, thiserror::Error)]
#[error("Job {job_id} failed during {phase}: {error}")]
pub struct JobFailure {
    pub job_id: JobId,
    pub phase: JobState,
    #[source]
    pub error: StillreelError,
}

impl JobFailure {
    pub fn kind(&self) -> ErrorKind {
        self.error.kind()
    }

    /// Caller-facing summary. Engine diagnostics stay in the logs.
    pub fn to_response(&self) -> ErrorResponse {
        ErrorResponse {
            job_id: self.job_id.to_string(),
            phase: self.phase.as_str().to_string(),
            kind: self.kind(),
            message: self.error.to_string(),
        }
    }
}

/// Serializable error body for callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub job_id: String,
    pub phase: String,
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&JobFailure> for ErrorResponse {
    fn from(failure: &JobFailure) -> Self {
        failure.to_response()
    }
}

/// The media synthesis pipeline. Shareable across concurrent jobs.
#[derive(Clone)]
pub struct SynthesisPipeline {
    fetcher: AssetFetcher,
    prober: DurationProber,
    encoder: EncodeOrchestrator,
    delivery: DeliverySink,
    effect: EffectConfig,
    defaults: JobDefaults,
    workspace_root: PathBuf,
}

impl SynthesisPipeline {
    /// Build from validated configuration. Invalid configuration fails here,
    /// never per request.
    pub fn from_config(config: &AppConfig) -> StillreelResult<Self> {
        config.validate()?;

        let sink: Option<Arc<dyn ArtifactSink>> = match &config.sink {
            Some(target) => Some(Arc::new(HttpArtifactSink::new(target.clone())?)),
            None => None,
        };

        Ok(Self {
            fetcher: AssetFetcher::new(&config.fetch)?,
            prober: DurationProber::new(
                config.engine.ffprobe_path.clone(),
                Duration::from_secs(config.engine.probe_timeout_secs),
            ),
            encoder: EncodeOrchestrator::new(&config.engine),
            delivery: DeliverySink::new(sink),
            effect: config.effect.clone(),
            defaults: config.defaults.clone(),
            workspace_root: config.paths.workspace_root(),
        })
    }

    /// Replace the artifact sink.
    pub fn with_sink(mut self, sink: Arc<dyn ArtifactSink>) -> Self {
        self.delivery = DeliverySink::new(Some(sink));
        self
    }

    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.encoder = self.encoder.with_progress(callback);
        self
    }

    /// Resolve a request into a new job.
    pub fn submit(&self, request: SynthesisRequest) -> StillreelResult<Job> {
        check_scheme(AssetRole::Image, &request.image_url)?;
        check_scheme(AssetRole::Audio, &request.audio_url)?;
        let job = Job::new(JobSpec::resolve(request, &self.defaults));
        tracing::info!(
            job_id = %job.id(),
            fulfillment = job.fulfillment_mode().as_str(),
            delivery = job.delivery_mode().as_str(),
            "Job submitted"
        );
        Ok(job)
    }

    /// Run `job` to completion or failure.
    pub async fn run(
        &self,
        job: &mut Job,
        channel: &mut dyn ResponseChannel,
        cancel: &CancellationToken,
    ) -> Result<DeliveryResult, JobFailure> {
        let span = tracing::info_span!("job", job_id = %job.id());
        self.run_inner(job, channel, cancel).instrument(span).await
    }

    async fn run_inner(
        &self,
        job: &mut Job,
        channel: &mut dyn ResponseChannel,
        cancel: &CancellationToken,
    ) -> Result<DeliveryResult, JobFailure> {
        let mut clock = PhaseClock::start();

        let workspace = match Workspace::create(job.id(), &self.workspace_root).await {
            Ok(workspace) => workspace,
            Err(error) => return Err(self.fail(job, error)),
        };

        let result = self.drive(job, &workspace, channel, cancel, &mut clock).await;
        job.drop_assets();

        let outcome = match result {
            Ok(delivered) => Ok(delivered),
            Err(error) => Err(self.fail(job, error)),
        };

        // Leaks are logged by teardown and never replace the job outcome.
        if workspace.teardown().is_err() {
            tracing::debug!("Teardown left resources behind");
        }

        match &outcome {
            Ok(_) => tracing::info!(
                started_at = clock.epoch_wall(),
                elapsed_secs = clock.elapsed_secs(),
                phases = %clock.summary(),
                "Job completed"
            ),
            Err(failure) => tracing::warn!(
                kind = %failure.kind(),
                phase = %failure.phase,
                diagnostic = failure.error.diagnostic().unwrap_or(""),
                "Job failed: {}",
                failure.error
            ),
        }
        outcome
    }

    async fn drive(
        &self,
        job: &mut Job,
        workspace: &Workspace,
        channel: &mut dyn ResponseChannel,
        cancel: &CancellationToken,
        clock: &mut PhaseClock,
    ) -> StillreelResult<DeliveryResult> {
        job.advance(JobState::Fetching)?;
        tracing::info!(state = %job.state(), "Fetching inputs");
        let spec = job.spec().clone();
        let assets = cancellable(
            cancel,
            JobState::Fetching,
            self.fetcher.fetch(&spec.image_url, &spec.audio_url),
        )
        .await?;
        job.attach_assets(assets.image, assets.audio)?;
        clock.lap(JobState::Fetching.as_str());

        job.advance(JobState::Probing)?;
        tracing::info!(state = %job.state(), "Probing duration");
        let audio = job
            .audio_asset()
            .cloned()
            .ok_or_else(|| StillreelError::invalid_state("audio asset missing after fetch"))?;
        let duration = cancellable(
            cancel,
            JobState::Probing,
            self.prober.probe(&audio, job.fulfillment_mode(), workspace),
        )
        .await?;
        job.record_duration(duration)?;
        tracing::info!(duration_secs = %format_engine_secs(duration), "Duration probed");
        clock.lap(JobState::Probing.as_str());

        job.advance(JobState::Encoding)?;
        tracing::info!(state = %job.state(), "Encoding");
        let plan = build_plan(duration, &self.effect)?;
        job.attach_plan(plan.clone())?;
        let image = job
            .image_asset()
            .cloned()
            .ok_or_else(|| StillreelError::invalid_state("image asset missing after fetch"))?;
        let artifact = self
            .encoder
            .encode(&image, &audio, &plan, job.fulfillment_mode(), workspace, cancel)
            .await?;
        drop(image);
        drop(audio);
        job.drop_assets();
        clock.lap(JobState::Encoding.as_str());

        job.advance(JobState::Delivering)?;
        tracing::info!(
            state = %job.state(),
            mode = job.delivery_mode().as_str(),
            size = artifact.size_bytes(),
            "Delivering"
        );
        let target = DeliveryTarget {
            mode: spec.delivery,
            filename: spec.filename.clone(),
            destination: spec.destination.clone(),
        };
        let delivered = cancellable(
            cancel,
            JobState::Delivering,
            async {
                self.delivery
                    .deliver(&artifact, &target, channel)
                    .await
                    .map_err(StillreelError::from)
            },
        )
        .await?;
        clock.lap(JobState::Delivering.as_str());

        job.advance(JobState::Completed)?;
        Ok(delivered)
    }

    fn fail(&self, job: &mut Job, error: StillreelError) -> JobFailure {
        let phase = job.state();
        job.fail();
        JobFailure {
            job_id: job.id(),
            phase,
            error,
        }
    }
}

/// Run `fut` unless the job is cancelled first.
async fn cancellable<T, F>(cancel: &CancellationToken, phase: JobState, fut: F) -> StillreelResult<T>
where
    F: std::future::Future<Output = StillreelResult<T>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(StillreelError::cancelled(phase.as_str())),
        result = fut => result,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_response_hides_diagnostic() {
        let failure = JobFailure {
            job_id: JobId::new(),
            phase: JobState::Encoding,
            error: StillreelError::encode_with_diagnostic(
                "ffmpeg exited with exit status: 1",
                "[libx264 @ 0x5599] broken\nConversion failed!",
            ),
        };
        let response = failure.to_response();
        assert_eq!(response.phase, "encoding");
        assert_eq!(response.kind, ErrorKind::EncodeFailed);
        assert!(!response.message.contains("libx264"));

        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["kind"], "EncodeFailed");
        assert!(json.get("jobId").is_some());
    }

    #[test]
    fn test_submit_rejects_non_http_sources() {
        let pipeline = SynthesisPipeline::from_config(&AppConfig::default()).unwrap();
        let request = SynthesisRequest::new(
            url::Url::parse("file:///tmp/a.jpg").unwrap(),
            url::Url::parse("https://cdn.example.com/a.mp3").unwrap(),
        );
        let err = pipeline.submit(request).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::FetchFailed);
    }

    #[test]
    fn test_invalid_effect_config_fails_at_startup() {
        let mut config = AppConfig::default();
        config.effect.zoom_ceiling = 0.5;
        assert!(SynthesisPipeline::from_config(&config).is_err());
    }

    #[tokio::test]
    async fn test_cancellable_prefers_cancellation() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result: StillreelResult<()> =
            cancellable(&cancel, JobState::Probing, async { Ok(()) }).await;
        assert!(matches!(result, Err(StillreelError::Cancelled { .. })));
    }
}
