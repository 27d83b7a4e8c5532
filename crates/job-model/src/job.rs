//! Per-request job state.
//!
//! A job moves strictly forward through
//! `Created → Fetching → Probing → Encoding → Delivering → Completed`
//! and may drop to `Failed` from any non-terminal state. Nothing skips
//! ahead and nothing moves backward.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use stillreel_effects::EffectPlan;

use crate::asset::MediaAsset;
use crate::request::{DeliveryMode, FulfillmentMode, JobSpec};

/// Unique job identifier. Namespaces every transient resource of the job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(uuid::Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    /// Name for a transient resource owned by this job.
    pub fn resource_name(&self, label: &str, ext: &str) -> String {
        if ext.is_empty() {
            format!("{}-{label}", self.0)
        } else {
            format!("{}-{label}.{ext}", self.0)
        }
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Lifecycle states of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Created,
    Fetching,
    Probing,
    Encoding,
    Delivering,
    Completed,
    Failed,
}

impl JobState {
    /// The only state reachable from this one on success.
    pub fn next(self) -> Option<JobState> {
        match self {
            Self::Created => Some(Self::Fetching),
            Self::Fetching => Some(Self::Probing),
            Self::Probing => Some(Self::Encoding),
            Self::Encoding => Some(Self::Delivering),
            Self::Delivering => Some(Self::Completed),
            Self::Completed | Self::Failed => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Fetching => "fetching",
            Self::Probing => "probing",
            Self::Encoding => "encoding",
            Self::Delivering => "delivering",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A recorded state change.
#[derive(Debug, Clone, Serialize)]
pub struct Transition {
    pub from: JobState,
    pub to: JobState,
    pub at: DateTime<Utc>,
}

/// Errors raised by illegal job mutations.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StateError {
    #[error("Illegal job transition {from} -> {to}")]
    IllegalTransition { from: JobState, to: JobState },

    #[error("Job is already terminal ({state})")]
    Terminal { state: JobState },

    #[error("{field} is already set and immutable")]
    AlreadySet { field: &'static str },

    #[error("Duration must be finite and positive, got {value}")]
    InvalidDuration { value: f64 },
}

/// The unit of work for one synthesis request.
#[derive(Debug)]
pub struct Job {
    id: JobId,
    spec: JobSpec,
    state: JobState,
    created_at: DateTime<Utc>,
    transitions: Vec<Transition>,
    image_asset: Option<MediaAsset>,
    audio_asset: Option<MediaAsset>,
    duration_secs: Option<f64>,
    effect_plan: Option<EffectPlan>,
}

impl Job {
    /// Create a job in the `Created` state with a fresh id.
    pub fn new(spec: JobSpec) -> Self {
        Self {
            id: JobId::new(),
            spec,
            state: JobState::Created,
            created_at: Utc::now(),
            transitions: Vec::new(),
            image_asset: None,
            audio_asset: None,
            duration_secs: None,
            effect_plan: None,
        }
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn spec(&self) -> &JobSpec {
        &self.spec
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    pub fn fulfillment_mode(&self) -> FulfillmentMode {
        self.spec.fulfillment
    }

    pub fn delivery_mode(&self) -> DeliveryMode {
        self.spec.delivery
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn transitions(&self) -> &[Transition] {
        &self.transitions
    }

    pub fn image_asset(&self) -> Option<&MediaAsset> {
        self.image_asset.as_ref()
    }

    pub fn audio_asset(&self) -> Option<&MediaAsset> {
        self.audio_asset.as_ref()
    }

    pub fn duration_secs(&self) -> Option<f64> {
        self.duration_secs
    }

    pub fn effect_plan(&self) -> Option<&EffectPlan> {
        self.effect_plan.as_ref()
    }

    /// Move to `next`, which must be the immediate successor of the current state.
    pub fn advance(&mut self, next: JobState) -> Result<(), StateError> {
        if self.state.is_terminal() {
            return Err(StateError::Terminal { state: self.state });
        }
        if self.state.next() != Some(next) {
            return Err(StateError::IllegalTransition {
                from: self.state,
                to: next,
            });
        }
        self.record(next);
        Ok(())
    }

    /// Drop to `Failed`. Returns false if the job was already terminal.
    pub fn fail(&mut self) -> bool {
        if self.state.is_terminal() {
            return false;
        }
        self.record(JobState::Failed);
        true
    }

    /// Store the fetched inputs. Only legal once, while fetching.
    pub fn attach_assets(&mut self, image: MediaAsset, audio: MediaAsset) -> Result<(), StateError> {
        if self.state != JobState::Fetching {
            return Err(StateError::IllegalTransition {
                from: self.state,
                to: JobState::Fetching,
            });
        }
        if self.image_asset.is_some() || self.audio_asset.is_some() {
            return Err(StateError::AlreadySet { field: "assets" });
        }
        self.image_asset = Some(image);
        self.audio_asset = Some(audio);
        Ok(())
    }

    /// Store the probed duration. Only legal once, while probing.
    pub fn record_duration(&mut self, secs: f64) -> Result<(), StateError> {
        if self.state != JobState::Probing {
            return Err(StateError::IllegalTransition {
                from: self.state,
                to: JobState::Probing,
            });
        }
        if self.duration_secs.is_some() {
            return Err(StateError::AlreadySet {
                field: "duration_secs",
            });
        }
        if !secs.is_finite() || secs <= 0.0 {
            return Err(StateError::InvalidDuration { value: secs });
        }
        self.duration_secs = Some(secs);
        Ok(())
    }

    /// Store the effect plan. Only legal once, while encoding.
    pub fn attach_plan(&mut self, plan: EffectPlan) -> Result<(), StateError> {
        if self.state != JobState::Encoding {
            return Err(StateError::IllegalTransition {
                from: self.state,
                to: JobState::Encoding,
            });
        }
        if self.effect_plan.is_some() {
            return Err(StateError::AlreadySet {
                field: "effect_plan",
            });
        }
        self.effect_plan = Some(plan);
        Ok(())
    }

    /// Release the input buffers once they are no longer needed.
    pub fn drop_assets(&mut self) {
        self.image_asset = None;
        self.audio_asset = None;
    }

    fn record(&mut self, to: JobState) {
        self.transitions.push(Transition {
            from: self.state,
            to,
            at: Utc::now(),
        });
        self.state = to;
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use url::Url;

    use super::*;
    use crate::asset::AssetRole;
    use crate::request::{JobDefaults, SynthesisRequest};

    fn job() -> Job {
        let request = SynthesisRequest::new(
            Url::parse("https://example.com/a.jpg").unwrap(),
            Url::parse("https://example.com/a.mp3").unwrap(),
        );
        Job::new(JobSpec::resolve(request, &JobDefaults::default()))
    }

    fn assets() -> (MediaAsset, MediaAsset) {
        (
            MediaAsset::new(AssetRole::Image, Bytes::from_static(b"img"), "image/jpeg"),
            MediaAsset::new(AssetRole::Audio, Bytes::from_static(b"aud"), "audio/mpeg"),
        )
    }

    #[test]
    fn test_happy_path_transitions() {
        let mut job = job();
        for state in [
            JobState::Fetching,
            JobState::Probing,
            JobState::Encoding,
            JobState::Delivering,
            JobState::Completed,
        ] {
            job.advance(state).unwrap();
        }
        assert_eq!(job.state(), JobState::Completed);
        assert_eq!(job.transitions().len(), 5);
        assert!(!job.fail());
    }

    #[test]
    fn test_cannot_skip_probing() {
        let mut job = job();
        job.advance(JobState::Fetching).unwrap();
        let err = job.advance(JobState::Encoding).unwrap_err();
        assert_eq!(
            err,
            StateError::IllegalTransition {
                from: JobState::Fetching,
                to: JobState::Encoding
            }
        );
    }

    #[test]
    fn test_no_transitions_after_failure() {
        let mut job = job();
        job.advance(JobState::Fetching).unwrap();
        assert!(job.fail());
        assert_eq!(job.state(), JobState::Failed);
        assert!(matches!(
            job.advance(JobState::Probing),
            Err(StateError::Terminal { .. })
        ));
    }

    #[test]
    fn test_duration_is_set_once_and_positive() {
        let mut job = job();
        job.advance(JobState::Fetching).unwrap();
        let (image, audio) = assets();
        job.attach_assets(image, audio).unwrap();
        job.advance(JobState::Probing).unwrap();

        assert!(matches!(
            job.record_duration(0.0),
            Err(StateError::InvalidDuration { .. })
        ));
        assert!(matches!(
            job.record_duration(f64::NAN),
            Err(StateError::InvalidDuration { .. })
        ));
        job.record_duration(10.0).unwrap();
        assert_eq!(
            job.record_duration(11.0),
            Err(StateError::AlreadySet {
                field: "duration_secs"
            })
        );
        assert_eq!(job.duration_secs(), Some(10.0));
    }

    #[test]
    fn test_plan_is_attached_once_during_encoding() {
        let mut job = job();
        let plan = stillreel_effects::build_plan(4.0, &Default::default()).unwrap();
        assert!(job.attach_plan(plan.clone()).is_err());

        job.advance(JobState::Fetching).unwrap();
        job.advance(JobState::Probing).unwrap();
        job.advance(JobState::Encoding).unwrap();
        job.attach_plan(plan.clone()).unwrap();
        assert_eq!(
            job.attach_plan(plan),
            Err(StateError::AlreadySet {
                field: "effect_plan"
            })
        );
        assert_eq!(job.effect_plan().map(|p| p.total_frames), Some(100));
    }

    #[test]
    fn test_resource_names_are_namespaced() {
        let a = JobId::new();
        let b = JobId::new();
        assert_ne!(a.resource_name("image", "jpg"), b.resource_name("image", "jpg"));
        assert!(a.resource_name("audio", "fifo").starts_with(&a.to_string()));
        assert_eq!(a.resource_name("probe", ""), format!("{a}-probe"));
    }
}
