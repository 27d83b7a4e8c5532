//! Inbound synthesis requests and per-request strategy selection.
//!
//! A request varies along two independent axes: how intermediate artifacts
//! are materialized ([`FulfillmentMode`]) and how the finished video reaches
//! the caller ([`DeliveryMode`]). Both are resolved against [`JobDefaults`]
//! when the caller leaves them unset.

use serde::{Deserialize, Serialize};
use url::Url;

/// Validated request consumed by the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SynthesisRequest {
    /// Still image source.
    pub image_url: Url,

    /// Audio track source.
    pub audio_url: Url,

    /// How the finished video is handed back.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivery_mode: Option<DeliveryMode>,

    /// Whether artifacts live on disk or in memory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fulfillment_mode: Option<FulfillmentMode>,

    /// Filename used for downloads and uploads.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,

    /// Opaque destination record passed through to the artifact sink.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,
}

impl SynthesisRequest {
    pub fn new(image_url: Url, audio_url: Url) -> Self {
        Self {
            image_url,
            audio_url,
            delivery_mode: None,
            fulfillment_mode: None,
            filename: None,
            destination: None,
        }
    }

    pub fn with_delivery(mut self, mode: DeliveryMode) -> Self {
        self.delivery_mode = Some(mode);
        self
    }

    pub fn with_fulfillment(mut self, mode: FulfillmentMode) -> Self {
        self.fulfillment_mode = Some(mode);
        self
    }

    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    pub fn with_destination(mut self, destination: impl Into<String>) -> Self {
        self.destination = Some(destination.into());
        self
    }
}

/// Whether intermediate and output artifacts are files or in-memory streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FulfillmentMode {
    /// Inputs and output are materialized as temp files.
    DiskBacked,
    /// Inputs are piped to the engine and output is captured from stdout.
    Streamed,
}

impl FulfillmentMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::DiskBacked => "diskBacked",
            Self::Streamed => "streamed",
        }
    }
}

impl std::str::FromStr for FulfillmentMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "disk" | "diskbacked" | "disk-backed" => Ok(Self::DiskBacked),
            "streamed" | "stream" | "memory" => Ok(Self::Streamed),
            _ => Err(format!("Unknown fulfillment mode: {s}. Use: disk, streamed")),
        }
    }
}

/// How the finished artifact reaches its destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DeliveryMode {
    /// Raw bytes on the active response channel.
    InlineStream,
    /// Attachment transfer; disk artifacts are removed afterwards.
    FileDownload,
    /// Forwarded to the external artifact sink.
    ExternalUpload,
}

impl DeliveryMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InlineStream => "inlineStream",
            Self::FileDownload => "fileDownload",
            Self::ExternalUpload => "externalUpload",
        }
    }
}

impl std::str::FromStr for DeliveryMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "inline" | "inlinestream" => Ok(Self::InlineStream),
            "download" | "filedownload" => Ok(Self::FileDownload),
            "upload" | "externalupload" => Ok(Self::ExternalUpload),
            _ => Err(format!(
                "Unknown delivery mode: {s}. Use: inline, download, upload"
            )),
        }
    }
}

/// Fallbacks applied when a request leaves a strategy unset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobDefaults {
    pub fulfillment: FulfillmentMode,
    pub delivery: DeliveryMode,
    pub filename: String,
}

impl Default for JobDefaults {
    fn default() -> Self {
        Self {
            fulfillment: FulfillmentMode::Streamed,
            delivery: DeliveryMode::InlineStream,
            filename: "output.mp4".to_string(),
        }
    }
}

/// A request with every strategy decided.
#[derive(Debug, Clone, PartialEq)]
pub struct JobSpec {
    pub image_url: Url,
    pub audio_url: Url,
    pub fulfillment: FulfillmentMode,
    pub delivery: DeliveryMode,
    pub filename: String,
    pub destination: Option<String>,
}

impl JobSpec {
    /// Resolve a request against defaults.
    pub fn resolve(request: SynthesisRequest, defaults: &JobDefaults) -> Self {
        let filename = request
            .filename
            .map(|name| sanitize_filename(&name))
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| defaults.filename.clone());

        Self {
            image_url: request.image_url,
            audio_url: request.audio_url,
            fulfillment: request.fulfillment_mode.unwrap_or(defaults.fulfillment),
            delivery: request.delivery_mode.unwrap_or(defaults.delivery),
            filename,
            destination: request.destination,
        }
    }
}

/// Strip path components and characters that are unsafe in headers or file names.
fn sanitize_filename(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned: String = base
        .chars()
        .filter(|c| !c.is_control() && *c != '"')
        .collect();
    let cleaned = cleaned.trim().trim_start_matches('.').to_string();
    if cleaned.is_empty() {
        return cleaned;
    }
    if cleaned.to_ascii_lowercase().ends_with(".mp4") {
        cleaned
    } else {
        format!("{cleaned}.mp4")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn urls() -> (Url, Url) {
        (
            Url::parse("https://cdn.example.com/cover.jpg").unwrap(),
            Url::parse("https://cdn.example.com/voice.mp3").unwrap(),
        )
    }

    #[test]
    fn test_request_deserializes_camel_case() {
        let json = r#"{
            "imageUrl": "https://cdn.example.com/cover.jpg",
            "audioUrl": "https://cdn.example.com/voice.mp3",
            "deliveryMode": "externalUpload",
            "filename": "clip.mp4"
        }"#;
        let request: SynthesisRequest = serde_json::from_str(json).unwrap();
        assert_eq!(request.delivery_mode, Some(DeliveryMode::ExternalUpload));
        assert_eq!(request.fulfillment_mode, None);
        assert_eq!(request.filename.as_deref(), Some("clip.mp4"));
    }

    #[test]
    fn test_request_missing_audio_is_rejected() {
        let json = r#"{"imageUrl": "https://cdn.example.com/cover.jpg"}"#;
        assert!(serde_json::from_str::<SynthesisRequest>(json).is_err());
    }

    #[test]
    fn test_resolve_applies_defaults() {
        let (image, audio) = urls();
        let spec = JobSpec::resolve(SynthesisRequest::new(image, audio), &JobDefaults::default());
        assert_eq!(spec.fulfillment, FulfillmentMode::Streamed);
        assert_eq!(spec.delivery, DeliveryMode::InlineStream);
        assert_eq!(spec.filename, "output.mp4");
    }

    #[test]
    fn test_resolve_keeps_explicit_choices() {
        let (image, audio) = urls();
        let request = SynthesisRequest::new(image, audio)
            .with_fulfillment(FulfillmentMode::DiskBacked)
            .with_delivery(DeliveryMode::FileDownload)
            .with_filename("story");
        let spec = JobSpec::resolve(request, &JobDefaults::default());
        assert_eq!(spec.fulfillment, FulfillmentMode::DiskBacked);
        assert_eq!(spec.delivery, DeliveryMode::FileDownload);
        assert_eq!(spec.filename, "story.mp4");
    }

    #[test]
    fn test_filename_path_components_are_stripped() {
        assert_eq!(sanitize_filename("../../etc/passwd"), "passwd.mp4");
        assert_eq!(sanitize_filename("dir\\clip.MP4"), "clip.MP4");
        assert_eq!(sanitize_filename("..."), "");
    }

    #[test]
    fn test_mode_parsing() {
        assert_eq!("disk".parse::<FulfillmentMode>(), Ok(FulfillmentMode::DiskBacked));
        assert_eq!("streamed".parse::<FulfillmentMode>(), Ok(FulfillmentMode::Streamed));
        assert_eq!("upload".parse::<DeliveryMode>(), Ok(DeliveryMode::ExternalUpload));
        assert!("fax".parse::<DeliveryMode>().is_err());
    }
}
