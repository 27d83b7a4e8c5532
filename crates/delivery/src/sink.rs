//! External artifact stores.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::multipart;
use serde::{Deserialize, Serialize};
use url::Url;

/// Placeholder substituted into [`SinkTarget::row_url_template`].
pub const DESTINATION_PLACEHOLDER: &str = "{destination}";

/// Longest error body kept from a failed sink response.
const MAX_ERROR_BODY: usize = 512;

/// One artifact handed to a sink.
#[derive(Debug, Clone)]
pub struct ArtifactUpload {
    pub payload: Bytes,
    pub filename: String,
    pub content_type: String,
    /// Opaque record identifier the upload should be linked to.
    pub destination: Option<String>,
}

/// Errors from artifact sinks.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("Invalid sink configuration: {message}")]
    Config { message: String },

    #[error("No artifact sink configured")]
    NotConfigured,

    #[error("Sink request failed: {message}")]
    Transport { message: String },

    #[error("Sink returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Unexpected sink response: {message}")]
    InvalidResponse { message: String },
}

impl SinkError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    fn transport(err: reqwest::Error) -> Self {
        Self::Transport {
            message: err.to_string(),
        }
    }
}

/// Accepts finished artifacts and acknowledges them with JSON.
#[async_trait]
pub trait ArtifactSink: Send + Sync {
    async fn upload(&self, upload: ArtifactUpload) -> Result<serde_json::Value, SinkError>;
}

/// Where and how [`HttpArtifactSink`] uploads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SinkTarget {
    /// Multipart upload endpoint.
    pub upload_url: Url,

    /// Form field carrying the file.
    #[serde(default = "default_file_field")]
    pub file_field: String,

    /// `Authorization` scheme placed before the token.
    #[serde(default = "default_auth_scheme")]
    pub auth_scheme: String,

    /// Credential. Usually supplied through the environment.
    #[serde(default, skip_serializing)]
    pub token: Option<String>,

    /// Record URL with a `{destination}` placeholder. When set, uploads with a
    /// destination are linked to that record.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row_url_template: Option<String>,

    /// Record field that receives the uploaded file reference.
    #[serde(default = "default_row_field")]
    pub row_field: String,

    /// Per-request timeout.
    #[serde(default = "default_sink_timeout")]
    pub timeout_secs: u64,
}

fn default_file_field() -> String {
    "file".to_string()
}

fn default_auth_scheme() -> String {
    "Token".to_string()
}

fn default_row_field() -> String {
    "video".to_string()
}

fn default_sink_timeout() -> u64 {
    120
}

impl SinkTarget {
    pub fn new(upload_url: Url) -> Self {
        Self {
            upload_url,
            file_field: default_file_field(),
            auth_scheme: default_auth_scheme(),
            token: None,
            row_url_template: None,
            row_field: default_row_field(),
            timeout_secs: default_sink_timeout(),
        }
    }

    pub fn validate(&self) -> Result<(), SinkError> {
        if !matches!(self.upload_url.scheme(), "http" | "https") {
            return Err(SinkError::config(format!(
                "upload_url must be http(s), got {}",
                self.upload_url.scheme()
            )));
        }
        if self.file_field.trim().is_empty() {
            return Err(SinkError::config("file_field must be set"));
        }
        if let Some(template) = &self.row_url_template {
            if !template.contains(DESTINATION_PLACEHOLDER) {
                return Err(SinkError::config(format!(
                    "row_url_template must contain {DESTINATION_PLACEHOLDER}"
                )));
            }
            if self.row_field.trim().is_empty() {
                return Err(SinkError::config("row_field must be set"));
            }
        }
        if self.timeout_secs == 0 {
            return Err(SinkError::config("timeout_secs must be non-zero"));
        }
        Ok(())
    }

    fn authorization(&self) -> Option<String> {
        let token = self.token.as_deref().filter(|t| !t.is_empty())?;
        if self.auth_scheme.is_empty() {
            Some(token.to_string())
        } else {
            Some(format!("{} {}", self.auth_scheme, token))
        }
    }

    fn row_url(&self, destination: &str) -> Option<String> {
        self.row_url_template
            .as_ref()
            .map(|template| template.replace(DESTINATION_PLACEHOLDER, destination))
    }
}

/// Multipart HTTP upload with optional record linking.
pub struct HttpArtifactSink {
    client: reqwest::Client,
    target: SinkTarget,
}

impl HttpArtifactSink {
    pub fn new(target: SinkTarget) -> Result<Self, SinkError> {
        target.validate()?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(target.timeout_secs))
            .build()
            .map_err(|e| SinkError::config(format!("http client: {e}")))?;
        Ok(Self { client, target })
    }

    pub fn target(&self) -> &SinkTarget {
        &self.target
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.target.authorization() {
            Some(value) => request.header(reqwest::header::AUTHORIZATION, value),
            None => request,
        }
    }

    async fn link_record(
        &self,
        row_url: &str,
        uploaded: &serde_json::Value,
    ) -> Result<serde_json::Value, SinkError> {
        let name = uploaded
            .get("name")
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| SinkError::InvalidResponse {
                message: "upload response has no file name".to_string(),
            })?;

        let mut body = serde_json::Map::new();
        body.insert(
            self.target.row_field.clone(),
            serde_json::json!([{ "name": name }]),
        );

        tracing::debug!(row_url, field = %self.target.row_field, "Linking upload to record");

        let response = self
            .authorize(self.client.patch(row_url))
            .json(&body)
            .send()
            .await
            .map_err(SinkError::transport)?;
        read_json(response).await
    }
}

#[async_trait]
impl ArtifactSink for HttpArtifactSink {
    async fn upload(&self, upload: ArtifactUpload) -> Result<serde_json::Value, SinkError> {
        let size = upload.payload.len() as u64;
        let file_part = multipart::Part::stream_with_length(upload.payload, size)
            .file_name(upload.filename.clone())
            .mime_str(&upload.content_type)
            .map_err(|e| SinkError::config(format!("mime: {e}")))?;
        let form = multipart::Form::new().part(self.target.file_field.clone(), file_part);

        tracing::debug!(
            url = %self.target.upload_url,
            filename = %upload.filename,
            size,
            "Uploading artifact"
        );

        let response = self
            .authorize(self.client.post(self.target.upload_url.clone()))
            .multipart(form)
            .send()
            .await
            .map_err(SinkError::transport)?;
        let uploaded = read_json(response).await?;

        let row_url = upload
            .destination
            .as_deref()
            .and_then(|dest| self.target.row_url(dest));
        match row_url {
            Some(row_url) => {
                let row = self.link_record(&row_url, &uploaded).await?;
                Ok(serde_json::json!({ "file": uploaded, "row": row }))
            }
            None => Ok(uploaded),
        }
    }
}

async fn read_json(response: reqwest::Response) -> Result<serde_json::Value, SinkError> {
    let status = response.status();
    if !status.is_success() {
        let mut body = response
            .text()
            .await
            .unwrap_or_else(|_| "unknown error".to_string());
        if body.len() > MAX_ERROR_BODY {
            let mut cut = MAX_ERROR_BODY;
            while !body.is_char_boundary(cut) {
                cut -= 1;
            }
            body.truncate(cut);
        }
        return Err(SinkError::Status {
            status: status.as_u16(),
            body,
        });
    }

    let text = response.text().await.map_err(SinkError::transport)?;
    if text.trim().is_empty() {
        return Ok(serde_json::Value::Null);
    }
    serde_json::from_str(&text).map_err(|e| SinkError::InvalidResponse {
        message: e.to_string(),
    })
}

/// Records uploads in memory. Used for dry runs and tests.
#[derive(Default)]
pub struct MemoryArtifactSink {
    uploads: Mutex<Vec<ArtifactUpload>>,
    fail_with: Option<String>,
}

impl MemoryArtifactSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// A sink that rejects every upload with `message`.
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            uploads: Mutex::new(Vec::new()),
            fail_with: Some(message.into()),
        }
    }

    pub fn uploads(&self) -> Vec<ArtifactUpload> {
        self.uploads
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn upload_count(&self) -> usize {
        self.uploads
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[async_trait]
impl ArtifactSink for MemoryArtifactSink {
    async fn upload(&self, upload: ArtifactUpload) -> Result<serde_json::Value, SinkError> {
        if let Some(message) = &self.fail_with {
            return Err(SinkError::Status {
                status: 503,
                body: message.clone(),
            });
        }
        let ack = serde_json::json!({
            "name": upload.filename,
            "size": upload.payload.len(),
            "mime_type": upload.content_type,
            "destination": upload.destination,
        });
        self.uploads
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(upload);
        Ok(ack)
    }
}
