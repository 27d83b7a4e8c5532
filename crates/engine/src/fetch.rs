//! Remote asset fetching.

use std::time::Duration;

use futures::StreamExt;
use stillreel_common::config::FetchConfig;
use stillreel_common::error::{StillreelError, StillreelResult};
use stillreel_job_model::{infer_media_type, AssetRole, MediaAsset};
use url::Url;

/// Both fetched inputs of a job.
#[derive(Debug, Clone)]
pub struct FetchedAssets {
    pub image: MediaAsset,
    pub audio: MediaAsset,
}

/// Downloads job inputs into memory.
#[derive(Debug, Clone)]
pub struct AssetFetcher {
    client: reqwest::Client,
    max_image_bytes: u64,
    max_audio_bytes: u64,
}

impl AssetFetcher {
    pub fn new(config: &FetchConfig) -> StillreelResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| StillreelError::config(format!("http client: {e}")))?;
        Ok(Self {
            client,
            max_image_bytes: config.max_image_bytes,
            max_audio_bytes: config.max_audio_bytes,
        })
    }

    /// Fetch image and audio concurrently. The first failure wins.
    pub async fn fetch(&self, image: &Url, audio: &Url) -> StillreelResult<FetchedAssets> {
        let (image, audio) = tokio::try_join!(
            self.fetch_one(AssetRole::Image, image),
            self.fetch_one(AssetRole::Audio, audio),
        )?;
        Ok(FetchedAssets { image, audio })
    }

    /// Fetch a single asset.
    pub async fn fetch_one(&self, role: AssetRole, url: &Url) -> StillreelResult<MediaAsset> {
        check_scheme(role, url)?;
        let max_bytes = self.max_bytes(role);

        tracing::debug!(%role, %url, "Fetching asset");
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| StillreelError::fetch(role, format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(StillreelError::fetch(role, format!("HTTP {status} from {url}")));
        }

        if let Some(declared) = response.content_length() {
            if declared > max_bytes {
                return Err(StillreelError::fetch(
                    role,
                    format!("declared size {declared} bytes exceeds limit of {max_bytes} bytes"),
                ));
            }
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        // Stream the body with a hard cap; the declared length may be absent or wrong.
        let mut body: Vec<u8> = Vec::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk
                .map_err(|e| StillreelError::fetch(role, format!("failed to read body: {e}")))?;
            if (body.len() + chunk.len()) as u64 > max_bytes {
                return Err(StillreelError::fetch(
                    role,
                    format!("body exceeds limit of {max_bytes} bytes"),
                ));
            }
            body.extend_from_slice(&chunk);
        }

        if body.is_empty() {
            return Err(StillreelError::fetch(role, "empty body"));
        }

        let media_type = infer_media_type(role, content_type.as_deref(), url.path());
        tracing::info!(%role, size = body.len(), media_type = %media_type, "Asset fetched");
        Ok(MediaAsset::new(role, body.into(), media_type))
    }

    fn max_bytes(&self, role: AssetRole) -> u64 {
        match role {
            AssetRole::Image => self.max_image_bytes,
            AssetRole::Audio => self.max_audio_bytes,
        }
    }
}

/// Only `http` and `https` sources are fetched.
pub fn check_scheme(role: AssetRole, url: &Url) -> StillreelResult<()> {
    match url.scheme() {
        "http" | "https" => Ok(()),
        other => Err(StillreelError::fetch(
            role,
            format!("unsupported URL scheme '{other}'"),
        )),
    }
}
