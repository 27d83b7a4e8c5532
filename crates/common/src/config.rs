//! Application configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use stillreel_delivery::SinkTarget;
use stillreel_effects::EffectConfig;
use stillreel_job_model::JobDefaults;

use crate::error::{StillreelError, StillreelResult};

/// Environment variable pointing at an explicit config file.
pub const CONFIG_ENV: &str = "STILLREEL_CONFIG";

/// Global application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Encoding engine binaries and limits.
    pub engine: EngineConfig,

    /// Remote asset fetching.
    pub fetch: FetchConfig,

    /// Static effect and encoder settings.
    pub effect: EffectConfig,

    /// Filesystem locations.
    pub paths: PathsConfig,

    /// Strategy fallbacks for requests that leave them unset.
    pub defaults: JobDefaults,

    /// External artifact store. Uploads fail when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sink: Option<SinkTarget>,

    /// Logging configuration.
    pub logging: LoggingConfig,
}

/// Encoding engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// `ffmpeg` binary.
    pub ffmpeg_path: PathBuf,

    /// `ffprobe` binary.
    pub ffprobe_path: PathBuf,

    /// Timeout for each probe attempt.
    pub probe_timeout_secs: u64,

    /// Timeout for one encode.
    pub encode_timeout_secs: u64,

    /// Maximum encoder subprocesses running at once.
    pub max_concurrent_encodes: usize,

    /// Cap on in-memory encoder output (streamed mode).
    pub max_output_bytes: u64,

    /// How long to wait for the engine to open a named pipe.
    pub pipe_open_timeout_ms: u64,
}

/// Asset fetch settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Per-request timeout.
    pub timeout_secs: u64,

    /// Largest accepted image body.
    pub max_image_bytes: u64,

    /// Largest accepted audio body.
    pub max_audio_bytes: u64,

    /// `User-Agent` header sent with every fetch.
    pub user_agent: String,
}

/// Filesystem locations.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Parent directory for per-job workspaces. OS temp dir when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temp_dir: Option<PathBuf>,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "stillreel_engine=debug,warn").
    pub level: String,

    /// Whether to output structured JSON logs.
    pub json: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: PathBuf::from("ffmpeg"),
            ffprobe_path: PathBuf::from("ffprobe"),
            probe_timeout_secs: 30,
            encode_timeout_secs: 900,
            max_concurrent_encodes: 2,
            max_output_bytes: 512 * 1024 * 1024,
            pipe_open_timeout_ms: 10_000,
        }
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 60,
            max_image_bytes: 25 * 1024 * 1024,
            max_audio_bytes: 200 * 1024 * 1024,
            user_agent: format!("stillreel/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl PathsConfig {
    /// Directory under which job workspaces are created.
    pub fn workspace_root(&self) -> PathBuf {
        self.temp_dir.clone().unwrap_or_else(std::env::temp_dir)
    }
}

impl AppConfig {
    /// Load config from the standard location, falling back to defaults,
    /// then apply environment overrides.
    pub fn load() -> Self {
        let mut config = Self::load_from(&config_file_path());
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config
    }

    /// Load config from `path`, falling back to defaults.
    pub fn load_from(path: &Path) -> Self {
        if path.exists() {
            match std::fs::read_to_string(path) {
                Ok(content) => match serde_json::from_str(&content) {
                    Ok(config) => return config,
                    Err(e) => {
                        tracing::warn!("Failed to parse config at {:?}: {}", path, e);
                    }
                },
                Err(e) => {
                    tracing::warn!("Failed to read config at {:?}: {}", path, e);
                }
            }
        }
        Self::default()
    }

    /// Save config to the standard location.
    pub fn save(&self) -> Result<(), std::io::Error> {
        self.save_to(&config_file_path())
    }

    pub fn save_to(&self, path: &Path) -> Result<(), std::io::Error> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        std::fs::write(path, json)
    }

    /// Apply `STILLREEL_*` overrides read through `lookup`.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup("STILLREEL_FFMPEG") {
            self.engine.ffmpeg_path = PathBuf::from(path);
        }
        if let Some(path) = lookup("STILLREEL_FFPROBE") {
            self.engine.ffprobe_path = PathBuf::from(path);
        }
        if let Some(dir) = lookup("STILLREEL_TEMP_DIR") {
            self.paths.temp_dir = Some(PathBuf::from(dir));
        }
        if let Some(raw) = lookup("STILLREEL_SINK_URL") {
            match url::Url::parse(&raw) {
                Ok(url) => match self.sink.as_mut() {
                    Some(sink) => sink.upload_url = url,
                    None => self.sink = Some(SinkTarget::new(url)),
                },
                Err(e) => tracing::warn!("Ignoring STILLREEL_SINK_URL {:?}: {}", raw, e),
            }
        }
        if let Some(token) = lookup("STILLREEL_SINK_TOKEN") {
            if let Some(sink) = self.sink.as_mut() {
                sink.token = Some(token);
            }
        }
    }

    /// Startup validation. A config that passes never fails a request on its own.
    pub fn validate(&self) -> StillreelResult<()> {
        self.effect.validate()?;

        if self.engine.max_concurrent_encodes == 0 {
            return Err(StillreelError::config(
                "engine.max_concurrent_encodes must be at least 1",
            ));
        }
        if self.engine.probe_timeout_secs == 0 || self.engine.encode_timeout_secs == 0 {
            return Err(StillreelError::config("engine timeouts must be non-zero"));
        }
        if self.engine.max_output_bytes == 0 {
            return Err(StillreelError::config("engine.max_output_bytes must be non-zero"));
        }
        if self.fetch.timeout_secs == 0 {
            return Err(StillreelError::config("fetch.timeout_secs must be non-zero"));
        }
        if self.fetch.max_image_bytes == 0 || self.fetch.max_audio_bytes == 0 {
            return Err(StillreelError::config("fetch size limits must be non-zero"));
        }
        if let Some(sink) = &self.sink {
            sink.validate()?;
        }
        Ok(())
    }
}

/// Standard config file location.
pub fn config_file_path() -> PathBuf {
    if let Ok(explicit) = std::env::var(CONFIG_ENV) {
        return PathBuf::from(explicit);
    }
    let base = std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".config")
        });
    base.join("stillreel").join("config.json")
}
