//! Effect plan construction.
//!
//! A plan is fully determined by the target duration and the static
//! [`EffectConfig`]. Both fulfillment modes consume the same plan, so the
//! filter chain and codec/container arguments are identical between them.

use serde::{Deserialize, Serialize};

use crate::vertical::VerticalFrame;
use crate::zoom::ZoomFunction;

/// Label of the filtered video stream inside the filter graph.
pub const VIDEO_OUT_LABEL: &str = "vout";

/// MP4 flags that allow writing to a non-seekable output.
const FRAGMENTED_MOVFLAGS: &str = "frag_keyframe+empty_moov+default_base_moof";

/// Static effect and encoder configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EffectConfig {
    /// Output width in pixels.
    pub width: u32,

    /// Output height in pixels.
    pub height: u32,

    /// Output frame rate.
    pub fps: u32,

    /// Maximum zoom factor.
    pub zoom_ceiling: f64,

    /// Zoom added per output frame.
    pub zoom_rate_per_frame: f64,

    /// Output pixel format.
    pub pixel_format: String,

    /// Video encoder.
    pub video_codec: String,

    /// Encoder tune preset (empty = none).
    pub tune: String,

    /// Encoder speed preset (empty = none).
    pub preset: String,

    /// Constant rate factor.
    pub crf: u32,

    /// Audio encoder.
    pub audio_codec: String,

    /// Audio bitrate in kbps.
    pub audio_bitrate_kbps: u32,
}

impl Default for EffectConfig {
    fn default() -> Self {
        Self {
            width: 1080,
            height: 1920,
            fps: 25,
            zoom_ceiling: 1.5,
            zoom_rate_per_frame: 0.0015,
            pixel_format: "yuv420p".to_string(),
            video_codec: "libx264".to_string(),
            tune: "stillimage".to_string(),
            preset: "medium".to_string(),
            crf: 23,
            audio_codec: "aac".to_string(),
            audio_bitrate_kbps: 192,
        }
    }
}

impl EffectConfig {
    /// Validate once at startup; a valid config never fails per request.
    pub fn validate(&self) -> Result<(), PlanError> {
        if !self.zoom_ceiling.is_finite() || self.zoom_ceiling <= 1.0 {
            return Err(PlanError::config(format!(
                "zoom_ceiling must be finite and greater than 1.0, got {}",
                self.zoom_ceiling
            )));
        }
        if !self.zoom_rate_per_frame.is_finite() || self.zoom_rate_per_frame <= 0.0 {
            return Err(PlanError::config(format!(
                "zoom_rate_per_frame must be finite and positive, got {}",
                self.zoom_rate_per_frame
            )));
        }
        if self.width == 0 || self.height == 0 {
            return Err(PlanError::config("frame width/height must be non-zero"));
        }
        if self.width % 2 != 0 || self.height % 2 != 0 {
            return Err(PlanError::config(
                "frame width/height must be even (required for yuv420p output)",
            ));
        }
        if self.fps == 0 {
            return Err(PlanError::config("fps must be non-zero"));
        }
        if self.pixel_format.trim().is_empty() {
            return Err(PlanError::config("pixel_format must be set"));
        }
        if self.video_codec.trim().is_empty() || self.audio_codec.trim().is_empty() {
            return Err(PlanError::config("video_codec and audio_codec must be set"));
        }
        Ok(())
    }

    pub fn frame(&self) -> VerticalFrame {
        VerticalFrame::new(self.width, self.height)
    }

    pub fn zoom(&self) -> ZoomFunction {
        ZoomFunction::new(self.zoom_rate_per_frame, self.zoom_ceiling)
    }
}

/// Errors from plan construction.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PlanError {
    #[error("Invalid effect configuration: {message}")]
    Config { message: String },

    #[error("Duration must be finite and positive, got {value}")]
    InvalidDuration { value: f64 },
}

impl PlanError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }
}

/// Resolved, duration-dependent effect specification.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EffectPlan {
    pub duration_secs: f64,
    pub total_frames: u64,
    pub fps: u32,
    pub frame: VerticalFrame,
    pub zoom: ZoomFunction,
    pub pixel_format: String,
    video_codec: String,
    tune: String,
    preset: String,
    crf: u32,
    audio_codec: String,
    audio_bitrate_kbps: u32,
}

/// Build the effect plan for a clip of `duration_secs`.
pub fn build_plan(duration_secs: f64, config: &EffectConfig) -> Result<EffectPlan, PlanError> {
    if !duration_secs.is_finite() || duration_secs <= 0.0 {
        return Err(PlanError::InvalidDuration {
            value: duration_secs,
        });
    }
    config.validate()?;

    let fps = config.fps;
    let total_frames = (duration_secs * fps as f64).ceil() as u64;

    let plan = EffectPlan {
        duration_secs,
        total_frames,
        fps,
        frame: config.frame(),
        zoom: config.zoom(),
        pixel_format: config.pixel_format.clone(),
        video_codec: config.video_codec.clone(),
        tune: config.tune.clone(),
        preset: config.preset.clone(),
        crf: config.crf,
        audio_codec: config.audio_codec.clone(),
        audio_bitrate_kbps: config.audio_bitrate_kbps,
    };

    tracing::debug!(
        duration_secs,
        total_frames,
        width = plan.frame.width,
        height = plan.frame.height,
        zoom = %plan.zoom.expression(),
        "Effect plan built"
    );

    Ok(plan)
}

impl EffectPlan {
    /// Options placed before the image input.
    pub fn image_input_args(&self) -> Vec<String> {
        vec!["-framerate".to_string(), self.fps.to_string()]
    }

    /// Filter chain applied to the image stream only.
    ///
    /// The single decoded image is looped inside the graph, which behaves the
    /// same whether the image arrives from a file or a pipe.
    pub fn video_filter(&self) -> String {
        let (x, y) = ZoomFunction::center_expressions();
        format!(
            "[0:v]loop=loop=-1:size=1:start=0,{cover},zoompan=z='{z}':x='{x}':y='{y}':d=1:s={size}:fps={fps},setsar=1,format={pix}[{out}]",
            cover = self.frame.cover_crop_filter(),
            z = self.zoom.expression(),
            size = self.frame.size_arg(),
            fps = self.fps,
            pix = self.pixel_format,
            out = VIDEO_OUT_LABEL,
        )
    }

    /// Filter graph, stream mapping, codec, truncation, and container arguments.
    ///
    /// The output target is appended by the caller.
    pub fn output_args(&self) -> Vec<String> {
        let mut args = vec![
            "-filter_complex".to_string(),
            self.video_filter(),
            "-map".to_string(),
            format!("[{VIDEO_OUT_LABEL}]"),
            "-map".to_string(),
            "1:a:0".to_string(),
            "-c:v".to_string(),
            self.video_codec.clone(),
        ];

        if !self.tune.is_empty() {
            args.push("-tune".to_string());
            args.push(self.tune.clone());
        }
        if !self.preset.is_empty() {
            args.push("-preset".to_string());
            args.push(self.preset.clone());
        }

        args.extend([
            "-crf".to_string(),
            self.crf.to_string(),
            "-pix_fmt".to_string(),
            self.pixel_format.clone(),
            "-r".to_string(),
            self.fps.to_string(),
            "-c:a".to_string(),
            self.audio_codec.clone(),
            "-b:a".to_string(),
            format!("{}k", self.audio_bitrate_kbps.max(32)),
            "-t".to_string(),
            format!("{:.6}", self.duration_secs),
            "-shortest".to_string(),
            "-movflags".to_string(),
            FRAGMENTED_MOVFLAGS.to_string(),
            "-f".to_string(),
            "mp4".to_string(),
        ]);

        args
    }

    /// Multi-line summary for logs and the CLI.
    pub fn describe(&self) -> String {
        format!(
            "duration_secs={:.3}\nframes={}\nfps={}\nframe={}\nzoom={}\nzoom_ceiling_frame={}\npixel_format={}\nvideo_codec={}\naudio_codec={}\nfilter={}\n",
            self.duration_secs,
            self.total_frames,
            self.fps,
            self.frame.size_arg(),
            self.zoom.expression(),
            self.zoom.frames_to_ceiling(),
            self.pixel_format,
            self.video_codec,
            self.audio_codec,
            self.video_filter(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        EffectConfig::default().validate().unwrap();
    }

    #[test]
    fn test_rejects_bad_zoom_config() {
        let config = EffectConfig {
            zoom_ceiling: 1.0,
            ..EffectConfig::default()
        };
        assert!(matches!(config.validate(), Err(PlanError::Config { .. })));

        let config = EffectConfig {
            zoom_rate_per_frame: 0.0,
            ..EffectConfig::default()
        };
        assert!(matches!(config.validate(), Err(PlanError::Config { .. })));
    }

    #[test]
    fn test_rejects_odd_dimensions() {
        let config = EffectConfig {
            width: 1081,
            ..EffectConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_non_positive_duration() {
        let config = EffectConfig::default();
        assert!(matches!(
            build_plan(0.0, &config),
            Err(PlanError::InvalidDuration { .. })
        ));
        assert!(build_plan(f64::INFINITY, &config).is_err());
    }

    #[test]
    fn test_plan_frames_cover_duration() {
        let plan = build_plan(10.0, &EffectConfig::default()).unwrap();
        assert_eq!(plan.total_frames, 250);

        let plan = build_plan(10.01, &EffectConfig::default()).unwrap();
        assert_eq!(plan.total_frames, 251);
    }

    #[test]
    fn test_output_args_truncate_to_duration() {
        let plan = build_plan(12.345678, &EffectConfig::default()).unwrap();
        let args = plan.output_args();
        let t = args.iter().position(|a| a == "-t").unwrap();
        assert_eq!(args[t + 1], "12.345678");
        assert!(args.contains(&"-shortest".to_string()));
    }

    #[test]
    fn test_filter_applies_only_to_video() {
        let plan = build_plan(5.0, &EffectConfig::default()).unwrap();
        let filter = plan.video_filter();
        assert!(filter.starts_with("[0:v]loop=loop=-1:size=1:start=0,"));
        assert!(filter.contains("zoompan=z='min(1+0.0015*on,1.5)'"));
        assert!(filter.contains("s=1080x1920"));
        assert!(filter.ends_with("format=yuv420p[vout]"));
        assert!(!filter.contains("1:a"));
    }

    #[test]
    fn test_empty_tune_is_omitted() {
        let config = EffectConfig {
            tune: String::new(),
            ..EffectConfig::default()
        };
        let plan = build_plan(3.0, &config).unwrap();
        assert!(!plan.output_args().contains(&"-tune".to_string()));
    }
}
