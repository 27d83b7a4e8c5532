//! Renders through the real `ffmpeg`/`ffprobe`. Skipped when they are not
//! installed.

#![cfg(unix)]

use std::path::{Path, PathBuf};
use std::process::Command;

use axum::http::header;
use axum::routing::get;
use axum::Router;
use bytes::Bytes;
use stillreel_common::clock::within_one_frame;
use stillreel_common::config::AppConfig;
use stillreel_delivery::{DeliveryResult, WriterChannel};
use stillreel_engine::{command_exists, SynthesisPipeline};
use stillreel_job_model::{DeliveryMode, FulfillmentMode, SynthesisRequest};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use url::Url;

const AUDIO_SECS: f64 = 10.0;

fn tools_available() -> bool {
    command_exists(Path::new("ffmpeg")) && command_exists(Path::new("ffprobe"))
}

fn generate(dir: &Path, name: &str, args: &[&str]) -> Option<PathBuf> {
    let out = dir.join(name);
    let status = Command::new("ffmpeg")
        .args(["-y", "-hide_banner", "-loglevel", "error"])
        .args(args)
        .arg(&out)
        .status()
        .ok()?;
    status.success().then_some(out)
}

async fn serve(image: Bytes, audio: Bytes, audio_name: &str, audio_type: &'static str) -> Url {
    let app = Router::new()
        .route(
            "/cover.jpg",
            get(move || {
                let image = image.clone();
                async move { ([(header::CONTENT_TYPE, "image/jpeg")], image) }
            }),
        )
        .route(
            &format!("/{audio_name}"),
            get(move || {
                let audio = audio.clone();
                async move { ([(header::CONTENT_TYPE, audio_type)], audio) }
            }),
        );
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    Url::parse(&format!("http://{addr}/")).unwrap()
}

#[derive(Debug)]
struct Probed {
    codec: String,
    width: u64,
    height: u64,
    pix_fmt: String,
    duration: f64,
}

fn probe_output(path: &Path) -> Probed {
    let output = Command::new("ffprobe")
        .args([
            "-v",
            "error",
            "-select_streams",
            "v:0",
            "-show_entries",
            "stream=codec_name,width,height,pix_fmt:format=duration",
            "-of",
            "json",
        ])
        .arg(path)
        .output()
        .unwrap();
    assert!(output.status.success());
    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let stream = &json["streams"][0];
    Probed {
        codec: stream["codec_name"].as_str().unwrap().to_string(),
        width: stream["width"].as_u64().unwrap(),
        height: stream["height"].as_u64().unwrap(),
        pix_fmt: stream["pix_fmt"].as_str().unwrap().to_string(),
        duration: json["format"]["duration"]
            .as_str()
            .unwrap()
            .parse()
            .unwrap(),
    }
}

#[tokio::test]
async fn test_both_modes_render_vertical_h264_matching_audio_length() {
    if !tools_available() {
        eprintln!("ffmpeg/ffprobe not installed, skipping");
        return;
    }

    let dir = tempfile::tempdir().unwrap();
    let image = generate(
        dir.path(),
        "cover.jpg",
        &["-f", "lavfi", "-i", "testsrc=size=1080x1920", "-frames:v", "1"],
    )
    .unwrap();
    let sine = ["-f", "lavfi", "-i", "sine=frequency=440:duration=10"];
    // Builds without an MP3 encoder get WAV instead.
    let (audio, audio_name, audio_type) = match generate(dir.path(), "voice.mp3", &sine) {
        Some(path) => (path, "voice.mp3", "audio/mpeg"),
        None => (
            generate(dir.path(), "voice.wav", &sine).unwrap(),
            "voice.wav",
            "audio/wav",
        ),
    };
    let base = serve(
        Bytes::from(std::fs::read(&image).unwrap()),
        Bytes::from(std::fs::read(&audio).unwrap()),
        audio_name,
        audio_type,
    )
    .await;

    let mut config = AppConfig::default();
    config.paths.temp_dir = Some(dir.path().join("work"));
    let pipeline = SynthesisPipeline::from_config(&config).unwrap();

    for mode in [FulfillmentMode::DiskBacked, FulfillmentMode::Streamed] {
        let request = SynthesisRequest::new(
            base.join("cover.jpg").unwrap(),
            base.join(audio_name).unwrap(),
        )
        .with_fulfillment(mode)
        .with_delivery(DeliveryMode::InlineStream);

        let mut job = pipeline.submit(request).unwrap();
        let mut channel = WriterChannel::new(Vec::new());
        let result = pipeline
            .run(&mut job, &mut channel, &CancellationToken::new())
            .await
            .unwrap();
        let body = channel.into_inner();
        assert_eq!(result, DeliveryResult::Inline { bytes: body.len() as u64 });

        let rendered = dir.path().join(format!("{}.mp4", mode.as_str()));
        std::fs::write(&rendered, &body).unwrap();
        let probed = probe_output(&rendered);

        assert_eq!(probed.codec, "h264", "{mode:?}");
        assert_eq!((probed.width, probed.height), (1080, 1920), "{mode:?}");
        assert_eq!(probed.pix_fmt, "yuv420p", "{mode:?}");
        assert!(
            within_one_frame(probed.duration, AUDIO_SECS, 25),
            "{mode:?}: {probed:?}"
        );

        let leftovers: Vec<_> = std::fs::read_dir(dir.path().join("work"))
            .unwrap()
            .filter_map(|e| e.ok())
            .collect();
        assert!(leftovers.is_empty(), "{mode:?}: {leftovers:?}");
    }
}
