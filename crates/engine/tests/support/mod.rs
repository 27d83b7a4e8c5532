//! Shared harness: a local asset server plus scriptable stand-ins for
//! `ffmpeg` and `ffprobe`.

#![allow(dead_code)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use axum::http::header;
use axum::routing::get;
use axum::Router;
use stillreel_common::config::AppConfig;
use tempfile::TempDir;
use tokio::net::TcpListener;
use url::Url;

pub const IMAGE_BYTES: &[u8] = b"\xff\xd8\xff\xe0fake-jpeg-body";
pub const AUDIO_BYTES: &[u8] = b"ID3\x04fake-mp3-body-with-some-frames";
pub const FAKE_VIDEO: &[u8] = b"FAKEMP4";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineBehavior {
    Succeed,
    Fail,
    Hang,
    /// Sleeps for a second before opening any input, then succeeds.
    SlowStart,
}

#[derive(Debug, Clone, Copy)]
pub struct FakeTools {
    pub engine: EngineBehavior,
    pub pipe_probe_fails: bool,
    pub file_probe_fails: bool,
}

impl Default for FakeTools {
    fn default() -> Self {
        Self {
            engine: EngineBehavior::Succeed,
            pipe_probe_fails: false,
            file_probe_fails: false,
        }
    }
}

pub struct Harness {
    pub dir: TempDir,
    pub base_url: Url,
    pub config: AppConfig,
}

impl Harness {
    pub async fn start(tools: FakeTools) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let bin = dir.path().join("bin");
        std::fs::create_dir_all(&bin).unwrap();

        let ffmpeg = write_script(&bin, "ffmpeg", &ffmpeg_script(tools.engine, &dir.path().join("ffmpeg.log")));
        let ffprobe = write_script(
            &bin,
            "ffprobe",
            &ffprobe_script(tools, &dir.path().join("ffprobe.log")),
        );

        let mut config = AppConfig::default();
        config.engine.ffmpeg_path = ffmpeg;
        config.engine.ffprobe_path = ffprobe;
        config.engine.probe_timeout_secs = 10;
        config.engine.encode_timeout_secs = 30;
        config.engine.pipe_open_timeout_ms = 5_000;
        config.fetch.timeout_secs = 10;
        config.fetch.max_audio_bytes = 1024;
        config.paths.temp_dir = Some(dir.path().join("work"));

        let base_url = serve_assets().await;
        Self {
            dir,
            base_url,
            config,
        }
    }

    pub fn url(&self, path: &str) -> Url {
        self.base_url.join(path).unwrap()
    }

    pub fn work_dir(&self) -> PathBuf {
        self.dir.path().join("work")
    }

    /// Files left in the workspace root.
    pub fn leftover_files(&self) -> Vec<String> {
        match std::fs::read_dir(self.work_dir()) {
            Ok(entries) => entries
                .filter_map(|e| e.ok())
                .map(|e| e.file_name().to_string_lossy().into_owned())
                .collect(),
            Err(_) => Vec::new(),
        }
    }

    pub fn ffprobe_calls(&self) -> Vec<String> {
        read_log(&self.dir.path().join("ffprobe.log"))
    }

    pub fn ffmpeg_calls(&self) -> Vec<String> {
        read_log(&self.dir.path().join("ffmpeg.log"))
    }
}

fn read_log(path: &Path) -> Vec<String> {
    std::fs::read_to_string(path)
        .unwrap_or_default()
        .lines()
        .map(str::to_string)
        .collect()
}

fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, body).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

fn ffmpeg_script(behavior: EngineBehavior, log: &Path) -> String {
    let ending = match behavior {
        EngineBehavior::Succeed | EngineBehavior::SlowStart => String::from(
            r#"echo "frame=10" >&2
echo "out_time_us=1000000" >&2
echo "progress=end" >&2
if [ "$last" = "pipe:1" ]; then
  printf 'FAKEMP4'
else
  printf 'FAKEMP4' > "$last"
fi"#,
        ),
        EngineBehavior::Fail => String::from(
            r#"echo "[libx264 @ 0x5599] width not divisible by 2" >&2
echo "Conversion failed!" >&2
exit 1"#,
        ),
        EngineBehavior::Hang => String::from("exec sleep 30"),
    };

    let startup = if behavior == EngineBehavior::SlowStart {
        "sleep 1"
    } else {
        ":"
    };

    format!(
        r#"#!/bin/sh
echo "$@" >> "{log}"
{startup}
prev=""
last=""
for arg in "$@"; do
  if [ "$prev" = "-i" ]; then
    if [ "$arg" = "pipe:0" ]; then cat > /dev/null; else cat "$arg" > /dev/null; fi
  fi
  prev="$arg"
  last="$arg"
done
{ending}
"#,
        log = log.display(),
    )
}

fn ffprobe_script(tools: FakeTools, log: &Path) -> String {
    let pipe_branch = if tools.pipe_probe_fails {
        r#"  cat > /dev/null
  echo "pipe:0: Invalid data found when processing input" >&2
  exit 1"#
    } else {
        "  cat > /dev/null"
    };

    let file_check = if tools.file_probe_fails {
        r#"  echo "$last: Invalid data found when processing input" >&2
  exit 1"#
    } else {
        r#"  if [ ! -s "$last" ]; then
    echo "$last: No such file or directory" >&2
    exit 1
  fi"#
    };

    format!(
        r#"#!/bin/sh
echo "$@" >> "{log}"
last=""
for arg in "$@"; do last="$arg"; done
if [ "$last" = "pipe:0" ]; then
{pipe_branch}
else
{file_check}
fi
echo '{{"format": {{"duration": "10.000000"}}}}'
"#,
        log = log.display(),
    )
}

async fn serve_assets() -> Url {
    let app = Router::new()
        .route(
            "/image.jpg",
            get(|| async { ([(header::CONTENT_TYPE, "image/jpeg")], IMAGE_BYTES) }),
        )
        .route(
            "/audio.mp3",
            get(|| async { ([(header::CONTENT_TYPE, "audio/mpeg")], AUDIO_BYTES) }),
        )
        .route(
            "/empty.mp3",
            get(|| async { ([(header::CONTENT_TYPE, "audio/mpeg")], "") }),
        )
        .route(
            "/large.mp3",
            get(|| async { ([(header::CONTENT_TYPE, "audio/mpeg")], vec![0u8; 4096]) }),
        );

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    Url::parse(&format!("http://{addr}/")).unwrap()
}
