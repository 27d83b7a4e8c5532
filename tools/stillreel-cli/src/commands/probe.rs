//! Fetch an audio track and report its duration.

use stillreel_common::clock::{format_engine_secs, frames_for};
use stillreel_common::config::AppConfig;
use stillreel_engine::{AssetFetcher, DurationProber, Workspace};
use stillreel_job_model::{AssetRole, FulfillmentMode, JobId};
use url::Url;

pub async fn run(config: &AppConfig, url: Url, mode: FulfillmentMode) -> anyhow::Result<()> {
    config.validate()?;
    let fetcher = AssetFetcher::new(&config.fetch)?;
    let prober = DurationProber::new(
        config.engine.ffprobe_path.clone(),
        std::time::Duration::from_secs(config.engine.probe_timeout_secs),
    );

    let audio = fetcher.fetch_one(AssetRole::Audio, &url).await?;
    let workspace = Workspace::create(JobId::new(), config.paths.workspace_root()).await?;
    let duration = prober.probe(&audio, mode, &workspace).await;
    workspace.teardown()?;
    let duration = duration?;

    println!("Audio: {url}");
    println!("  Media type: {}", audio.media_type_hint());
    println!("  Size: {} bytes", audio.size_bytes());
    println!("  Duration: {}s", format_engine_secs(duration));
    println!(
        "  Frames at {}fps: {}",
        config.effect.fps,
        frames_for(duration, config.effect.fps)
    );
    Ok(())
}
