//! Check encoder availability.

use std::path::Path;
use std::process::Command;

use stillreel_common::config::AppConfig;
use stillreel_engine::command_exists;

pub fn run(config: &AppConfig) -> anyhow::Result<()> {
    println!("Stillreel System Check");
    println!("{}", "=".repeat(50));

    let ffmpeg = &config.engine.ffmpeg_path;
    let ffprobe = &config.engine.ffprobe_path;
    let mut ready = report_binary("ffmpeg", ffmpeg);
    ready &= report_binary("ffprobe", ffprobe);

    if command_exists(ffmpeg) {
        let encoders = list_encoders(ffmpeg);
        for name in [&config.effect.video_codec, &config.effect.audio_codec] {
            let found = encoders.iter().any(|e| e == name);
            println!("[{}] Encoder: {name}", if found { "OK" } else { "MISSING" });
            ready &= found;
        }
    }

    #[cfg(unix)]
    println!("[OK] Named pipes: available (streamed mode supported)");
    #[cfg(not(unix))]
    println!("[WARN] Named pipes: unavailable (streamed mode disabled)");

    match config.validate() {
        Ok(()) => println!("[OK] Configuration"),
        Err(e) => {
            println!("[MISSING] Configuration: {e}");
            ready = false;
        }
    }
    println!(
        "     Workspace root: {}",
        config.paths.workspace_root().display()
    );
    println!(
        "     Sink: {}",
        config
            .sink
            .as_ref()
            .map(|s| s.upload_url.to_string())
            .unwrap_or_else(|| "not configured (uploads disabled)".to_string())
    );

    println!();
    if ready {
        println!("All required capabilities are available. Stillreel is ready.");
    } else {
        println!("Some required capabilities are missing. See above for fixes.");
    }
    Ok(())
}

fn report_binary(label: &str, path: &Path) -> bool {
    let found = command_exists(path);
    if found {
        println!("[OK] {label}: {}", path.display());
    } else {
        println!("[MISSING] {label}: {} (install ffmpeg or set engine paths)", path.display());
    }
    found
}

/// Encoder names from `ffmpeg -encoders`.
fn list_encoders(ffmpeg: &Path) -> Vec<String> {
    let output = match Command::new(ffmpeg).args(["-hide_banner", "-encoders"]).output() {
        Ok(output) => output,
        Err(e) => {
            tracing::debug!("ffmpeg -encoders failed: {}", e);
            return Vec::new();
        }
    };
    String::from_utf8_lossy(&output.stdout)
        .lines()
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let flags = parts.next()?;
            let name = parts.next()?;
            (flags.len() == 6 && flags.starts_with(['V', 'A'])).then(|| name.to_string())
        })
        .collect()
}
