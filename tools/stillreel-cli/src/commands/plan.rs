//! Show the effect plan and engine arguments for a duration.

use stillreel_common::config::AppConfig;
use stillreel_effects::build_plan;
use stillreel_engine::encode::engine_args;
use stillreel_job_model::FulfillmentMode;

pub fn run(config: &AppConfig, duration: f64, mode: FulfillmentMode) -> anyhow::Result<()> {
    let plan = build_plan(duration, &config.effect)?;

    println!("Effect plan");
    println!("{}", "=".repeat(50));
    print!("{}", plan.describe());
    println!();

    let args = match mode {
        FulfillmentMode::DiskBacked => {
            engine_args(&plan, "image.jpg", "audio.mp3", false, "output.mp4")
        }
        FulfillmentMode::Streamed => {
            engine_args(&plan, "pipe:0", "audio.fifo", true, "pipe:1")
        }
    };
    println!("Engine invocation ({}):", mode.as_str());
    println!("  {} {}", config.engine.ffmpeg_path.display(), shell_join(&args));
    Ok(())
}

fn shell_join(args: &[String]) -> String {
    args.iter()
        .map(|arg| {
            if arg.chars().any(|c| " '(),;[]".contains(c)) {
                format!("\"{arg}\"")
            } else {
                arg.clone()
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
