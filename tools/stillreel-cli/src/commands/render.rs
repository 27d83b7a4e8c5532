//! Render a reel and deliver it.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use stillreel_common::config::AppConfig;
use stillreel_delivery::{DeliveryResult, WriterChannel};
use stillreel_engine::{EncodeProgress, EncodeStage, SynthesisPipeline};
use stillreel_job_model::{DeliveryMode, FulfillmentMode, SynthesisRequest};
use tokio::io::AsyncWrite;
use tokio_util::sync::CancellationToken;
use url::Url;

pub struct RenderArgs {
    pub image: Url,
    pub audio: Url,
    pub mode: Option<FulfillmentMode>,
    pub delivery: Option<DeliveryMode>,
    pub filename: Option<String>,
    pub destination: Option<String>,
    pub output: Option<PathBuf>,
}

pub async fn run(config: &AppConfig, args: RenderArgs) -> anyhow::Result<()> {
    let pipeline = SynthesisPipeline::from_config(config)?
        .with_progress(Arc::new(|p: EncodeProgress| match p.stage {
            EncodeStage::Encoding | EncodeStage::Finalizing => eprint!(
                "\r  Progress: {:.1}% ({}/{} frames, ETA: {:.0}s)  ",
                p.progress * 100.0,
                p.frames_rendered,
                p.total_frames,
                p.eta_secs,
            ),
            EncodeStage::Complete | EncodeStage::Failed => eprintln!(),
            EncodeStage::Preparing => {}
        }));

    let request = SynthesisRequest {
        image_url: args.image,
        audio_url: args.audio,
        fulfillment_mode: args.mode,
        delivery_mode: args.delivery,
        filename: args.filename,
        destination: args.destination,
    };
    let mut job = pipeline.submit(request)?;

    let writer: Box<dyn AsyncWrite + Unpin + Send> = match &args.output {
        Some(path) if job.delivery_mode() != DeliveryMode::ExternalUpload => {
            Box::new(tokio::fs::File::create(path).await?)
        }
        _ => Box::new(tokio::io::stdout()),
    };
    let mut channel = WriterChannel::new(writer);

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling job");
            on_interrupt.cancel();
        }
    });

    match pipeline.run(&mut job, &mut channel, &cancel).await {
        Ok(DeliveryResult::Uploaded(ack)) => {
            println!("{}", serde_json::to_string_pretty(&ack)?);
        }
        Ok(DeliveryResult::Inline { bytes }) => {
            if let Some(path) = &args.output {
                eprintln!("Wrote {bytes} bytes to {}", path.display());
            }
        }
        Ok(DeliveryResult::Download { filename, bytes }) => {
            let target = args
                .output
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "stdout".to_string());
            eprintln!("Downloaded {filename} ({bytes} bytes) to {target}");
        }
        Err(failure) => {
            eprintln!("{}", serde_json::to_string_pretty(&failure.to_response())?);
            if let Some(path) = &args.output {
                discard_partial_output(path).await;
            }
            return Err(failure.into());
        }
    }
    Ok(())
}

/// Remove an output file from a failed run. Nothing useful was written.
async fn discard_partial_output(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        tracing::debug!(path = %path.display(), "Failed to remove partial output: {}", e);
    }
}
