//! Stillreel CLI: render still-image reels from an image and an audio track.
//!
//! Usage:
//!   stillreel render --image <URL> --audio <URL>   Render and deliver a reel
//!   stillreel probe --audio <URL>                  Fetch audio and report its duration
//!   stillreel plan --duration <SECS>               Show the effect plan and engine arguments
//!   stillreel check                                Check encoder availability
//!   stillreel config <show|path|init>              Inspect or create the config file

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use stillreel_common::config::AppConfig;
use stillreel_job_model::{DeliveryMode, FulfillmentMode};
use url::Url;

mod commands;

#[derive(Parser)]
#[command(
    name = "stillreel",
    about = "Turn a still image and an audio track into a vertical zoom reel",
    version,
    author
)]
struct Cli {
    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Config file (defaults to $STILLREEL_CONFIG or the user config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Render a reel and deliver it
    Render {
        /// Still image URL
        #[arg(long)]
        image: Url,

        /// Audio track URL
        #[arg(long)]
        audio: Url,

        /// Fulfillment mode: disk|streamed
        #[arg(long)]
        mode: Option<FulfillmentMode>,

        /// Delivery mode: inline|download|upload
        #[arg(long)]
        delivery: Option<DeliveryMode>,

        /// Artifact filename
        #[arg(long)]
        filename: Option<String>,

        /// Sink record to attach an upload to
        #[arg(long)]
        destination: Option<String>,

        /// Write the video here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Fetch an audio track and report its duration
    Probe {
        /// Audio track URL
        #[arg(long)]
        audio: Url,

        /// Fulfillment mode used for probing: disk|streamed
        #[arg(long, default_value = "streamed")]
        mode: FulfillmentMode,
    },

    /// Show the effect plan for a given audio duration
    Plan {
        /// Audio duration in seconds
        #[arg(long)]
        duration: f64,

        /// Print engine arguments for this fulfillment mode
        #[arg(long, default_value = "disk")]
        mode: FulfillmentMode,
    },

    /// Check encoder availability
    Check,

    /// Inspect or create the config file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration
    Show,
    /// Print the config file location
    Path,
    /// Write the default configuration
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(stillreel_common::config::config_file_path);
    let mut config = AppConfig::load_from(&config_path);
    config.apply_env_overrides(|key| std::env::var(key).ok());

    let mut logging = config.logging.clone();
    if cli.verbose > 0 {
        logging.level = stillreel_common::logging::level_for_verbosity(cli.verbose).to_string();
    }
    stillreel_common::logging::init_logging(&logging);

    match cli.command {
        Commands::Render {
            image,
            audio,
            mode,
            delivery,
            filename,
            destination,
            output,
        } => {
            commands::render::run(
                &config,
                commands::render::RenderArgs {
                    image,
                    audio,
                    mode,
                    delivery,
                    filename,
                    destination,
                    output,
                },
            )
            .await
        }
        Commands::Probe { audio, mode } => commands::probe::run(&config, audio, mode).await,
        Commands::Plan { duration, mode } => commands::plan::run(&config, duration, mode),
        Commands::Check => commands::check::run(&config),
        Commands::Config { action } => match action {
            ConfigAction::Show => commands::config::show(&config),
            ConfigAction::Path => commands::config::path(&config_path),
            ConfigAction::Init { force } => commands::config::init(&config_path, force),
        },
    }
}
