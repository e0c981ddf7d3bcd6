// SPDX-License-Identifier: GPL-3.0-only

use camera_session::CaptureError;
use camera_session::backends::HardwareBackendType;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cli;

#[derive(Parser)]
#[command(name = "camera-session")]
#[command(about = "Drive camera capture sessions from the command line")]
#[command(version = env!("GIT_VERSION"))]
struct Cli {
    /// Hardware backend (v4l2, simulated)
    #[arg(short, long, global = true)]
    backend: Option<HardwareBackendType>,

    /// Configuration file (default: ~/.config/camera-session/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List available cameras and microphones
    List,

    /// Show the formats of a camera
    Formats {
        /// Camera id (from 'camera-session list'); default camera if omitted
        #[arg(short, long)]
        camera: Option<String>,
    },

    /// Take a photo
    Photo {
        /// Camera id (from 'camera-session list')
        #[arg(short, long)]
        camera: Option<String>,

        /// Format id (from 'camera-session formats')
        #[arg(short, long)]
        format: Option<String>,

        /// Frame rate of the selected format
        #[arg(long)]
        fps: Option<u32>,

        /// Capture a live photo where supported
        #[arg(short, long)]
        live: bool,
    },

    /// Record a video
    Video {
        /// Camera id (from 'camera-session list')
        #[arg(short, long)]
        camera: Option<String>,

        /// Recording duration in seconds
        #[arg(short, long, default_value = "10")]
        duration: u64,

        /// Enable audio recording
        #[arg(short, long)]
        audio: bool,
    },
}

#[tokio::main]
async fn main() {
    // Initialize logging
    // Set RUST_LOG environment variable to control log level
    // Examples: RUST_LOG=debug, RUST_LOG=camera_session=debug, RUST_LOG=info
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(true)
        .with_level(true)
        .init();

    let args = Cli::parse();
    let options = cli::SessionOptions {
        backend: args.backend,
        config: args.config,
    };

    let result = match args.command {
        Commands::List => cli::list_devices(&options).await,
        Commands::Formats { camera } => cli::show_formats(&options, camera).await,
        Commands::Photo {
            camera,
            format,
            fps,
            live,
        } => cli::take_photo(&options, camera, format, fps, live).await,
        Commands::Video {
            camera,
            duration,
            audio,
        } => cli::record_video(&options, camera, duration, audio).await,
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        let fatal = e
            .downcast_ref::<CaptureError>()
            .is_some_and(CaptureError::is_fatal);
        std::process::exit(if fatal { 2 } else { 1 });
    }
}
