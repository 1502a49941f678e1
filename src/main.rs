//! llmpilot CLI - replay a folder of camera frames through an LLM driver

use anyhow::{Context, Result};
use clap::Parser;
use llmpilot::{
    config::PilotConfig,
    orchestrator::Orchestrator,
    pricing::PricingService,
    transport::{HttpInferenceTransport, HttpPricingSource},
};
use std::path::PathBuf;
use tracing::{debug, error, info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "llmpilot")]
#[command(about = "Drive a small vehicle from recorded camera frames using multimodal LLMs")]
#[command(version)]
struct Cli {
    /// Path to folder with camera frames
    #[arg(short, long, default_value = "./test-images")]
    images: PathBuf,

    /// Number of frames to process (default: all remaining)
    #[arg(short, long)]
    frames: Option<usize>,

    /// Process every Nth frame
    #[arg(short = 'x', long, default_value = "2")]
    skip: usize,

    /// Start from the Nth image
    #[arg(short, long, default_value = "0")]
    start: usize,

    /// Path to the config file (default: ~/.config/llmpilot/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Model identifier override
    #[arg(short, long)]
    model: Option<String>,

    /// Verbosity level
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let log_level = match cli.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    // Load configuration
    let mut config = match cli.config {
        Some(path) => PilotConfig::load_from(path)?,
        None => PilotConfig::load()?,
    };
    if let Some(model) = cli.model {
        config.model.model_id = model;
    }
    config.validate()?;

    // Wire up the orchestrator
    let mut transport = HttpInferenceTransport::new(config.endpoint.base_url.clone());
    if let Some(key) = &config.endpoint.api_key {
        transport = transport.with_api_key(key.clone());
    }
    let pricing = PricingService::new(HttpPricingSource::new(config.endpoint.pricing_url.clone()));
    let mut orchestrator =
        Orchestrator::new(config.orchestrator_config(), transport, pricing)?;
    orchestrator.load_pricing().await;

    info!(
        "agent initialized with model {} in {}",
        config.model.model_id, config.model.region
    );

    // Collect and numerically sort the frame files
    let image_files = collect_frames(&cli.images)?;
    if image_files.is_empty() {
        anyhow::bail!("no image files found in {}", cli.images.display());
    }

    let skip = cli.skip.max(1);
    let available = (image_files.len().saturating_sub(cli.start)) / skip;
    let frames_to_process = cli.frames.unwrap_or(available).min(available);

    info!(
        "found {} images, starting from image {}, processing {} frames (every {}. frame)",
        image_files.len(),
        cli.start,
        frames_to_process,
        skip
    );

    for i in 0..frames_to_process {
        let frame_index = cli.start + i * skip;
        let image_path = &image_files[frame_index];
        info!(
            "[{}/{}] processing image: {}",
            i + 1,
            frames_to_process,
            image_path.display()
        );

        let image = std::fs::read(image_path)
            .with_context(|| format!("failed to read {}", image_path.display()))?;

        let mut prompt = config.model.repeated_prompt.clone();
        if i > 0 && config.model.context_window > 0 {
            prompt.push_str(" Compare with the previous image to interpret how you are moving.");
        }

        match orchestrator.process_image(&image, &prompt).await {
            Ok(action) => {
                info!(
                    "action to take: {}",
                    serde_json::to_string_pretty(&action).unwrap_or_default()
                );
            }
            Err(e) => {
                error!("failed to process frame: {e}");
            }
        }

        // Small delay between frames to avoid rate limits
        if i < frames_to_process - 1 {
            debug!("waiting before processing next image...");
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        }
    }

    info!("\n{}", orchestrator.token_usage());
    info!("all frames processed");

    Ok(())
}

/// Gather jpg/jpeg/png files and sort them by the number embedded in their
/// file names, so `frame_10.jpg` follows `frame_9.jpg`.
fn collect_frames(dir: &PathBuf) -> Result<Vec<PathBuf>> {
    let entries = std::fs::read_dir(dir)
        .with_context(|| format!("images directory not found: {}", dir.display()))?;

    let mut files: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            matches!(
                path.extension().and_then(|e| e.to_str()),
                Some("jpg") | Some("jpeg") | Some("png")
            )
        })
        .collect();

    files.sort_by_key(|path| {
        path.file_name()
            .and_then(|n| n.to_str())
            .map(|name| {
                name.chars()
                    .filter(char::is_ascii_digit)
                    .collect::<String>()
                    .parse::<u64>()
                    .unwrap_or(0)
            })
            .unwrap_or(0)
    });

    Ok(files)
}
