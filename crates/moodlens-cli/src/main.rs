use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use moodlens_core::{Frame, InputLayout, Pipeline, PipelineConfig};
use moodlens_hw::Camera;
use std::ops::ControlFlow;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "moodlens", version, about = "Facial emotion detection CLI")]
struct Cli {
    /// Directory holding det_10g.onnx and emotion_fer.onnx
    #[arg(long, env = "MOODLENS_MODEL_DIR", global = true)]
    model_dir: Option<PathBuf>,

    /// Input tensor layout of the emotion model (nchw or nhwc)
    #[arg(long, env = "MOODLENS_FER_LAYOUT", default_value = "nchw", global = true)]
    layout: InputLayout,

    /// Minimum confidence for a non-neutral result, in [0, 1]
    #[arg(long, global = true, value_parser = parse_threshold)]
    threshold: Option<f32>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Detect the emotion of the principal face in an image file
    Detect {
        /// Path to a PNG/JPEG/... image
        image: PathBuf,
    },
    /// Run detection continuously on a camera feed
    Watch {
        /// V4L2 device path
        #[arg(short, long, default_value = "/dev/video0")]
        device: String,
        /// Stop after this many frames
        #[arg(short, long)]
        frames: Option<usize>,
    },
    /// List available cameras
    Devices,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match &cli.command {
        Commands::Detect { image } => {
            let pipeline = load(&cli)?;
            let img = image::open(image).with_context(|| format!("failed to open {}", image.display()))?;
            let result = pipeline.detect(&Frame::from(img));
            println!("{}", serde_json::to_string(&result)?);
        }
        Commands::Watch { device, frames } => {
            let pipeline = load(&cli)?;
            let camera = Camera::open(device).with_context(|| format!("failed to open {device}"))?;
            tracing::info!(
                device = %device,
                width = camera.width,
                height = camera.height,
                "camera opened"
            );
            let mut stream = camera.stream(*frames)?;

            let summary = pipeline.watch(&mut stream, |_frame, result| {
                if result.is_fallback() {
                    tracing::debug!("frame fell back to neutral");
                }
                println!("{:<10} {:.2}", result.label(), result.confidence());
                ControlFlow::Continue(())
            })?;

            tracing::info!(
                frames = summary.frames,
                detections = summary.detections,
                dark_skipped = stream.dark_skipped(),
                "watch finished"
            );
            println!(
                "{} frames, {} detections, {} dark frames skipped",
                summary.frames,
                summary.detections,
                stream.dark_skipped()
            );
        }
        Commands::Devices => {
            let devices = Camera::list_devices();
            if devices.is_empty() {
                println!("No video capture devices found");
            }
            for dev in devices {
                println!("{}  {} ({}, {})", dev.path, dev.name, dev.driver, dev.bus);
            }
        }
    }

    Ok(())
}

fn load(cli: &Cli) -> Result<Pipeline> {
    let model_dir = cli.model_dir.clone().unwrap_or_else(moodlens_core::default_model_dir);
    let mut config = PipelineConfig::default();
    if let Some(t) = cli.threshold {
        config.confidence_threshold = t;
    }
    config.validate()?;

    let pipeline = moodlens_core::load_pipeline(&model_dir, cli.layout, config)
        .with_context(|| format!("failed to load models from {}", model_dir.display()))?;
    tracing::info!(model_dir = %model_dir.display(), layout = ?cli.layout, "models loaded");
    Ok(pipeline)
}

fn parse_threshold(s: &str) -> Result<f32, String> {
    let value: f32 = s.parse().map_err(|e| format!("{e}"))?;
    moodlens_core::validate_threshold(value).map_err(|e| e.to_string())
}
