use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use mien_capture::CaptureHints;
use std::io::Write;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod config;
mod engine;
mod store;
mod stream;

use config::Config;
use engine::{EngineHandle, RecognizeOutcome};
use store::Store;
use stream::CancelToken;

#[derive(Parser)]
#[command(name = "mien", about = "Face enrollment and recognition over histogram/LBP features")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enroll an identity from the camera
    Enroll {
        /// Name to store the template under
        identity: String,
        /// Signatures to capture (default from MIEN_ENROLL_SAMPLES)
        #[arg(short, long)]
        samples: Option<usize>,
    },
    /// Recognize the face currently in front of the camera
    Recognize,
    /// Recognize a face in an image file
    RecognizeImage {
        /// Image to analyze (any format the image crate decodes)
        path: PathBuf,
    },
    /// Write the annotated MJPEG stream to a file or stdout
    Stream {
        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// List enrolled identities
    List,
    /// Remove an enrolled identity
    Remove { identity: String },
    /// Show recent recognition log entries
    Log {
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },
    /// Show engine and camera status
    Status,
}

fn backends() -> Vec<Box<dyn mien_capture::CaptureBackend>> {
    #[cfg(target_os = "linux")]
    {
        vec![Box::new(mien_capture::v4l2::V4l2Backend)]
    }
    #[cfg(not(target_os = "linux"))]
    {
        Vec::new()
    }
}

fn spawn_engine(config: &Config) -> Result<EngineHandle> {
    let hints = CaptureHints {
        width: config.frame_width,
        height: config.frame_height,
        ..CaptureHints::default()
    };
    let model_path = config.model_path.to_string_lossy();
    engine::spawn_engine(&model_path, backends(), config.camera_index, hints)
        .with_context(|| format!("starting engine with model {}", config.model_path.display()))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::from_env();
    let store = Store::open(&config.db_path)
        .with_context(|| format!("opening database {}", config.db_path.display()))?;

    match cli.command {
        Commands::Enroll { identity, samples } => {
            let engine = spawn_engine(&config)?;
            let samples = samples.unwrap_or(config.enroll_samples);
            let outcome = engine.enroll(samples).await?;
            store.save_identity(&identity, &outcome.template)?;
            println!(
                "enrolled '{identity}' from {} signatures ({} frames examined)",
                outcome.template.sample_count, outcome.attempts
            );
        }
        Commands::Recognize => {
            let engine = spawn_engine(&config)?;
            let gallery = store.load_gallery()?;
            let outcome = engine
                .recognize(gallery, config.single_shot_threshold)
                .await?;
            report_and_log(&store, &outcome)?;
        }
        Commands::RecognizeImage { path } => {
            let engine = spawn_engine(&config)?;
            let image = image::open(&path)
                .with_context(|| format!("decoding {}", path.display()))?
                .to_rgb8();
            let (width, height) = image.dimensions();
            let gallery = store.load_gallery()?;
            let outcome = engine
                .recognize_image(
                    image.into_raw(),
                    width,
                    height,
                    gallery,
                    config.single_shot_threshold,
                )
                .await?;
            report_and_log(&store, &outcome)?;
        }
        Commands::Stream { output } => {
            let engine = spawn_engine(&config)?;
            let gallery = store.load_gallery()?;

            let sink: Box<dyn Write + Send> = match &output {
                Some(path) => Box::new(
                    std::fs::File::create(path)
                        .with_context(|| format!("creating {}", path.display()))?,
                ),
                None => Box::new(std::io::stdout()),
            };

            let cancel = CancelToken::new();
            let ctrl_c_cancel = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::info!("interrupt received; stopping stream");
                    ctrl_c_cancel.cancel();
                }
            });

            let stats = engine
                .stream(
                    gallery,
                    config.stream_threshold,
                    config.recognition_interval,
                    config.stream_fps,
                    sink,
                    cancel,
                )
                .await?;
            eprintln!(
                "stream ended: {} frames ({} placeholders, {} analyzed, {} matches)",
                stats.frames_emitted, stats.placeholder_frames, stats.analyzed_frames, stats.matches
            );
        }
        Commands::List => {
            let rows = store.list_identities()?;
            if rows.is_empty() {
                println!("no identities enrolled");
            }
            for row in rows {
                println!(
                    "{}  ({} samples, enrolled {})",
                    row.identity, row.sample_count, row.created_at
                );
            }
        }
        Commands::Remove { identity } => {
            if store.remove_identity(&identity)? {
                println!("removed '{identity}'");
            } else {
                println!("no such identity: '{identity}'");
            }
        }
        Commands::Log { limit } => {
            let entries = store.recent_log(limit)?;
            if entries.is_empty() {
                println!("recognition log is empty");
            }
            for entry in entries {
                let who = entry.identity.as_deref().unwrap_or("-");
                println!(
                    "{}  {:<9} {:<12} score {:.3}",
                    entry.at, entry.status, who, entry.score
                );
            }
        }
        Commands::Status => {
            let engine = spawn_engine(&config)?;
            let status = engine.status().await?;
            println!("camera: {:?}", status.session_state);
            if let Some(backend) = status.backend {
                println!("backend: {backend}");
            }
            println!("enrolled identities: {}", store.identity_count()?);
            println!("model: {}", config.model_path.display());
        }
    }

    Ok(())
}

fn report_and_log(store: &Store, outcome: &RecognizeOutcome) -> Result<()> {
    match outcome {
        RecognizeOutcome::EmptyGallery => {
            println!("no identities enrolled; nothing to match against");
        }
        RecognizeOutcome::NoFace => {
            store.log_recognition(None, 0.0, "no_face")?;
            println!("no face detected");
        }
        RecognizeOutcome::NoMatch { best_score } => {
            store.log_recognition(None, *best_score, "no_match")?;
            println!("no match (best score {best_score:.3})");
        }
        RecognizeOutcome::Match { identity, score } => {
            store.log_recognition(Some(identity), *score, "match")?;
            println!("matched '{identity}' (score {score:.3})");
        }
    }
    Ok(())
}
