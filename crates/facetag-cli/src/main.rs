mod config;
mod live;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use config::Config;
use facetag_core::{
    annotate, render, stop_channel, CaptureLoop, DirectoryStore, EnrollmentManifest, FaceMatcher,
    FrameSize, Gallery, GalleryBuilder, ImageOverlay, ModelHandle, ModelProvider,
};
use facetag_hw::Camera;
use live::{LiveCamera, SnapshotSurface};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "facetag", about = "Label known faces in a live webcam feed")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Label faces from the camera until Ctrl-C
    Run,
    /// Detect and label every face in a still image
    Identify {
        /// Image to analyse
        image: PathBuf,
        /// Write the annotated image here
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Build the gallery from reference images and summarise it
    Gallery,
    /// List V4L2 capture devices
    Devices,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::from_env();

    match cli.command {
        Commands::Run => run(&config).await,
        Commands::Identify { image, output } => identify(&config, &image, output.as_deref()).await,
        Commands::Gallery => gallery(&config).await,
        Commands::Devices => {
            devices();
            Ok(())
        }
    }
}

fn load_models(config: &Config) -> Result<ModelHandle> {
    ModelHandle::load(&config.detector_model_path(), &config.recognizer_model_path())
        .with_context(|| format!("failed to load models from {}", config.model_dir.display()))
}

async fn build_gallery<P: ModelProvider>(config: &Config, models: &mut P) -> Result<Gallery> {
    let manifest = EnrollmentManifest::load_or_default(&config.labels_dir)?;
    let store = DirectoryStore::new(&config.labels_dir);
    let gallery = GalleryBuilder::new(&store, manifest)
        .policy(config.enrollment_policy)
        .build(models)
        .await
        .with_context(|| format!("failed to build gallery from {}", config.labels_dir.display()))?;
    Ok(gallery)
}

async fn run(config: &Config) -> Result<()> {
    let mut models = load_models(config)?;

    let camera = match Camera::open(&config.camera_device) {
        Ok(camera) => camera,
        Err(e) => {
            tracing::error!(device = %config.camera_device, error = %e, "camera unavailable");
            models.release().await;
            anyhow::bail!("cannot start without a camera: {e}");
        }
    };
    let warmup = config.warmup_frames;
    let camera = match tokio::task::spawn_blocking(move || {
        camera.warm_up(warmup);
        camera
    })
    .await
    {
        Ok(camera) => camera,
        Err(e) => {
            models.release().await;
            return Err(e).context("camera warm-up task failed");
        }
    };

    let gallery = match build_gallery(config, &mut models).await {
        Ok(gallery) => gallery,
        Err(e) => {
            models.release().await;
            return Err(e);
        }
    };
    let matcher =
        FaceMatcher::new(gallery, config.match_threshold).with_strategy(config.match_strategy);

    let (handle, signal) = stop_channel();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received, stopping");
            handle.stop();
        }
    });

    let surface = SnapshotSurface::new(config.display_size(), &config.snapshot_path);
    tracing::info!(snapshot = %config.snapshot_path.display(), "publishing overlay snapshots");

    let stats = {
        let mut capture = CaptureLoop::new(
            LiveCamera::new(camera),
            &mut models,
            &matcher,
            surface,
            config.loop_config(),
        );
        capture.run(signal).await
    };

    models.release().await;
    println!(
        "{} cycles, {} skipped, {} faces labelled",
        stats.cycles, stats.skipped, stats.faces
    );
    Ok(())
}

async fn identify(config: &Config, image_path: &Path, output: Option<&Path>) -> Result<()> {
    let image = image::open(image_path)
        .with_context(|| format!("failed to open {}", image_path.display()))?
        .to_rgb8();
    let size = FrameSize::new(image.width(), image.height());
    let image = Arc::new(image);

    let mut models = load_models(config)?;
    let outcome = async {
        let gallery = build_gallery(config, &mut models).await?;
        let matcher =
            FaceMatcher::new(gallery, config.match_threshold).with_strategy(config.match_strategy);
        let detections = models.detect_all(Arc::clone(&image)).await?;
        Ok::<_, anyhow::Error>(annotate(&matcher, &detections, size, size)?)
    }
    .await;
    models.release().await;
    let results = outcome?;

    if results.is_empty() {
        eprintln!("no faces found in {}", image_path.display());
    }
    for result in &results {
        println!("{}", serde_json::to_string(result)?);
    }

    if let Some(output) = output {
        let mut overlay = ImageOverlay::new(size);
        render(&mut overlay, &results);
        overlay
            .composite(&image)
            .save(output)
            .with_context(|| format!("failed to write {}", output.display()))?;
        println!("annotated image written to {}", output.display());
    }
    Ok(())
}

async fn gallery(config: &Config) -> Result<()> {
    let mut models = load_models(config)?;
    let built = build_gallery(config, &mut models).await;
    models.release().await;
    let gallery = built?;

    let labels: Vec<_> = gallery
        .sets()
        .iter()
        .map(|set| serde_json::json!({ "label": set.label, "descriptors": set.descriptors.len() }))
        .collect();
    let summary = serde_json::json!({
        "labels": labels,
        "descriptors": gallery.descriptor_count(),
        "dimension": gallery.dimension(),
        "threshold": config.match_threshold,
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

fn devices() {
    let devices = Camera::list_devices();
    if devices.is_empty() {
        println!("No V4L2 capture devices found");
        return;
    }
    for dev in devices {
        println!("{}  {} ({}, {})", dev.path, dev.name, dev.driver, dev.bus);
    }
}
