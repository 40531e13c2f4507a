use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use doorward_core::enrollment::StartupSource;
use doorward_core::{EnrollmentService, GalleryStore, ImageStore, Matcher, SnapshotCache};
use doorward_vision::OnnxExtractor;
use tracing_subscriber::EnvFilter;

mod actuator;
mod config;
mod engine;
mod handlers;

use actuator::{CommandActuator, DoorActuator, LogActuator};
use config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("doorwardd starting");
    let config = Config::from_env();

    let images = ImageStore::open(&config.enrolled_dir)
        .with_context(|| format!("opening enrolled dir {}", config.enrolled_dir.display()))?;
    let cache = SnapshotCache::new(&config.cache_path);
    let gallery = Arc::new(GalleryStore::empty());
    let matcher = Arc::new(Matcher::new(Arc::clone(&gallery), config.tolerance)?);

    // One model instance per engine thread; fail fast if either is missing.
    let recognition_models = OnnxExtractor::load(&config.model_dir)?;
    let gallery_models = OnnxExtractor::load(&config.model_dir)?;
    tracing::info!(dir = %config.model_dir.display(), "models loaded");

    let service = EnrollmentService::new(images.clone(), cache, Arc::clone(&gallery));
    let gallery_worker = engine::spawn_gallery_worker(service, gallery_models)?;
    let startup = gallery_worker
        .load_or_rebuild()
        .await
        .context("initial gallery load failed")?;
    match &startup.source {
        StartupSource::Cache => tracing::info!(members = startup.members, "gallery loaded from cache"),
        StartupSource::Rebuilt(reason) => {
            tracing::info!(members = startup.members, reason = %reason, "gallery rebuilt at startup")
        }
    }

    let recognizer = engine::spawn_recognizer(recognition_models, config.debug_frame_path.clone())?;

    let actuator: Arc<dyn DoorActuator> = match &config.unlock_command {
        Some(command) => {
            tracing::info!(command = %command, "unlock command configured");
            Arc::new(CommandActuator::new(
                command.clone(),
                Duration::from_secs(config.unlock_timeout_secs),
            ))
        }
        None => {
            tracing::info!("no DOORWARD_UNLOCK_COMMAND set; unlocks are only logged");
            Arc::new(LogActuator)
        }
    };

    let state = handlers::AppState {
        recognizer,
        gallery_worker,
        gallery,
        matcher,
        images,
        actuator,
    };
    let app = handlers::app(state, config.max_upload_bytes);

    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("binding {}", config.bind))?;
    tracing::info!(addr = %config.bind, tolerance = config.tolerance, "doorwardd ready");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("doorwardd shutting down");
        })
        .await?;

    Ok(())
}
