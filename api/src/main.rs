mod broadcast;
mod editor;
mod pipeline;
mod routes;
mod store;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use sentinel_capture::{Capture, FrameSlot, FrameSource, MjpegCapture, PollingCapture};
use sentinel_common::config::{CaptureConfig, Config};
use sentinel_common::TaskHandle;
use sentinel_vision::{detector, Annotator, Pipeline, ZoneDefinition};
use tracing::{error, info, warn};

use crate::broadcast::Broadcaster;
use crate::pipeline::PipelineLoop;
use crate::routes::AppState;
use crate::store::LatestResultStore;

// ---------------------------------------------------------------------------
// Startup helpers
// ---------------------------------------------------------------------------

fn start_source<C: Capture>(capture: C, config: &CaptureConfig) -> (TaskHandle, Arc<FrameSlot>) {
    let source = FrameSource::new(
        capture,
        config.url.clone(),
        Duration::from_secs(config.reconnect_backoff_secs),
        Duration::from_secs(config.read_timeout_secs),
    );
    let slot = source.slot();
    (source.start(), slot)
}

fn start_capture(
    config: &CaptureConfig,
) -> Result<(TaskHandle, Arc<FrameSlot>), sentinel_capture::CaptureError> {
    let connect_timeout = Duration::from_secs(config.connect_timeout_secs);
    match config.mode.as_str() {
        "polling" => {
            let capture = PollingCapture::new(connect_timeout, config.poll_fps)?;
            Ok(start_source(capture, config))
        }
        _ => Ok(start_source(MjpegCapture::new(connect_timeout)?, config)),
    }
}

fn load_annotator(font_path: Option<&str>) -> Arc<Annotator> {
    match Annotator::from_font_path(font_path) {
        Ok(annotator) => Arc::new(annotator),
        Err(e) => {
            warn!(error = %e, "font unavailable, labels will not be rendered");
            Arc::new(Annotator::new(None))
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() {
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    let config = match Config::load(&config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {e}", config_path.display());
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.parse().unwrap_or_default()),
        )
        .init();

    info!(
        url = config.capture.url,
        mode = config.capture.mode,
        width = config.processing.width,
        tick_ms = config.broadcast.tick_ms,
        "starting sentinel"
    );

    let detector = match detector::from_config(&config.detector) {
        Ok(d) => d,
        Err(e) => {
            error!(error = %e, "failed to initialise detector");
            std::process::exit(1);
        }
    };
    let annotator = load_annotator(config.processing.font_path.as_deref());
    let initial_zone = config.zone.as_ref().and_then(ZoneDefinition::from_config);
    match &initial_zone {
        Some(zone) => info!(?zone, "zone loaded from config"),
        None => info!("no zone defined, intrusion testing disabled"),
    }

    // -----------------------------------------------------------------------
    // Start in dependency order: source, pipeline, broadcaster
    // -----------------------------------------------------------------------

    let (mut source_task, frames) = match start_capture(&config.capture) {
        Ok(started) => started,
        Err(e) => {
            error!(error = %e, "failed to create capture client");
            std::process::exit(1);
        }
    };

    let (zone_editor, mut editor_task) = editor::spawn_editor(initial_zone);
    let store = LatestResultStore::new();

    let pipeline = Pipeline::new(
        detector,
        config.processing.width,
        config.processing.person_class_id,
        annotator,
        config.processing.jpeg_quality,
    );
    let mut pipeline_task =
        PipelineLoop::new(pipeline, frames, zone_editor.subscribe(), store.clone()).start();

    let broadcaster = Arc::new(Broadcaster::new(
        store.clone(),
        Duration::from_millis(config.broadcast.tick_ms),
        config.broadcast.observer_queue,
    ));
    let mut broadcast_task = Arc::clone(&broadcaster).start();

    // -----------------------------------------------------------------------
    // HTTP / WebSocket server
    // -----------------------------------------------------------------------

    let state = Arc::new(AppState {
        broadcaster,
        store,
        zone: zone_editor,
    });
    let app = routes::router(state);

    let addr = config.server.bind.clone();
    info!(addr, "sentinel server starting");
    match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => {
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(shutdown_signal())
                .await
            {
                error!(error = %e, "server error");
            }
        }
        Err(e) => error!(addr, error = %e, "failed to bind, shutting down"),
    }

    // -----------------------------------------------------------------------
    // Stop in reverse order
    // -----------------------------------------------------------------------

    for task in [
        &mut broadcast_task,
        &mut pipeline_task,
        &mut editor_task,
        &mut source_task,
    ] {
        info!(task = task.name(), "stopping");
        task.stop().await;
    }
    info!("sentinel stopped");
}
