mod capture;
mod clock;
mod publisher;
mod server;
mod source;

use clock::MonotonicClock;
use motion_cam_common::config::{Config, StreamConfig};
use motion_cam_detector::{MotionEngine, SharedEngine};
use publisher::BrokerPublisher;
use server::AppState;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{error, info};

/// Frames waiting for the capture loop. Kept small so the live view and the
/// motion engine always see recent frames.
const FRAME_QUEUE: usize = 2;
/// Approved frames waiting for the broker.
const PUBLISH_QUEUE: usize = 4;

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
        device_id = config.device.id,
        stream_url = config.stream.url,
        mode = config.stream.mode,
        fps = config.stream.fps,
        brokers = config.broker.brokers,
        topic = config.broker.topic,
        motion_enabled = config.motion.enabled,
        threshold = config.motion.threshold,
        pixel_threshold = config.motion.pixel_threshold,
        cooldown_ms = config.motion.cooldown_ms,
        "starting motion camera"
    );

    let engine = match MotionEngine::new(&config.motion) {
        Ok(engine) => SharedEngine::new(engine),
        Err(e) => {
            error!(error = %e, "invalid motion settings");
            std::process::exit(1);
        }
    };

    let publisher = match BrokerPublisher::new(&config) {
        Ok(p) => p,
        Err(e) => {
            error!(error = %e, "failed to set up broker publisher");
            std::process::exit(1);
        }
    };

    let clock = MonotonicClock::start();
    let (frame_tx, frame_rx) = mpsc::channel(FRAME_QUEUE);
    let (live_tx, live_rx) = watch::channel(None);
    let (approved_tx, approved_rx) = mpsc::channel(PUBLISH_QUEUE);

    let source = match config.stream.mode.as_str() {
        "mjpeg" => {
            let url = mjpeg_url(&config.stream);
            tokio::spawn(async move { source::run_mjpeg_source(&url, clock, frame_tx).await })
        }
        "polling" => {
            let url = polling_url(&config.stream);
            let interval = poll_interval(config.stream.fps);
            tokio::spawn(async move {
                source::run_polling_source(&url, interval, clock, frame_tx).await
            })
        }
        other => {
            error!(mode = other, "unknown stream mode, expected \"mjpeg\" or \"polling\"");
            std::process::exit(1);
        }
    };

    let capture = tokio::spawn(capture::run_capture_loop(
        frame_rx,
        engine.clone(),
        live_tx,
        approved_tx,
    ));
    let publishing = tokio::spawn(publisher::run_publisher(approved_rx, publisher));

    let state = Arc::new(AppState {
        engine: engine.clone(),
        frames: live_rx,
        clock,
    });
    let app = server::router(state);

    let addr = format!("0.0.0.0:{}", config.http.port);
    let listener = tokio::net::TcpListener::bind(&addr).await.unwrap_or_else(|e| {
        eprintln!("Failed to bind to {addr}: {e}");
        std::process::exit(1);
    });
    info!(addr, "HTTP server listening");

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let mut serving = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            })
            .await
    });

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                error!(error = %e, "failed to listen for shutdown signal");
            }
            info!("shutdown requested");
        }
        result = &mut serving => {
            error!(?result, "HTTP server exited unexpectedly");
        }
    }

    // Stopping the source closes the frame channel, which ends the capture
    // loop. The capture loop owns the live-view sender, so open /stream
    // responses finish once it returns.
    source.abort();
    let _ = source.await;
    match capture.await {
        Ok(stats) => info!(
            frames = stats.frames,
            emitted = stats.emitted,
            dropped = stats.dropped,
            "capture stopped"
        ),
        Err(e) => error!(error = %e, "capture task failed"),
    }

    let _ = shutdown_tx.send(());
    if !serving.is_finished() {
        if let Ok(Err(e)) = serving.await {
            error!(error = %e, "HTTP server error during shutdown");
        }
    }

    if let Err(e) = publishing.await {
        error!(error = %e, "publisher task failed");
    }

    engine.reset();
    info!("motion camera stopped");
}

fn mjpeg_url(stream: &StreamConfig) -> String {
    format!("{}?quality={}&fps={}", stream.url, stream.quality, stream.fps)
}

fn polling_url(stream: &StreamConfig) -> String {
    format!("{}?quality={}", stream.url.replace("/stream", "/capture"), stream.quality)
}

fn poll_interval(fps: f64) -> Duration {
    if fps.is_finite() && fps > 0.0 {
        Duration::from_secs_f64(1.0 / fps)
    } else {
        Duration::from_secs(1)
    }
}
