use bytes::Bytes;
use motion_cam_common::frame::Frame;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use super::{forward_jpeg, SourceError, INITIAL_BACKOFF, MAX_BACKOFF};
use crate::clock::MonotonicClock;

/// Polling fallback: fetch one snapshot per tick. Consecutive failures back
/// off exponentially before the next attempt.
pub async fn run_polling_source(
    frame_url: &str,
    interval: Duration,
    clock: MonotonicClock,
    frames: mpsc::Sender<Frame>,
) {
    let client = reqwest::Client::new();
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut backoff = INITIAL_BACKOFF;

    info!(url = frame_url, ?interval, "polling camera snapshots");

    loop {
        ticker.tick().await;
        if frames.is_closed() {
            info!("capture loop stopped, closing polling source");
            return;
        }

        match fetch_frame(&client, frame_url).await {
            Ok(jpeg) => {
                backoff = INITIAL_BACKOFF;
                if !forward_jpeg(jpeg, &clock, &frames).await {
                    return;
                }
            }
            Err(e) => {
                warn!(error = %e, "failed to fetch camera frame, retrying in {:?}", backoff);
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(MAX_BACKOFF);
            }
        }
    }
}

async fn fetch_frame(client: &reqwest::Client, url: &str) -> Result<Bytes, SourceError> {
    let response = client
        .get(url)
        .timeout(Duration::from_secs(10))
        .send()
        .await
        .map_err(SourceError::HttpConnect)?;
    if !response.status().is_success() {
        return Err(SourceError::HttpStatus(response.status().as_u16()));
    }
    response.bytes().await.map_err(SourceError::HttpStream)
}
