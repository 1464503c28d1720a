//! Frame sources: pull JPEG frames from the upstream camera and hand them to
//! the capture loop over a bounded channel.

mod mjpeg;
mod polling;

pub use mjpeg::run_mjpeg_source;
pub use polling::run_polling_source;

use bytes::Bytes;
use motion_cam_common::frame::Frame;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

use crate::clock::MonotonicClock;

static SEQ_COUNTER: AtomicU64 = AtomicU64::new(0);

const INITIAL_BACKOFF: Duration = Duration::from_secs(2);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("HTTP connection failed: {0}")]
    HttpConnect(reqwest::Error),
    #[error("HTTP stream error: {0}")]
    HttpStream(reqwest::Error),
    #[error("HTTP status {0}")]
    HttpStatus(u16),
}

/// Stamp a JPEG with a sequence number and clock reading and send it on.
/// Returns `false` once the capture loop has gone away.
async fn forward_jpeg(jpeg: Bytes, clock: &MonotonicClock, frames: &mpsc::Sender<Frame>) -> bool {
    let seq = SEQ_COUNTER.fetch_add(1, Ordering::Relaxed);
    match Frame::jpeg(jpeg, clock.now_ms(), seq) {
        Ok(frame) => {
            debug!(
                seq,
                bytes = frame.len(),
                width = frame.width,
                height = frame.height,
                "frame captured"
            );
            frames.send(frame).await.is_ok()
        }
        Err(e) => {
            debug!(error = %e, "skipping frame");
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn forwarded_frames_get_increasing_sequence_numbers() {
        let clock = MonotonicClock::start();
        let (tx, mut rx) = mpsc::channel(4);

        assert!(forward_jpeg(Bytes::from_static(b"one"), &clock, &tx).await);
        assert!(forward_jpeg(Bytes::from_static(b"two"), &clock, &tx).await);

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert!(second.seq > first.seq);
        assert!(second.captured_at_ms >= first.captured_at_ms);
        assert_eq!(first.data(), b"one");
    }

    #[tokio::test]
    async fn empty_jpeg_is_skipped() {
        let clock = MonotonicClock::start();
        let (tx, mut rx) = mpsc::channel(4);

        assert!(forward_jpeg(Bytes::new(), &clock, &tx).await);
        drop(tx);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn closed_channel_stops_forwarding() {
        let clock = MonotonicClock::start();
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        assert!(!forward_jpeg(Bytes::from_static(b"x"), &clock, &tx).await);
    }
}
