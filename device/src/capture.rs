use motion_cam_common::frame::Frame;
use motion_cam_detector::SharedEngine;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CaptureStats {
    pub frames: u64,
    pub emitted: u64,
    /// Approved frames lost because the publisher was behind or gone.
    pub dropped: u64,
}

/// Run every captured frame through the motion engine.
///
/// Each frame is first published as the latest live-view frame, then
/// evaluated. Approved frames are queued for the broker without waiting, so
/// a slow broker never stalls capture. Returns when the source closes.
pub async fn run_capture_loop(
    mut frames: mpsc::Receiver<Frame>,
    engine: SharedEngine,
    live: watch::Sender<Option<Frame>>,
    approved: mpsc::Sender<Frame>,
) -> CaptureStats {
    let mut stats = CaptureStats::default();

    while let Some(frame) = frames.recv().await {
        stats.frames += 1;
        live.send_replace(Some(frame.clone()));

        let decision = engine.decide(frame.data(), frame.captured_at_ms);
        if decision.emit() {
            stats.emitted += 1;
            debug!(seq = frame.seq, ?decision, "queueing frame for broker");
            match approved.try_send(frame) {
                Ok(()) => {}
                Err(TrySendError::Full(frame)) => {
                    stats.dropped += 1;
                    warn!(seq = frame.seq, "publisher backlog full, dropping frame");
                }
                Err(TrySendError::Closed(frame)) => {
                    stats.dropped += 1;
                    warn!(seq = frame.seq, "publisher stopped, dropping frame");
                }
            }
        }

        if stats.frames % 100 == 0 {
            debug!(total = stats.frames, emitted = stats.emitted, "frames processed");
        }
    }

    info!(
        frames = stats.frames,
        emitted = stats.emitted,
        dropped = stats.dropped,
        "capture loop finished"
    );
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use motion_cam_common::config::MotionConfig;
    use motion_cam_detector::MotionEngine;

    fn engine() -> SharedEngine {
        SharedEngine::new(MotionEngine::new(&MotionConfig::default()).unwrap())
    }

    fn frame(value: u8, at_ms: u64, seq: u64) -> Frame {
        Frame::jpeg(vec![value; 64_000], at_ms, seq).unwrap()
    }

    #[tokio::test]
    async fn only_motion_frames_reach_the_publisher() {
        let (frame_tx, frame_rx) = mpsc::channel(8);
        let (live_tx, live_rx) = watch::channel(None);
        let (approved_tx, mut approved_rx) = mpsc::channel(4);

        for f in [frame(0, 0, 0), frame(0, 500, 1), frame(255, 600, 2), frame(255, 1_000, 3)] {
            frame_tx.send(f).await.unwrap();
        }
        drop(frame_tx);

        let stats = run_capture_loop(frame_rx, engine(), live_tx, approved_tx).await;
        assert_eq!(
            stats,
            CaptureStats {
                frames: 4,
                emitted: 1,
                dropped: 0
            }
        );

        assert_eq!(approved_rx.recv().await.unwrap().seq, 2);
        assert!(approved_rx.recv().await.is_none());

        // the live view always holds the newest frame
        assert_eq!(live_rx.borrow().as_ref().map(|f| f.seq), Some(3));
    }

    #[tokio::test]
    async fn full_publisher_queue_drops_frames() {
        let engine = SharedEngine::new(
            MotionEngine::new(&MotionConfig {
                cooldown_ms: 0,
                ..MotionConfig::default()
            })
            .unwrap(),
        );
        let (frame_tx, frame_rx) = mpsc::channel(8);
        let (live_tx, _live_rx) = watch::channel(None);
        let (approved_tx, mut approved_rx) = mpsc::channel(1);

        // baseline, then two motion frames with nobody draining the queue
        for f in [frame(0, 0, 0), frame(255, 100, 1), frame(0, 200, 2)] {
            frame_tx.send(f).await.unwrap();
        }
        drop(frame_tx);

        let stats = run_capture_loop(frame_rx, engine, live_tx, approved_tx).await;
        assert_eq!(stats.emitted, 2);
        assert_eq!(stats.dropped, 1);
        assert_eq!(approved_rx.recv().await.unwrap().seq, 1);
    }

    #[tokio::test]
    async fn manual_trigger_from_control_side_is_honoured() {
        let engine = engine();
        let (frame_tx, frame_rx) = mpsc::channel(8);
        let (live_tx, _live_rx) = watch::channel(None);
        let (approved_tx, mut approved_rx) = mpsc::channel(4);

        engine.request_manual_trigger();
        frame_tx.send(frame(9, 0, 7)).await.unwrap();
        drop(frame_tx);

        let stats = run_capture_loop(frame_rx, engine, live_tx, approved_tx).await;
        assert_eq!(stats.emitted, 1);
        assert_eq!(approved_rx.recv().await.unwrap().seq, 7);
    }
}
