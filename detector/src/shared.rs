use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::engine::{Decision, MotionEngine, MotionError, Settings, SettingsUpdate, Status};

/// Cloneable handle to the device's single [`MotionEngine`].
///
/// The capture loop and the HTTP control handlers share the engine through
/// this handle. Every method holds the lock for one whole evaluate-or-mutate
/// call, so a settings change lands either before or after an evaluation and
/// the reference buffer is never seen half-replaced.
#[derive(Debug, Clone)]
pub struct SharedEngine {
    inner: Arc<Mutex<MotionEngine>>,
}

impl SharedEngine {
    pub fn new(engine: MotionEngine) -> Self {
        Self {
            inner: Arc::new(Mutex::new(engine)),
        }
    }

    // Every mutation either completes or leaves the store empty, so a
    // poisoned lock still guards a consistent engine.
    fn lock(&self) -> MutexGuard<'_, MotionEngine> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn decide(&self, frame: &[u8], now_ms: u64) -> Decision {
        self.lock().decide(frame, now_ms)
    }

    pub fn request_manual_trigger(&self) {
        self.lock().request_manual_trigger();
    }

    pub fn apply(&self, update: &SettingsUpdate) -> Result<Settings, MotionError> {
        self.lock().apply(update)
    }

    pub fn reset(&self) {
        self.lock().reset();
    }

    pub fn settings(&self) -> Settings {
        self.lock().settings()
    }

    pub fn status(&self, now_ms: u64) -> Status {
        self.lock().status(now_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use motion_cam_common::config::MotionConfig;
    use std::thread;

    fn shared() -> SharedEngine {
        SharedEngine::new(MotionEngine::new(&MotionConfig::default()).unwrap())
    }

    #[test]
    fn clones_share_state() {
        let engine = shared();
        let control = engine.clone();

        assert_eq!(engine.decide(&[0; 64_000], 0), Decision::Baseline);
        control.request_manual_trigger();
        assert_eq!(engine.decide(&[0; 64_000], 10), Decision::Manual);
        assert!(!control.status(20).can_trigger);
    }

    #[test]
    fn concurrent_control_and_evaluation() {
        let engine = shared();
        let control = engine.clone();

        let writer = thread::spawn(move || {
            for i in 0..500u32 {
                control
                    .apply(&SettingsUpdate {
                        pixel_threshold: Some(1 + i % 254),
                        ..SettingsUpdate::default()
                    })
                    .expect("threshold in range");
                control.request_manual_trigger();
            }
        });

        for now in 0..500u64 {
            let value = if now % 2 == 0 { 0 } else { 255 };
            engine.decide(&vec![value; 4_096], now);
        }
        writer.join().unwrap();
        // consume a trigger that may still be pending
        engine.decide(&[1; 16], 900);

        let settings = engine.settings();
        assert!((1..=254).contains(&settings.pixel_threshold));
        engine.reset();
        assert_eq!(engine.decide(&[1; 16], 1_000), Decision::Baseline);
    }
}
