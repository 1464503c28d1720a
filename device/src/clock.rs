use std::time::Instant;

/// Milliseconds since the device process started. Never goes backwards, so
/// it is safe to feed straight into the motion engine's cooldown logic.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn start() -> Self {
        Self {
            origin: Instant::now(),
        }
    }

    pub fn now_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }
}
