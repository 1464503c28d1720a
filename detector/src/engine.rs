use motion_cam_common::config::MotionConfig;
use tracing::{debug, info, warn};

use crate::estimator::DifferenceEstimator;
use crate::reference::{ReferenceError, ReferenceStore};

/// Accepted pixel thresholds, inclusive.
pub const PIXEL_THRESHOLD_RANGE: (u32, u32) = (1, 254);
/// Motion thresholds must be strictly between 0 and this value.
pub const MOTION_THRESHOLD_LIMIT: u32 = 100_000;

/// Outcome of a single evaluation, tagged with the guard that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Zero-length frame; nothing was looked at.
    EmptyFrame,
    Disabled,
    /// A pending manual trigger forced this frame out.
    Manual,
    /// Frame stored as the first baseline.
    Baseline,
    Cooldown { remaining_ms: u64 },
    /// Compared against the reference, below the motion threshold.
    Still { score: u32 },
    Motion { score: u32 },
    /// The reference copy could not be made; the store is empty again.
    AllocationFailed,
}

impl Decision {
    /// Whether the frame should be forwarded.
    pub fn emit(&self) -> bool {
        matches!(self, Decision::Manual | Decision::Motion { .. })
    }
}

/// Current tunables, as reported to the control surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Settings {
    pub enabled: bool,
    pub motion_threshold: u32,
    pub pixel_threshold: u32,
    pub cooldown_ms: u64,
}

/// Batched settings change. `None` fields are left as they are.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SettingsUpdate {
    pub enabled: Option<bool>,
    pub motion_threshold: Option<u32>,
    pub pixel_threshold: Option<u32>,
    pub cooldown_ms: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Status {
    pub enabled: bool,
    pub cooldown_ms: u64,
    pub time_since_last_ms: u64,
    /// True once the cooldown since the last accepted frame has elapsed.
    pub can_trigger: bool,
}

/// Frame-by-frame motion decision policy.
///
/// Each call to [`MotionEngine::decide`] checks its guards in a fixed order:
/// empty frame, disabled, manual trigger, first frame, cooldown, and finally
/// the difference estimate against the stored reference. The manual trigger
/// is consumed by every evaluation of a non-empty frame, even when detection
/// is disabled and the trigger has no effect.
#[derive(Debug)]
pub struct MotionEngine {
    enabled: bool,
    motion_threshold: u32,
    cooldown_ms: u64,
    estimator: DifferenceEstimator,
    reference: ReferenceStore,
    /// Clock reading of the last emitted frame; `None` until the first one.
    last_accepted_ms: Option<u64>,
    manual_trigger: bool,
    first_frame: bool,
}

impl MotionEngine {
    pub fn new(config: &MotionConfig) -> Result<Self, MotionError> {
        validate_motion_threshold(config.threshold)?;
        let pixel_threshold = validate_pixel_threshold(config.pixel_threshold)?;

        Ok(Self {
            enabled: config.enabled,
            motion_threshold: config.threshold,
            cooldown_ms: config.cooldown_ms,
            estimator: DifferenceEstimator::new(pixel_threshold),
            reference: ReferenceStore::new(config.max_reference_bytes),
            last_accepted_ms: None,
            manual_trigger: false,
            first_frame: true,
        })
    }

    /// Decide whether `frame`, captured at `now_ms`, should be forwarded.
    pub fn evaluate(&mut self, frame: &[u8], now_ms: u64) -> bool {
        self.decide(frame, now_ms).emit()
    }

    /// Same as [`evaluate`](Self::evaluate) but reports which guard decided.
    pub fn decide(&mut self, frame: &[u8], now_ms: u64) -> Decision {
        if frame.is_empty() {
            debug!(now_ms, "empty frame, skipping motion evaluation");
            return Decision::EmptyFrame;
        }

        let manual = std::mem::take(&mut self.manual_trigger);

        if !self.enabled {
            if manual {
                debug!("manual trigger dropped, motion detection is disabled");
            }
            return Decision::Disabled;
        }

        if manual {
            return match self.accept(frame, now_ms) {
                Ok(()) => {
                    info!(now_ms, bytes = frame.len(), "manual motion trigger, sending frame");
                    Decision::Manual
                }
                Err(e) => self.reference_lost(e),
            };
        }

        if self.first_frame || self.reference.is_empty() {
            return match self.reference.replace(frame) {
                Ok(()) => {
                    self.first_frame = false;
                    info!(bytes = frame.len(), "first frame captured for motion detection");
                    Decision::Baseline
                }
                Err(e) => self.reference_lost(e),
            };
        }

        if let Some(remaining_ms) = self.cooldown_remaining(now_ms) {
            return Decision::Cooldown { remaining_ms };
        }

        let score = self
            .reference
            .current()
            .map(|reference| self.estimator.score(frame, reference))
            .unwrap_or_default();

        debug!(
            score,
            threshold = self.motion_threshold,
            pixel_threshold = self.estimator.pixel_threshold(),
            "motion analysis"
        );

        if score <= self.motion_threshold {
            return Decision::Still { score };
        }

        match self.accept(frame, now_ms) {
            Ok(()) => {
                info!(score, threshold = self.motion_threshold, "motion detected");
                Decision::Motion { score }
            }
            Err(e) => self.reference_lost(e),
        }
    }

    fn accept(&mut self, frame: &[u8], now_ms: u64) -> Result<(), ReferenceError> {
        self.reference.replace(frame)?;
        self.first_frame = false;
        // never move the acceptance clock backwards
        self.last_accepted_ms = Some(self.last_accepted_ms.map_or(now_ms, |last| last.max(now_ms)));
        Ok(())
    }

    fn reference_lost(&mut self, err: ReferenceError) -> Decision {
        warn!(error = %err, "reference frame not stored, waiting for a new baseline");
        self.first_frame = true;
        Decision::AllocationFailed
    }

    fn cooldown_remaining(&self, now_ms: u64) -> Option<u64> {
        let last = self.last_accepted_ms?;
        let elapsed = now_ms.saturating_sub(last);
        (elapsed < self.cooldown_ms).then(|| self.cooldown_ms - elapsed)
    }

    // -- Control surface --------------------------------------------------------

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
        info!("motion detection {}", if enabled { "enabled" } else { "disabled" });
    }

    pub fn set_motion_threshold(&mut self, threshold: u32) -> Result<(), MotionError> {
        validate_motion_threshold(threshold)?;
        self.motion_threshold = threshold;
        info!(threshold, "motion threshold set");
        Ok(())
    }

    pub fn set_pixel_threshold(&mut self, pixel_threshold: u32) -> Result<(), MotionError> {
        let value = validate_pixel_threshold(pixel_threshold)?;
        self.estimator.set_pixel_threshold(value);
        info!(pixel_threshold, "motion pixel threshold set");
        Ok(())
    }

    pub fn set_cooldown(&mut self, cooldown_ms: u64) {
        self.cooldown_ms = cooldown_ms;
        info!(cooldown_ms, "motion cooldown set");
    }

    /// Force the next evaluation to emit. Repeated requests before that
    /// evaluation collapse into one.
    pub fn request_manual_trigger(&mut self) {
        self.manual_trigger = true;
        info!("motion trigger manually activated");
    }

    /// Apply several settings at once. Nothing changes unless every field is valid.
    pub fn apply(&mut self, update: &SettingsUpdate) -> Result<Settings, MotionError> {
        if let Some(threshold) = update.motion_threshold {
            validate_motion_threshold(threshold)?;
        }
        if let Some(pixel_threshold) = update.pixel_threshold {
            validate_pixel_threshold(pixel_threshold)?;
        }

        if let Some(enabled) = update.enabled {
            self.set_enabled(enabled);
        }
        if let Some(threshold) = update.motion_threshold {
            self.set_motion_threshold(threshold)?;
        }
        if let Some(pixel_threshold) = update.pixel_threshold {
            self.set_pixel_threshold(pixel_threshold)?;
        }
        if let Some(cooldown_ms) = update.cooldown_ms {
            self.set_cooldown(cooldown_ms);
        }
        Ok(self.settings())
    }

    /// Release the reference frame and wait for a fresh baseline.
    pub fn reset(&mut self) {
        self.reference.clear();
        self.first_frame = true;
        info!("motion detection buffers cleaned up");
    }

    pub fn settings(&self) -> Settings {
        Settings {
            enabled: self.enabled,
            motion_threshold: self.motion_threshold,
            pixel_threshold: u32::from(self.estimator.pixel_threshold()),
            cooldown_ms: self.cooldown_ms,
        }
    }

    /// Status relative to `now_ms`. Before any frame has been accepted the
    /// elapsed time is measured from clock zero.
    pub fn status(&self, now_ms: u64) -> Status {
        let time_since_last_ms = now_ms.saturating_sub(self.last_accepted_ms.unwrap_or(0));
        Status {
            enabled: self.enabled,
            cooldown_ms: self.cooldown_ms,
            time_since_last_ms,
            can_trigger: time_since_last_ms >= self.cooldown_ms,
        }
    }

    pub fn has_reference(&self) -> bool {
        !self.reference.is_empty()
    }

    pub fn last_accepted_ms(&self) -> Option<u64> {
        self.last_accepted_ms
    }

    pub fn trigger_pending(&self) -> bool {
        self.manual_trigger
    }
}

fn validate_motion_threshold(threshold: u32) -> Result<(), MotionError> {
    if threshold == 0 || threshold >= MOTION_THRESHOLD_LIMIT {
        return Err(MotionError::InvalidParameter {
            name: "threshold",
            value: u64::from(threshold),
            expected: "between 1 and 99999",
        });
    }
    Ok(())
}

fn validate_pixel_threshold(pixel_threshold: u32) -> Result<u8, MotionError> {
    let (min, max) = PIXEL_THRESHOLD_RANGE;
    if !(min..=max).contains(&pixel_threshold) {
        return Err(MotionError::InvalidParameter {
            name: "pixel_threshold",
            value: u64::from(pixel_threshold),
            expected: "between 1 and 254",
        });
    }
    // the range check keeps this lossless
    Ok(pixel_threshold as u8)
}

#[derive(Debug, thiserror::Error)]
pub enum MotionError {
    #[error("invalid {name} {value}: expected {expected}")]
    InvalidParameter {
        name: &'static str,
        value: u64,
        expected: &'static str,
    },
}
