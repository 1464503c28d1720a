//! Frame-by-frame motion decision engine for the camera device.
//!
//! [`MotionEngine`] owns the policy state and the reference frame;
//! [`SharedEngine`] is the handle the capture loop and the control surface
//! use to reach it.

pub mod engine;
pub mod estimator;
pub mod reference;
pub mod shared;

pub use engine::{Decision, MotionEngine, MotionError, Settings, SettingsUpdate, Status};
pub use shared::SharedEngine;
