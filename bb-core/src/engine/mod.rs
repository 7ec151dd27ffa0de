//! Control engine modules
//!
//! Contains the phase schedule evaluator and the hysteresis decision.

mod hysteresis;
mod schedule;

pub use hysteresis::Hysteresis;
pub use schedule::{current_phase, elapsed_hours, target_temperature, PhaseProgress};
