//! Phase schedule evaluation
//!
//! A schedule is an ordered list of phases laid end to end on a timeline
//! that starts when the batch is started. The current phase is the first one
//! whose cumulative end time is at or after the elapsed time. Once the
//! timeline is exhausted the schedule holds at the last phase's setpoint.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::data::Phase;

const MILLIS_PER_HOUR: f64 = 3_600_000.0;

/// Position of a batch within its schedule
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PhaseProgress {
    /// Index into the ordered phase list
    pub index: usize,
    /// Progress through the current phase, 0-100
    pub percent: f64,
    pub target_celsius: f64,
}

/// Hours between `start` and `now` (negative if `start` lies in the future)
pub fn elapsed_hours(start: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    (now - start).num_milliseconds() as f64 / MILLIS_PER_HOUR
}

/// Current phase and progress, or `None` when unstarted or the schedule is empty
pub fn current_phase(
    start: Option<DateTime<Utc>>,
    phases: &[Phase],
    now: DateTime<Utc>,
) -> Option<PhaseProgress> {
    let start = start?;
    let last = phases.last()?;
    let elapsed = elapsed_hours(start, now);

    let mut cumulative = 0.0;
    for (index, phase) in phases.iter().enumerate() {
        let phase_start = cumulative;
        cumulative += phase.duration_hours;

        if elapsed <= cumulative {
            let percent = if phase.duration_hours > 0.0 {
                ((elapsed - phase_start) / phase.duration_hours * 100.0).clamp(0.0, 100.0)
            } else {
                100.0
            };
            return Some(PhaseProgress {
                index,
                percent,
                target_celsius: phase.target_celsius,
            });
        }
    }

    Some(PhaseProgress {
        index: phases.len() - 1,
        percent: 100.0,
        target_celsius: last.target_celsius,
    })
}

/// Target temperature for a batch at `now`
pub fn target_temperature(
    start: Option<DateTime<Utc>>,
    phases: &[Phase],
    now: DateTime<Utc>,
) -> Option<f64> {
    current_phase(start, phases, now).map(|p| p.target_celsius)
}
