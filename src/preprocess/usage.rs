//! Hot-water usage signals.
//!
//! Two sources feed the draw indicator: a measured power signal, from which draws are
//! inferred through the reheating they trigger, and a manual calendar of draw events.

use chrono::{DateTime, Duration, Utc};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::PreprocessError;
use crate::domain::{EwhConfig, WATER_HEAT_CAPACITY};

/// Heating is detected when the load exceeds this share of the thermal power
pub const HEATING_DETECTION_SHARE: f64 = 0.02;

/// Water temperature assumed while inferring draws, as a share of the maximum temperature
pub const ASSUMED_HOT_TEMP_SHARE: f64 = 0.9;

/// Idle periods shorter than this share of the mean idle period mark reheating after a draw
pub const SHORT_IDLE_SHARE: f64 = 0.9;

/// Inferred draws longer than this (minutes) are always accepted
pub const LONG_DRAW_MINUTES: f64 = 2.0;

/// Inferred draws after a short idle period must exceed this (minutes)
pub const SHORT_DRAW_MINUTES: f64 = 1.0;

/// A manually entered hot-water draw
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DrawEvent {
    pub start: DateTime<Utc>,
    pub duration_minutes: u32,
}

/// Contiguous block of heating or idle samples
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Run {
    start: usize,
    len: usize,
    heating: bool,
}

fn runs(flags: &[bool]) -> Vec<Run> {
    let mut runs = Vec::new();
    let mut start = 0;
    for (heating, group) in &flags.iter().chunk_by(|h| **h) {
        let len = group.count();
        runs.push(Run { start, len, heating });
        start += len;
    }
    runs
}

/// Infers hot-water draws from a measured heater load
#[derive(Debug, Clone)]
pub struct DrawDetector {
    thermal_power_kw: f64,
    hot_temp_c: f64,
    comfort_temp_c: f64,
    inlet_temp_c: f64,
    flow_rate_l_per_min: f64,
    sample_minutes: f64,
}

impl DrawDetector {
    pub fn new(ewh: &EwhConfig, sample_minutes: u32) -> Self {
        Self {
            thermal_power_kw: ewh.thermal_power_kw,
            hot_temp_c: ASSUMED_HOT_TEMP_SHARE * ewh.max_temp_c,
            comfort_temp_c: ewh.comfort_temp_c,
            inlet_temp_c: ewh.inlet_temp_c,
            flow_rate_l_per_min: ewh.flow_rate_l_per_min,
            sample_minutes: f64::from(sample_minutes),
        }
    }

    pub fn is_heating(&self, load_w: f64) -> bool {
        load_w > HEATING_DETECTION_SHARE * self.thermal_power_kw * 1000.0
    }

    /// Heating minutes needed per minute of draw, plus the draw minute itself.
    ///
    /// The heater flow is the share of the outlet flow that must come from the tank to
    /// deliver comfort-temperature water when mixed with inlet water.
    pub fn heating_per_draw_ratio(&self) -> f64 {
        let heater_flow = self.flow_rate_l_per_min * (self.comfort_temp_c - self.inlet_temp_c)
            / (self.hot_temp_c - self.inlet_temp_c);
        let drawn_kwh_per_min = self.hot_temp_c * heater_flow * WATER_HEAT_CAPACITY / 3600.0;
        let heated_kwh_per_min = self.thermal_power_kw / 60.0;
        1.0 + drawn_kwh_per_min / heated_kwh_per_min
    }

    /// Draw indicator per load sample: the share of the sample spent drawing water.
    ///
    /// Every heating block implies a draw duration through [`Self::heating_per_draw_ratio`].
    /// The block is accepted as a draw when that duration is long, or when it is preceded by
    /// an unusually short idle period. Otherwise it is taken for standby reheating.
    pub fn detect(&self, loads_w: &[f64]) -> Vec<f64> {
        let flags: Vec<bool> = loads_w.iter().map(|&l| self.is_heating(l)).collect();
        let runs = runs(&flags);

        // idle periods that end in a reheat
        let idle_minutes: Vec<f64> = runs
            .iter()
            .tuple_windows()
            .filter(|(idle, next)| !idle.heating && next.heating)
            .map(|(idle, _)| idle.len as f64 * self.sample_minutes)
            .collect();
        let mean_idle = if idle_minutes.is_empty() {
            f64::NAN
        } else {
            idle_minutes.iter().sum::<f64>() / idle_minutes.len() as f64
        };

        let ratio = self.heating_per_draw_ratio();
        let mut usage = vec![0.0; loads_w.len()];
        let mut accepted = 0usize;

        for (i, run) in runs.iter().enumerate() {
            // a block still heating at the end of the signal cannot be measured
            if !run.heating || i + 1 == runs.len() {
                continue;
            }
            let previous_idle = i
                .checked_sub(1)
                .map(|p| runs[p])
                .filter(|r| !r.heating)
                .map(|r| r.len as f64 * self.sample_minutes);

            let heating_minutes = run.len as f64 * self.sample_minutes;
            let draw_minutes = heating_minutes / ratio;

            let after_short_idle =
                previous_idle.is_some_and(|idle| idle < mean_idle * SHORT_IDLE_SHARE);
            if (after_short_idle && draw_minutes > SHORT_DRAW_MINUTES)
                || draw_minutes > LONG_DRAW_MINUTES
            {
                // whole samples first, the remainder as a partial share of the next one
                let mut remaining = draw_minutes;
                for u in usage[run.start..].iter_mut() {
                    if remaining <= 0.0 {
                        break;
                    }
                    *u = (remaining / self.sample_minutes).min(1.0);
                    remaining -= self.sample_minutes;
                }
                accepted += 1;
            }
        }

        debug!(
            heating_blocks = runs.iter().filter(|r| r.heating).count(),
            accepted,
            mean_idle_min = mean_idle,
            "inferred hot-water draws from load"
        );
        usage
    }
}

/// Expand a calendar of draws into a one-day, per-minute grid of (timestamp, draw) pairs.
///
/// The day starts at midnight (UTC) of the earliest event. Draws running past the end of the
/// day are clipped.
pub fn expand_calendar(events: &[DrawEvent]) -> Result<Vec<(DateTime<Utc>, f64)>, PreprocessError> {
    let first = events
        .iter()
        .map(|e| e.start)
        .min()
        .ok_or(PreprocessError::NoUsage)?;
    let day_start = first
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .ok_or(PreprocessError::NoUsage)?
        .and_utc();
    let day_end = day_start + Duration::days(1);

    let mut grid: Vec<(DateTime<Utc>, f64)> = (0..1440)
        .map(|m| (day_start + Duration::minutes(m), 0.0))
        .collect();

    for event in events {
        if event.duration_minutes == 0 {
            return Err(PreprocessError::InvalidDrawEvent(format!(
                "draw at {} has zero duration",
                event.start
            )));
        }
        if event.start >= day_end {
            return Err(PreprocessError::CalendarTooLong { start: day_start, event: event.start });
        }
        let offset = (event.start - day_start).num_minutes() as usize;
        let end = offset + event.duration_minutes as usize;
        if end > grid.len() {
            warn!(start = %event.start, "draw runs past the end of the day, clipping");
        }
        for slot in &mut grid[offset..end.min(1440)] {
            slot.1 = 1.0;
        }
    }
    Ok(grid)
}
