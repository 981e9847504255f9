use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use super::TariffConfig;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum SeriesError {
    #[error("time series is empty")]
    Empty,
    #[error("step {index} is not {step_minutes} min after its predecessor")]
    NonUniform { index: usize, step_minutes: u32 },
    #[error("draw fraction {value} at step {index} outside [0, 1]")]
    InvalidDraw { index: usize, value: f64 },
    #[error("cannot resample {from} min steps to {to} min")]
    IncompatibleStep { from: u32, to: u32 },
    #[error("horizon of {steps} steps exceeds the {max} step limit")]
    TooLong { steps: usize, max: usize },
}

/// One uniform-width step of the optimisation horizon
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct TimeStep {
    pub timestamp: DateTime<Utc>,
    /// Mean electrical load during the step as observed (or simulated for calendars), W
    pub load_w: f64,
    /// Fraction of the step during which hot water is drawn
    pub draw: f64,
    pub inlet_temp_c: f64,
    /// Network energy price, €/kWh
    pub price: f64,
}

/// Uniform, frozen horizon handed to the optimiser
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TimeSeries {
    step_minutes: u32,
    steps: Vec<TimeStep>,
}

impl TimeSeries {
    /// 30 days of one-minute steps
    pub const MAX_STEPS: usize = 43_200;

    pub fn new(step_minutes: u32, steps: Vec<TimeStep>) -> Result<Self, SeriesError> {
        if steps.is_empty() {
            return Err(SeriesError::Empty);
        }
        if steps.len() > Self::MAX_STEPS {
            return Err(SeriesError::TooLong {
                steps: steps.len(),
                max: Self::MAX_STEPS,
            });
        }

        let expected = Duration::minutes(i64::from(step_minutes));
        for (index, pair) in steps.windows(2).enumerate() {
            if pair[1].timestamp - pair[0].timestamp != expected {
                return Err(SeriesError::NonUniform {
                    index: index + 1,
                    step_minutes,
                });
            }
        }
        if let Some((index, step)) = steps
            .iter()
            .enumerate()
            .find(|(_, s)| !(0.0..=1.0).contains(&s.draw))
        {
            return Err(SeriesError::InvalidDraw {
                index,
                value: step.draw,
            });
        }

        Ok(Self {
            step_minutes,
            steps,
        })
    }

    pub fn step_minutes(&self) -> u32 {
        self.step_minutes
    }

    /// Step length Δ in hours
    pub fn step_hours(&self) -> f64 {
        f64::from(self.step_minutes) / 60.0
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn steps(&self) -> &[TimeStep] {
        &self.steps
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.steps[0].timestamp
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.steps[self.steps.len() - 1].timestamp
    }

    pub fn horizon_minutes(&self) -> f64 {
        self.len() as f64 * f64::from(self.step_minutes)
    }

    /// Simulated days (fractional)
    pub fn days(&self) -> f64 {
        self.horizon_minutes() / 1440.0
    }

    pub fn draws(&self) -> impl Iterator<Item = f64> + '_ {
        self.steps.iter().map(|s| s.draw)
    }

    /// Aggregate to a coarser grid. Load, draw fraction and inlet temperature are averaged;
    /// flat and day/night prices are recomputed for the new step start, dynamic prices averaged.
    /// A trailing partial step is dropped.
    pub fn resample(&self, step_minutes: u32, tariff: &TariffConfig) -> Result<Self, SeriesError> {
        if step_minutes == self.step_minutes {
            return Ok(self.clone());
        }
        if step_minutes < self.step_minutes || step_minutes % self.step_minutes != 0 {
            return Err(SeriesError::IncompatibleStep {
                from: self.step_minutes,
                to: step_minutes,
            });
        }

        let factor = (step_minutes / self.step_minutes) as usize;
        let full = self.steps.len() / factor;
        if full * factor != self.steps.len() {
            warn!(
                dropped = self.steps.len() - full * factor,
                step_minutes, "dropping trailing partial step while resampling"
            );
        }

        let steps = self
            .steps
            .chunks_exact(factor)
            .map(|chunk| {
                let n = chunk.len() as f64;
                let mean = |f: fn(&TimeStep) -> f64| chunk.iter().map(f).sum::<f64>() / n;
                let timestamp = chunk[0].timestamp;
                TimeStep {
                    timestamp,
                    load_w: mean(|s| s.load_w),
                    draw: mean(|s| s.draw).clamp(0.0, 1.0),
                    inlet_temp_c: mean(|s| s.inlet_temp_c),
                    price: tariff.price_at(timestamp).unwrap_or_else(|| mean(|s| s.price)),
                }
            })
            .collect();

        Self::new(step_minutes, steps)
    }
}
