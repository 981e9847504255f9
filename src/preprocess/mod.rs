//! # Usage and tariff preprocessing
//!
//! Turns raw run input into the frozen [`TimeSeries`] the optimiser consumes:
//!
//! - **Measured load**: rated power detection, heating-block based draw inference
//! - **Manual calendar**: per-minute draw indicator for one day and a simulated thermostat baseline
//! - **Prices**: one resolved price per step (flat, day/night or aligned dynamic series)
//! - **Resampling** to the configured step length; input is never refined below its own resolution

pub mod baseline;
pub mod power_detection;
pub mod usage;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::domain::{EwhConfig, SeriesError, TariffConfig, TariffMode, TimeSeries, TimeStep};

pub use baseline::simulate_thermostat_load;
pub use power_detection::{detect_rated_power, resolve_rated_power};
pub use usage::{expand_calendar, DrawDetector, DrawEvent};

#[derive(Debug, Error)]
pub enum PreprocessError {
    #[error("no usage data supplied")]
    NoUsage,
    #[error("invalid draw event: {0}")]
    InvalidDrawEvent(String),
    #[error("calendar must cover a single day starting {start}, found a draw at {event}")]
    CalendarTooLong {
        start: DateTime<Utc>,
        event: DateTime<Utc>,
    },
    #[error("measured load needs at least two samples to determine its resolution")]
    ResolutionUnknown,
    #[error("dynamic tariff selected but no price series supplied")]
    MissingDynamicPrices,
    #[error(transparent)]
    Series(#[from] SeriesError),
}

/// One measured load sample
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LoadSample {
    pub timestamp: DateTime<Utc>,
    pub load_w: f64,
}

/// One externally supplied energy price
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    pub timestamp: DateTime<Utc>,
    /// €/kWh
    pub price: f64,
}

/// How hot-water usage is described for a run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UsageInput {
    /// Uniformly sampled heater load, already cleaned upstream
    MeasuredLoad { samples: Vec<LoadSample> },
    /// Manual draw calendar for one day
    Calendar { events: Vec<DrawEvent> },
}

impl UsageInput {
    /// Raw load values, when a measured signal exists
    pub fn measured_loads(&self) -> Option<Vec<f64>> {
        match self {
            UsageInput::MeasuredLoad { samples } => Some(samples.iter().map(|s| s.load_w).collect()),
            UsageInput::Calendar { .. } => None,
        }
    }
}

/// Forward-fill `prices` onto `timestamps`; steps before the first price take the first price
pub fn align_prices(prices: &[PricePoint], timestamps: &[DateTime<Utc>]) -> Option<Vec<f64>> {
    let mut sorted = prices.to_vec();
    sorted.sort_by_key(|p| p.timestamp);
    let first = sorted.first()?.price;

    Some(
        timestamps
            .iter()
            .map(|ts| {
                let idx = sorted.partition_point(|p| p.timestamp <= *ts);
                if idx == 0 {
                    first
                } else {
                    sorted[idx - 1].price
                }
            })
            .collect(),
    )
}

/// Build the uniform horizon: draw indicator, baseline load, inlet temperature and price per step,
/// resampled to `step_minutes`. A step finer than the input resolution keeps the input resolution.
pub fn prepare_series(
    usage: &UsageInput,
    dynamic_prices: Option<&[PricePoint]>,
    ewh: &EwhConfig,
    tariff: &TariffConfig,
    step_minutes: u32,
) -> Result<TimeSeries, PreprocessError> {
    let (sample_minutes, rows) = match usage {
        UsageInput::MeasuredLoad { samples } => {
            if samples.len() < 2 {
                return Err(PreprocessError::ResolutionUnknown);
            }
            let sample_minutes = (samples[1].timestamp - samples[0].timestamp).num_minutes();
            let sample_minutes =
                u32::try_from(sample_minutes).map_err(|_| PreprocessError::ResolutionUnknown)?;
            if sample_minutes == 0 {
                return Err(PreprocessError::ResolutionUnknown);
            }

            let loads: Vec<f64> = samples.iter().map(|s| s.load_w).collect();
            let draws = DrawDetector::new(ewh, sample_minutes).detect(&loads);
            let rows: Vec<_> = samples
                .iter()
                .zip(draws)
                .map(|(s, draw)| (s.timestamp, s.load_w, draw))
                .collect();
            (sample_minutes, rows)
        }
        UsageInput::Calendar { events } => {
            let grid = expand_calendar(events)?;
            let draws: Vec<f64> = grid.iter().map(|(_, d)| *d).collect();
            let load = simulate_thermostat_load(ewh, &draws, 1);
            let rows = grid
                .into_iter()
                .zip(load)
                .map(|((ts, draw), load_w)| (ts, load_w, draw))
                .collect();
            (1, rows)
        }
    };

    let timestamps: Vec<DateTime<Utc>> = rows.iter().map(|r| r.0).collect();
    let dynamic = match tariff.mode {
        TariffMode::Dynamic => Some(
            dynamic_prices
                .and_then(|p| align_prices(p, &timestamps))
                .ok_or(PreprocessError::MissingDynamicPrices)?,
        ),
        _ => None,
    };

    let steps = rows
        .into_iter()
        .enumerate()
        .map(|(i, (timestamp, load_w, draw))| TimeStep {
            timestamp,
            load_w,
            draw,
            inlet_temp_c: ewh.inlet_temp_c,
            price: tariff
                .price_at(timestamp)
                .or_else(|| dynamic.as_ref().map(|d| d[i]))
                .unwrap_or_default(),
        })
        .collect();

    let native = TimeSeries::new(sample_minutes, steps)?;
    // the data cannot be refined, only aggregated
    let series = if step_minutes <= sample_minutes {
        if step_minutes < sample_minutes {
            warn!(
                requested = step_minutes,
                sample_minutes, "requested step is finer than the input, keeping the input resolution"
            );
        }
        native
    } else {
        native.resample(step_minutes, tariff)?
    };

    info!(
        steps = series.len(),
        step_minutes = series.step_minutes(),
        days = series.days(),
        draw_minutes = series.draws().sum::<f64>() * f64::from(series.step_minutes()),
        tariff = %tariff.mode,
        "prepared optimisation horizon"
    );
    Ok(series)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EwhSpecs, TariffSpecs};
    use chrono::{Duration, TimeZone};

    fn minute_grid(start: DateTime<Utc>, minutes: usize) -> Vec<DateTime<Utc>> {
        (0..minutes as i64).map(|m| start + Duration::minutes(m)).collect()
    }

    fn ewh() -> EwhConfig {
        EwhConfig::new(&EwhSpecs::default(), 1800.0).unwrap()
    }

    fn tariff(mode: TariffMode) -> TariffConfig {
        TariffConfig::new(&TariffSpecs {
            mode,
            ..Default::default()
        })
        .unwrap()
    }

    fn morning_calendar() -> UsageInput {
        UsageInput::Calendar {
            events: vec![DrawEvent {
                start: Utc.with_ymd_and_hms(2024, 1, 15, 8, 0, 0).unwrap(),
                duration_minutes: 5,
            }],
        }
    }

    #[test]
    fn test_calendar_series_covers_one_day() {
        let series =
            prepare_series(&morning_calendar(), None, &ewh(), &tariff(TariffMode::Flat), 1).unwrap();
        assert_eq!(series.len(), 1440);
        assert_eq!(series.step_minutes(), 1);
        assert_eq!(series.draws().sum::<f64>(), 5.0);
        assert!(series.steps().iter().all(|s| s.price == 0.119585));
        assert!(series.steps().iter().all(|s| s.inlet_temp_c == 20.0));
    }

    #[test]
    fn test_calendar_series_resampled() {
        let series =
            prepare_series(&morning_calendar(), None, &ewh(), &tariff(TariffMode::DayNight), 15)
                .unwrap();
        assert_eq!(series.len(), 96);
        assert!((series.steps()[32].draw - 5.0 / 15.0).abs() < 1e-12);
        assert_eq!(series.steps()[0].price, 0.070511);
        assert_eq!(series.steps()[32].price, 0.149118);
    }

    #[test]
    fn test_dynamic_prices_required() {
        let err = prepare_series(&morning_calendar(), None, &ewh(), &tariff(TariffMode::Dynamic), 1)
            .unwrap_err();
        assert!(matches!(err, PreprocessError::MissingDynamicPrices));
    }

    #[test]
    fn test_dynamic_prices_forward_filled() {
        let day = Utc.with_ymd_and_hms(2024, 1, 15, 0, 0, 0).unwrap();
        let prices: Vec<PricePoint> = (0..24)
            .map(|h| PricePoint {
                timestamp: day + Duration::hours(h),
                price: 0.01 * h as f64,
            })
            .collect();
        let series = prepare_series(
            &morning_calendar(),
            Some(&prices),
            &ewh(),
            &tariff(TariffMode::Dynamic),
            60,
        )
        .unwrap();
        assert_eq!(series.len(), 24);
        assert!((series.steps()[8].price - 0.08).abs() < 1e-12);
    }

    #[test]
    fn test_align_prices_before_first_point() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 15, 12, 0, 0).unwrap();
        let prices = [PricePoint { timestamp: ts, price: 0.3 }];
        let aligned = align_prices(&prices, &minute_grid(ts - Duration::minutes(2), 4)).unwrap();
        assert_eq!(aligned, vec![0.3; 4]);
        assert_eq!(align_prices(&[], &[ts]), None);
    }

    #[test]
    fn test_measured_load_series() {
        let start = Utc.with_ymd_and_hms(2024, 1, 15, 0, 0, 0).unwrap();
        let mut loads = vec![0.0; 120];
        loads.extend(vec![1620.0; 60]);
        loads.extend(vec![0.0; 60]);
        let samples = minute_grid(start, loads.len())
            .into_iter()
            .zip(loads)
            .map(|(timestamp, load_w)| LoadSample { timestamp, load_w })
            .collect();
        let series = prepare_series(
            &UsageInput::MeasuredLoad { samples },
            None,
            &ewh(),
            &tariff(TariffMode::Flat),
            1,
        )
        .unwrap();
        assert_eq!(series.len(), 240);
        assert!(series.steps()[120].draw == 1.0);
        assert_eq!(series.steps()[120].load_w, 1620.0);
    }

    #[test]
    fn test_measured_load_keeps_coarser_native_resolution() {
        let start = Utc.with_ymd_and_hms(2024, 1, 15, 0, 0, 0).unwrap();
        let samples: Vec<LoadSample> = (0..96)
            .map(|i| LoadSample {
                timestamp: start + Duration::minutes(15 * i),
                load_w: if (28..32).contains(&i) { 1620.0 } else { 0.0 },
            })
            .collect();
        let usage = UsageInput::MeasuredLoad { samples };

        let series = prepare_series(&usage, None, &ewh(), &tariff(TariffMode::Flat), 1).unwrap();
        assert_eq!(series.len(), 96);
        assert_eq!(series.step_minutes(), 15);
        assert_eq!(series.steps()[28].load_w, 1620.0);

        let hourly = prepare_series(&usage, None, &ewh(), &tariff(TariffMode::Flat), 60).unwrap();
        assert_eq!(hourly.len(), 24);
        assert_eq!(hourly.step_minutes(), 60);
    }

    #[test]
    fn test_measured_load_needs_two_samples() {
        let usage = UsageInput::MeasuredLoad {
            samples: vec![LoadSample {
                timestamp: Utc::now(),
                load_w: 0.0,
            }],
        };
        assert!(matches!(
            prepare_series(&usage, None, &ewh(), &tariff(TariffMode::Flat), 1),
            Err(PreprocessError::ResolutionUnknown)
        ));
    }
}
