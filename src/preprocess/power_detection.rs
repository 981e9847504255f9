use ordered_float::OrderedFloat;
use statrs::statistics::{Data, OrderStatistics, Statistics};

use tracing::{info, warn};

use crate::config::{ConfigError, EwhSpecs};
use crate::domain::HEATING_EFFICIENCY;

/// Samples below this share of the peak are treated as standby
pub const LOW_LOAD_SHARE: f64 = 0.15;

/// Estimate the nameplate power of a heater from its measured load (W).
///
/// Standby samples are dropped, the remaining heating samples are trimmed to the
/// 10th-90th percentile band, averaged, converted back through the heating efficiency
/// and rounded up to the next hundred watts. Returns `None` for a signal without heating.
pub fn detect_rated_power(loads_w: &[f64]) -> Option<f64> {
    let peak = loads_w
        .iter()
        .copied()
        .filter(|v| v.is_finite())
        .map(OrderedFloat)
        .max()?
        .into_inner();
    if peak <= 0.0 {
        return None;
    }

    let active: Vec<f64> = loads_w
        .iter()
        .copied()
        .filter(|v| v.is_finite() && *v > LOW_LOAD_SHARE * peak)
        .collect();
    if active.is_empty() {
        return None;
    }

    let mut data = Data::new(active.clone());
    let low = data.quantile(0.1);
    let high = data.quantile(0.9);

    let band: Vec<f64> = active.into_iter().filter(|v| (low..=high).contains(v)).collect();
    let mean = band.iter().mean();
    if !mean.is_finite() {
        return None;
    }

    Some(round_up_hundred(mean / HEATING_EFFICIENCY))
}

pub fn round_up_hundred(x: f64) -> f64 {
    (x / 100.0).ceil() * 100.0
}

/// Rated power for a run: the nameplate value when plausible, otherwise detected from `loads_w`
pub fn resolve_rated_power(specs: &EwhSpecs, loads_w: Option<&[f64]>) -> Result<f64, ConfigError> {
    if let Some(power) = specs.nameplate_power_w() {
        return Ok(power);
    }
    let detected = loads_w
        .and_then(detect_rated_power)
        .ok_or(ConfigError::RatedPowerUnavailable(specs.rated_power_w))?;

    match specs.rated_power_w {
        Some(nameplate) => warn!(nameplate, detected, "implausible rated power, using detected value"),
        None => info!(detected, "rated power detected from load signal"),
    }
    Ok(detected)
}
