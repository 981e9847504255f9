//! Piecewise-linear surrogate of the water-mixing physics.
//!
//! The energy left in the tank after a draw is a rational function of the outlet
//! temperature and the draw fraction. The MILP needs it linear, so two planes
//! `w_water ≈ a·temp + b·draw + c` are fitted on synthetic samples, one above and one
//! below the comfort temperature.

use itertools::Itertools;
use nalgebra::{DMatrix, DVector};
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::domain::EwhConfig;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum SurrogateError {
    #[error("no samples for the {0} regime")]
    EmptyGrid(Regime),
    #[error("singular design matrix for the {0} regime")]
    Singular(Regime),
    #[error("no inlet temperature available")]
    NoInletTemperature,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Regime {
    /// Outlet temperature at or above comfort: water is tempered with inlet water
    Above,
    Below,
}

/// One fitted plane `w_water = temp_coef·temp + draw_coef·draw + intercept` (kWh)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RegressionFit {
    pub temp_coef: f64,
    pub draw_coef: f64,
    pub intercept: f64,
    pub r_squared: f64,
    pub samples: usize,
}

impl RegressionFit {
    pub fn predict(&self, temp_c: f64, draw: f64) -> f64 {
        self.temp_coef * temp_c + self.draw_coef * draw + self.intercept
    }
}

/// Fit quality summary carried into the result
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SurrogateQuality {
    pub r_squared_above: f64,
    pub r_squared_below: f64,
    /// At least one regime fell below the configured R² threshold
    pub degraded: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Surrogate {
    pub above: RegressionFit,
    pub below: RegressionFit,
    pub comfort_temp_c: f64,
}

impl Surrogate {
    pub fn quality(&self, min_r_squared: f64) -> SurrogateQuality {
        SurrogateQuality {
            r_squared_above: self.above.r_squared,
            r_squared_below: self.below.r_squared,
            degraded: self.above.r_squared < min_r_squared || self.below.r_squared < min_r_squared,
        }
    }

    pub fn predict(&self, temp_c: f64, draw: f64) -> f64 {
        if temp_c >= self.comfort_temp_c {
            self.above.predict(temp_c, draw)
        } else {
            self.below.predict(temp_c, draw)
        }
    }
}

/// Exact stored energy after a step drawing fraction `draw` at tank temperature `temp_c`.
///
/// Above comfort the outlet is tempered, so only part of the outlet flow leaves the tank.
pub fn exact_water_energy(
    ewh: &EwhConfig,
    temp_c: f64,
    inlet_c: f64,
    draw: f64,
    step_minutes: f64,
) -> f64 {
    let outlet_l = ewh.flow_rate_l_per_min * step_minutes * draw;
    let drawn_l = if temp_c > ewh.comfort_temp_c && temp_c > inlet_c {
        outlet_l * (ewh.comfort_temp_c - inlet_c) / (temp_c - inlet_c)
    } else {
        outlet_l
    };
    ewh.mixed_energy(temp_c, drawn_l, inlet_c)
}

/// Draw fractions representable at minute resolution within one step
fn draw_levels(step_minutes: u32) -> Vec<f64> {
    (0..=step_minutes)
        .map(|k| f64::from(k) / f64::from(step_minutes))
        .collect()
}

/// (temp, draw, energy) samples for one regime
fn sample_grid(
    ewh: &EwhConfig,
    regime: Regime,
    inlets: &[f64],
    step_minutes: u32,
) -> Vec<(f64, f64, f64)> {
    let min_inlet = inlets.iter().copied().fold(f64::INFINITY, f64::min);
    let (low, high) = match regime {
        Regime::Above => (ewh.comfort_temp_c.ceil(), ewh.max_temp_c.floor()),
        Regime::Below => (min_inlet.floor(), ewh.comfort_temp_c.floor()),
    };
    let temps: Vec<f64> = (low as i64..=high as i64).map(|t| t as f64).collect();
    let draws = draw_levels(step_minutes);

    inlets
        .iter()
        .cartesian_product(temps.iter())
        .filter(|(inlet, temp)| **temp >= **inlet)
        .cartesian_product(draws.iter())
        .map(|((&inlet, &temp), &draw)| {
            let energy = exact_water_energy(ewh, temp, inlet, draw, f64::from(step_minutes));
            (temp, draw, energy)
        })
        .collect()
}

/// Ordinary least squares on `[temp, draw, 1]` through the normal equations
fn ols(samples: &[(f64, f64, f64)], regime: Regime) -> Result<RegressionFit, SurrogateError> {
    if samples.is_empty() {
        return Err(SurrogateError::EmptyGrid(regime));
    }
    let n = samples.len();
    let x = DMatrix::from_fn(n, 3, |i, j| match j {
        0 => samples[i].0,
        1 => samples[i].1,
        _ => 1.0,
    });
    let y = DVector::from_iterator(n, samples.iter().map(|s| s.2));

    let xt = x.transpose();
    let beta = (&xt * &x)
        .lu()
        .solve(&(&xt * &y))
        .ok_or(SurrogateError::Singular(regime))?;
    if beta.iter().any(|b| !b.is_finite()) {
        return Err(SurrogateError::Singular(regime));
    }

    let mean = y.mean();
    let predicted = &x * &beta;
    let ss_res: f64 = (&y - &predicted).iter().map(|r| r * r).sum();
    let ss_tot: f64 = y.iter().map(|v| (v - mean).powi(2)).sum();
    let r_squared = if ss_tot <= f64::EPSILON {
        1.0
    } else {
        1.0 - ss_res / ss_tot
    };

    Ok(RegressionFit {
        temp_coef: beta[0],
        draw_coef: beta[1],
        intercept: beta[2],
        r_squared,
        samples: n,
    })
}

/// Fit both regimes for the inlet temperatures observed on the horizon.
///
/// A fit below `min_r_squared` is logged and flagged through [`Surrogate::quality`],
/// the coefficients are still used.
pub fn fit_surrogate(
    ewh: &EwhConfig,
    inlet_temps: impl IntoIterator<Item = f64>,
    step_minutes: u32,
    min_r_squared: f64,
) -> Result<Surrogate, SurrogateError> {
    let inlets: Vec<f64> = inlet_temps
        .into_iter()
        .filter(|t| t.is_finite())
        .map(OrderedFloat)
        .unique()
        .sorted()
        .map(OrderedFloat::into_inner)
        .collect();
    if inlets.is_empty() {
        return Err(SurrogateError::NoInletTemperature);
    }

    let above = ols(&sample_grid(ewh, Regime::Above, &inlets, step_minutes), Regime::Above)?;
    let below = ols(&sample_grid(ewh, Regime::Below, &inlets, step_minutes), Regime::Below)?;

    for (regime, fit) in [(Regime::Above, &above), (Regime::Below, &below)] {
        debug!(
            %regime,
            temp_coef = fit.temp_coef,
            draw_coef = fit.draw_coef,
            intercept = fit.intercept,
            r_squared = fit.r_squared,
            samples = fit.samples,
            "surrogate regression fitted"
        );
        if fit.r_squared < min_r_squared {
            warn!(
                %regime,
                r_squared = fit.r_squared,
                threshold = min_r_squared,
                "poor surrogate fit, the temperature configuration may be degenerate"
            );
        }
    }

    Ok(Surrogate {
        above,
        below,
        comfort_temp_c: ewh.comfort_temp_c,
    })
}
