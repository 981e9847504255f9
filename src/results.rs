//! Schedule extraction and KPIs.
//!
//! Solved values are read back through the per-step handles of the model, activation
//! values are snapped to remove solver noise, and flexibility, load, price and savings
//! figures are derived against the baseline load of the input series.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::domain::{EwhConfig, TariffConfig, TimeSeries};
use crate::optimizer::{EwhModel, MilpSolution, SolveStatus, SurrogateQuality, VarId};

/// Activation values within this distance of 0 or 1 are snapped
pub const SNAP_TOLERANCE: f64 = 1e-3;

pub fn snap_activation(value: f64) -> f64 {
    if value < SNAP_TOLERANCE {
        0.0
    } else if value > 1.0 - SNAP_TOLERANCE {
        1.0
    } else {
        value
    }
}

pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

/// Solved state of one step
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub timestamp: DateTime<Utc>,
    pub draw: f64,
    /// €/kWh
    pub price: f64,
    /// Snapped heating activation
    pub delta_in: f64,
    /// OFF share of the step
    pub flexibility: f64,
    pub temp_c: f64,
    pub w_tot_kwh: f64,
    pub w_in_kwh: f64,
    pub w_loss_kwh: f64,
    pub w_water_kwh: f64,
    pub comfort_slack_kwh: f64,
    /// €, network share included
    pub cost: f64,
    /// Above-comfort surrogate regime selected; `None` on draw-free steps
    pub above_comfort: Option<bool>,
    pub baseline_load_w: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SimulationPeriod {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub days: f64,
}

/// Headline figures, rounded for reporting
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Kpis {
    /// Minutes the heater is OFF over the horizon
    pub total_flexibility_min: f64,
    pub percentage_flexibility: f64,
    pub avg_daily_flexibility_min: f64,
    pub original_load_kwh: f64,
    pub optimized_load_kwh: f64,
    pub original_price_eur: f64,
    pub optimized_price_eur: f64,
    pub avg_daily_consumption_kwh: f64,
    pub savings_cost_eur: f64,
    pub savings_energy_kwh: f64,
    /// Total comfort shortfall accepted by the solver
    pub comfort_slack_kwh: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UsagePoint {
    pub timestamp: DateTime<Utc>,
    pub hot_water_usage: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalendarPoint {
    pub timestamp: DateTime<Utc>,
    pub ewh_on: f64,
}

/// Everything a run produces
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationResult {
    pub user: String,
    pub status: SolveStatus,
    pub objective_value: f64,
    pub period: SimulationPeriod,
    pub time_resolution_min: u32,
    pub kpis: Kpis,
    pub surrogate: SurrogateQuality,
    pub usage_profile: Vec<UsagePoint>,
    pub optimized_calendar: Vec<CalendarPoint>,
    pub steps: Vec<StepResult>,
}

impl OptimizationResult {
    /// Heating activation per step
    pub fn schedule(&self) -> impl Iterator<Item = f64> + '_ {
        self.steps.iter().map(|s| s.delta_in)
    }
}

/// Inputs of [`extract_results`] beyond the solution itself
pub struct ExtractionContext<'a> {
    pub user: &'a str,
    pub ewh: &'a EwhConfig,
    pub tariff: &'a TariffConfig,
    pub series: &'a TimeSeries,
    pub surrogate: SurrogateQuality,
}

/// Map the solution onto the time axis and derive the KPIs
pub fn extract_results(
    model: &EwhModel,
    solution: &MilpSolution,
    ctx: &ExtractionContext<'_>,
) -> OptimizationResult {
    let series = ctx.series;
    let dt = series.step_hours();
    let step_minutes = f64::from(series.step_minutes());
    let heat_per_step = ctx.ewh.thermal_power_kw * dt;
    let network_cost = ctx.tariff.network_cost(dt);
    let value = |id: VarId| solution.values[id.0];

    let steps: Vec<StepResult> = model
        .steps
        .iter()
        .zip(series.steps())
        .map(|(v, step)| {
            let delta_in = snap_activation(value(v.delta_in));
            StepResult {
                timestamp: step.timestamp,
                draw: step.draw,
                price: step.price,
                delta_in,
                flexibility: 1.0 - delta_in,
                temp_c: value(v.temp),
                w_tot_kwh: value(v.w_tot),
                w_in_kwh: value(v.w_in),
                w_loss_kwh: value(v.w_loss),
                w_water_kwh: value(v.w_water),
                comfort_slack_kwh: value(v.comfort_slack),
                cost: delta_in * heat_per_step * step.price + network_cost,
                above_comfort: v.bin_regime.map(|b| value(b) > 0.5),
                baseline_load_w: step.load_w,
            }
        })
        .collect();

    let days = series.days();
    let horizon_min = series.horizon_minutes();

    let total_flex: f64 = steps.iter().map(|s| s.flexibility * step_minutes).sum();
    let optimized_load: f64 = steps.iter().map(|s| s.delta_in * heat_per_step).sum();
    let optimized_price: f64 = steps.iter().map(|s| s.cost).sum();
    let original_load: f64 = steps.iter().map(|s| s.baseline_load_w / 1000.0 * dt).sum();
    let original_price: f64 = steps
        .iter()
        .map(|s| s.baseline_load_w / 1000.0 * dt * s.price)
        .sum::<f64>()
        + ctx.tariff.daily_tariff * days;
    let slack: f64 = steps.iter().map(|s| s.comfort_slack_kwh).sum();

    let kpis = Kpis {
        total_flexibility_min: round_to(total_flex, 2),
        percentage_flexibility: round_to(100.0 * total_flex / horizon_min, 2),
        avg_daily_flexibility_min: round_to(total_flex / days, 2),
        original_load_kwh: round_to(original_load, 4),
        optimized_load_kwh: round_to(optimized_load, 4),
        original_price_eur: round_to(original_price, 2),
        optimized_price_eur: round_to(optimized_price, 2),
        avg_daily_consumption_kwh: round_to(optimized_load / days, 4),
        savings_cost_eur: round_to(original_price - optimized_price, 2),
        savings_energy_kwh: round_to(original_load - optimized_load, 4),
        comfort_slack_kwh: round_to(slack, 4),
    };

    info!(
        user = ctx.user,
        status = %solution.status,
        total_flexibility_min = kpis.total_flexibility_min,
        optimized_load_kwh = kpis.optimized_load_kwh,
        savings_cost_eur = kpis.savings_cost_eur,
        "extracted schedule"
    );

    OptimizationResult {
        user: ctx.user.to_string(),
        status: solution.status,
        objective_value: solution.objective,
        period: SimulationPeriod {
            start: series.start(),
            end: series.end(),
            days,
        },
        time_resolution_min: series.step_minutes(),
        kpis,
        surrogate: ctx.surrogate,
        usage_profile: steps
            .iter()
            .map(|s| UsagePoint {
                timestamp: s.timestamp,
                hot_water_usage: s.draw,
            })
            .collect(),
        optimized_calendar: steps
            .iter()
            .map(|s| CalendarPoint {
                timestamp: s.timestamp,
                ewh_on: s.delta_in,
            })
            .collect(),
        steps,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EwhSpecs, ModelConfig, TariffSpecs};
    use crate::domain::TimeStep;
    use crate::optimizer::{build_model, fit_surrogate};
    use chrono::{Duration, TimeZone};
    use rstest::rstest;
    use std::time::Duration as StdDuration;

    #[rstest]
    #[case(0.0004, 0.0)]
    #[case(0.0011, 0.0011)]
    #[case(0.5, 0.5)]
    #[case(0.9995, 1.0)]
    #[case(1.0000002, 1.0)]
    #[case(-1e-7, 0.0)]
    fn test_snap(#[case] raw: f64, #[case] snapped: f64) {
        assert_eq!(snap_activation(raw), snapped);
    }

    #[rstest]
    #[case(1.23456, 2, 1.23)]
    #[case(1.23456, 4, 1.2346)]
    #[case(1439.6, 0, 1440.0)]
    fn test_round_to(#[case] x: f64, #[case] dp: i32, #[case] expected: f64) {
        assert_eq!(round_to(x, dp), expected);
    }

    /// Hand-made solution over four 15 minute steps with the given raw activations
    fn extracted_with(activations: [f64; 4]) -> OptimizationResult {
        let ewh = EwhConfig::new(&EwhSpecs::default(), 1800.0).unwrap();
        let tariff = TariffConfig::new(&TariffSpecs::default()).unwrap();
        let start = Utc.with_ymd_and_hms(2024, 1, 15, 6, 0, 0).unwrap();
        let steps = (0..4)
            .map(|i| TimeStep {
                timestamp: start + Duration::minutes(15 * i),
                load_w: 1620.0,
                draw: 0.0,
                inlet_temp_c: 20.0,
                price: 0.119585,
            })
            .collect();
        let series = TimeSeries::new(15, steps).unwrap();
        let surrogate = fit_surrogate(&ewh, [20.0], 15, 0.9).unwrap();
        let model = build_model(&ewh, &series, &tariff, &surrogate, &ModelConfig::default()).unwrap();

        let mut values = vec![0.0; model.lp.vars().len()];
        for (t, v) in model.steps.iter().enumerate() {
            values[v.delta_in.0] = activations[t];
        }
        let solution = MilpSolution {
            status: SolveStatus::Optimal,
            objective: 1.0,
            values,
            elapsed: StdDuration::from_millis(5),
        };
        extract_results(
            &model,
            &solution,
            &ExtractionContext {
                user: "u1",
                ewh: &ewh,
                tariff: &tariff,
                series: &series,
                surrogate: surrogate.quality(0.9),
            },
        )
    }

    /// Heater on for the first two steps
    fn extracted() -> OptimizationResult {
        extracted_with([0.9999, 0.9999, 0.0002, 0.0002])
    }

    #[test]
    fn test_kpis() {
        let r = extracted();
        let k = r.kpis;
        assert_eq!(r.schedule().collect::<Vec<_>>(), vec![1.0, 1.0, 0.0, 0.0]);
        assert_eq!(k.total_flexibility_min, 30.0);
        assert_eq!(k.percentage_flexibility, 50.0);
        // one hour horizon is 1/24 day
        assert_eq!(k.avg_daily_flexibility_min, 720.0);
        // 2 × 1.62 kW × 0.25 h
        assert_eq!(k.optimized_load_kwh, 0.81);
        assert_eq!(k.original_load_kwh, 1.62);
        assert_eq!(k.savings_energy_kwh, 0.81);
        // 1.62 kWh × 0.119585 + 0.3604 / 24
        assert_eq!(k.original_price_eur, round_to(1.62 * 0.119585 + 0.3604 / 24.0, 2));
        assert_eq!(k.optimized_price_eur, round_to(0.81 * 0.119585 + 0.3604 / 24.0, 2));
        assert_eq!(r.period.days, 1.0 / 24.0);
        assert_eq!(r.time_resolution_min, 15);
        assert_eq!(r.optimized_calendar.len(), 4);
        assert_eq!(r.optimized_calendar[0].ewh_on, 1.0);
    }

    #[test]
    fn test_fractional_activation_keeps_partial_minutes() {
        let k = extracted_with([0.3, 1.0, 0.0, 0.0]).kpis;
        // 0.7 × 15 + 2 × 15
        assert_eq!(k.total_flexibility_min, 40.5);
        assert_eq!(k.percentage_flexibility, 67.5);
        assert_eq!(k.avg_daily_flexibility_min, 972.0);
    }

    #[test]
    fn test_result_round_trip() {
        let r = extracted();
        let json = serde_json::to_string(&r).unwrap();
        let back: OptimizationResult = serde_json::from_str(&json).unwrap();
        assert!((back.kpis.original_price_eur - r.kpis.original_price_eur).abs() < 1e-12);
        assert_eq!(back.kpis.total_flexibility_min, r.kpis.total_flexibility_min);
        assert_eq!(back.status, SolveStatus::Optimal);
        assert_eq!(back.optimized_calendar, r.optimized_calendar);
        assert!(json.contains("\"status\":\"optimal\""));
    }
}
