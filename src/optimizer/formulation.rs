//! MILP formulation of the water heater schedule.
//!
//! Every step owns one [`StepVariables`] handle set, created once while building so the
//! solution can be read back by index. Energies are kWh per step; the step length Δ (hours)
//! carries all time scaling.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use tracing::debug;

use super::model::{LinearExpr, LinearProgram, Sense, VarId, VarKind};
use super::surrogate::Surrogate;
use super::OptimizerError;
use crate::config::ModelConfig;
use crate::domain::{EwhConfig, TariffConfig, TimeSeries};

/// How the heating element may be switched within a step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Activation {
    /// Fully ON or OFF for the whole step
    Binary,
    /// Any share of the step in [0, 1]
    Fractional,
}

/// Which steps must meet the comfort energy floor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ComfortTrigger {
    /// Every step whose draw fraction is lower than the previous one
    DrawDecrease,
    /// The first draw-free step after a draw
    DrawEnd,
    /// As [`ComfortTrigger::DrawEnd`], and the last draw step before it
    DrawEndWithPrior,
}

impl ComfortTrigger {
    /// Steps on which the comfort floor applies. Step 0 is never constrained.
    pub fn triggered_steps(&self, draws: &[f64]) -> Vec<usize> {
        let mut steps: Vec<usize> = (1..draws.len())
            .filter(|&t| match self {
                ComfortTrigger::DrawDecrease => draws[t] < draws[t - 1],
                ComfortTrigger::DrawEnd | ComfortTrigger::DrawEndWithPrior => {
                    draws[t - 1] > 0.0 && draws[t] == 0.0
                }
            })
            .collect();

        if *self == ComfortTrigger::DrawEndWithPrior {
            let prior: Vec<usize> = steps.iter().map(|t| t - 1).filter(|&t| t > 0).collect();
            steps.extend(prior);
            steps.sort_unstable();
            steps.dedup();
        }
        steps
    }
}

/// Handles of all decision variables of one step
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepVariables {
    pub temp: VarId,
    /// Stored energy at the start of the step
    pub w_tot: VarId,
    pub w_in: VarId,
    pub w_loss: VarId,
    pub delta_in: VarId,
    /// Stored energy after the step's draw and inlet mixing
    pub w_water: VarId,
    pub comfort_slack: VarId,
    /// Surrogate regime selector, only on steps with a draw
    pub bin_regime: Option<VarId>,
    pub cost: VarId,
}

/// Big-M constants of the regime disjunction
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BigM {
    /// Relaxes the temperature side of the regime selector (K)
    pub temperature: f64,
    /// Relaxes the inactive surrogate plane (kWh)
    pub energy: f64,
}

impl BigM {
    /// Tightest constants valid over the temperature range and draw fractions
    pub fn derive(ewh: &EwhConfig, surrogate: &Surrogate) -> Self {
        let energy = [ewh.min_temp_c, ewh.max_temp_c]
            .into_iter()
            .flat_map(|temp| [0.0, 1.0].map(|draw| (temp, draw)))
            .map(|(temp, draw)| {
                (surrogate.above.predict(temp, draw) - surrogate.below.predict(temp, draw)).abs()
            })
            .fold(0.0, f64::max);

        Self {
            temperature: ewh.max_temp_c - ewh.min_temp_c,
            energy: energy * 1.1 + 1e-3,
        }
    }
}

/// The assembled program plus the handles needed to read a solution back
#[derive(Debug, Clone)]
pub struct EwhModel {
    pub lp: LinearProgram,
    pub steps: Vec<StepVariables>,
    pub big_m: BigM,
    /// Steps carrying the comfort floor
    pub comfort_steps: Vec<usize>,
    pub comfort_floor_kwh: f64,
    /// Δ in hours
    pub step_hours: f64,
}

impl EwhModel {
    pub fn num_steps(&self) -> usize {
        self.steps.len()
    }
}

/// Build the MILP for one horizon.
pub fn build_model(
    ewh: &EwhConfig,
    series: &TimeSeries,
    tariff: &TariffConfig,
    surrogate: &Surrogate,
    cfg: &ModelConfig,
) -> Result<EwhModel, OptimizerError> {
    if let Some((t, step)) = series
        .steps()
        .iter()
        .enumerate()
        .find(|(_, s)| !s.price.is_finite())
    {
        return Err(OptimizerError::InvalidInput(format!(
            "price at step {t} ({}) is not finite",
            step.timestamp
        )));
    }

    let dt = series.step_hours();
    let heat_per_step = ewh.thermal_power_kw * dt;
    let kwh_per_k = ewh.kwh_per_kelvin();
    let ua_dt = ewh.loss_coefficient() * dt;
    let network_cost = tariff.network_cost(dt);
    let floor = ewh.comfort_energy_floor(cfg.comfort_margin);
    let big_m = cfg.big_m.map_or_else(
        || BigM::derive(ewh, surrogate),
        |m| BigM {
            temperature: m,
            energy: m,
        },
    );

    let mut lp = LinearProgram::new();
    let inf = f64::INFINITY;

    let steps: Vec<StepVariables> = series
        .steps()
        .iter()
        .enumerate()
        .map(|(t, step)| {
            let delta_kind = match cfg.activation {
                Activation::Binary => VarKind::Binary,
                Activation::Fractional => VarKind::Continuous,
            };
            StepVariables {
                temp: lp.add_var(format!("temp_{t}"), ewh.min_temp_c, ewh.max_temp_c, VarKind::Continuous),
                w_tot: lp.add_var(format!("w_tot_{t}"), ewh.wh_min, ewh.wh_max, VarKind::Continuous),
                w_in: lp.add_var(format!("w_in_{t}"), 0.0, inf, VarKind::Continuous),
                w_loss: lp.add_var(format!("w_loss_{t}"), -inf, inf, VarKind::Continuous),
                delta_in: lp.add_var(format!("delta_in_{t}"), 0.0, 1.0, delta_kind),
                w_water: lp.add_var(format!("w_water_{t}"), 0.0, inf, VarKind::Continuous),
                comfort_slack: lp.add_var(format!("comfort_slack_{t}"), 0.0, inf, VarKind::Continuous),
                bin_regime: (step.draw > 0.0)
                    .then(|| lp.add_var(format!("bin_regime_{t}"), 0.0, 1.0, VarKind::Binary)),
                cost: lp.add_var(format!("cost_{t}"), 0.0, inf, VarKind::Continuous),
            }
        })
        .collect();

    for (t, (v, step)) in steps.iter().zip(series.steps()).enumerate() {
        // energy balance and initial state
        if t == 0 {
            lp.add_constraint("init_w_tot", v.w_tot, Sense::Eq, ewh.wh_init);
            lp.add_constraint("init_temp", v.temp, Sense::Eq, ewh.start_temp_c);
        } else {
            let prev = &steps[t - 1];
            lp.add_constraint(
                format!("recurrence_{t}"),
                LinearExpr::from(v.w_tot)
                    .term(prev.w_water, -1.0)
                    .term(prev.w_in, -1.0)
                    .term(prev.w_loss, 1.0),
                Sense::Eq,
                0.0,
            );
            lp.add_constraint(
                format!("temp_map_{t}"),
                LinearExpr::from(v.temp).term(v.w_tot, -1.0 / kwh_per_k),
                Sense::Eq,
                0.0,
            );
        }

        lp.add_constraint(
            format!("heating_{t}"),
            LinearExpr::from(v.w_in).term(v.delta_in, -heat_per_step),
            Sense::Eq,
            0.0,
        );
        lp.add_constraint(
            format!("cost_{t}"),
            LinearExpr::from(v.cost).term(v.delta_in, -heat_per_step * step.price),
            Sense::Eq,
            network_cost,
        );
        lp.add_constraint(
            format!("loss_{t}"),
            LinearExpr::from(v.w_loss).term(v.temp, -ua_dt),
            Sense::Eq,
            -ua_dt * ewh.ambient_temp_c,
        );

        match v.bin_regime {
            None => lp.add_constraint(
                format!("no_draw_{t}"),
                LinearExpr::from(v.w_water).term(v.temp, -kwh_per_k),
                Sense::Eq,
                0.0,
            ),
            Some(bin) => add_regime_disjunction(&mut lp, t, v, bin, step.draw, surrogate, big_m),
        }
    }

    let draws: Vec<f64> = series.draws().collect();
    let comfort_steps = cfg.comfort_trigger.triggered_steps(&draws);
    for &t in &comfort_steps {
        lp.add_constraint(
            format!("comfort_{t}"),
            LinearExpr::from(steps[t].w_tot).term(steps[t].comfort_slack, 1.0),
            Sense::Ge,
            floor,
        );
    }

    let mut objective = LinearExpr::new();
    for v in &steps {
        objective.add_term(v.cost, cfg.cost_weight);
        objective.add_term(v.comfort_slack, cfg.comfort_weight);
    }
    lp.set_objective(objective);

    debug!(
        steps = steps.len(),
        variables = lp.vars().len(),
        binaries = lp.num_binaries(),
        constraints = lp.constraints().len(),
        comfort_steps = comfort_steps.len(),
        big_m_temperature = big_m.temperature,
        big_m_energy = big_m.energy,
        "built EWH model"
    );

    Ok(EwhModel {
        lp,
        steps,
        big_m,
        comfort_steps,
        comfort_floor_kwh: floor,
        step_hours: dt,
    })
}

/// `bin = 1` iff temp ≥ comfort, and `w_water` equals the plane of the selected regime
fn add_regime_disjunction(
    lp: &mut LinearProgram,
    t: usize,
    v: &StepVariables,
    bin: VarId,
    draw: f64,
    surrogate: &Surrogate,
    big_m: BigM,
) {
    let comfort = surrogate.comfort_temp_c;
    let (mt, me) = (big_m.temperature, big_m.energy);

    lp.add_constraint(
        format!("regime_upper_{t}"),
        LinearExpr::from(v.temp).term(bin, -mt),
        Sense::Le,
        comfort,
    );
    lp.add_constraint(
        format!("regime_lower_{t}"),
        LinearExpr::from(v.temp).term(bin, -mt),
        Sense::Ge,
        comfort - mt,
    );

    let above = surrogate.above;
    let above_rhs = above.draw_coef * draw + above.intercept;
    lp.add_constraint(
        format!("above_le_{t}"),
        LinearExpr::from(v.w_water).term(v.temp, -above.temp_coef).term(bin, me),
        Sense::Le,
        above_rhs + me,
    );
    lp.add_constraint(
        format!("above_ge_{t}"),
        LinearExpr::from(v.w_water).term(v.temp, -above.temp_coef).term(bin, -me),
        Sense::Ge,
        above_rhs - me,
    );

    let below = surrogate.below;
    let below_rhs = below.draw_coef * draw + below.intercept;
    lp.add_constraint(
        format!("below_le_{t}"),
        LinearExpr::from(v.w_water).term(v.temp, -below.temp_coef).term(bin, -me),
        Sense::Le,
        below_rhs,
    );
    lp.add_constraint(
        format!("below_ge_{t}"),
        LinearExpr::from(v.w_water).term(v.temp, -below.temp_coef).term(bin, me),
        Sense::Ge,
        below_rhs,
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EwhSpecs, TariffSpecs};
    use crate::domain::TimeStep;
    use crate::optimizer::surrogate::fit_surrogate;
    use chrono::{Duration, TimeZone, Utc};
    use rstest::rstest;

    struct Fixture {
        ewh: EwhConfig,
        series: TimeSeries,
        tariff: TariffConfig,
        surrogate: Surrogate,
    }

    fn fixture(draws: &[f64]) -> Fixture {
        let ewh = EwhConfig::new(&EwhSpecs::default(), 1800.0).unwrap();
        let start = Utc.with_ymd_and_hms(2024, 1, 15, 0, 0, 0).unwrap();
        let steps = draws
            .iter()
            .enumerate()
            .map(|(i, &draw)| TimeStep {
                timestamp: start + Duration::minutes(i as i64),
                load_w: 0.0,
                draw,
                inlet_temp_c: 20.0,
                price: 0.12,
            })
            .collect();
        Fixture {
            surrogate: fit_surrogate(&ewh, [20.0], 1, 0.9).unwrap(),
            ewh,
            series: TimeSeries::new(1, steps).unwrap(),
            tariff: TariffConfig::new(&TariffSpecs::default()).unwrap(),
        }
    }

    fn build(f: &Fixture, cfg: &ModelConfig) -> EwhModel {
        build_model(&f.ewh, &f.series, &f.tariff, &f.surrogate, cfg).unwrap()
    }

    #[rstest]
    #[case(ComfortTrigger::DrawDecrease, vec![4, 7, 8])]
    #[case(ComfortTrigger::DrawEnd, vec![4, 8])]
    #[case(ComfortTrigger::DrawEndWithPrior, vec![3, 4, 7, 8])]
    fn test_comfort_triggers(#[case] trigger: ComfortTrigger, #[case] expected: Vec<usize>) {
        let draws = [0.0, 0.0, 1.0, 1.0, 0.0, 0.0, 1.0, 0.5, 0.0, 0.0];
        assert_eq!(trigger.triggered_steps(&draws), expected);
    }

    #[test]
    fn test_draw_at_first_step_never_triggers_step_zero() {
        let draws = [1.0, 0.0, 0.0];
        assert_eq!(ComfortTrigger::DrawEndWithPrior.triggered_steps(&draws), vec![1]);
        assert!(ComfortTrigger::DrawDecrease.triggered_steps(&[0.5]).is_empty());
    }

    #[test]
    fn test_model_size() {
        let f = fixture(&[0.0, 1.0, 1.0, 0.0, 0.0]);
        let model = build(&f, &ModelConfig::default());
        assert_eq!(model.num_steps(), 5);
        // 8 per step + 2 regime selectors
        assert_eq!(model.lp.vars().len(), 5 * 8 + 2);
        assert_eq!(model.lp.num_binaries(), 5 + 2);
        assert_eq!(model.comfort_steps, vec![3]);
        // init 2, recurrence+temp map 2×4, heating/cost/loss 3×5, no-draw 3, regime 6×2, comfort 1
        assert_eq!(model.lp.constraints().len(), 2 + 8 + 15 + 3 + 12 + 1);
    }

    #[test]
    fn test_fractional_activation_has_no_binary_delta() {
        let f = fixture(&[0.0; 4]);
        let cfg = ModelConfig {
            activation: Activation::Fractional,
            ..Default::default()
        };
        let model = build(&f, &cfg);
        assert_eq!(model.lp.num_binaries(), 0);
        assert_eq!(model.lp.var(model.steps[0].delta_in).upper, 1.0);
    }

    #[test]
    fn test_big_m_override() {
        let f = fixture(&[0.0, 1.0, 0.0]);
        let cfg = ModelConfig {
            big_m: Some(500.0),
            ..Default::default()
        };
        let model = build(&f, &cfg);
        assert_eq!(model.big_m, BigM { temperature: 500.0, energy: 500.0 });
    }

    #[test]
    fn test_derived_big_m_covers_plane_gap() {
        let f = fixture(&[0.0]);
        let m = BigM::derive(&f.ewh, &f.surrogate);
        assert_eq!(m.temperature, 80.0);
        for temp in [0.0, 20.0, 40.0, 60.0, 80.0] {
            for draw in [0.0, 0.5, 1.0] {
                let gap = (f.surrogate.above.predict(temp, draw) - f.surrogate.below.predict(temp, draw)).abs();
                assert!(gap < m.energy);
            }
        }
    }

    /// A hand-built trajectory with the heater off satisfies every row it should
    #[test]
    fn test_idle_trajectory_is_feasible() {
        let f = fixture(&[0.0; 6]);
        let model = build(&f, &ModelConfig::default());
        let ewh = &f.ewh;
        let mut values = vec![0.0; model.lp.vars().len()];
        let mut w_tot = ewh.wh_init;
        for (t, v) in model.steps.iter().enumerate() {
            let temp = ewh.temp_of(w_tot);
            let loss = ewh.loss(temp, model.step_hours);
            values[v.temp.0] = if t == 0 { ewh.start_temp_c } else { temp };
            values[v.w_tot.0] = w_tot;
            values[v.w_loss.0] = loss;
            values[v.w_water.0] = w_tot;
            values[v.cost.0] = f.tariff.network_cost(model.step_hours);
            w_tot -= loss;
        }
        assert!(model.lp.max_violation(&values) < 1e-9);
    }

    #[test]
    fn test_rejects_non_finite_price() {
        let mut f = fixture(&[0.0; 2]);
        let mut steps = f.series.steps().to_vec();
        steps[1].price = f64::NAN;
        f.series = TimeSeries::new(1, steps).unwrap();
        let err = build_model(&f.ewh, &f.series, &f.tariff, &f.surrogate, &ModelConfig::default())
            .unwrap_err();
        assert!(matches!(err, OptimizerError::InvalidInput(_)));
    }
}
