//! One optimisation run: normalise → preprocess → fit surrogate → build and solve → extract.

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::config::{Config, RunParams};
use crate::domain::{EwhConfig, TariffConfig};
use crate::error::EwhFlexError;
use crate::optimizer::{
    build_model, fit_surrogate, HighsSolver, LinearProgram, MilpSolver, OptimizerError, SolveBudget,
};
use crate::preprocess::{prepare_series, resolve_rated_power, DrawEvent, LoadSample, PricePoint, UsageInput};
use crate::results::{extract_results, ExtractionContext, OptimizationResult};

/// Input document of a run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunInput {
    /// Sparse overrides of the loaded configuration
    #[serde(default)]
    pub params: RunParams,
    pub usage: UsageInput,
    /// Required in dynamic tariff mode
    #[serde(default)]
    pub dynamic_prices: Option<Vec<PricePoint>>,
}

impl RunInput {
    pub fn calendar(events: Vec<DrawEvent>) -> Self {
        Self {
            params: RunParams::default(),
            usage: UsageInput::Calendar { events },
            dynamic_prices: None,
        }
    }

    pub fn measured(samples: Vec<LoadSample>) -> Self {
        Self {
            params: RunParams::default(),
            usage: UsageInput::MeasuredLoad { samples },
            dynamic_prices: None,
        }
    }

    pub fn with_params(mut self, params: RunParams) -> Self {
        self.params = params;
        self
    }

    pub fn with_prices(mut self, prices: Vec<PricePoint>) -> Self {
        self.dynamic_prices = Some(prices);
        self
    }
}

/// Runs the full pipeline against a solver backend. Runs share no state.
pub struct EwhOptimizer<S = HighsSolver> {
    config: Config,
    solver: S,
}

impl EwhOptimizer<HighsSolver> {
    pub fn new(config: Config) -> Self {
        Self::with_solver(config, HighsSolver::new())
    }
}

impl<S: MilpSolver> EwhOptimizer<S> {
    pub fn with_solver(config: Config, solver: S) -> Self {
        Self { config, solver }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    #[instrument(skip_all, name = "ewh_flex_run")]
    pub fn run(&self, input: &RunInput) -> Result<OptimizationResult, EwhFlexError> {
        let cfg = self.config.with_params(&input.params);
        cfg.check()?;
        info!(user = %cfg.run.user, step_minutes = cfg.run.step_minutes, tariff = %cfg.tariff.mode, "starting run");

        let loads = input.usage.measured_loads();
        let rated_power = resolve_rated_power(&cfg.ewh, loads.as_deref())?;
        let ewh = EwhConfig::new(&cfg.ewh, rated_power)?;
        let tariff = TariffConfig::new(&cfg.tariff)?;

        let series = prepare_series(
            &input.usage,
            input.dynamic_prices.as_deref(),
            &ewh,
            &tariff,
            cfg.run.step_minutes,
        )?;

        let surrogate = fit_surrogate(
            &ewh,
            series.steps().iter().map(|s| s.inlet_temp_c),
            series.step_minutes(),
            cfg.model.min_r_squared,
        )?;
        let model = build_model(&ewh, &series, &tariff, &surrogate, &cfg.model)?;

        if let Some(path) = &cfg.run.lp_dump_path {
            dump_lp(&model.lp, path)?;
            info!(path = %path.display(), "wrote LP model");
        }

        let budget = SolveBudget::for_horizon(&cfg.solver, series.days());
        let solution = self.solver.solve(&model.lp, &budget)?;

        Ok(extract_results(
            &model,
            &solution,
            &ExtractionContext {
                user: &cfg.run.user,
                ewh: &ewh,
                tariff: &tariff,
                series: &series,
                surrogate: surrogate.quality(cfg.model.min_r_squared),
            },
        ))
    }
}

fn dump_lp(lp: &LinearProgram, path: &Path) -> Result<(), OptimizerError> {
    let to_error = |source| OptimizerError::LpDump {
        path: path.to_path_buf(),
        source,
    };
    let file = File::create(path).map_err(to_error)?;
    lp.write_lp(BufWriter::new(file)).map_err(to_error)
}
