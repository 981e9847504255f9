//! # EWH schedule optimisation
//!
//! - [`surrogate`]: linear regression of the mixing physics, one plane per temperature regime
//! - [`model`]: solver-agnostic linear program with LP-format export
//! - [`formulation`]: the EWH MILP with per-step variable handles
//! - [`solver`]: the [`MilpSolver`] seam and the HiGHS backend

pub mod formulation;
pub mod model;
pub mod solver;
pub mod surrogate;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use thiserror::Error;

use crate::config::SolverConfig;

pub use formulation::{build_model, Activation, BigM, ComfortTrigger, EwhModel, StepVariables};
pub use model::{LinearExpr, LinearProgram, Sense, VarId, VarKind};
pub use solver::{HighsSolver, MilpSolution, MilpSolver};
pub use surrogate::{exact_water_energy, fit_surrogate, Surrogate, SurrogateError, SurrogateQuality};

/// Outcome of a solve. Only `Optimal` and `TimeLimit` carry a schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SolveStatus {
    Optimal,
    /// Time limit reached with a feasible incumbent
    TimeLimit,
    Infeasible,
    Unbounded,
    NotSolved,
}

impl SolveStatus {
    pub fn is_usable(&self) -> bool {
        matches!(self, SolveStatus::Optimal | SolveStatus::TimeLimit)
    }
}

#[derive(Debug, Error)]
pub enum OptimizerError {
    #[error("invalid model input: {0}")]
    InvalidInput(String),
    #[error("solver finished with status {status}: {message}")]
    Solve { status: SolveStatus, message: String },
    #[error("failed to write LP model to {path}: {source}")]
    LpDump {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl OptimizerError {
    /// Solver status behind the failure, if the solver ran
    pub fn status(&self) -> Option<SolveStatus> {
        match self {
            OptimizerError::Solve { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Wall-clock and gap limits for one solve
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SolveBudget {
    pub time_limit_s: f64,
    pub gap_rel: f64,
    pub threads: u32,
    pub verbose: bool,
}

impl SolveBudget {
    /// Base time plus a per-day share; the gap loosens past the long-horizon threshold
    pub fn for_horizon(cfg: &SolverConfig, days: f64) -> Self {
        let days = days.max(0.0);
        Self {
            time_limit_s: cfg.base_time_limit_s + cfg.time_limit_per_day_s * days.ceil(),
            gap_rel: if days > cfg.long_horizon_days {
                cfg.gap_rel_long
            } else {
                cfg.gap_rel
            },
            threads: cfg.threads,
            verbose: cfg.verbose,
        }
    }
}
