use thiserror::Error;

use crate::config::ConfigError;
use crate::optimizer::{OptimizerError, SolveStatus, SurrogateError};
use crate::preprocess::PreprocessError;

/// Failure of a pipeline run
#[derive(Debug, Error)]
pub enum EwhFlexError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Preprocess(#[from] PreprocessError),
    #[error("surrogate fit failed: {0}")]
    Surrogate(#[from] SurrogateError),
    #[error(transparent)]
    Optimizer(#[from] OptimizerError),
}

impl EwhFlexError {
    /// Solver status when the run failed in the solver
    pub fn solve_status(&self) -> Option<SolveStatus> {
        match self {
            EwhFlexError::Optimizer(e) => e.status(),
            _ => None,
        }
    }
}
