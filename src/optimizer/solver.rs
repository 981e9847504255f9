//! Solver backends.
//!
//! [`MilpSolver`] is the seam between the formulation and a concrete MILP engine.
//! [`HighsSolver`] translates a [`LinearProgram`] into `good_lp` and solves it with HiGHS.

use std::time::{Duration, Instant};

use good_lp::{
    constraint, highs, variable, Expression, ProblemVariables, ResolutionError, Solution,
    SolverModel, Variable,
};
use tracing::{debug, info, warn};

use super::model::{LinearExpr, LinearProgram, Sense, VarKind};
use super::{OptimizerError, SolveBudget, SolveStatus};

/// Largest constraint violation accepted from a time-limited incumbent
const INCUMBENT_TOLERANCE: f64 = 1e-3;

/// Primal solution of a [`LinearProgram`], indexed like its variables
#[derive(Debug, Clone, PartialEq)]
pub struct MilpSolution {
    pub status: SolveStatus,
    pub objective: f64,
    pub values: Vec<f64>,
    pub elapsed: Duration,
}

pub trait MilpSolver {
    fn name(&self) -> &'static str;

    /// Solve to a usable status or fail with the solver status
    fn solve(&self, lp: &LinearProgram, budget: &SolveBudget) -> Result<MilpSolution, OptimizerError>;
}

/// HiGHS through `good_lp`
#[derive(Debug, Clone, Copy, Default)]
pub struct HighsSolver;

impl HighsSolver {
    pub fn new() -> Self {
        Self
    }
}

fn to_expression(expr: &LinearExpr, handles: &[Variable]) -> Expression {
    expr.terms
        .iter()
        .map(|(var, coef)| handles[var.0] * *coef)
        .sum::<Expression>()
        + expr.constant
}

impl MilpSolver for HighsSolver {
    fn name(&self) -> &'static str {
        "highs"
    }

    fn solve(&self, lp: &LinearProgram, budget: &SolveBudget) -> Result<MilpSolution, OptimizerError> {
        let mut problem = ProblemVariables::new();
        let handles: Vec<Variable> = lp
            .vars()
            .iter()
            .map(|def| {
                let mut v = variable().name(def.name.clone());
                if def.kind == VarKind::Binary {
                    v = v.binary();
                }
                if def.lower.is_finite() {
                    v = v.min(def.lower);
                }
                if def.upper.is_finite() {
                    v = v.max(def.upper);
                }
                problem.add(v)
            })
            .collect();

        let objective = to_expression(lp.objective(), &handles);
        let mut model = problem
            .minimise(objective)
            .using(highs)
            .set_option("time_limit", budget.time_limit_s)
            .set_option("mip_rel_gap", budget.gap_rel)
            .set_option("threads", budget.threads as i32)
            .set_option("output_flag", budget.verbose);

        for c in lp.constraints() {
            let lhs = to_expression(&c.expr, &handles);
            model = model.with(match c.sense {
                Sense::Le => constraint!(lhs <= c.rhs),
                Sense::Ge => constraint!(lhs >= c.rhs),
                Sense::Eq => constraint!(lhs == c.rhs),
            });
        }

        info!(
            solver = self.name(),
            variables = lp.vars().len(),
            binaries = lp.num_binaries(),
            constraints = lp.constraints().len(),
            time_limit_s = budget.time_limit_s,
            gap_rel = budget.gap_rel,
            "solving MILP"
        );

        let started = Instant::now();
        let outcome = model.solve();
        let elapsed = started.elapsed();

        let solution = match outcome {
            Ok(solution) => solution,
            Err(ResolutionError::Infeasible) => {
                return Err(OptimizerError::Solve {
                    status: SolveStatus::Infeasible,
                    message: "no schedule satisfies the tank constraints".to_string(),
                })
            }
            Err(ResolutionError::Unbounded) => {
                return Err(OptimizerError::Solve {
                    status: SolveStatus::Unbounded,
                    message: "objective is unbounded".to_string(),
                })
            }
            Err(e) => {
                return Err(OptimizerError::Solve {
                    status: SolveStatus::NotSolved,
                    message: e.to_string(),
                })
            }
        };

        let values: Vec<f64> = handles.iter().map(|v| solution.value(*v)).collect();
        if values.iter().any(|v| !v.is_finite()) {
            return Err(OptimizerError::Solve {
                status: SolveStatus::NotSolved,
                message: "solver returned no incumbent".to_string(),
            });
        }

        let violation = lp.max_violation(&values);
        let status = classify_outcome(elapsed.as_secs_f64(), budget.time_limit_s, violation)?;
        if status == SolveStatus::TimeLimit {
            warn!(
                elapsed_s = elapsed.as_secs_f64(),
                "MILP time limit reached, using best incumbent"
            );
        }

        let objective = lp.objective().evaluate(&values);
        debug!(max_violation = violation, "solution feasibility");
        info!(
            %status,
            objective,
            elapsed_ms = elapsed.as_millis() as u64,
            "MILP solved"
        );

        Ok(MilpSolution {
            status,
            objective,
            values,
            elapsed,
        })
    }
}

/// Status of a run that returned values.
///
/// HiGHS reports a time-limited run like a finished one, so the elapsed time decides. A
/// time-limited incumbent is only usable when it satisfies every constraint.
pub(crate) fn classify_outcome(
    elapsed_s: f64,
    time_limit_s: f64,
    violation: f64,
) -> Result<SolveStatus, OptimizerError> {
    if elapsed_s < time_limit_s {
        return Ok(SolveStatus::Optimal);
    }
    if violation > INCUMBENT_TOLERANCE {
        return Err(OptimizerError::Solve {
            status: SolveStatus::NotSolved,
            message: format!("time limit reached without a feasible incumbent (violation {violation:.3e})"),
        });
    }
    Ok(SolveStatus::TimeLimit)
}
