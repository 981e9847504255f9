//! Solver-agnostic linear program.
//!
//! The formulation is written against these types and only translated to a concrete
//! solver backend in [`super::solver`]. This keeps the model inspectable: it can be
//! dumped in CPLEX LP format and checked against a solution without a solver.

use std::fmt;
use std::io::{self, Write};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VarId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarKind {
    Continuous,
    Binary,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VarDef {
    pub name: String,
    /// May be `-inf` for free variables
    pub lower: f64,
    /// May be `inf`
    pub upper: f64,
    pub kind: VarKind,
}

/// `Σ coef·var + constant`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LinearExpr {
    pub terms: Vec<(VarId, f64)>,
    pub constant: f64,
}

impl LinearExpr {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn term(mut self, var: VarId, coef: f64) -> Self {
        self.add_term(var, coef);
        self
    }

    pub fn constant(mut self, value: f64) -> Self {
        self.constant += value;
        self
    }

    pub fn add_term(&mut self, var: VarId, coef: f64) {
        if coef != 0.0 {
            self.terms.push((var, coef));
        }
    }

    pub fn evaluate(&self, values: &[f64]) -> f64 {
        self.constant
            + self
                .terms
                .iter()
                .map(|(v, c)| c * values[v.0])
                .sum::<f64>()
    }
}

impl From<VarId> for LinearExpr {
    fn from(var: VarId) -> Self {
        LinearExpr::new().term(var, 1.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sense {
    Le,
    Ge,
    Eq,
}

impl fmt::Display for Sense {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Sense::Le => "<=",
            Sense::Ge => ">=",
            Sense::Eq => "=",
        })
    }
}

/// `expr sense rhs`
#[derive(Debug, Clone, PartialEq)]
pub struct LinearConstraint {
    pub name: String,
    pub expr: LinearExpr,
    pub sense: Sense,
    pub rhs: f64,
}

impl LinearConstraint {
    /// Amount by which `values` violate the constraint (0 when satisfied)
    pub fn violation(&self, values: &[f64]) -> f64 {
        let lhs = self.expr.evaluate(values);
        match self.sense {
            Sense::Le => (lhs - self.rhs).max(0.0),
            Sense::Ge => (self.rhs - lhs).max(0.0),
            Sense::Eq => (lhs - self.rhs).abs(),
        }
    }
}

/// Minimisation problem over continuous and binary variables
#[derive(Debug, Clone, Default)]
pub struct LinearProgram {
    vars: Vec<VarDef>,
    constraints: Vec<LinearConstraint>,
    objective: LinearExpr,
}

impl LinearProgram {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_var(&mut self, name: impl Into<String>, lower: f64, upper: f64, kind: VarKind) -> VarId {
        let (lower, upper) = match kind {
            VarKind::Binary => (0.0, 1.0),
            VarKind::Continuous => (lower, upper),
        };
        self.vars.push(VarDef {
            name: name.into(),
            lower,
            upper,
            kind,
        });
        VarId(self.vars.len() - 1)
    }

    pub fn add_constraint(
        &mut self,
        name: impl Into<String>,
        expr: impl Into<LinearExpr>,
        sense: Sense,
        rhs: f64,
    ) {
        self.constraints.push(LinearConstraint {
            name: name.into(),
            expr: expr.into(),
            sense,
            rhs,
        });
    }

    pub fn set_objective(&mut self, objective: LinearExpr) {
        self.objective = objective;
    }

    pub fn vars(&self) -> &[VarDef] {
        &self.vars
    }

    pub fn var(&self, id: VarId) -> &VarDef {
        &self.vars[id.0]
    }

    pub fn constraints(&self) -> &[LinearConstraint] {
        &self.constraints
    }

    pub fn objective(&self) -> &LinearExpr {
        &self.objective
    }

    pub fn num_binaries(&self) -> usize {
        self.vars.iter().filter(|v| v.kind == VarKind::Binary).count()
    }

    /// Largest violation of any bound, integrality requirement or constraint
    pub fn max_violation(&self, values: &[f64]) -> f64 {
        let bounds = self.vars.iter().zip(values).map(|(def, &x)| {
            let bound = (def.lower - x).max(x - def.upper).max(0.0);
            let integral = match def.kind {
                VarKind::Binary => (x - x.round()).abs(),
                VarKind::Continuous => 0.0,
            };
            bound.max(integral)
        });
        let rows = self.constraints.iter().map(|c| c.violation(values));
        bounds.chain(rows).fold(0.0, f64::max)
    }

    /// Write the model in CPLEX LP format
    pub fn write_lp<W: Write>(&self, mut out: W) -> io::Result<()> {
        writeln!(out, "\\ ewh-flex MILP: {} variables, {} constraints", self.vars.len(), self.constraints.len())?;
        if self.objective.constant != 0.0 {
            writeln!(out, "\\ objective constant {}", self.objective.constant)?;
        }

        writeln!(out, "Minimize")?;
        write!(out, " obj:")?;
        self.write_terms(&mut out, &self.objective.terms)?;
        writeln!(out)?;

        writeln!(out, "Subject To")?;
        for c in &self.constraints {
            write!(out, " {}:", c.name)?;
            self.write_terms(&mut out, &c.expr.terms)?;
            writeln!(out, " {} {}", c.sense, c.rhs - c.expr.constant)?;
        }

        writeln!(out, "Bounds")?;
        for v in self.vars.iter().filter(|v| v.kind == VarKind::Continuous) {
            match (v.lower.is_finite(), v.upper.is_finite()) {
                (false, false) => writeln!(out, " {} free", v.name)?,
                (true, true) => writeln!(out, " {} <= {} <= {}", v.lower, v.name, v.upper)?,
                (true, false) => writeln!(out, " {} >= {}", v.name, v.lower)?,
                (false, true) => writeln!(out, " -inf <= {} <= {}", v.name, v.upper)?,
            }
        }

        let binaries: Vec<&str> = self
            .vars
            .iter()
            .filter(|v| v.kind == VarKind::Binary)
            .map(|v| v.name.as_str())
            .collect();
        if !binaries.is_empty() {
            writeln!(out, "Binaries")?;
            for chunk in binaries.chunks(8) {
                writeln!(out, " {}", chunk.join(" "))?;
            }
        }
        writeln!(out, "End")
    }

    fn write_terms<W: Write>(&self, out: &mut W, terms: &[(VarId, f64)]) -> io::Result<()> {
        if terms.is_empty() {
            return write!(out, " 0 {}", self.vars.first().map_or("x", |v| v.name.as_str()));
        }
        for (i, (var, coef)) in terms.iter().enumerate() {
            // keep lines well below the 255 character limit of LP readers
            if i > 0 && i % 6 == 0 {
                write!(out, "\n  ")?;
            }
            let sign = if *coef < 0.0 { '-' } else { '+' };
            write!(out, " {} {} {}", sign, coef.abs(), self.vars[var.0].name)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small() -> (LinearProgram, VarId, VarId) {
        let mut lp = LinearProgram::new();
        let x = lp.add_var("x", 0.0, 10.0, VarKind::Continuous);
        let b = lp.add_var("b", 0.0, 0.0, VarKind::Binary);
        lp.add_constraint("link", LinearExpr::from(x).term(b, -4.0), Sense::Le, 0.0);
        lp.add_constraint("need", x, Sense::Ge, 2.0);
        lp.set_objective(LinearExpr::new().term(x, 1.0).term(b, 3.0));
        (lp, x, b)
    }

    #[test]
    fn test_binary_bounds_are_normalised() {
        let (lp, _, b) = small();
        assert_eq!(lp.var(b).upper, 1.0);
        assert_eq!(lp.num_binaries(), 1);
    }

    #[test]
    fn test_max_violation() {
        let (lp, _, _) = small();
        assert_eq!(lp.max_violation(&[2.0, 1.0]), 0.0);
        // link violated by 2
        assert_eq!(lp.max_violation(&[6.0, 1.0]), 2.0);
        // fractional binary
        assert!((lp.max_violation(&[2.0, 0.6]) - 0.4).abs() < 1e-12);
        assert_eq!(lp.objective().evaluate(&[2.0, 1.0]), 5.0);
    }

    #[test]
    fn test_zero_coefficients_dropped() {
        let expr = LinearExpr::new().term(VarId(0), 0.0).term(VarId(1), 2.0);
        assert_eq!(expr.terms, vec![(VarId(1), 2.0)]);
    }

    #[test]
    fn test_write_lp_sections() {
        let (mut lp, x, _) = small();
        let free = lp.add_var("f", f64::NEG_INFINITY, f64::INFINITY, VarKind::Continuous);
        lp.add_constraint("shift", LinearExpr::from(free).term(x, 1.0).constant(1.5), Sense::Eq, 4.0);

        let mut buf = Vec::new();
        lp.write_lp(&mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();

        assert!(text.contains("Minimize\n obj: + 1 x + 3 b\n"));
        assert!(text.contains(" link: + 1 x - 4 b <= 0\n"));
        assert!(text.contains(" need: + 1 x >= 2\n"));
        assert!(text.contains(" shift: + 1 f + 1 x = 2.5\n"));
        assert!(text.contains(" 0 <= x <= 10\n"));
        assert!(text.contains(" f free\n"));
        assert!(text.contains("Binaries\n b\n"));
        assert!(text.trim_end().ends_with("End"));
    }
}
