//! Solver-neutral mathematical program.
//!
//! Formulation builders append variables and constraints to a [`Program`];
//! solve oracles translate it into their own input format. Keeping the
//! program as plain data makes it cheap to clone, which is what OBBT relies
//! on to give every bound sub-solve its own copy.
//!
//! # Problem Class Mapping
//!
//! | Content                                        | Class              |
//! |------------------------------------------------|--------------------|
//! | linear rows, linear objective                  | `LinearProgram`    |
//! | + cones or convex quadratic objective          | `ConicProgram`     |
//! | + quadratic / nonlinear rows or objective      | `NonlinearProgram` |
//! | binary variables (any of the above)            | `MixedInteger`     |

mod expr;

pub use expr::{Expr, NlExpr};

use serde::{Deserialize, Serialize};

/// Index of a variable inside one [`Program`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VarId(pub usize);

/// Index of a constraint inside one [`Program`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConstraintId(pub usize);

/// Problem class used to match programs with oracles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProblemClass {
    LinearProgram,
    ConicProgram,
    NonlinearProgram,
    MixedInteger,
}

impl std::fmt::Display for ProblemClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProblemClass::LinearProgram => write!(f, "LP"),
            ProblemClass::ConicProgram => write!(f, "conic"),
            ProblemClass::NonlinearProgram => write!(f, "NLP"),
            ProblemClass::MixedInteger => write!(f, "mixed-integer"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    pub name: String,
    pub lb: f64,
    pub ub: f64,
    pub binary: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Sense {
    LessEqual,
    GreaterEqual,
    Equal,
}

impl Sense {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sense::LessEqual => "<=",
            Sense::GreaterEqual => ">=",
            Sense::Equal => "==",
        }
    }

    fn violation(&self, lhs: f64, rhs: f64) -> f64 {
        match self {
            Sense::LessEqual => (lhs - rhs).max(0.0),
            Sense::GreaterEqual => (rhs - lhs).max(0.0),
            Sense::Equal => (lhs - rhs).abs(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConstraintKind {
    /// `expr (sense) rhs`, `expr` linear.
    Linear { expr: Expr, sense: Sense, rhs: f64 },
    /// `expr (sense) rhs` with quadratic terms; treated as nonconvex.
    Quadratic { expr: Expr, sense: Sense, rhs: f64 },
    /// `||xs||_2 <= t`, all affine.
    SecondOrderCone { t: Expr, xs: Vec<Expr> },
    /// `Σ xs_k^2 <= a * b` with `a, b >= 0`, all affine.
    RotatedCone { a: Expr, b: Expr, xs: Vec<Expr> },
    /// `expr (sense) rhs` for an arbitrary expression tree.
    Nonlinear { expr: NlExpr, sense: Sense, rhs: f64 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Constraint {
    pub name: String,
    pub kind: ConstraintKind,
}

impl Constraint {
    /// Amount by which `values` violate the constraint (0 when satisfied).
    pub fn violation(&self, values: &[f64]) -> f64 {
        match &self.kind {
            ConstraintKind::Linear { expr, sense, rhs }
            | ConstraintKind::Quadratic { expr, sense, rhs } => {
                sense.violation(expr.eval(values), *rhs)
            }
            ConstraintKind::Nonlinear { expr, sense, rhs } => {
                sense.violation(expr.eval(values), *rhs)
            }
            ConstraintKind::SecondOrderCone { t, xs } => {
                let norm = xs.iter().map(|x| x.eval(values).powi(2)).sum::<f64>().sqrt();
                (norm - t.eval(values)).max(0.0)
            }
            ConstraintKind::RotatedCone { a, b, xs } => {
                let (a, b) = (a.eval(values), b.eval(values));
                let lhs: f64 = xs.iter().map(|x| x.eval(values).powi(2)).sum();
                (lhs - a * b).max(0.0).max(-a).max(-b)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectiveSense {
    #[default]
    Minimize,
    Maximize,
}

/// Objective: a quadratic polynomial plus an optional nonlinear remainder.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Objective {
    pub sense: ObjectiveSense,
    pub expr: Expr,
    pub nonlinear: Option<NlExpr>,
}

impl Objective {
    pub fn minimize(expr: Expr) -> Self {
        Self {
            sense: ObjectiveSense::Minimize,
            expr,
            nonlinear: None,
        }
    }

    pub fn maximize(expr: Expr) -> Self {
        Self {
            sense: ObjectiveSense::Maximize,
            expr,
            nonlinear: None,
        }
    }

    pub fn eval(&self, values: &[f64]) -> f64 {
        self.expr.eval(values) + self.nonlinear.as_ref().map_or(0.0, |nl| nl.eval(values))
    }
}

/// Variables, constraints and one objective.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Program {
    variables: Vec<Variable>,
    constraints: Vec<Constraint>,
    objective: Objective,
}

impl Program {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_variable(&mut self, name: impl Into<String>, lb: f64, ub: f64) -> VarId {
        self.variables.push(Variable {
            name: name.into(),
            lb,
            ub,
            binary: false,
        });
        VarId(self.variables.len() - 1)
    }

    pub fn add_binary(&mut self, name: impl Into<String>) -> VarId {
        self.variables.push(Variable {
            name: name.into(),
            lb: 0.0,
            ub: 1.0,
            binary: true,
        });
        VarId(self.variables.len() - 1)
    }

    pub fn variable(&self, v: VarId) -> &Variable {
        &self.variables[v.0]
    }

    pub fn variables(&self) -> &[Variable] {
        &self.variables
    }

    pub fn bounds(&self, v: VarId) -> (f64, f64) {
        let var = &self.variables[v.0];
        (var.lb, var.ub)
    }

    pub fn set_bounds(&mut self, v: VarId, lb: f64, ub: f64) {
        let var = &mut self.variables[v.0];
        var.lb = lb;
        var.ub = ub;
    }

    pub fn add_constraint(&mut self, name: impl Into<String>, kind: ConstraintKind) -> ConstraintId {
        self.constraints.push(Constraint {
            name: name.into(),
            kind,
        });
        ConstraintId(self.constraints.len() - 1)
    }

    /// Add `expr (sense) rhs`, routing to the linear or quadratic kind.
    pub fn add_row(
        &mut self,
        name: impl Into<String>,
        expr: Expr,
        sense: Sense,
        rhs: f64,
    ) -> ConstraintId {
        let kind = if expr.is_linear() {
            ConstraintKind::Linear { expr, sense, rhs }
        } else {
            ConstraintKind::Quadratic { expr, sense, rhs }
        };
        self.add_constraint(name, kind)
    }

    pub fn constraints(&self) -> &[Constraint] {
        &self.constraints
    }

    pub fn constraint(&self, id: ConstraintId) -> &Constraint {
        &self.constraints[id.0]
    }

    pub fn num_variables(&self) -> usize {
        self.variables.len()
    }

    pub fn num_constraints(&self) -> usize {
        self.constraints.len()
    }

    pub fn objective(&self) -> &Objective {
        &self.objective
    }

    pub fn set_objective(&mut self, objective: Objective) {
        self.objective = objective;
    }

    pub fn problem_class(&self) -> ProblemClass {
        if self.variables.iter().any(|v| v.binary) {
            return ProblemClass::MixedInteger;
        }
        let nonlinear_rows = self.constraints.iter().any(|c| {
            matches!(
                c.kind,
                ConstraintKind::Quadratic { .. } | ConstraintKind::Nonlinear { .. }
            )
        });
        if nonlinear_rows || self.objective.nonlinear.is_some() {
            return ProblemClass::NonlinearProgram;
        }
        let cones = self.constraints.iter().any(|c| {
            matches!(
                c.kind,
                ConstraintKind::SecondOrderCone { .. } | ConstraintKind::RotatedCone { .. }
            )
        });
        if cones || !self.objective.expr.is_linear() {
            ProblemClass::ConicProgram
        } else {
            ProblemClass::LinearProgram
        }
    }

    /// Largest bound or constraint violation at `values`.
    pub fn max_violation(&self, values: &[f64]) -> f64 {
        let bounds = self
            .variables
            .iter()
            .zip(values)
            .map(|(v, x)| (v.lb - x).max(x - v.ub).max(0.0));
        let rows = self.constraints.iter().map(|c| c.violation(values));
        bounds.chain(rows).fold(0.0, f64::max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_problem_class_escalates() {
        let mut p = Program::new();
        let x = p.add_variable("x", 0.0, 1.0);
        let y = p.add_variable("y", 0.0, 1.0);
        p.add_row("lin", Expr::var(x) + Expr::var(y), Sense::LessEqual, 1.0);
        assert_eq!(p.problem_class(), ProblemClass::LinearProgram);

        p.add_constraint(
            "cone",
            ConstraintKind::SecondOrderCone {
                t: Expr::var(y),
                xs: vec![Expr::var(x)],
            },
        );
        assert_eq!(p.problem_class(), ProblemClass::ConicProgram);

        p.add_row("bilinear", Expr::zero().with_quad(1.0, x, y), Sense::Equal, 0.5);
        assert_eq!(p.problem_class(), ProblemClass::NonlinearProgram);

        p.add_binary("z");
        assert_eq!(p.problem_class(), ProblemClass::MixedInteger);
    }

    #[test]
    fn test_rotated_cone_violation() {
        let c = Constraint {
            name: "rc".into(),
            kind: ConstraintKind::RotatedCone {
                a: Expr::var(VarId(0)),
                b: Expr::constant(1.0),
                xs: vec![Expr::var(VarId(1))],
            },
        };
        assert_eq!(c.violation(&[4.0, 2.0]), 0.0);
        assert!((c.violation(&[1.0, 2.0]) - 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_max_violation_includes_bounds() {
        let mut p = Program::new();
        let x = p.add_variable("x", 0.0, 1.0);
        p.add_row("x>=0.5", Expr::var(x), Sense::GreaterEqual, 0.5);
        assert_eq!(p.max_violation(&[0.7]), 0.0);
        assert!((p.max_violation(&[1.5]) - 0.5).abs() < 1e-12);
        assert!((p.max_violation(&[0.2]) - 0.3).abs() < 1e-12);
    }
}
