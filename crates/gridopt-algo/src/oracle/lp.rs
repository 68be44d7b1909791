//! good_lp-backed oracle for linear (and, with HiGHS, mixed-integer linear)
//! programs.
//!
//! The program is replayed into a good_lp model: one good_lp variable per
//! program variable, `constraint!` rows for every linear row. With the
//! `solver-highs` feature HiGHS handles binaries; otherwise the pure-Rust
//! Clarabel backend of good_lp is used and only continuous LPs are accepted.

use gridopt_core::{GridError, GridResult};
#[cfg(any(feature = "solver-clarabel", feature = "solver-highs"))]
use good_lp::{
    constraint, variable, variables, Expression, ResolutionError, Solution, Solver, SolverModel,
};
#[cfg(any(feature = "solver-clarabel", feature = "solver-highs"))]
use tracing::debug;
#[cfg(any(feature = "solver-clarabel", feature = "solver-highs"))]
use web_time::Instant;

use super::{check_supported, OracleOutput, SolveOracle, SolverConfig};
#[cfg(any(feature = "solver-clarabel", feature = "solver-highs"))]
use super::SolveStatus;
use crate::program::{ConstraintKind, ProblemClass, Program};
#[cfg(any(feature = "solver-clarabel", feature = "solver-highs"))]
use crate::program::{Expr, ObjectiveSense, Sense};

#[cfg(feature = "solver-highs")]
const CLASSES: &[ProblemClass] = &[ProblemClass::LinearProgram, ProblemClass::MixedInteger];
#[cfg(not(feature = "solver-highs"))]
const CLASSES: &[ProblemClass] = &[ProblemClass::LinearProgram];

#[derive(Debug, Clone, Default)]
pub struct GoodLpOracle;

impl GoodLpOracle {
    pub fn new() -> Self {
        Self
    }
}

fn ensure_linear(program: &Program) -> GridResult<()> {
    let rows_linear = program
        .constraints()
        .iter()
        .all(|c| matches!(c.kind, ConstraintKind::Linear { .. }));
    let objective = program.objective();
    if rows_linear && objective.expr.is_linear() && objective.nonlinear.is_none() {
        Ok(())
    } else {
        Err(GridError::SolveFailure(
            "good_lp oracle only accepts linear rows and objectives".into(),
        ))
    }
}

#[cfg(any(feature = "solver-clarabel", feature = "solver-highs"))]
fn to_expression(expr: &Expr, vars: &[good_lp::Variable]) -> Expression {
    let mut e = Expression::from(expr.constant);
    for (v, c) in &expr.linear {
        e += *c * vars[v.0];
    }
    e
}

#[cfg(any(feature = "solver-clarabel", feature = "solver-highs"))]
fn solve_with<S>(solver: S, program: &Program) -> GridResult<OracleOutput>
where
    S: Solver,
    S::Model: SolverModel<Error = ResolutionError>,
{
    let start = Instant::now();
    let mut problem = variables!();
    let vars: Vec<good_lp::Variable> = program
        .variables()
        .iter()
        .map(|v| {
            let mut def = variable().name(v.name.clone());
            if v.binary {
                def = def.binary();
            } else {
                if v.lb.is_finite() {
                    def = def.min(v.lb);
                }
                if v.ub.is_finite() {
                    def = def.max(v.ub);
                }
            }
            problem.add(def)
        })
        .collect();

    let objective = program.objective();
    let goal = to_expression(&objective.expr, &vars);
    let unsolved = match objective.sense {
        ObjectiveSense::Minimize => problem.minimise(goal),
        ObjectiveSense::Maximize => problem.maximise(goal),
    };
    let mut model = unsolved.using(solver);
    for c in program.constraints() {
        if let ConstraintKind::Linear { expr, sense, rhs } = &c.kind {
            let lhs = to_expression(expr, &vars);
            model = match sense {
                Sense::Equal => model.with(constraint!(lhs == *rhs)),
                Sense::LessEqual => model.with(constraint!(lhs <= *rhs)),
                Sense::GreaterEqual => model.with(constraint!(lhs >= *rhs)),
            };
        }
    }

    match model.solve() {
        Ok(solution) => {
            let values: Vec<f64> = vars.iter().map(|v| solution.value(*v)).collect();
            let objective = program.objective().eval(&values);
            Ok(OracleOutput {
                status: SolveStatus::Optimal,
                objective,
                objective_lower_bound: objective,
                values,
                solve_time: start.elapsed().as_secs_f64(),
                iterations: 0,
            })
        }
        Err(err) => {
            debug!(error = %err, "good_lp solve failed");
            let status = match err {
                ResolutionError::Infeasible => SolveStatus::Infeasible,
                ResolutionError::Unbounded => SolveStatus::Unbounded,
                _ => SolveStatus::Error,
            };
            Ok(OracleOutput::failed(status, start.elapsed().as_secs_f64()))
        }
    }
}

impl SolveOracle for GoodLpOracle {
    fn id(&self) -> &str {
        "good_lp"
    }

    fn supported_classes(&self) -> &[ProblemClass] {
        CLASSES
    }

    fn is_available(&self) -> bool {
        cfg!(any(feature = "solver-clarabel", feature = "solver-highs"))
    }

    fn solve(&self, program: &Program, _config: &SolverConfig) -> GridResult<OracleOutput> {
        check_supported(self, program)?;
        ensure_linear(program)?;

        #[cfg(feature = "solver-highs")]
        return solve_with(good_lp::solvers::highs::highs, program);

        #[cfg(all(feature = "solver-clarabel", not(feature = "solver-highs")))]
        return solve_with(good_lp::solvers::clarabel::clarabel, program);

        #[cfg(not(any(feature = "solver-clarabel", feature = "solver-highs")))]
        Err(GridError::SolveFailure(
            "good_lp oracle built without a solver feature".into(),
        ))
    }
}
