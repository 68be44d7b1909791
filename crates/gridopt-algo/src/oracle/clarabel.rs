//! Clarabel-backed oracle for linear and conic programs.
//!
//! Clarabel solves
//!
//! ```text
//!   minimize    (1/2)x'Px + q'x
//!   subject to  Ax + s = b
//!               s ∈ K
//! ```
//!
//! with `K` a product of cones. A [`Program`] maps onto it row block by row
//! block:
//!
//! | Program item                   | Rows                       | Cone            |
//! |--------------------------------|----------------------------|-----------------|
//! | `a'x + c == r`                 | `a'x + s = r - c`          | zero            |
//! | `a'x + c <= r` / `>=`          | `±a'x + s = ±(r - c)`      | nonnegative     |
//! | finite variable bounds         | `±x + s = ±bound`          | nonnegative     |
//! | `‖xs‖ <= t`                    | `s = (t, xs)`              | SOC(n + 1)      |
//! | `Σ xs² <= a b`                 | `s = (a + b, 2xs, a - b)`  | SOC(n + 2)      |
//!
//! Binary variables are rejected unless the oracle is built with
//! [`ClarabelOracle::relaxing_integrality`], in which case they are solved
//! as continuous `[0, 1]` variables.

use std::collections::BTreeMap;

use clarabel::algebra::CscMatrix;
use clarabel::solver::{
    DefaultSettingsBuilder, DefaultSolver, IPSolver, SolverStatus, SupportedConeT,
};
use gridopt_core::{GridError, GridResult};
use tracing::{debug, warn};
use web_time::Instant;

use super::{check_supported, OracleOutput, SolveOracle, SolveStatus, SolverConfig};
use crate::program::{ConstraintKind, Expr, ObjectiveSense, ProblemClass, Program, Sense};

const CLASSES: &[ProblemClass] = &[ProblemClass::LinearProgram, ProblemClass::ConicProgram];
const CLASSES_RELAXED: &[ProblemClass] = &[
    ProblemClass::LinearProgram,
    ProblemClass::ConicProgram,
    ProblemClass::MixedInteger,
];

#[derive(Debug, Clone, Default)]
pub struct ClarabelOracle {
    relax_integrality: bool,
}

impl ClarabelOracle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept mixed-integer programs by solving their continuous relaxation.
    pub fn relaxing_integrality() -> Self {
        Self {
            relax_integrality: true,
        }
    }
}

/// One row `coeffs · x + s = rhs`.
struct Row {
    coeffs: Vec<(usize, f64)>,
    rhs: f64,
}

impl Row {
    /// Row for `sign * (expr - target)` moved into `a'x + s = b` form.
    fn from_expr(expr: &Expr, sign: f64, target: f64) -> Self {
        Row {
            coeffs: expr.linear.iter().map(|(v, c)| (v.0, sign * c)).collect(),
            rhs: sign * (target - expr.constant),
        }
    }

    /// Cone row `s = expr`, i.e. `-a'x + s = c`.
    fn cone_entry(expr: &Expr) -> Self {
        Row {
            coeffs: expr.linear.iter().map(|(v, c)| (v.0, -c)).collect(),
            rhs: expr.constant,
        }
    }
}

/// Program in Clarabel's standard form.
struct StandardForm {
    p: CscMatrix<f64>,
    q: Vec<f64>,
    a: CscMatrix<f64>,
    b: Vec<f64>,
    cones: Vec<SupportedConeT<f64>>,
    objective_constant: f64,
    sign: f64,
}

fn csc_from_columns(m: usize, columns: Vec<BTreeMap<usize, f64>>) -> CscMatrix<f64> {
    let n = columns.len();
    let mut colptr = Vec::with_capacity(n + 1);
    let mut rowval = Vec::new();
    let mut nzval = Vec::new();
    for column in columns {
        colptr.push(rowval.len());
        for (r, v) in column {
            if v != 0.0 {
                rowval.push(r);
                nzval.push(v);
            }
        }
    }
    colptr.push(rowval.len());
    CscMatrix::new(m, n, colptr, rowval, nzval)
}

fn ensure_affine(name: &str, exprs: &[&Expr]) -> GridResult<()> {
    if exprs.iter().all(|e| e.is_linear()) {
        Ok(())
    } else {
        Err(GridError::SolveFailure(format!(
            "cone '{name}' has non-affine entries"
        )))
    }
}

impl StandardForm {
    fn build(program: &Program) -> GridResult<Self> {
        let n = program.num_variables();
        let mut zero_rows = Vec::new();
        let mut nonneg_rows = Vec::new();
        let mut cone_blocks: Vec<Vec<Row>> = Vec::new();

        for (j, var) in program.variables().iter().enumerate() {
            if var.lb == var.ub {
                zero_rows.push(Row {
                    coeffs: vec![(j, 1.0)],
                    rhs: var.lb,
                });
                continue;
            }
            if var.ub.is_finite() {
                nonneg_rows.push(Row {
                    coeffs: vec![(j, 1.0)],
                    rhs: var.ub,
                });
            }
            if var.lb.is_finite() {
                nonneg_rows.push(Row {
                    coeffs: vec![(j, -1.0)],
                    rhs: -var.lb,
                });
            }
        }

        for c in program.constraints() {
            match &c.kind {
                ConstraintKind::Linear { expr, sense, rhs } => match sense {
                    Sense::Equal => zero_rows.push(Row::from_expr(expr, 1.0, *rhs)),
                    Sense::LessEqual => nonneg_rows.push(Row::from_expr(expr, 1.0, *rhs)),
                    Sense::GreaterEqual => nonneg_rows.push(Row::from_expr(expr, -1.0, *rhs)),
                },
                ConstraintKind::SecondOrderCone { t, xs } => {
                    let mut refs = vec![t];
                    refs.extend(xs.iter());
                    ensure_affine(&c.name, &refs)?;
                    cone_blocks.push(refs.into_iter().map(Row::cone_entry).collect());
                }
                ConstraintKind::RotatedCone { a, b, xs } => {
                    let mut refs = vec![a, b];
                    refs.extend(xs.iter());
                    ensure_affine(&c.name, &refs)?;
                    let mut block = vec![Row::cone_entry(&(a.clone() + b.clone()))];
                    block.extend(xs.iter().map(|x| Row::cone_entry(&(x.clone() * 2.0))));
                    block.push(Row::cone_entry(&(a.clone() - b.clone())));
                    cone_blocks.push(block);
                }
                ConstraintKind::Quadratic { .. } | ConstraintKind::Nonlinear { .. } => {
                    return Err(GridError::SolveFailure(format!(
                        "constraint '{}' is not conic-representable",
                        c.name
                    )));
                }
            }
        }

        let mut cones = Vec::new();
        if !zero_rows.is_empty() {
            cones.push(SupportedConeT::ZeroConeT(zero_rows.len()));
        }
        if !nonneg_rows.is_empty() {
            cones.push(SupportedConeT::NonnegativeConeT(nonneg_rows.len()));
        }
        for block in &cone_blocks {
            cones.push(SupportedConeT::SecondOrderConeT(block.len()));
        }

        let rows: Vec<Row> = zero_rows
            .into_iter()
            .chain(nonneg_rows)
            .chain(cone_blocks.into_iter().flatten())
            .collect();
        let m = rows.len();
        let mut a_columns: Vec<BTreeMap<usize, f64>> = vec![BTreeMap::new(); n];
        let mut b = Vec::with_capacity(m);
        for (r, row) in rows.into_iter().enumerate() {
            for (j, v) in row.coeffs {
                *a_columns[j].entry(r).or_insert(0.0) += v;
            }
            b.push(row.rhs);
        }

        let objective = program.objective();
        let sign = match objective.sense {
            ObjectiveSense::Minimize => 1.0,
            ObjectiveSense::Maximize => -1.0,
        };
        let mut q = vec![0.0; n];
        for (v, c) in &objective.expr.linear {
            q[v.0] += sign * c;
        }
        // P is upper triangular; x_i^2 enters as P_ii = 2c because of the 1/2.
        let mut p_columns: Vec<BTreeMap<usize, f64>> = vec![BTreeMap::new(); n];
        for ((i, j), c) in &objective.expr.quadratic {
            let (row, col) = if i.0 <= j.0 { (i.0, j.0) } else { (j.0, i.0) };
            let value = if row == col { 2.0 * c } else { *c };
            *p_columns[col].entry(row).or_insert(0.0) += sign * value;
        }

        let finite = b.iter().chain(q.iter()).all(|x| x.is_finite())
            && a_columns
                .iter()
                .chain(p_columns.iter())
                .all(|col| col.values().all(|x| x.is_finite()));
        if !finite {
            return Err(GridError::NumericDegeneracy(
                "non-finite coefficient in conic standard form".into(),
            ));
        }

        Ok(StandardForm {
            p: csc_from_columns(n, p_columns),
            q,
            a: csc_from_columns(m, a_columns),
            b,
            cones,
            objective_constant: objective.expr.constant,
            sign,
        })
    }
}

fn map_status(status: SolverStatus) -> SolveStatus {
    match status {
        SolverStatus::Solved => SolveStatus::Optimal,
        SolverStatus::AlmostSolved => SolveStatus::AlmostOptimal,
        SolverStatus::PrimalInfeasible | SolverStatus::AlmostPrimalInfeasible => {
            SolveStatus::Infeasible
        }
        SolverStatus::DualInfeasible | SolverStatus::AlmostDualInfeasible => {
            SolveStatus::Unbounded
        }
        SolverStatus::MaxIterations => SolveStatus::IterationLimit,
        SolverStatus::MaxTime => SolveStatus::TimeLimit,
        SolverStatus::NumericalError | SolverStatus::InsufficientProgress => {
            SolveStatus::NumericalError
        }
        _ => SolveStatus::Error,
    }
}

impl SolveOracle for ClarabelOracle {
    fn id(&self) -> &str {
        "clarabel"
    }

    fn supported_classes(&self) -> &[ProblemClass] {
        if self.relax_integrality {
            CLASSES_RELAXED
        } else {
            CLASSES
        }
    }

    fn solve(&self, program: &Program, config: &SolverConfig) -> GridResult<OracleOutput> {
        check_supported(self, program)?;
        if program.problem_class() == ProblemClass::MixedInteger {
            warn!(
                binaries = program.variables().iter().filter(|v| v.binary).count(),
                "solving continuous relaxation of a mixed-integer program"
            );
        }
        let start = Instant::now();
        let form = StandardForm::build(program)?;
        debug!(
            vars = program.num_variables(),
            rows = form.b.len(),
            cones = form.cones.len(),
            "assembled conic standard form"
        );

        let settings = DefaultSettingsBuilder::default()
            .verbose(config.verbose)
            .max_iter(config.max_iterations)
            .time_limit(config.time_limit)
            .tol_gap_abs(config.tolerance)
            .tol_gap_rel(config.tolerance)
            .build()
            .map_err(|e| GridError::SolveFailure(format!("Clarabel settings error: {e:?}")))?;

        let mut solver = DefaultSolver::new(
            &form.p, &form.q, &form.a, &form.b, &form.cones, settings,
        )
        .map_err(|e| GridError::SolveFailure(format!("Clarabel initialization failed: {e:?}")))?;

        solver.solve();

        let sol = &solver.solution;
        let status = map_status(sol.status);
        let solve_time = start.elapsed().as_secs_f64();
        if !status.is_success() {
            debug!(status = ?sol.status, "clarabel did not converge");
            return Ok(OracleOutput {
                iterations: sol.iterations,
                ..OracleOutput::failed(status, solve_time)
            });
        }
        Ok(OracleOutput {
            status,
            objective: form.sign * sol.obj_val + form.objective_constant,
            objective_lower_bound: form.sign * sol.obj_val_dual + form.objective_constant,
            values: sol.x.clone(),
            solve_time,
            iterations: sol.iterations,
        })
    }
}
