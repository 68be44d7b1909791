//! Solve oracles.
//!
//! An oracle takes a finished [`Program`] and returns a status, objective and
//! variable assignment. Oracles never see formulations or network data.
//!
//! | Oracle        | Classes                 | Backend                      |
//! |---------------|-------------------------|------------------------------|
//! | `clarabel`    | LP, conic               | Clarabel interior point      |
//! | `good_lp`     | LP (+ MILP with HiGHS)  | good_lp model builder        |
//!
//! Solve outcomes (infeasible, iteration limit, ...) are reported through
//! [`SolveStatus`]; `Err` is reserved for an oracle that cannot attempt the
//! program at all.

mod clarabel;
mod lp;

pub use self::clarabel::ClarabelOracle;
pub use self::lp::GoodLpOracle;

use std::sync::Arc;

use gridopt_core::{GridError, GridResult};
use serde::{Deserialize, Serialize};

use crate::program::{ProblemClass, Program};

/// Final state reported by an oracle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SolveStatus {
    /// Globally optimal (convex programs) or optimal to tolerance.
    Optimal,
    /// Converged to reduced tolerances.
    AlmostOptimal,
    LocallyOptimal,
    Infeasible,
    Unbounded,
    IterationLimit,
    TimeLimit,
    NumericalError,
    Error,
}

impl SolveStatus {
    /// Whether the returned assignment can be trusted.
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            SolveStatus::Optimal | SolveStatus::AlmostOptimal | SolveStatus::LocallyOptimal
        )
    }
}

impl std::fmt::Display for SolveStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SolveStatus::Optimal => write!(f, "optimal"),
            SolveStatus::AlmostOptimal => write!(f, "almost_optimal"),
            SolveStatus::LocallyOptimal => write!(f, "locally_optimal"),
            SolveStatus::Infeasible => write!(f, "infeasible"),
            SolveStatus::Unbounded => write!(f, "unbounded"),
            SolveStatus::IterationLimit => write!(f, "iteration_limit"),
            SolveStatus::TimeLimit => write!(f, "time_limit"),
            SolveStatus::NumericalError => write!(f, "numerical_error"),
            SolveStatus::Error => write!(f, "error"),
        }
    }
}

/// Configuration passed to oracles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    pub max_iterations: u32,
    pub tolerance: f64,
    /// Per-solve time limit in seconds.
    pub time_limit: f64,
    pub verbose: bool,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            max_iterations: 200,
            tolerance: 1e-8,
            time_limit: 300.0,
            verbose: false,
        }
    }
}

/// What an oracle returns.
#[derive(Debug, Clone, PartialEq)]
pub struct OracleOutput {
    pub status: SolveStatus,
    /// Primal objective, NaN when unavailable.
    pub objective: f64,
    /// Best proven bound (dual objective for convex solvers), NaN when unavailable.
    pub objective_lower_bound: f64,
    /// One value per program variable; empty unless the status is a success.
    pub values: Vec<f64>,
    /// Seconds spent inside the oracle.
    pub solve_time: f64,
    pub iterations: u32,
}

impl OracleOutput {
    /// An output carrying only a failure status.
    pub fn failed(status: SolveStatus, solve_time: f64) -> Self {
        Self {
            status,
            objective: f64::NAN,
            objective_lower_bound: f64::NAN,
            values: Vec::new(),
            solve_time,
            iterations: 0,
        }
    }
}

/// Solves programs of the classes it supports.
pub trait SolveOracle: Send + Sync {
    /// Unique identifier (e.g. "clarabel")
    fn id(&self) -> &str;

    fn supported_classes(&self) -> &[ProblemClass];

    /// Runtime availability (native libraries present, license, ...).
    fn is_available(&self) -> bool {
        true
    }

    fn solve(&self, program: &Program, config: &SolverConfig) -> GridResult<OracleOutput>;
}

/// Reject programs an oracle cannot attempt.
pub(crate) fn check_supported(oracle: &dyn SolveOracle, program: &Program) -> GridResult<()> {
    if !oracle.is_available() {
        return Err(GridError::SolveFailure(format!(
            "oracle '{}' is not available",
            oracle.id()
        )));
    }
    let class = program.problem_class();
    if !oracle.supported_classes().contains(&class) {
        return Err(GridError::SolveFailure(format!(
            "oracle '{}' cannot solve {class} programs",
            oracle.id()
        )));
    }
    Ok(())
}

/// Pick the first available oracle in `candidates` that accepts `class`.
pub fn select_oracle(
    candidates: &[Arc<dyn SolveOracle>],
    class: ProblemClass,
) -> Option<Arc<dyn SolveOracle>> {
    candidates
        .iter()
        .find(|o| o.is_available() && o.supported_classes().contains(&class))
        .cloned()
}

/// Built-in oracles in preference order.
pub fn default_oracles() -> Vec<Arc<dyn SolveOracle>> {
    vec![
        Arc::new(ClarabelOracle::new()),
        Arc::new(GoodLpOracle::new()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Offline;

    impl SolveOracle for Offline {
        fn id(&self) -> &str {
            "offline"
        }
        fn supported_classes(&self) -> &[ProblemClass] {
            &[ProblemClass::LinearProgram]
        }
        fn is_available(&self) -> bool {
            false
        }
        fn solve(&self, _: &Program, _: &SolverConfig) -> GridResult<OracleOutput> {
            unimplemented!("never selected")
        }
    }

    #[test]
    fn test_status_success() {
        assert!(SolveStatus::Optimal.is_success());
        assert!(SolveStatus::AlmostOptimal.is_success());
        assert!(!SolveStatus::Infeasible.is_success());
        assert_eq!(SolveStatus::IterationLimit.to_string(), "iteration_limit");
    }

    #[test]
    fn test_select_skips_unavailable() {
        let candidates: Vec<Arc<dyn SolveOracle>> =
            vec![Arc::new(Offline), Arc::new(ClarabelOracle::new())];
        let chosen = select_oracle(&candidates, ProblemClass::LinearProgram).unwrap();
        assert_eq!(chosen.id(), "clarabel");
        assert!(select_oracle(&candidates, ProblemClass::NonlinearProgram).is_none());
    }

    #[test]
    fn test_check_supported_rejects_class() {
        let mut p = Program::new();
        p.add_binary("z");
        let err = check_supported(&ClarabelOracle::new(), &p).unwrap_err();
        assert!(matches!(err, GridError::SolveFailure(_)));
    }
}
