//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};

use gridopt_algo::program::ObjectiveSense;
use gridopt_algo::{OracleOutput, ProblemClass, Program, SolveOracle, SolveStatus, SolverConfig};
use gridopt_core::{Branch, Bus, BusType, Gen, GridResult, Load, NetworkData};

/// Route `tracing` output through the test harness (respects RUST_LOG).
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn bus(index: usize, bus_type: BusType) -> Bus {
    Bus {
        index,
        bus_type,
        ..Bus::default()
    }
}

pub fn branch(index: usize, f_bus: usize, t_bus: usize, rate_a: f64) -> Branch {
    Branch {
        index,
        f_bus,
        t_bus,
        br_x: 0.1,
        rate_a: Some(rate_a),
        ..Branch::default()
    }
}

/// Radial three-bus case: one generator at the reference bus with a linear
/// cost of 2000 per unit, 0.5 p.u. of load at each of buses 2 and 3.
pub fn three_bus() -> NetworkData {
    NetworkData::new("case3")
        .with_bus(bus(1, BusType::Reference))
        .with_bus(bus(2, BusType::Pq))
        .with_bus(bus(3, BusType::Pq))
        .with_gen(
            Gen {
                index: 1,
                gen_bus: 1,
                pmax: 2.0,
                ..Gen::default()
            }
            .with_polynomial_cost(&[0.0, 2000.0, 0.0]),
        )
        .with_branch(branch(1, 1, 2, 1.0))
        .with_branch(branch(2, 1, 3, 1.0))
        .with_load(Load {
            index: 1,
            load_bus: 2,
            pd: 0.5,
            ..Load::default()
        })
        .with_load(Load {
            index: 2,
            load_bus: 3,
            pd: 0.5,
            ..Load::default()
        })
}

/// Oracle that never looks at constraints.
///
/// Programs whose objective is a single unit-coefficient variable are
/// answered with that variable's bounds pulled inwards by `shrink` of their
/// width; anything else reports `relaxation_objective`. With `fail_bounds`
/// every such solve comes back infeasible.
pub struct ShrinkingOracle {
    pub shrink: f64,
    pub relaxation_objective: f64,
    pub fail_bounds: bool,
    pub calls: AtomicUsize,
}

impl ShrinkingOracle {
    pub fn new(shrink: f64) -> Self {
        Self {
            shrink,
            relaxation_objective: 100.0,
            fail_bounds: false,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail_bounds: true,
            ..Self::new(0.0)
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl SolveOracle for ShrinkingOracle {
    fn id(&self) -> &str {
        "shrinking"
    }

    fn supported_classes(&self) -> &[ProblemClass] {
        &[ProblemClass::LinearProgram, ProblemClass::ConicProgram]
    }

    fn solve(&self, program: &Program, _config: &SolverConfig) -> GridResult<OracleOutput> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let objective = program.objective();
        let single = match (objective.expr.linear.len(), objective.expr.quadratic.is_empty()) {
            (1, true) => objective
                .expr
                .linear
                .iter()
                .find(|(_, c)| **c == 1.0)
                .map(|(v, _)| *v),
            _ => None,
        };
        let value = match single {
            Some(_) if self.fail_bounds => {
                return Ok(OracleOutput::failed(SolveStatus::Infeasible, 0.0));
            }
            Some(v) => {
                let (lb, ub) = program.bounds(v);
                let step = self.shrink * (ub - lb);
                match objective.sense {
                    ObjectiveSense::Minimize => lb + step,
                    ObjectiveSense::Maximize => ub - step,
                }
            }
            None => self.relaxation_objective,
        };
        Ok(OracleOutput {
            status: SolveStatus::Optimal,
            objective: value,
            objective_lower_bound: value,
            values: vec![0.0; program.num_variables()],
            solve_time: 0.0,
            iterations: 1,
        })
    }
}
