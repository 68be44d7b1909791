//! Optimization-based bound tightening.
//!
//! Each pass rebuilds the relaxation (`obbt.model`, QCWR by default) from the
//! current data, then minimizes and maximizes every target over a private
//! copy of the relaxation program:
//!
//! | Target            | Variable | Written back to                      |
//! |-------------------|----------|--------------------------------------|
//! | bus magnitude     | `vm[i]`  | bus `vmin` / `vmax`                  |
//! | pair angle diff.  | `td[i,j]`| `angmin` / `angmax` of every member  |
//!
//! Sub-solves of one pass are independent and run in parallel with the
//! `parallel` feature; tightened bounds are merged only after the pass.
//! After every pass the termination checks run in this order: relative gap
//! to `upper_bound`, width improvement, iteration cap, time limit.

use std::collections::BTreeMap;
use std::fmt;

#[cfg(feature = "parallel")]
use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, info, warn};
use web_time::Instant;

use gridopt_core::{BusPairKey, GridError, GridResult, NetworkData, ReferenceModel};

use crate::model::{GenericModel, VarIndex};
use crate::oracle::{check_supported, OracleOutput, SolveOracle, SolverConfig};
use crate::problems::{build_opf, instantiate_model};
use crate::program::{ConstraintKind, Expr, Objective, Program, Sense, VarId};
use crate::settings::{ObbtSettings, Settings, TerminationCriterion};

/// Why the algorithm stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ObbtTermination {
    Converged,
    MaxIter,
    TimeLimit,
    RelGap,
}

impl fmt::Display for ObbtTermination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObbtTermination::Converged => write!(f, "CONVERGED"),
            ObbtTermination::MaxIter => write!(f, "MAX_ITER"),
            ObbtTermination::TimeLimit => write!(f, "TIME_LIMIT"),
            ObbtTermination::RelGap => write!(f, "REL_GAP"),
        }
    }
}

/// Quantity whose bounds are tightened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BoundTarget {
    Voltage(usize),
    AngleDifference(BusPairKey),
}

impl BoundTarget {
    fn var(&self, model: &GenericModel) -> GridResult<VarId> {
        match *self {
            BoundTarget::Voltage(i) => model.var("vm", VarIndex::Bus(i)),
            BoundTarget::AngleDifference(key) => model.var("td", VarIndex::BusPair(key)),
        }
    }
}

impl fmt::Display for BoundTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BoundTarget::Voltage(i) => write!(f, "vm[{i}]"),
            BoundTarget::AngleDifference((i, j)) => write!(f, "td[{i},{j}]"),
        }
    }
}

/// Initial and final interval of one target.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TargetWidth {
    pub target: String,
    pub initial: (f64, f64),
    #[serde(rename = "final")]
    pub final_: (f64, f64),
}

/// Run statistics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ObbtStats {
    /// NaN when the relaxation did not solve.
    pub initial_relaxation_objective: f64,
    pub final_relaxation_objective: f64,
    pub vm_range_init: f64,
    pub vm_range_final: f64,
    pub avg_vm_range_init: f64,
    pub avg_vm_range_final: f64,
    pub td_range_init: f64,
    pub td_range_final: f64,
    pub avg_td_range_init: f64,
    pub avg_td_range_final: f64,
    pub widths: Vec<TargetWidth>,
    /// Seconds per pass.
    pub pass_times: Vec<f64>,
    pub iteration_count: usize,
    pub run_time: f64,
    pub failed_solves: usize,
    pub termination: ObbtTermination,
    /// Bus pairs whose final angle interval excludes zero.
    pub vad_sign_determined: usize,
    pub initial_rel_gap_from_ub: Option<f64>,
    pub final_rel_gap_from_ub: Option<f64>,
}

impl ObbtStats {
    pub fn to_json_string(&self) -> GridResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Tightened data plus statistics.
#[derive(Debug, Clone)]
pub struct ObbtOutput {
    pub data: NetworkData,
    pub stats: ObbtStats,
}

type Bounds = BTreeMap<BoundTarget, (f64, f64)>;

/// Outward rounding to `digits` decimals.
fn round_down(x: f64, digits: u32) -> f64 {
    let scale = 10f64.powi(digits as i32);
    (x * scale).floor() / scale
}

fn round_up(x: f64, digits: u32) -> f64 {
    let scale = 10f64.powi(digits as i32);
    (x * scale).ceil() / scale
}

fn rel_gap(upper_bound: Option<f64>, objective: f64) -> Option<f64> {
    let ub = upper_bound?;
    if !objective.is_finite() || ub == 0.0 {
        return None;
    }
    Some((ub - objective) / ub.abs())
}

/// Sum and mean of interval widths for one kind of target.
fn range_summary(bounds: &Bounds, voltage: bool) -> (f64, f64) {
    let widths: Vec<f64> = bounds
        .iter()
        .filter(|(t, _)| matches!(t, BoundTarget::Voltage(_)) == voltage)
        .map(|(_, (lb, ub))| ub - lb)
        .collect();
    let total: f64 = widths.iter().sum();
    let avg = if widths.is_empty() { 0.0 } else { total / widths.len() as f64 };
    (total, avg)
}

fn collect_bounds(model: &GenericModel) -> GridResult<Bounds> {
    let reference = model.reference();
    if !model.has_var_group("vm") || !model.has_var_group("td") {
        return Err(GridError::unsupported(
            "obbt targets (vm, td)",
            model.formulation().name(),
        ));
    }
    let mut bounds = Bounds::new();
    let targets = reference
        .bus
        .keys()
        .map(|i| BoundTarget::Voltage(*i))
        .chain(reference.buspairs.keys().map(|k| BoundTarget::AngleDifference(*k)));
    for target in targets {
        let var = target.var(model)?;
        bounds.insert(target, model.program().bounds(var));
    }
    Ok(bounds)
}

/// Copy of `program` with `objective <= upper_bound` appended.
///
/// Separable convex quadratic objectives become a rotated cone so the copy
/// stays conic.
fn with_objective_cutoff(program: &Program, upper_bound: f64) -> Program {
    let mut copy = program.clone();
    let objective = program.objective();
    if objective.nonlinear.is_some() {
        warn!("objective has nonlinear terms, cutoff row skipped");
        return copy;
    }
    let expr = &objective.expr;
    let separable = expr
        .quadratic
        .iter()
        .all(|((a, b), c)| a == b && *c >= 0.0);
    if expr.is_linear() || !separable {
        copy.add_row("objective_cutoff", expr.clone(), Sense::LessEqual, upper_bound);
        return copy;
    }
    let mut slack = Expr::constant(upper_bound - expr.constant);
    for (v, c) in &expr.linear {
        slack.add_term(-c, *v);
    }
    let xs = expr
        .quadratic
        .iter()
        .map(|((v, _), c)| Expr::term(c.sqrt(), *v))
        .collect();
    copy.add_constraint(
        "objective_cutoff",
        ConstraintKind::RotatedCone {
            a: slack,
            b: Expr::constant(1.0),
            xs,
        },
    );
    copy
}

/// Result of the two sub-solves for one target.
struct TargetOutcome {
    target: BoundTarget,
    lower: Option<f64>,
    upper: Option<f64>,
    failures: usize,
}

fn solve_bound(
    base: &Program,
    var: VarId,
    maximize: bool,
    oracle: &dyn SolveOracle,
    config: &SolverConfig,
) -> Option<f64> {
    let mut program = base.clone();
    let objective = if maximize {
        Objective::maximize(Expr::var(var))
    } else {
        Objective::minimize(Expr::var(var))
    };
    program.set_objective(objective);
    match oracle.solve(&program, config) {
        Ok(OracleOutput { status, objective, .. }) if status.is_success() && objective.is_finite() => {
            Some(objective)
        }
        Ok(output) => {
            debug!(status = %output.status, maximize, "bound sub-solve failed");
            None
        }
        Err(err) => {
            debug!(error = %err, maximize, "bound sub-solve rejected");
            None
        }
    }
}

fn tighten_target(
    base: &Program,
    target: BoundTarget,
    var: VarId,
    oracle: &dyn SolveOracle,
    config: &SolverConfig,
) -> TargetOutcome {
    let lower = solve_bound(base, var, false, oracle, config);
    let upper = solve_bound(base, var, true, oracle, config);
    let failures = usize::from(lower.is_none()) + usize::from(upper.is_none());
    if failures > 0 {
        warn!(%target, failures, "bound sub-solve failed, keeping previous bound");
    }
    TargetOutcome {
        target,
        lower,
        upper,
        failures,
    }
}

/// One pass over every target wider than `min_bound_width`.
///
/// Returns the merged bounds, the number of failed sub-solves and the
/// relative width improvement according to `settings.termination`.
fn tighten_pass(
    model: &GenericModel,
    bounds: &Bounds,
    oracle: &dyn SolveOracle,
    settings: &Settings,
) -> GridResult<(Bounds, usize, f64)> {
    let obbt = &settings.obbt;
    let base = match (obbt.upper_bound_constraint, obbt.upper_bound) {
        (true, Some(ub)) => with_objective_cutoff(model.program(), ub),
        _ => model.program().clone(),
    };

    let mut work = Vec::new();
    for (target, (lb, ub)) in bounds {
        if ub - lb < obbt.min_bound_width {
            continue;
        }
        work.push((*target, target.var(model)?));
    }
    debug!(targets = work.len(), skipped = bounds.len() - work.len(), "obbt pass");

    let config = &settings.solver;
    #[cfg(feature = "parallel")]
    let outcomes: Vec<TargetOutcome> = work
        .par_iter()
        .map(|(target, var)| tighten_target(&base, *target, *var, oracle, config))
        .collect();
    #[cfg(not(feature = "parallel"))]
    let outcomes: Vec<TargetOutcome> = work
        .iter()
        .map(|(target, var)| tighten_target(&base, *target, *var, oracle, config))
        .collect();

    let mut merged = bounds.clone();
    let mut failures = 0;
    let mut improvements = Vec::with_capacity(outcomes.len());
    for outcome in outcomes {
        failures += outcome.failures;
        let Some((lb, ub)) = merged.get_mut(&outcome.target) else {
            continue;
        };
        let old_width = *ub - *lb;
        if let Some(value) = outcome.lower {
            let candidate = round_down(value, obbt.precision);
            if candidate > *lb && candidate <= *ub {
                *lb = candidate;
            }
        }
        if let Some(value) = outcome.upper {
            let candidate = round_up(value, obbt.precision);
            if candidate < *ub && candidate >= *lb {
                *ub = candidate;
            }
        }
        if old_width > 0.0 {
            improvements.push((old_width - (*ub - *lb)) / old_width);
        }
    }

    let improvement = match obbt.termination {
        TerminationCriterion::Avg if !improvements.is_empty() => {
            improvements.iter().sum::<f64>() / improvements.len() as f64
        }
        TerminationCriterion::Max => improvements.iter().copied().fold(0.0, f64::max),
        TerminationCriterion::Avg => 0.0,
    };
    Ok((merged, failures, improvement))
}

/// Write target bounds into a copy of `data`.
fn apply_bounds(data: &NetworkData, reference: &ReferenceModel, bounds: &Bounds) -> NetworkData {
    let mut updated = data.clone();
    for (target, (lb, ub)) in bounds {
        match *target {
            BoundTarget::Voltage(i) => {
                let Some(bus) = reference.keys.bus.get(&i).and_then(|id| updated.bus.get_mut(id)) else {
                    continue;
                };
                bus.vmin = *lb;
                bus.vmax = *ub;
            }
            BoundTarget::AngleDifference(key) => {
                let Some(pair) = reference.buspairs.get(&key) else {
                    continue;
                };
                for l in &pair.branches {
                    let Some(branch) = reference
                        .keys
                        .branch
                        .get(l)
                        .and_then(|id| updated.branch.get_mut(id))
                    else {
                        continue;
                    };
                    // pair bounds are on va[lo] - va[hi]
                    if branch.f_bus == key.0 {
                        branch.angmin = *lb;
                        branch.angmax = *ub;
                    } else {
                        branch.angmin = -*ub;
                        branch.angmax = -*lb;
                    }
                }
            }
        }
    }
    updated
}

fn relaxation_objective(
    model: &GenericModel,
    oracle: &dyn SolveOracle,
    config: &SolverConfig,
) -> GridResult<f64> {
    let output = oracle.solve(model.program(), config)?;
    if output.status.is_success() {
        Ok(output.objective)
    } else {
        warn!(status = %output.status, "relaxation did not solve");
        Ok(f64::NAN)
    }
}

fn build_relaxation(data: &NetworkData, obbt: &ObbtSettings) -> GridResult<GenericModel> {
    instantiate_model(data, obbt.model.clone(), build_opf)
}

/// Tighten voltage-magnitude and angle-difference bounds of `data`.
///
/// Settings are validated before anything is built. Only a relaxation that
/// cannot be built or an oracle that cannot attempt it is fatal; failed
/// sub-solves keep their previous bound and are counted.
pub fn run_obbt(
    data: &NetworkData,
    oracle: &dyn SolveOracle,
    settings: &Settings,
) -> GridResult<ObbtOutput> {
    let obbt = &settings.obbt;
    obbt.validate()?;
    let start = Instant::now();

    let mut current = data.clone();
    let mut model = build_relaxation(&current, obbt)?;
    check_supported(oracle, model.program())?;
    let initial_bounds = collect_bounds(&model)?;
    let initial_objective = relaxation_objective(&model, oracle, &settings.solver)?;
    info!(
        case = %model.reference().name,
        formulation = %model.formulation(),
        targets = initial_bounds.len(),
        objective = initial_objective,
        "obbt started"
    );

    let mut bounds = initial_bounds.clone();
    let mut final_objective;
    let mut iteration = 0;
    let mut failed_solves = 0;
    let mut pass_times = Vec::new();

    let termination = loop {
        iteration += 1;
        let pass_start = Instant::now();
        let (tightened, failures, improvement) = tighten_pass(&model, &bounds, oracle, settings)?;
        failed_solves += failures;
        current = apply_bounds(&current, model.reference(), &tightened);
        bounds = tightened;

        model = build_relaxation(&current, obbt)?;
        final_objective = relaxation_objective(&model, oracle, &settings.solver)?;
        pass_times.push(pass_start.elapsed().as_secs_f64());
        info!(
            iteration,
            improvement,
            failures,
            objective = final_objective,
            "obbt pass finished"
        );

        if obbt.rel_gap_tol.is_finite()
            && rel_gap(obbt.upper_bound, final_objective).is_some_and(|gap| gap <= obbt.rel_gap_tol)
        {
            break ObbtTermination::RelGap;
        }
        if improvement <= obbt.improvement_tol {
            break ObbtTermination::Converged;
        }
        if iteration >= obbt.max_iter {
            break ObbtTermination::MaxIter;
        }
        if start.elapsed().as_secs_f64() >= obbt.time_limit {
            break ObbtTermination::TimeLimit;
        }
    };

    let (vm_range_init, avg_vm_range_init) = range_summary(&initial_bounds, true);
    let (vm_range_final, avg_vm_range_final) = range_summary(&bounds, true);
    let (td_range_init, avg_td_range_init) = range_summary(&initial_bounds, false);
    let (td_range_final, avg_td_range_final) = range_summary(&bounds, false);
    let vad_sign_determined = bounds
        .iter()
        .filter(|(t, (lb, ub))| {
            matches!(t, BoundTarget::AngleDifference(_)) && (*lb > 0.0 || *ub < 0.0)
        })
        .count();
    let widths = initial_bounds
        .iter()
        .map(|(target, initial)| TargetWidth {
            target: target.to_string(),
            initial: *initial,
            final_: bounds.get(target).copied().unwrap_or(*initial),
        })
        .collect();

    let stats = ObbtStats {
        initial_relaxation_objective: initial_objective,
        final_relaxation_objective: final_objective,
        vm_range_init,
        vm_range_final,
        avg_vm_range_init,
        avg_vm_range_final,
        td_range_init,
        td_range_final,
        avg_td_range_init,
        avg_td_range_final,
        widths,
        pass_times,
        iteration_count: iteration,
        run_time: start.elapsed().as_secs_f64(),
        failed_solves,
        termination,
        vad_sign_determined,
        initial_rel_gap_from_ub: rel_gap(obbt.upper_bound, initial_objective),
        final_rel_gap_from_ub: rel_gap(obbt.upper_bound, final_objective),
    };
    info!(
        %termination,
        iterations = iteration,
        failed_solves,
        vm_range_init,
        vm_range_final,
        td_range_init,
        td_range_final,
        "obbt finished"
    );
    Ok(ObbtOutput { data: current, stats })
}
