//! Solve results and the mapping from variable values back to data ids.

use std::collections::BTreeMap;

use serde::Serialize;

use gridopt_core::{GridResult, ReferenceModel, SolutionData};

use crate::model::{GenericModel, VarIndex};
use crate::oracle::{OracleOutput, SolveStatus};
use crate::settings::OutputSettings;

/// Size of the solved case.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CaseSummary {
    pub name: String,
    pub bus_count: usize,
    pub branch_count: usize,
}

impl CaseSummary {
    pub fn of(reference: &ReferenceModel) -> Self {
        Self {
            name: reference.name.clone(),
            bus_count: reference.bus_count(),
            branch_count: reference.branch_count(),
        }
    }
}

/// Outcome of one [`crate::problems::run_model`] call.
///
/// A failed solve is not an error: `status` says what happened and
/// `solution` is empty.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SolveResult {
    pub solver_name: String,
    pub status: SolveStatus,
    /// Seconds spent inside the oracle.
    pub solve_time: f64,
    pub objective: f64,
    pub objective_lower_bound: f64,
    pub case_summary: CaseSummary,
    pub solution: SolutionData,
}

impl SolveResult {
    pub fn from_output(
        solver_name: &str,
        model: &GenericModel,
        output: &OracleOutput,
        output_settings: &OutputSettings,
    ) -> Self {
        let solution = if output.status.is_success() {
            build_solution(model, &output.values, output_settings)
        } else {
            SolutionData::default()
        };
        Self {
            solver_name: solver_name.to_string(),
            status: output.status,
            solve_time: output.solve_time,
            objective: output.objective,
            objective_lower_bound: output.objective_lower_bound,
            case_summary: CaseSummary::of(model.reference()),
            solution,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Pretty-printed JSON for result files.
    pub fn to_json_string(&self) -> GridResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Map variable values to `component -> id -> field`.
///
/// `vm` falls back to `sqrt(w)` for formulations without magnitude
/// variables. Branch flows are reported only when requested.
pub fn build_solution(model: &GenericModel, values: &[f64], output: &OutputSettings) -> SolutionData {
    let reference = model.reference();
    let keys = &reference.keys;
    let mut solution = SolutionData::default();
    let has_vm = model.has_var_group("vm");

    for (key, var) in model.var_entries() {
        let Some(value) = values.get(var.0).copied() else {
            continue;
        };
        match (key.name.as_str(), key.index) {
            ("va" | "vm", VarIndex::Bus(i)) => {
                solution.set("bus", &key_of(&keys.bus, i), &key.name, value);
            }
            ("w", VarIndex::Bus(i)) if !has_vm => {
                solution.set("bus", &key_of(&keys.bus, i), "vm", value.max(0.0).sqrt());
            }
            ("pg" | "qg", VarIndex::Gen(i)) => {
                solution.set("gen", &key_of(&keys.gen, i), &key.name, value);
            }
            ("p" | "q", VarIndex::Arc(arc)) if output.branch_flows => {
                let forward = reference
                    .branch
                    .get(&arc.branch)
                    .is_some_and(|b| b.f_bus == arc.from);
                let field = match (key.name.as_str(), forward) {
                    ("p", true) => "pf",
                    ("p", false) => "pt",
                    ("q", true) => "qf",
                    _ => "qt",
                };
                solution.set("branch", &key_of(&keys.branch, arc.branch), field, value);
            }
            ("z_branch", VarIndex::Branch(l)) => {
                solution.set("branch", &key_of(&keys.branch, l), "br_status", value);
            }
            ("p_dc" | "q_dc", VarIndex::DcArc(arc)) => {
                let forward = reference
                    .dcline
                    .get(&arc.branch)
                    .is_some_and(|d| d.f_bus == arc.from);
                let field = match (key.name.as_str(), forward) {
                    ("p_dc", true) => "pf",
                    ("p_dc", false) => "pt",
                    ("q_dc", true) => "qf",
                    _ => "qt",
                };
                solution.set("dcline", &key_of(&keys.dcline, arc.branch), field, value);
            }
            ("built", VarIndex::NeBranch(l)) => {
                solution.set("ne_branch", &key_of(&keys.ne_branch, l), "built", value);
            }
            _ => {}
        }
    }
    solution
}

/// Data dictionary id of an internal index; the index itself when the
/// data had no string key for it.
fn key_of(keys: &BTreeMap<usize, String>, index: usize) -> String {
    keys.get(&index).cloned().unwrap_or_else(|| index.to_string())
}
