//! Built-in formulation builders.
//!
//! | Module      | Family       | Tags            |
//! |-------------|--------------|-----------------|
//! | [`common`]  | all          |                 |
//! | [`acp`]     | `AcPolar`    | `ACP`           |
//! | [`dc`]      | `Dc`         | `DCP`, `NFA`    |
//! | [`wr`]      | `Wr`         | `SOCWR`, `QCWR` |
//! | [`bf`]      | `BranchFlow` | `SOCBF`         |
//!
//! [`register_defaults`] fills a [`BuilderRegistry`] with every entry below,
//! including the explicit no-ops. A `(name, formulation)` pair that is not
//! listed fails with `UnsupportedFormulation` (e.g. on/off switching under
//! `Wr`, or Ohm's law under `BranchFlow`).

pub mod acp;
pub mod bf;
pub mod common;
pub mod dc;
pub mod wr;

use gridopt_core::{Branch, BranchArc, GridError, GridResult, ReferenceModel};

use crate::formulation::{Family, Formulation};
use crate::model::{BuilderRegistry, Entry, Extension, GenericModel, Target, VarIndex};
use crate::objective;
use crate::program::VarId;

/// Registry names shared by problem specifications and builders.
pub mod names {
    pub const VOLTAGE: &str = "voltage";
    pub const VOLTAGE_ON_OFF: &str = "voltage_on_off";
    pub const VOLTAGE_NE: &str = "voltage_ne";
    pub const ACTIVE_GENERATION: &str = "active_generation";
    pub const REACTIVE_GENERATION: &str = "reactive_generation";
    pub const BRANCH_FLOW: &str = "branch_flow";
    pub const BRANCH_FLOW_NE: &str = "branch_flow_ne";
    pub const BRANCH_CURRENT: &str = "branch_current";
    pub const DCLINE_FLOW: &str = "dcline_flow";
    pub const BRANCH_INDICATOR: &str = "branch_indicator";
    pub const BRANCH_NE: &str = "branch_ne";

    pub const THETA_REF: &str = "theta_ref";
    pub const VOLTAGE_MAGNITUDE_SETPOINT: &str = "voltage_magnitude_setpoint";
    pub const ACTIVE_GEN_SETPOINT: &str = "active_gen_setpoint";
    pub const REACTIVE_GEN_SETPOINT: &str = "reactive_gen_setpoint";
    pub const ACTIVE_DCLINE_SETPOINT: &str = "active_dcline_setpoint";
    pub const KCL_SHUNT: &str = "kcl_shunt";
    pub const KCL_SHUNT_NE: &str = "kcl_shunt_ne";
    pub const OHMS_YT_FROM: &str = "ohms_yt_from";
    pub const OHMS_YT_TO: &str = "ohms_yt_to";
    pub const OHMS_YT_FROM_ON_OFF: &str = "ohms_yt_from_on_off";
    pub const OHMS_YT_TO_ON_OFF: &str = "ohms_yt_to_on_off";
    pub const OHMS_YT_FROM_NE: &str = "ohms_yt_from_ne";
    pub const OHMS_YT_TO_NE: &str = "ohms_yt_to_ne";
    pub const VOLTAGE_ANGLE_DIFFERENCE: &str = "voltage_angle_difference";
    pub const VOLTAGE_ANGLE_DIFFERENCE_ON_OFF: &str = "voltage_angle_difference_on_off";
    pub const VOLTAGE_ANGLE_DIFFERENCE_NE: &str = "voltage_angle_difference_ne";
    pub const THERMAL_LIMIT_FROM: &str = "thermal_limit_from";
    pub const THERMAL_LIMIT_TO: &str = "thermal_limit_to";
    pub const THERMAL_LIMIT_FROM_ON_OFF: &str = "thermal_limit_from_on_off";
    pub const THERMAL_LIMIT_TO_ON_OFF: &str = "thermal_limit_to_on_off";
    pub const THERMAL_LIMIT_FROM_NE: &str = "thermal_limit_from_ne";
    pub const THERMAL_LIMIT_TO_NE: &str = "thermal_limit_to_ne";
    pub const DCLINE: &str = "dcline";
    pub const FLOW_LOSSES: &str = "flow_losses";
    pub const VOLTAGE_MAGNITUDE_DIFFERENCE: &str = "voltage_magnitude_difference";

    pub const MIN_FUEL_COST: &str = "min_fuel_cost";
    pub const TNEP_COST: &str = "tnep_cost";
}

use names::*;

/// Fill `registry` with the built-in formulations.
pub fn register_defaults(registry: &mut BuilderRegistry) {
    use Extension::{Constraint as C, Objective as O, Variable as V};
    use Family::{AcPolar, BranchFlow, Dc, Wr};

    let nfa = Formulation::NFA;
    let qcwr = Formulation::QCWR;

    // family-independent
    registry.register_all_families(V, ACTIVE_GENERATION, Entry::build(common::variable_active_generation));
    registry.register_all_families(V, BRANCH_FLOW, Entry::build(common::variable_branch_flow));
    registry.register_all_families(V, BRANCH_FLOW_NE, Entry::build(common::variable_branch_flow_ne));
    registry.register_all_families(V, DCLINE_FLOW, Entry::build(common::variable_dcline_flow));
    registry.register_all_families(V, BRANCH_INDICATOR, Entry::build(common::variable_branch_indicator));
    registry.register_all_families(V, BRANCH_NE, Entry::build(common::variable_branch_ne));
    registry.register_all_families(C, ACTIVE_GEN_SETPOINT, Entry::build(common::constraint_active_gen_setpoint));
    registry.register_all_families(C, ACTIVE_DCLINE_SETPOINT, Entry::build(common::constraint_active_dcline_setpoint));
    registry.register_all_families(C, KCL_SHUNT, Entry::build(common::constraint_kcl_shunt));
    registry.register_all_families(C, KCL_SHUNT_NE, Entry::build(common::constraint_kcl_shunt_ne));
    registry.register_all_families(C, DCLINE, Entry::build(common::constraint_dcline));
    registry.register_all_families(O, MIN_FUEL_COST, Entry::build(objective::objective_min_fuel_cost));
    registry.register_all_families(O, TNEP_COST, Entry::build(objective::objective_tnep_cost));

    for family in [AcPolar, Wr, BranchFlow] {
        registry.register_family(V, REACTIVE_GENERATION, family, Entry::build(common::variable_reactive_generation));
        registry.register_family(C, REACTIVE_GEN_SETPOINT, family, Entry::build(common::constraint_reactive_gen_setpoint));
    }
    for family in [Wr, BranchFlow] {
        registry.register_family(C, THERMAL_LIMIT_FROM, family, Entry::build(common::constraint_thermal_limit_from_conic));
        registry.register_family(C, THERMAL_LIMIT_TO, family, Entry::build(common::constraint_thermal_limit_to_conic));
        registry.register_family(C, VOLTAGE_MAGNITUDE_SETPOINT, family, Entry::build(common::constraint_voltage_magnitude_setpoint_sqr));
        registry.register_family(C, THETA_REF, family, Entry::noop("no voltage angle variables"));
    }
    for family in [AcPolar, Dc] {
        registry.register_family(C, THETA_REF, family, Entry::build(common::constraint_theta_ref));
        registry.register_family(C, VOLTAGE_ANGLE_DIFFERENCE, family, Entry::build(common::constraint_voltage_angle_difference));
        registry.register_family(C, VOLTAGE_ANGLE_DIFFERENCE_ON_OFF, family, Entry::build(common::constraint_voltage_angle_difference_on_off));
        registry.register_family(C, VOLTAGE_ANGLE_DIFFERENCE_NE, family, Entry::build(common::constraint_voltage_angle_difference_ne));
        registry.register_family(V, VOLTAGE_NE, family, Entry::noop("expansion branches reuse the bus voltage variables"));
        registry.register_family(C, VOLTAGE_ON_OFF, family, Entry::noop("bus voltages do not depend on branch status"));
    }

    // AcPolar
    registry.register_family(V, VOLTAGE, AcPolar, Entry::build(acp::variable_voltage));
    registry.register_family(V, VOLTAGE_ON_OFF, AcPolar, Entry::build(acp::variable_voltage));
    registry.register_family(C, VOLTAGE, AcPolar, Entry::noop("polar voltages need no linking constraints"));
    registry.register_family(C, VOLTAGE_MAGNITUDE_SETPOINT, AcPolar, Entry::build(acp::constraint_voltage_magnitude_setpoint));
    registry.register_family(C, OHMS_YT_FROM, AcPolar, Entry::build(acp::constraint_ohms_yt_from));
    registry.register_family(C, OHMS_YT_TO, AcPolar, Entry::build(acp::constraint_ohms_yt_to));
    registry.register_family(C, OHMS_YT_FROM_ON_OFF, AcPolar, Entry::build(acp::constraint_ohms_yt_from_on_off));
    registry.register_family(C, OHMS_YT_TO_ON_OFF, AcPolar, Entry::build(acp::constraint_ohms_yt_to_on_off));
    registry.register_family(C, OHMS_YT_FROM_NE, AcPolar, Entry::build(acp::constraint_ohms_yt_from_ne));
    registry.register_family(C, OHMS_YT_TO_NE, AcPolar, Entry::build(acp::constraint_ohms_yt_to_ne));
    registry.register_family(C, THERMAL_LIMIT_FROM, AcPolar, Entry::build(acp::constraint_thermal_limit_from));
    registry.register_family(C, THERMAL_LIMIT_TO, AcPolar, Entry::build(acp::constraint_thermal_limit_to));
    registry.register_family(C, THERMAL_LIMIT_FROM_ON_OFF, AcPolar, Entry::build(acp::constraint_thermal_limit_from_on_off));
    registry.register_family(C, THERMAL_LIMIT_TO_ON_OFF, AcPolar, Entry::build(acp::constraint_thermal_limit_to_on_off));
    registry.register_family(C, THERMAL_LIMIT_FROM_NE, AcPolar, Entry::build(acp::constraint_thermal_limit_from_ne));
    registry.register_family(C, THERMAL_LIMIT_TO_NE, AcPolar, Entry::build(acp::constraint_thermal_limit_to_ne));

    // Dc
    registry.register_family(V, VOLTAGE, Dc, Entry::build(dc::variable_voltage));
    registry.register_family(V, VOLTAGE_ON_OFF, Dc, Entry::build(dc::variable_voltage));
    registry.register_family(V, REACTIVE_GENERATION, Dc, Entry::noop("DC models carry no reactive power"));
    registry.register_family(C, VOLTAGE, Dc, Entry::noop("angle-only voltages need no linking constraints"));
    registry.register_family(C, VOLTAGE_MAGNITUDE_SETPOINT, Dc, Entry::noop("DC models fix voltage magnitudes at 1.0"));
    registry.register_family(C, REACTIVE_GEN_SETPOINT, Dc, Entry::noop("DC models carry no reactive power"));
    registry.register_family(C, OHMS_YT_FROM, Dc, Entry::build(dc::constraint_ohms_yt_from));
    registry.register_family(C, OHMS_YT_TO, Dc, Entry::build(dc::constraint_ohms_yt_to));
    registry.register_family(C, OHMS_YT_FROM_ON_OFF, Dc, Entry::build(dc::constraint_ohms_yt_from_on_off));
    registry.register_family(C, OHMS_YT_TO_ON_OFF, Dc, Entry::build(dc::constraint_ohms_yt_to_on_off));
    registry.register_family(C, OHMS_YT_FROM_NE, Dc, Entry::build(dc::constraint_ohms_yt_from_ne));
    registry.register_family(C, OHMS_YT_TO_NE, Dc, Entry::build(dc::constraint_ohms_yt_to_ne));
    registry.register_family(C, THERMAL_LIMIT_FROM, Dc, Entry::build(dc::constraint_thermal_limit_from));
    registry.register_family(C, THERMAL_LIMIT_FROM_ON_OFF, Dc, Entry::build(dc::constraint_thermal_limit_from_on_off));
    registry.register_family(C, THERMAL_LIMIT_FROM_NE, Dc, Entry::build(dc::constraint_thermal_limit_from_ne));
    for name in [THERMAL_LIMIT_TO, THERMAL_LIMIT_TO_ON_OFF, THERMAL_LIMIT_TO_NE] {
        registry.register_family(C, name, Dc, Entry::noop("DC flow is symmetric, the from-side limit covers both ends"));
    }

    // NFA: transport model without Ohm's law or angles
    let no_angles = "network-flow model has no voltage angles";
    registry.register_tag(V, VOLTAGE, nfa, Entry::noop(no_angles));
    registry.register_tag(V, VOLTAGE_ON_OFF, nfa, Entry::noop(no_angles));
    registry.register_tag(C, THETA_REF, nfa, Entry::noop(no_angles));
    for name in [VOLTAGE_ANGLE_DIFFERENCE, VOLTAGE_ANGLE_DIFFERENCE_ON_OFF, VOLTAGE_ANGLE_DIFFERENCE_NE] {
        registry.register_tag(C, name, nfa, Entry::noop(no_angles));
    }
    for name in [OHMS_YT_FROM, OHMS_YT_FROM_ON_OFF, OHMS_YT_FROM_NE] {
        registry.register_tag(C, name, nfa, Entry::noop("network-flow model omits Ohm's law"));
    }

    // Wr
    registry.register_family(V, VOLTAGE, Wr, Entry::build(wr::variable_voltage));
    registry.register_family(C, VOLTAGE, Wr, Entry::build(wr::constraint_voltage));
    registry.register_family(C, OHMS_YT_FROM, Wr, Entry::build(wr::constraint_ohms_yt_from));
    registry.register_family(C, OHMS_YT_TO, Wr, Entry::build(wr::constraint_ohms_yt_to));
    registry.register_family(C, VOLTAGE_ANGLE_DIFFERENCE, Wr, Entry::build(wr::constraint_voltage_angle_difference));

    // QCWR lifts angles and magnitudes next to the W variables
    registry.register_tag(V, VOLTAGE, qcwr, Entry::build(wr::variable_voltage_qc));
    registry.register_tag(C, VOLTAGE, qcwr, Entry::build(wr::constraint_voltage_qc));
    registry.register_tag(C, THETA_REF, qcwr, Entry::build(common::constraint_theta_ref));

    // BranchFlow
    let no_angles_bf = "branch-flow models carry no voltage angles";
    registry.register_family(V, VOLTAGE, BranchFlow, Entry::build(bf::variable_voltage));
    registry.register_family(V, BRANCH_CURRENT, BranchFlow, Entry::build(bf::variable_branch_current));
    registry.register_family(C, VOLTAGE, BranchFlow, Entry::noop("squared magnitudes are independent per bus"));
    registry.register_family(C, VOLTAGE_ANGLE_DIFFERENCE, BranchFlow, Entry::noop(no_angles_bf));
    registry.register_family(C, FLOW_LOSSES, BranchFlow, Entry::build(bf::constraint_flow_losses));
    registry.register_family(C, VOLTAGE_MAGNITUDE_DIFFERENCE, BranchFlow, Entry::build(bf::constraint_voltage_magnitude_difference));
    registry.register_family(C, BRANCH_CURRENT, BranchFlow, Entry::build(bf::constraint_branch_current));
}

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

fn wrong_target(name: &str, expected: &str, target: Target) -> GridError {
    GridError::Config(format!("{name} expects a {expected} target, got {target}"))
}

pub(crate) fn bus_target(name: &str, target: Target) -> GridResult<usize> {
    match target {
        Target::Bus(i) => Ok(i),
        other => Err(wrong_target(name, "bus", other)),
    }
}

pub(crate) fn gen_target(name: &str, target: Target) -> GridResult<usize> {
    match target {
        Target::Gen(i) => Ok(i),
        other => Err(wrong_target(name, "gen", other)),
    }
}

pub(crate) fn branch_target(name: &str, target: Target) -> GridResult<usize> {
    match target {
        Target::Branch(i) => Ok(i),
        other => Err(wrong_target(name, "branch", other)),
    }
}

pub(crate) fn ne_branch_target(name: &str, target: Target) -> GridResult<usize> {
    match target {
        Target::NeBranch(i) => Ok(i),
        other => Err(wrong_target(name, "ne_branch", other)),
    }
}

pub(crate) fn dcline_target(name: &str, target: Target) -> GridResult<usize> {
    match target {
        Target::DcLine(i) => Ok(i),
        other => Err(wrong_target(name, "dcline", other)),
    }
}

/// Branch-side selector for the two-port equations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Side {
    From,
    To,
}

/// Per-side coefficients of the branch model, so that with
/// `c = v_s v_o cos(θ_s - θ_o)` and `s = v_s v_o sin(θ_s - θ_o)`:
///
/// ```text
/// p =  self_g * v_s^2 + gc * c + bc * s
/// q = -self_b * v_s^2 - bc * c + gc * s
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct SideCoeffs {
    pub self_g: f64,
    pub self_b: f64,
    pub gc: f64,
    pub bc: f64,
}

/// Electrical parameters of one branch.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct BranchParams {
    pub index: usize,
    pub f_bus: usize,
    pub t_bus: usize,
    pub r: f64,
    pub x: f64,
    pub g: f64,
    pub b: f64,
    pub tr: f64,
    pub ti: f64,
    /// Squared tap magnitude.
    pub tm2: f64,
    pub g_fr: f64,
    pub b_fr: f64,
    pub g_to: f64,
    pub b_to: f64,
    pub angmin: f64,
    pub angmax: f64,
    pub rate: Option<f64>,
}

impl BranchParams {
    pub fn new(branch: &Branch) -> Self {
        let (g, b) = branch.series_admittance();
        let (tr, ti) = branch.tap_components();
        Self {
            index: branch.index,
            f_bus: branch.f_bus,
            t_bus: branch.t_bus,
            r: branch.br_r,
            x: branch.br_x,
            g,
            b,
            tr,
            ti,
            tm2: branch.tap * branch.tap,
            g_fr: branch.g_fr,
            b_fr: branch.b_fr,
            g_to: branch.g_to,
            b_to: branch.b_to,
            angmin: branch.angmin,
            angmax: branch.angmax,
            rate: branch.rate_a,
        }
    }

    pub fn side(&self, side: Side) -> SideCoeffs {
        let (g, b, tr, ti, tm2) = (self.g, self.b, self.tr, self.ti, self.tm2);
        match side {
            Side::From => SideCoeffs {
                self_g: (g + self.g_fr) / tm2,
                self_b: (b + self.b_fr) / tm2,
                gc: (-g * tr + b * ti) / tm2,
                bc: (-b * tr - g * ti) / tm2,
            },
            Side::To => SideCoeffs {
                self_g: g + self.g_to,
                self_b: b + self.b_to,
                gc: (-g * tr - b * ti) / tm2,
                bc: (-b * tr + g * ti) / tm2,
            },
        }
    }

    /// `(own bus, other bus)` of one side.
    pub fn buses(&self, side: Side) -> (usize, usize) {
        match side {
            Side::From => (self.f_bus, self.t_bus),
            Side::To => (self.t_bus, self.f_bus),
        }
    }

    pub fn arc(&self, side: Side) -> BranchArc {
        let (own, other) = self.buses(side);
        BranchArc::new(self.index, own, other)
    }

    pub fn require_rate(&self, component: &str) -> GridResult<f64> {
        self.rate.ok_or_else(|| {
            GridError::data(component, self.index, "switchable branch requires a finite rate_a")
        })
    }
}

/// A branch whose presence is decided by a binary variable: an existing
/// branch under switching, or a candidate branch under expansion planning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Switched {
    OnOff(usize),
    Expansion(usize),
}

impl Switched {
    pub fn from_target(name: &str, target: Target) -> GridResult<Self> {
        match target {
            Target::Branch(l) => Ok(Switched::OnOff(l)),
            Target::NeBranch(l) => Ok(Switched::Expansion(l)),
            other => Err(wrong_target(name, "branch or ne_branch", other)),
        }
    }

    pub fn component(&self) -> &'static str {
        match self {
            Switched::OnOff(_) => "branch",
            Switched::Expansion(_) => "ne_branch",
        }
    }

    pub fn params(&self, reference: &ReferenceModel) -> GridResult<BranchParams> {
        let branch = match *self {
            Switched::OnOff(l) => reference.branch.get(&l),
            Switched::Expansion(l) => reference.ne.as_ref().and_then(|ne| ne.branch.get(&l)),
        };
        let index = match *self {
            Switched::OnOff(l) | Switched::Expansion(l) => l,
        };
        branch
            .map(BranchParams::new)
            .ok_or_else(|| GridError::data(self.component(), index, "not an active branch"))
    }

    pub fn flow_index(&self, arc: BranchArc) -> VarIndex {
        match self {
            Switched::OnOff(_) => VarIndex::Arc(arc),
            Switched::Expansion(_) => VarIndex::NeArc(arc),
        }
    }

    pub fn p_name(&self) -> &'static str {
        match self {
            Switched::OnOff(_) => "p",
            Switched::Expansion(_) => "p_ne",
        }
    }

    pub fn q_name(&self) -> &'static str {
        match self {
            Switched::OnOff(_) => "q",
            Switched::Expansion(_) => "q_ne",
        }
    }

    pub fn indicator(&self, model: &GenericModel) -> GridResult<VarId> {
        match *self {
            Switched::OnOff(l) => model.var("z_branch", VarIndex::Branch(l)),
            Switched::Expansion(l) => model.var("built", VarIndex::NeBranch(l)),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Switched::OnOff(_) => "on_off",
            Switched::Expansion(_) => "ne",
        }
    }
}

/// Parameters of an active branch of the base network.
pub(crate) fn branch_params(reference: &ReferenceModel, l: usize) -> GridResult<BranchParams> {
    reference
        .branch
        .get(&l)
        .map(BranchParams::new)
        .ok_or_else(|| GridError::data("branch", l, "not an active branch"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_side_coefficients_plain_line() {
        let branch = Branch {
            index: 1,
            f_bus: 1,
            t_bus: 2,
            br_r: 0.0,
            br_x: 0.5,
            ..Branch::default()
        };
        let p = BranchParams::new(&branch);
        assert!((p.b + 2.0).abs() < 1e-12);
        let from = p.side(Side::From);
        let to = p.side(Side::To);
        // untapped lossless line: p_fr = -b sin(θ_f - θ_t) v_f v_t
        assert!((from.bc - 2.0).abs() < 1e-12);
        assert_eq!(from.bc, to.bc);
        assert_eq!(from.gc, 0.0);
        assert_eq!(p.arc(Side::To), BranchArc::new(1, 2, 1));
    }

    #[test]
    fn test_defaults_cover_every_builtin_formulation() {
        let registry = BuilderRegistry::with_defaults();
        for f in Formulation::builtin() {
            for name in [ACTIVE_GENERATION, BRANCH_FLOW, DCLINE_FLOW] {
                assert!(registry.resolve(Extension::Variable, name, &f).is_ok(), "{name} {f}");
            }
            for name in [KCL_SHUNT, THETA_REF, THERMAL_LIMIT_FROM, THERMAL_LIMIT_TO, DCLINE] {
                assert!(registry.resolve(Extension::Constraint, name, &f).is_ok(), "{name} {f}");
            }
            assert!(registry.resolve(Extension::Objective, MIN_FUEL_COST, &f).is_ok());
        }
    }

    #[test]
    fn test_unsupported_combinations() {
        let registry = BuilderRegistry::with_defaults();
        assert!(registry
            .resolve(Extension::Constraint, OHMS_YT_FROM, &Formulation::socbf())
            .is_err());
        assert!(registry
            .resolve(Extension::Constraint, OHMS_YT_FROM_ON_OFF, &Formulation::socwr())
            .is_err());
        assert!(registry
            .resolve(Extension::Variable, BRANCH_CURRENT, &Formulation::dcp())
            .is_err());
    }

    #[test]
    fn test_noop_reasons_are_present() {
        let registry = BuilderRegistry::with_defaults();
        let noops = registry.noops();
        assert!(!noops.is_empty());
        assert!(noops.iter().all(|(_, _, _, reason)| !reason.is_empty()));
        let dc_to = registry
            .resolve(Extension::Constraint, THERMAL_LIMIT_TO, &Formulation::dcp())
            .unwrap();
        assert!(dc_to.entry.is_noop());
    }
}
