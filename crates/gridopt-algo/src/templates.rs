//! Formulation-agnostic entry points.
//!
//! Problem specifications call these instead of naming registry strings
//! directly. Each one forwards to [`GenericModel::add_variable`] or
//! [`GenericModel::add_constraint`], so what gets emitted depends only on
//! the model's formulation.

use gridopt_core::{BusPairKey, GridResult};

use crate::forms::names;
use crate::model::{GenericModel, Target};

pub fn variable_voltage(model: &mut GenericModel) -> GridResult<()> {
    model.add_variable(names::VOLTAGE)
}

pub fn variable_voltage_on_off(model: &mut GenericModel) -> GridResult<()> {
    model.add_variable(names::VOLTAGE_ON_OFF)
}

pub fn variable_voltage_ne(model: &mut GenericModel) -> GridResult<()> {
    model.add_variable(names::VOLTAGE_NE)
}

/// Active and reactive generation (the latter is a no-op without reactive power).
pub fn variable_generation(model: &mut GenericModel) -> GridResult<()> {
    model.add_variable(names::ACTIVE_GENERATION)?;
    model.add_variable(names::REACTIVE_GENERATION)
}

pub fn variable_branch_flow(model: &mut GenericModel) -> GridResult<()> {
    model.add_variable(names::BRANCH_FLOW)
}

pub fn variable_branch_flow_ne(model: &mut GenericModel) -> GridResult<()> {
    model.add_variable(names::BRANCH_FLOW_NE)
}

pub fn variable_branch_current(model: &mut GenericModel) -> GridResult<()> {
    model.add_variable(names::BRANCH_CURRENT)
}

pub fn variable_dcline_flow(model: &mut GenericModel) -> GridResult<()> {
    model.add_variable(names::DCLINE_FLOW)
}

pub fn variable_branch_indicator(model: &mut GenericModel) -> GridResult<()> {
    model.add_variable(names::BRANCH_INDICATOR)
}

pub fn variable_branch_ne(model: &mut GenericModel) -> GridResult<()> {
    model.add_variable(names::BRANCH_NE)
}

/// Network-wide voltage linking rows (cones for `W` families).
pub fn constraint_voltage(model: &mut GenericModel) -> GridResult<()> {
    model.add_constraint(names::VOLTAGE, Target::Network)
}

pub fn constraint_voltage_on_off(model: &mut GenericModel) -> GridResult<()> {
    model.add_constraint(names::VOLTAGE_ON_OFF, Target::Network)
}

pub fn constraint_theta_ref(model: &mut GenericModel, bus: usize) -> GridResult<()> {
    model.add_constraint(names::THETA_REF, Target::Bus(bus))
}

pub fn constraint_voltage_magnitude_setpoint(model: &mut GenericModel, bus: usize) -> GridResult<()> {
    model.add_constraint(names::VOLTAGE_MAGNITUDE_SETPOINT, Target::Bus(bus))
}

pub fn constraint_active_gen_setpoint(model: &mut GenericModel, gen: usize) -> GridResult<()> {
    model.add_constraint(names::ACTIVE_GEN_SETPOINT, Target::Gen(gen))
}

pub fn constraint_reactive_gen_setpoint(model: &mut GenericModel, gen: usize) -> GridResult<()> {
    model.add_constraint(names::REACTIVE_GEN_SETPOINT, Target::Gen(gen))
}

pub fn constraint_active_dcline_setpoint(model: &mut GenericModel, dcline: usize) -> GridResult<()> {
    model.add_constraint(names::ACTIVE_DCLINE_SETPOINT, Target::DcLine(dcline))
}

pub fn constraint_kcl_shunt(model: &mut GenericModel, bus: usize) -> GridResult<()> {
    model.add_constraint(names::KCL_SHUNT, Target::Bus(bus))
}

pub fn constraint_kcl_shunt_ne(model: &mut GenericModel, bus: usize) -> GridResult<()> {
    model.add_constraint(names::KCL_SHUNT_NE, Target::Bus(bus))
}

pub fn constraint_ohms_yt_from(model: &mut GenericModel, branch: usize) -> GridResult<()> {
    model.add_constraint(names::OHMS_YT_FROM, Target::Branch(branch))
}

pub fn constraint_ohms_yt_to(model: &mut GenericModel, branch: usize) -> GridResult<()> {
    model.add_constraint(names::OHMS_YT_TO, Target::Branch(branch))
}

pub fn constraint_ohms_yt_from_on_off(model: &mut GenericModel, branch: usize) -> GridResult<()> {
    model.add_constraint(names::OHMS_YT_FROM_ON_OFF, Target::Branch(branch))
}

pub fn constraint_ohms_yt_to_on_off(model: &mut GenericModel, branch: usize) -> GridResult<()> {
    model.add_constraint(names::OHMS_YT_TO_ON_OFF, Target::Branch(branch))
}

pub fn constraint_ohms_yt_from_ne(model: &mut GenericModel, branch: usize) -> GridResult<()> {
    model.add_constraint(names::OHMS_YT_FROM_NE, Target::NeBranch(branch))
}

pub fn constraint_ohms_yt_to_ne(model: &mut GenericModel, branch: usize) -> GridResult<()> {
    model.add_constraint(names::OHMS_YT_TO_NE, Target::NeBranch(branch))
}

pub fn constraint_voltage_angle_difference(model: &mut GenericModel, branch: usize) -> GridResult<()> {
    model.add_constraint(names::VOLTAGE_ANGLE_DIFFERENCE, Target::Branch(branch))
}

pub fn constraint_voltage_angle_difference_on_off(
    model: &mut GenericModel,
    branch: usize,
) -> GridResult<()> {
    model.add_constraint(names::VOLTAGE_ANGLE_DIFFERENCE_ON_OFF, Target::Branch(branch))
}

pub fn constraint_voltage_angle_difference_ne(
    model: &mut GenericModel,
    branch: usize,
) -> GridResult<()> {
    model.add_constraint(names::VOLTAGE_ANGLE_DIFFERENCE_NE, Target::NeBranch(branch))
}

/// Thermal limits at both ends of a branch.
pub fn constraint_thermal_limits(model: &mut GenericModel, branch: usize) -> GridResult<()> {
    model.add_constraint(names::THERMAL_LIMIT_FROM, Target::Branch(branch))?;
    model.add_constraint(names::THERMAL_LIMIT_TO, Target::Branch(branch))
}

pub fn constraint_thermal_limits_on_off(model: &mut GenericModel, branch: usize) -> GridResult<()> {
    model.add_constraint(names::THERMAL_LIMIT_FROM_ON_OFF, Target::Branch(branch))?;
    model.add_constraint(names::THERMAL_LIMIT_TO_ON_OFF, Target::Branch(branch))
}

pub fn constraint_thermal_limits_ne(model: &mut GenericModel, branch: usize) -> GridResult<()> {
    model.add_constraint(names::THERMAL_LIMIT_FROM_NE, Target::NeBranch(branch))?;
    model.add_constraint(names::THERMAL_LIMIT_TO_NE, Target::NeBranch(branch))
}

pub fn constraint_dcline(model: &mut GenericModel, dcline: usize) -> GridResult<()> {
    model.add_constraint(names::DCLINE, Target::DcLine(dcline))
}

pub fn constraint_flow_losses(model: &mut GenericModel, branch: usize) -> GridResult<()> {
    model.add_constraint(names::FLOW_LOSSES, Target::Branch(branch))
}

pub fn constraint_voltage_magnitude_difference(
    model: &mut GenericModel,
    branch: usize,
) -> GridResult<()> {
    model.add_constraint(names::VOLTAGE_MAGNITUDE_DIFFERENCE, Target::Branch(branch))
}

pub fn constraint_branch_current(model: &mut GenericModel, branch: usize) -> GridResult<()> {
    model.add_constraint(names::BRANCH_CURRENT, Target::Branch(branch))
}

/// Bus-pair target, for user-registered pair constraints.
pub fn constraint_buspair(model: &mut GenericModel, name: &str, pair: BusPairKey) -> GridResult<()> {
    model.add_constraint(name, Target::BusPair(pair))
}

pub fn objective_min_fuel_cost(model: &mut GenericModel) -> GridResult<()> {
    model.add_objective(names::MIN_FUEL_COST)
}

pub fn objective_tnep_cost(model: &mut GenericModel) -> GridResult<()> {
    model.add_objective(names::TNEP_COST)
}
