//! Branch-flow formulation (`SOCBF`): squared magnitudes `w` per bus and
//! squared series currents `ccm` per branch, with the power/current link
//! relaxed to a rotated cone.

use gridopt_core::GridResult;

use super::{branch_params, branch_target, names, BranchParams, Side};
use crate::model::{GenericModel, Target, VarIndex};
use crate::program::{ConstraintKind, Expr, Sense, VarId};

/// `w` in `[vmin^2, vmax^2]` per bus.
pub fn variable_voltage(model: &mut GenericModel, _: Target) -> GridResult<()> {
    let reference = model.shared_reference();
    let bounded = model.bounded();
    for (i, bus) in &reference.bus {
        let (lb, ub) = if bounded {
            (bus.vmin * bus.vmin, bus.vmax * bus.vmax)
        } else {
            (0.0, f64::INFINITY)
        };
        model.new_var("w", VarIndex::Bus(*i), lb, ub);
    }
    Ok(())
}

/// `ccm` in `[0, (rate_a tap / vmin_fr)^2]` per branch.
pub fn variable_branch_current(model: &mut GenericModel, _: Target) -> GridResult<()> {
    let reference = model.shared_reference();
    let bounded = model.bounded();
    for (l, branch) in &reference.branch {
        let vmin_fr = reference.bus.get(&branch.f_bus).map_or(0.0, |b| b.vmin);
        let ub = match branch.rate_a {
            Some(rate) if bounded && vmin_fr > 0.0 => {
                let limit = rate * branch.tap / vmin_fr;
                limit * limit
            }
            _ => f64::INFINITY,
        };
        model.new_var("ccm", VarIndex::Branch(*l), 0.0, ub);
    }
    Ok(())
}

struct BranchVars {
    p_fr: VarId,
    q_fr: VarId,
    p_to: VarId,
    q_to: VarId,
    w_fr: VarId,
    w_to: VarId,
    ccm: VarId,
}

fn branch_vars(model: &GenericModel, params: &BranchParams) -> GridResult<BranchVars> {
    let fr = VarIndex::Arc(params.arc(Side::From));
    let to = VarIndex::Arc(params.arc(Side::To));
    Ok(BranchVars {
        p_fr: model.var("p", fr)?,
        q_fr: model.var("q", fr)?,
        p_to: model.var("p", to)?,
        q_to: model.var("q", to)?,
        w_fr: model.var("w", VarIndex::Bus(params.f_bus))?,
        w_to: model.var("w", VarIndex::Bus(params.t_bus))?,
        ccm: model.var("ccm", VarIndex::Branch(params.index))?,
    })
}

/// Series and shunt losses:
///
/// ```text
/// p_fr + p_to ==  g_fr w_fr / tm^2 + r ccm + g_to w_to
/// q_fr + q_to == -b_fr w_fr / tm^2 + x ccm - b_to w_to
/// ```
pub fn constraint_flow_losses(model: &mut GenericModel, target: Target) -> GridResult<()> {
    let l = branch_target(names::FLOW_LOSSES, target)?;
    let params = branch_params(model.reference(), l)?;
    let v = branch_vars(model, &params)?;

    let p = Expr::var(v.p_fr)
        .with_term(1.0, v.p_to)
        .with_term(-params.g_fr / params.tm2, v.w_fr)
        .with_term(-params.r, v.ccm)
        .with_term(-params.g_to, v.w_to);
    model.add_row(format!("flow_losses_p[{l}]"), p, Sense::Equal, 0.0);

    let q = Expr::var(v.q_fr)
        .with_term(1.0, v.q_to)
        .with_term(params.b_fr / params.tm2, v.w_fr)
        .with_term(-params.x, v.ccm)
        .with_term(params.b_to, v.w_to);
    model.add_row(format!("flow_losses_q[{l}]"), q, Sense::Equal, 0.0);
    Ok(())
}

/// Voltage drop along the series impedance:
///
/// ```text
/// w_to == w_fr / tm^2 - 2 (r (p_fr - g_fr w_fr / tm^2) + x (q_fr + b_fr w_fr / tm^2))
///         + (r^2 + x^2) ccm
/// ```
pub fn constraint_voltage_magnitude_difference(
    model: &mut GenericModel,
    target: Target,
) -> GridResult<()> {
    let l = branch_target(names::VOLTAGE_MAGNITUDE_DIFFERENCE, target)?;
    let params = branch_params(model.reference(), l)?;
    let v = branch_vars(model, &params)?;
    let (r, x, tm2) = (params.r, params.x, params.tm2);

    let w_fr_coeff = (-1.0 - 2.0 * r * params.g_fr + 2.0 * x * params.b_fr) / tm2;
    let expr = Expr::var(v.w_to)
        .with_term(w_fr_coeff, v.w_fr)
        .with_term(2.0 * r, v.p_fr)
        .with_term(2.0 * x, v.q_fr)
        .with_term(-(r * r + x * x), v.ccm);
    model.add_row(format!("vm_difference[{l}]"), expr, Sense::Equal, 0.0);
    Ok(())
}

/// `p_fr^2 + q_fr^2 <= (w_fr / tm^2) ccm`.
pub fn constraint_branch_current(model: &mut GenericModel, target: Target) -> GridResult<()> {
    let l = branch_target(names::BRANCH_CURRENT, target)?;
    let params = branch_params(model.reference(), l)?;
    let v = branch_vars(model, &params)?;
    model.add_cone(
        format!("branch_current[{l}]"),
        ConstraintKind::RotatedCone {
            a: Expr::term(1.0 / params.tm2, v.w_fr),
            b: Expr::var(v.ccm),
            xs: vec![Expr::var(v.p_fr), Expr::var(v.q_fr)],
        },
    );
    Ok(())
}
