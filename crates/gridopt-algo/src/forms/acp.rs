//! AC polar formulation (`ACP`): voltage magnitude `vm` and angle `va` per
//! bus, exact nonlinear branch equations.
//!
//! Every branch equation is emitted as an [`NlExpr`] row, so the resulting
//! program is a `NonlinearProgram` and needs an oracle that accepts one.

use gridopt_core::GridResult;

use super::{branch_params, branch_target, bus_target, names, BranchParams, Side, Switched};
use crate::model::{GenericModel, Target, VarIndex};
use crate::program::{ConstraintKind, Expr, NlExpr, Sense, VarId};

/// `va` (free) and `vm` in `[vmin, vmax]` per bus.
pub fn variable_voltage(model: &mut GenericModel, _: Target) -> GridResult<()> {
    let reference = model.shared_reference();
    let bounded = model.bounded();
    for (i, bus) in &reference.bus {
        model.new_var("va", VarIndex::Bus(*i), f64::NEG_INFINITY, f64::INFINITY);
        let (lb, ub) = if bounded {
            (bus.vmin, bus.vmax)
        } else {
            (0.0, f64::INFINITY)
        };
        model.new_var("vm", VarIndex::Bus(*i), lb, ub);
    }
    Ok(())
}

/// `vm[i] == vm_set`.
pub fn constraint_voltage_magnitude_setpoint(
    model: &mut GenericModel,
    target: Target,
) -> GridResult<()> {
    let i = bus_target(names::VOLTAGE_MAGNITUDE_SETPOINT, target)?;
    let setpoint = model
        .reference()
        .bus
        .get(&i)
        .map(|b| b.vm)
        .ok_or_else(|| gridopt_core::GridError::data("bus", i, "not an active bus"))?;
    let vm = model.var("vm", VarIndex::Bus(i))?;
    model.add_row(format!("vm_setpoint[{i}]"), Expr::var(vm), Sense::Equal, setpoint);
    Ok(())
}

fn arc_flows(
    model: &GenericModel,
    sw: Option<Switched>,
    params: &BranchParams,
    side: Side,
) -> GridResult<(VarId, VarId)> {
    let arc = params.arc(side);
    let (p_name, q_name, index) = match sw {
        Some(s) => (s.p_name(), s.q_name(), s.flow_index(arc)),
        None => ("p", "q", VarIndex::Arc(arc)),
    };
    Ok((model.var(p_name, index)?, model.var(q_name, index)?))
}

fn product(coeff: f64, factors: &[&NlExpr], gate: Option<VarId>) -> NlExpr {
    let mut terms = vec![NlExpr::Const(coeff)];
    terms.extend(factors.iter().map(|f| (*f).clone()));
    if let Some(z) = gate {
        terms.push(NlExpr::Var(z));
    }
    NlExpr::Product(terms)
}

/// Polar two-port equations of one branch side, optionally multiplied by
/// an indicator:
///
/// ```text
/// p == z * ( self_g vm_s^2 + gc vm_s vm_o cos(va_s - va_o) + bc vm_s vm_o sin(va_s - va_o))
/// q == z * (-self_b vm_s^2 - bc vm_s vm_o cos(va_s - va_o) + gc vm_s vm_o sin(va_s - va_o))
/// ```
fn ohms(model: &mut GenericModel, sw: Option<Switched>, params: &BranchParams, side: Side) -> GridResult<()> {
    let (own, other) = params.buses(side);
    let vm_s = NlExpr::var(model.var("vm", VarIndex::Bus(own))?);
    let vm_o = NlExpr::var(model.var("vm", VarIndex::Bus(other))?);
    let va_s = model.var("va", VarIndex::Bus(own))?;
    let va_o = model.var("va", VarIndex::Bus(other))?;
    let (p, q) = arc_flows(model, sw, params, side)?;
    let gate = match sw {
        Some(s) => Some(s.indicator(model)?),
        None => None,
    };

    let c = params.side(side);
    let sq = vm_s.clone().sqr();
    let cos = NlExpr::diff(va_s, va_o).cos();
    let sin = NlExpr::diff(va_s, va_o).sin();

    let p_expr = NlExpr::Sum(vec![
        NlExpr::var(p),
        product(-c.self_g, &[&sq], gate),
        product(-c.gc, &[&vm_s, &vm_o, &cos], gate),
        product(-c.bc, &[&vm_s, &vm_o, &sin], gate),
    ]);
    let q_expr = NlExpr::Sum(vec![
        NlExpr::var(q),
        product(c.self_b, &[&sq], gate),
        product(c.bc, &[&vm_s, &vm_o, &cos], gate),
        product(-c.gc, &[&vm_s, &vm_o, &sin], gate),
    ]);

    let suffix = match (sw, side) {
        (None, Side::From) => "from".to_string(),
        (None, Side::To) => "to".to_string(),
        (Some(s), Side::From) => format!("from_{}", s.label()),
        (Some(s), Side::To) => format!("to_{}", s.label()),
    };
    let l = params.index;
    model.add_cone(
        format!("ohms_p_{suffix}[{l}]"),
        ConstraintKind::Nonlinear {
            expr: p_expr,
            sense: Sense::Equal,
            rhs: 0.0,
        },
    );
    model.add_cone(
        format!("ohms_q_{suffix}[{l}]"),
        ConstraintKind::Nonlinear {
            expr: q_expr,
            sense: Sense::Equal,
            rhs: 0.0,
        },
    );
    Ok(())
}

pub fn constraint_ohms_yt_from(model: &mut GenericModel, target: Target) -> GridResult<()> {
    let l = branch_target(names::OHMS_YT_FROM, target)?;
    let params = branch_params(model.reference(), l)?;
    ohms(model, None, &params, Side::From)
}

pub fn constraint_ohms_yt_to(model: &mut GenericModel, target: Target) -> GridResult<()> {
    let l = branch_target(names::OHMS_YT_TO, target)?;
    let params = branch_params(model.reference(), l)?;
    ohms(model, None, &params, Side::To)
}

fn switched_ohms(model: &mut GenericModel, name: &str, target: Target, side: Side) -> GridResult<()> {
    let sw = Switched::from_target(name, target)?;
    let params = sw.params(model.reference())?;
    ohms(model, Some(sw), &params, side)
}

pub fn constraint_ohms_yt_from_on_off(model: &mut GenericModel, target: Target) -> GridResult<()> {
    switched_ohms(model, names::OHMS_YT_FROM_ON_OFF, target, Side::From)
}

pub fn constraint_ohms_yt_to_on_off(model: &mut GenericModel, target: Target) -> GridResult<()> {
    switched_ohms(model, names::OHMS_YT_TO_ON_OFF, target, Side::To)
}

pub fn constraint_ohms_yt_from_ne(model: &mut GenericModel, target: Target) -> GridResult<()> {
    switched_ohms(model, names::OHMS_YT_FROM_NE, target, Side::From)
}

pub fn constraint_ohms_yt_to_ne(model: &mut GenericModel, target: Target) -> GridResult<()> {
    switched_ohms(model, names::OHMS_YT_TO_NE, target, Side::To)
}

/// `p^2 + q^2 <= rate^2` (times `z^2` when switched).
fn thermal(model: &mut GenericModel, sw: Option<Switched>, params: &BranchParams, side: Side) -> GridResult<()> {
    let rate = match (sw, params.rate) {
        (Some(s), _) => params.require_rate(s.component())?,
        (None, Some(rate)) => rate,
        (None, None) => return Ok(()),
    };
    let (p, q) = arc_flows(model, sw, params, side)?;
    let mut expr = Expr::zero().with_quad(1.0, p, p).with_quad(1.0, q, q);
    let l = params.index;
    let name = match sw {
        Some(s) => {
            let z = s.indicator(model)?;
            expr.add_quad(-rate * rate, z, z);
            format!("thermal_{}[{l},{side:?}]", s.label())
        }
        None => format!("thermal[{l},{side:?}]"),
    };
    let rhs = if sw.is_some() { 0.0 } else { rate * rate };
    model.add_row(name, expr, Sense::LessEqual, rhs);
    Ok(())
}

pub fn constraint_thermal_limit_from(model: &mut GenericModel, target: Target) -> GridResult<()> {
    let l = branch_target(names::THERMAL_LIMIT_FROM, target)?;
    let params = branch_params(model.reference(), l)?;
    thermal(model, None, &params, Side::From)
}

pub fn constraint_thermal_limit_to(model: &mut GenericModel, target: Target) -> GridResult<()> {
    let l = branch_target(names::THERMAL_LIMIT_TO, target)?;
    let params = branch_params(model.reference(), l)?;
    thermal(model, None, &params, Side::To)
}

fn switched_thermal(model: &mut GenericModel, name: &str, target: Target, side: Side) -> GridResult<()> {
    let sw = Switched::from_target(name, target)?;
    let params = sw.params(model.reference())?;
    thermal(model, Some(sw), &params, side)
}

pub fn constraint_thermal_limit_from_on_off(model: &mut GenericModel, target: Target) -> GridResult<()> {
    switched_thermal(model, names::THERMAL_LIMIT_FROM_ON_OFF, target, Side::From)
}

pub fn constraint_thermal_limit_to_on_off(model: &mut GenericModel, target: Target) -> GridResult<()> {
    switched_thermal(model, names::THERMAL_LIMIT_TO_ON_OFF, target, Side::To)
}

pub fn constraint_thermal_limit_from_ne(model: &mut GenericModel, target: Target) -> GridResult<()> {
    switched_thermal(model, names::THERMAL_LIMIT_FROM_NE, target, Side::From)
}

pub fn constraint_thermal_limit_to_ne(model: &mut GenericModel, target: Target) -> GridResult<()> {
    switched_thermal(model, names::THERMAL_LIMIT_TO_NE, target, Side::To)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formulation::Formulation;
    use gridopt_core::{Branch, BranchArc, Bus, BusType, NetworkData};

    fn line() -> NetworkData {
        NetworkData::new("line")
            .with_bus(Bus {
                index: 1,
                bus_type: BusType::Reference,
                ..Bus::default()
            })
            .with_bus(Bus {
                index: 2,
                ..Bus::default()
            })
            .with_branch(Branch {
                index: 1,
                f_bus: 1,
                t_bus: 2,
                br_x: 0.5,
                rate_a: Some(1.0),
                ..Branch::default()
            })
    }

    #[test]
    fn test_lossless_line_operating_point() {
        let mut model = GenericModel::from_data(&line(), Formulation::acp()).unwrap();
        model.add_variable(names::VOLTAGE).unwrap();
        model.add_variable(names::BRANCH_FLOW).unwrap();
        model.add_constraint(names::OHMS_YT_FROM, Target::Branch(1)).unwrap();
        model.add_constraint(names::OHMS_YT_TO, Target::Branch(1)).unwrap();
        model.add_constraint(names::THERMAL_LIMIT_FROM, Target::Branch(1)).unwrap();

        let theta = 0.1f64;
        let mut values = vec![0.0; model.program().num_variables()];
        let mut set = |name: &str, index: VarIndex, x: f64| {
            values[model.var(name, index).unwrap().0] = x;
        };
        set("vm", VarIndex::Bus(1), 1.0);
        set("vm", VarIndex::Bus(2), 1.0);
        set("va", VarIndex::Bus(2), -theta);
        let fwd = BranchArc::new(1, 1, 2);
        let rev = BranchArc::new(1, 2, 1);
        set("p", VarIndex::Arc(fwd), 2.0 * theta.sin());
        set("p", VarIndex::Arc(rev), -2.0 * theta.sin());
        set("q", VarIndex::Arc(fwd), 2.0 - 2.0 * theta.cos());
        set("q", VarIndex::Arc(rev), 2.0 - 2.0 * theta.cos());

        assert!(model.program().max_violation(&values) < 1e-12);
        assert_eq!(
            model.program().problem_class(),
            crate::program::ProblemClass::NonlinearProgram
        );
    }

    #[test]
    fn test_switched_thermal_needs_rate() {
        let mut data = line();
        data.branch.get_mut("1").unwrap().rate_a = None;
        let mut model = GenericModel::from_data(&data, Formulation::acp()).unwrap();
        model.add_variable(names::VOLTAGE).unwrap();
        model.add_variable(names::BRANCH_FLOW).unwrap();
        model.add_variable(names::BRANCH_INDICATOR).unwrap();
        let err = model
            .add_constraint(names::THERMAL_LIMIT_FROM_ON_OFF, Target::Branch(1))
            .unwrap_err();
        assert!(matches!(err, gridopt_core::GridError::DataInconsistency { .. }));
        // Unswitched limits simply skip unlimited branches.
        model.add_constraint(names::THERMAL_LIMIT_FROM, Target::Branch(1)).unwrap();
    }
}
