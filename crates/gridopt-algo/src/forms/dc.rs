//! Linearized DC formulations: `DCP` (angles + Ohm's law) and `NFA`
//! (transport flow, registered as tag overrides that drop the angle rows).

use gridopt_core::GridResult;

use super::{branch_params, branch_target, names, BranchParams, Side, Switched};
use crate::model::{GenericModel, Target, VarIndex};
use crate::program::{Expr, Sense, VarId};

/// Free `va` per bus.
pub fn variable_voltage(model: &mut GenericModel, _: Target) -> GridResult<()> {
    let reference = model.shared_reference();
    for i in reference.bus.keys() {
        model.new_var("va", VarIndex::Bus(*i), f64::NEG_INFINITY, f64::INFINITY);
    }
    Ok(())
}

fn arc_p(model: &GenericModel, sw: Option<Switched>, params: &BranchParams, side: Side) -> GridResult<VarId> {
    let arc = params.arc(side);
    match sw {
        Some(s) => model.var(s.p_name(), s.flow_index(arc)),
        None => model.var("p", VarIndex::Arc(arc)),
    }
}

/// `-b (va_fr - va_to)` as an expression.
fn angle_flow(model: &GenericModel, params: &BranchParams) -> GridResult<(Expr, f64)> {
    let va_fr = model.var("va", VarIndex::Bus(params.f_bus))?;
    let va_to = model.var("va", VarIndex::Bus(params.t_bus))?;
    Ok((Expr::var(va_fr).with_term(-1.0, va_to), -params.b))
}

/// `p_fr == -b (va_fr - va_to)`.
pub fn constraint_ohms_yt_from(model: &mut GenericModel, target: Target) -> GridResult<()> {
    let l = branch_target(names::OHMS_YT_FROM, target)?;
    let params = branch_params(model.reference(), l)?;
    let p_fr = arc_p(model, None, &params, Side::From)?;
    let (delta, k) = angle_flow(model, &params)?;
    model.add_equal(format!("ohms_p_from[{l}]"), Expr::var(p_fr), delta.scaled(k));
    Ok(())
}

fn lossless(model: &mut GenericModel, sw: Option<Switched>, params: &BranchParams) -> GridResult<()> {
    let p_fr = arc_p(model, sw, params, Side::From)?;
    let p_to = arc_p(model, sw, params, Side::To)?;
    let label = sw.map_or("to", |s| match s {
        Switched::OnOff(_) => "to_on_off",
        Switched::Expansion(_) => "to_ne",
    });
    model.add_row(
        format!("ohms_p_{label}[{}]", params.index),
        Expr::var(p_fr).with_term(1.0, p_to),
        Sense::Equal,
        0.0,
    );
    Ok(())
}

/// `p_fr + p_to == 0`.
pub fn constraint_ohms_yt_to(model: &mut GenericModel, target: Target) -> GridResult<()> {
    let l = branch_target(names::OHMS_YT_TO, target)?;
    let params = branch_params(model.reference(), l)?;
    lossless(model, None, &params)
}

/// Big-M form of `p_fr == z * k (va_fr - va_to)` with `k = -b`:
///
/// ```text
/// p_fr <= k (Δ - lo (1 - z))
/// p_fr >= k (Δ - hi (1 - z))
/// ```
///
/// where `(lo, hi)` is `(off_angmin, off_angmax)` for `k >= 0` and swapped
/// otherwise, so that both rows are slack for any angle difference when
/// the branch is off.
fn switched_ohms_from(model: &mut GenericModel, sw: Switched) -> GridResult<()> {
    let reference = model.shared_reference();
    let params = sw.params(&reference)?;
    let z = sw.indicator(model)?;
    let p_fr = arc_p(model, Some(sw), &params, Side::From)?;
    let (delta, k) = angle_flow(model, &params)?;
    let (lo, hi) = if k >= 0.0 {
        (reference.off_angmin, reference.off_angmax)
    } else {
        (reference.off_angmax, reference.off_angmin)
    };
    let l = params.index;
    let label = sw.label();

    // p - kΔ - k lo z <= -k lo
    let upper = Expr::var(p_fr) - delta.clone().scaled(k);
    model.add_row(
        format!("ohms_p_from_{label}_ub[{l}]"),
        upper.with_term(-k * lo, z),
        Sense::LessEqual,
        -k * lo,
    );
    // p - kΔ - k hi z >= -k hi
    let lower = Expr::var(p_fr) - delta.scaled(k);
    model.add_row(
        format!("ohms_p_from_{label}_lb[{l}]"),
        lower.with_term(-k * hi, z),
        Sense::GreaterEqual,
        -k * hi,
    );
    Ok(())
}

pub fn constraint_ohms_yt_from_on_off(model: &mut GenericModel, target: Target) -> GridResult<()> {
    let sw = Switched::from_target(names::OHMS_YT_FROM_ON_OFF, target)?;
    switched_ohms_from(model, sw)
}

pub fn constraint_ohms_yt_from_ne(model: &mut GenericModel, target: Target) -> GridResult<()> {
    let sw = Switched::from_target(names::OHMS_YT_FROM_NE, target)?;
    switched_ohms_from(model, sw)
}

pub fn constraint_ohms_yt_to_on_off(model: &mut GenericModel, target: Target) -> GridResult<()> {
    let sw = Switched::from_target(names::OHMS_YT_TO_ON_OFF, target)?;
    let params = sw.params(model.reference())?;
    lossless(model, Some(sw), &params)
}

pub fn constraint_ohms_yt_to_ne(model: &mut GenericModel, target: Target) -> GridResult<()> {
    let sw = Switched::from_target(names::OHMS_YT_TO_NE, target)?;
    let params = sw.params(model.reference())?;
    lossless(model, Some(sw), &params)
}

/// `-rate <= p_fr <= rate`.
pub fn constraint_thermal_limit_from(model: &mut GenericModel, target: Target) -> GridResult<()> {
    let l = branch_target(names::THERMAL_LIMIT_FROM, target)?;
    let params = branch_params(model.reference(), l)?;
    let Some(rate) = params.rate else {
        return Ok(());
    };
    let p_fr = arc_p(model, None, &params, Side::From)?;
    model.add_row(format!("thermal_ub[{l}]"), Expr::var(p_fr), Sense::LessEqual, rate);
    model.add_row(format!("thermal_lb[{l}]"), Expr::var(p_fr), Sense::GreaterEqual, -rate);
    Ok(())
}

/// `-rate z <= p_fr <= rate z`.
fn switched_thermal(model: &mut GenericModel, sw: Switched) -> GridResult<()> {
    let params = sw.params(model.reference())?;
    let rate = params.require_rate(sw.component())?;
    let z = sw.indicator(model)?;
    let p_fr = arc_p(model, Some(sw), &params, Side::From)?;
    let l = params.index;
    let label = sw.label();
    model.add_row(
        format!("thermal_{label}_ub[{l}]"),
        Expr::var(p_fr).with_term(-rate, z),
        Sense::LessEqual,
        0.0,
    );
    model.add_row(
        format!("thermal_{label}_lb[{l}]"),
        Expr::var(p_fr).with_term(rate, z),
        Sense::GreaterEqual,
        0.0,
    );
    Ok(())
}

pub fn constraint_thermal_limit_from_on_off(model: &mut GenericModel, target: Target) -> GridResult<()> {
    let sw = Switched::from_target(names::THERMAL_LIMIT_FROM_ON_OFF, target)?;
    switched_thermal(model, sw)
}

pub fn constraint_thermal_limit_from_ne(model: &mut GenericModel, target: Target) -> GridResult<()> {
    let sw = Switched::from_target(names::THERMAL_LIMIT_FROM_NE, target)?;
    switched_thermal(model, sw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formulation::Formulation;
    use gridopt_core::{Branch, BranchArc, Bus, BusType, NetworkData};

    fn pair() -> NetworkData {
        NetworkData::new("pair")
            .with_bus(Bus {
                index: 1,
                bus_type: BusType::Reference,
                ..Bus::default()
            })
            .with_bus(Bus {
                index: 2,
                ..Bus::default()
            })
            .with_bus(Bus {
                index: 3,
                ..Bus::default()
            })
            .with_branch(Branch {
                index: 1,
                f_bus: 1,
                t_bus: 2,
                br_x: 0.25,
                rate_a: Some(2.0),
                ..Branch::default()
            })
            .with_branch(Branch {
                index: 2,
                f_bus: 2,
                t_bus: 3,
                br_x: 0.5,
                rate_a: Some(2.0),
                ..Branch::default()
            })
    }

    fn switched_model() -> GenericModel {
        let mut model = GenericModel::from_data(&pair(), Formulation::dcp()).unwrap();
        model.add_variable(names::VOLTAGE_ON_OFF).unwrap();
        model.add_variable(names::BRANCH_FLOW).unwrap();
        model.add_variable(names::BRANCH_INDICATOR).unwrap();
        model
            .add_constraint(names::OHMS_YT_FROM_ON_OFF, Target::Branch(1))
            .unwrap();
        model
            .add_constraint(names::VOLTAGE_ANGLE_DIFFERENCE_ON_OFF, Target::Branch(1))
            .unwrap();
        model
            .add_constraint(names::THERMAL_LIMIT_FROM_ON_OFF, Target::Branch(1))
            .unwrap();
        model
    }

    fn point(model: &GenericModel, delta: f64, p: f64, z: f64) -> Vec<f64> {
        let mut values = vec![0.0; model.program().num_variables()];
        values[model.var("va", VarIndex::Bus(2)).unwrap().0] = -delta;
        values[model.var("p", VarIndex::Arc(BranchArc::new(1, 1, 2))).unwrap().0] = p;
        values[model.var("z_branch", VarIndex::Branch(1)).unwrap().0] = z;
        values
    }

    #[test]
    fn test_on_off_ohms_exact_when_on() {
        let model = switched_model();
        // k = -b = 4
        let on = point(&model, 0.2, 0.8, 1.0);
        assert!(model.program().max_violation(&on) < 1e-12);
        let wrong = point(&model, 0.2, 0.5, 1.0);
        assert!(model.program().max_violation(&wrong) > 0.1);
    }

    #[test]
    fn test_on_off_ohms_relaxed_when_off() {
        let model = switched_model();
        let reference = model.reference();
        // Any angle difference inside the off window is allowed with zero flow.
        for delta in [reference.off_angmin, 0.0, reference.off_angmax] {
            let off = point(&model, delta, 0.0, 0.0);
            assert!(model.program().max_violation(&off) < 1e-12, "delta {delta}");
        }
        let flowing = point(&model, 0.0, 0.3, 0.0);
        assert!(model.program().max_violation(&flowing) > 0.1);
    }

    #[test]
    fn test_nfa_skips_ohms_and_angles() {
        let mut model = GenericModel::from_data(&pair(), Formulation::nfa()).unwrap();
        model.add_variable(names::VOLTAGE).unwrap();
        model.add_variable(names::BRANCH_FLOW).unwrap();
        model.add_constraint(names::OHMS_YT_FROM, Target::Branch(1)).unwrap();
        model.add_constraint(names::OHMS_YT_TO, Target::Branch(1)).unwrap();
        assert!(!model.has_var_group("va"));
        assert_eq!(model.program().num_constraints(), 1);
    }
}
