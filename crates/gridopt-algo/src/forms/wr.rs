//! Lifted `W`-space formulations.
//!
//! `w[i]` stands for `vm_i^2`, and per bus pair `(i, j)` with `i < j`
//! `wr = vm_i vm_j cos(va_i - va_j)` and `wi = vm_i vm_j sin(va_i - va_j)`.
//! Branch equations are linear in these variables; the non-convex link
//! `wr^2 + wi^2 = w_i w_j` is relaxed to a rotated cone (`SOCWR`), and
//! `QCWR` additionally keeps `vm`/`va` and ties them to `W` through the
//! relaxation primitives.

use gridopt_core::{BusPair, BusPairKey, GridResult};

use super::{branch_params, branch_target, names, BranchParams, Side};
use crate::model::{GenericModel, Target, VarIndex};
use crate::program::{Expr, Sense, VarId};
use crate::relaxation::{
    cos_bounds, product_bounds, relaxation_complex_product, relaxation_cos, relaxation_product,
    relaxation_sin, relaxation_sqr, sin_bounds,
};

type Interval = (f64, f64);

/// Bounds of `(wr, wi)` implied by the magnitude and angle limits of a pair.
fn voltage_product_bounds(pair: &BusPair) -> (Interval, Interval) {
    let (amin, amax) = (pair.angmin, pair.angmax);
    let lo = pair.vm_fr_min * pair.vm_to_min;
    let hi = pair.vm_fr_max * pair.vm_to_max;
    if amin >= 0.0 {
        (
            (lo * amax.cos(), hi * amin.cos()),
            (lo * amin.sin(), hi * amax.sin()),
        )
    } else if amax <= 0.0 {
        (
            (lo * amin.cos(), hi * amax.cos()),
            (hi * amin.sin(), lo * amax.sin()),
        )
    } else {
        (
            (lo * amin.cos().min(amax.cos()), hi),
            (hi * amin.sin(), hi * amax.sin()),
        )
    }
}

/// `w`, `wr`, `wi`.
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
    for (key, pair) in &reference.buspairs {
        let ((wr_lb, wr_ub), (wi_lb, wi_ub)) = if bounded {
            voltage_product_bounds(pair)
        } else {
            (
                (f64::NEG_INFINITY, f64::INFINITY),
                (f64::NEG_INFINITY, f64::INFINITY),
            )
        };
        model.new_var("wr", VarIndex::BusPair(*key), wr_lb, wr_ub);
        model.new_var("wi", VarIndex::BusPair(*key), wi_lb, wi_ub);
    }
    Ok(())
}

/// `W` variables plus polar magnitudes and angles, angle differences `td`,
/// their sine `si` and cosine `cs`, and the magnitude products `vv`.
///
/// The relaxations need finite operand bounds, so magnitudes are bounded
/// even when the model is not.
pub fn variable_voltage_qc(model: &mut GenericModel, target: Target) -> GridResult<()> {
    let bounded = model.bounded();
    model.set_bounded(true);
    let result = variable_voltage(model, target);
    model.set_bounded(bounded);
    result?;

    let reference = model.shared_reference();
    for (i, bus) in &reference.bus {
        model.new_var("vm", VarIndex::Bus(*i), bus.vmin, bus.vmax);
        model.new_var("va", VarIndex::Bus(*i), f64::NEG_INFINITY, f64::INFINITY);
    }
    for (key, pair) in &reference.buspairs {
        let index = VarIndex::BusPair(*key);
        model.new_var("td", index, pair.angmin, pair.angmax);
        let (si_lb, si_ub) = sin_bounds(pair.angmin, pair.angmax);
        model.new_var("si", index, si_lb, si_ub);
        let (cs_lb, cs_ub) = cos_bounds(pair.angmin, pair.angmax);
        model.new_var("cs", index, cs_lb, cs_ub);
        let (vv_lb, vv_ub) = product_bounds(
            (pair.vm_fr_min, pair.vm_fr_max),
            (pair.vm_to_min, pair.vm_to_max),
        );
        model.new_var("vv", index, vv_lb, vv_ub);
    }
    Ok(())
}

fn pair_w(model: &GenericModel, key: BusPairKey) -> GridResult<(VarId, VarId, VarId, VarId)> {
    Ok((
        model.var("w", VarIndex::Bus(key.0))?,
        model.var("w", VarIndex::Bus(key.1))?,
        model.var("wr", VarIndex::BusPair(key))?,
        model.var("wi", VarIndex::BusPair(key))?,
    ))
}

/// `wr^2 + wi^2 <= w_i w_j` per bus pair.
pub fn constraint_voltage(model: &mut GenericModel, _: Target) -> GridResult<()> {
    let reference = model.shared_reference();
    for key in reference.buspairs.keys() {
        let (w_i, w_j, wr, wi) = pair_w(model, *key)?;
        let name = format!("voltage[{},{}]", key.0, key.1);
        relaxation_complex_product(model.program_mut(), &name, w_i, w_j, wr, wi)?;
    }
    Ok(())
}

/// QC linking rows:
///
/// ```text
/// w_i  ~ vm_i^2                 td == va_i - va_j
/// si   ~ sin(td)                cs ~ cos(td)
/// vv   ~ vm_i vm_j              wr ~ vv cs        wi ~ vv si
/// wr^2 + wi^2 <= w_i w_j
/// ```
pub fn constraint_voltage_qc(model: &mut GenericModel, _: Target) -> GridResult<()> {
    let reference = model.shared_reference();
    for i in reference.bus.keys() {
        let vm = model.var("vm", VarIndex::Bus(*i))?;
        let w = model.var("w", VarIndex::Bus(*i))?;
        relaxation_sqr(model.program_mut(), &format!("vm_sqr[{i}]"), vm, w)?;
    }
    for key in reference.buspairs.keys() {
        let (i, j) = *key;
        let index = VarIndex::BusPair(*key);
        let td = model.var("td", index)?;
        let si = model.var("si", index)?;
        let cs = model.var("cs", index)?;
        let vv = model.var("vv", index)?;
        let va_i = model.var("va", VarIndex::Bus(i))?;
        let va_j = model.var("va", VarIndex::Bus(j))?;
        let vm_i = model.var("vm", VarIndex::Bus(i))?;
        let vm_j = model.var("vm", VarIndex::Bus(j))?;
        let (w_i, w_j, wr, wi) = pair_w(model, *key)?;

        model.add_row(
            format!("td[{i},{j}]"),
            Expr::var(td).with_term(-1.0, va_i).with_term(1.0, va_j),
            Sense::Equal,
            0.0,
        );
        let program = model.program_mut();
        relaxation_sin(program, &format!("si[{i},{j}]"), td, si)?;
        relaxation_cos(program, &format!("cs[{i},{j}]"), td, cs)?;
        relaxation_product(program, &format!("vv[{i},{j}]"), vm_i, vm_j, vv)?;
        relaxation_product(program, &format!("wr[{i},{j}]"), vv, cs, wr)?;
        relaxation_product(program, &format!("wi[{i},{j}]"), vv, si, wi)?;
        relaxation_complex_product(program, &format!("voltage[{i},{j}]"), w_i, w_j, wr, wi)?;
    }
    Ok(())
}

/// `(wr, wi)` oriented from the branch's from bus to its to bus.
fn branch_w(model: &GenericModel, params: &BranchParams) -> GridResult<(VarId, VarId, f64)> {
    let key = gridopt_core::pair_key(params.f_bus, params.t_bus);
    let wr = model.var("wr", VarIndex::BusPair(key))?;
    let wi = model.var("wi", VarIndex::BusPair(key))?;
    let sign = if params.f_bus <= params.t_bus { 1.0 } else { -1.0 };
    Ok((wr, wi, sign))
}

/// Linear branch equations in `W` space:
///
/// ```text
/// p ==  self_g w_s + gc wr + bc wi_so
/// q == -self_b w_s - bc wr + gc wi_so
/// ```
fn ohms(model: &mut GenericModel, params: &BranchParams, side: Side) -> GridResult<()> {
    let (own, _) = params.buses(side);
    let arc = params.arc(side);
    let p = model.var("p", VarIndex::Arc(arc))?;
    let q = model.var("q", VarIndex::Arc(arc))?;
    let w = model.var("w", VarIndex::Bus(own))?;
    let (wr, wi, sign) = branch_w(model, params)?;
    let wi_sign = match side {
        Side::From => sign,
        Side::To => -sign,
    };
    let c = params.side(side);
    let label = match side {
        Side::From => "from",
        Side::To => "to",
    };
    let l = params.index;

    let p_expr = Expr::var(p)
        .with_term(-c.self_g, w)
        .with_term(-c.gc, wr)
        .with_term(-c.bc * wi_sign, wi);
    model.add_row(format!("ohms_p_{label}[{l}]"), p_expr, Sense::Equal, 0.0);
    let q_expr = Expr::var(q)
        .with_term(c.self_b, w)
        .with_term(c.bc, wr)
        .with_term(-c.gc * wi_sign, wi);
    model.add_row(format!("ohms_q_{label}[{l}]"), q_expr, Sense::Equal, 0.0);
    Ok(())
}

pub fn constraint_ohms_yt_from(model: &mut GenericModel, target: Target) -> GridResult<()> {
    let l = branch_target(names::OHMS_YT_FROM, target)?;
    let params = branch_params(model.reference(), l)?;
    ohms(model, &params, Side::From)
}

pub fn constraint_ohms_yt_to(model: &mut GenericModel, target: Target) -> GridResult<()> {
    let l = branch_target(names::OHMS_YT_TO, target)?;
    let params = branch_params(model.reference(), l)?;
    ohms(model, &params, Side::To)
}

/// `tan(angmin) wr <= wi_ft <= tan(angmax) wr`.
pub fn constraint_voltage_angle_difference(model: &mut GenericModel, target: Target) -> GridResult<()> {
    let l = branch_target(names::VOLTAGE_ANGLE_DIFFERENCE, target)?;
    let params = branch_params(model.reference(), l)?;
    let (wr, wi, sign) = branch_w(model, &params)?;
    model.add_row(
        format!("vad_ub[{l}]"),
        Expr::term(sign, wi).with_term(-params.angmax.tan(), wr),
        Sense::LessEqual,
        0.0,
    );
    model.add_row(
        format!("vad_lb[{l}]"),
        Expr::term(sign, wi).with_term(-params.angmin.tan(), wr),
        Sense::GreaterEqual,
        0.0,
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formulation::Formulation;
    use gridopt_core::{Branch, BranchArc, Bus, BusType, NetworkData};

    // Branch 1 runs from the higher bus index to the lower one.
    fn reversed_line() -> NetworkData {
        NetworkData::new("reversed")
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
                f_bus: 2,
                t_bus: 1,
                br_x: 0.5,
                rate_a: Some(1.0),
                ..Branch::default()
            })
    }

    fn set(model: &GenericModel, values: &mut [f64], name: &str, index: VarIndex, x: f64) {
        values[model.var(name, index).unwrap().0] = x;
    }

    #[test]
    fn test_voltage_product_bounds_contain_operating_points() {
        let pair = BusPair {
            key: (1, 2),
            branches: vec![1],
            angmin: -0.5,
            angmax: 0.3,
            rate_a: None,
            vm_fr_min: 0.9,
            vm_fr_max: 1.1,
            vm_to_min: 0.95,
            vm_to_max: 1.05,
        };
        let ((wr_lb, wr_ub), (wi_lb, wi_ub)) = voltage_product_bounds(&pair);
        for vi in [0.9, 1.0, 1.1] {
            for vj in [0.95, 1.05] {
                for theta in [-0.5, -0.1, 0.0, 0.3] {
                    let (wr, wi) = (vi * vj * f64::cos(theta), vi * vj * f64::sin(theta));
                    assert!(wr >= wr_lb - 1e-12 && wr <= wr_ub + 1e-12);
                    assert!(wi >= wi_lb - 1e-12 && wi <= wi_ub + 1e-12);
                }
            }
        }
    }

    #[test]
    fn test_socwr_exact_point_on_reversed_branch() {
        let mut model = GenericModel::from_data(&reversed_line(), Formulation::socwr()).unwrap();
        model.add_variable(names::VOLTAGE).unwrap();
        model.add_variable(names::BRANCH_FLOW).unwrap();
        model.add_constraint(names::VOLTAGE, Target::Network).unwrap();
        model.add_constraint(names::OHMS_YT_FROM, Target::Branch(1)).unwrap();
        model.add_constraint(names::OHMS_YT_TO, Target::Branch(1)).unwrap();
        model
            .add_constraint(names::VOLTAGE_ANGLE_DIFFERENCE, Target::Branch(1))
            .unwrap();

        // va_2 - va_1 = 0.1 at unit magnitudes; pair (1,2) sees -0.1.
        let theta: f64 = 0.1;
        let mut values = vec![0.0; model.program().num_variables()];
        set(&model, &mut values, "w", VarIndex::Bus(1), 1.0);
        set(&model, &mut values, "w", VarIndex::Bus(2), 1.0);
        set(&model, &mut values, "wr", VarIndex::BusPair((1, 2)), theta.cos());
        set(&model, &mut values, "wi", VarIndex::BusPair((1, 2)), -theta.sin());
        let from = BranchArc::new(1, 2, 1);
        let to = from.reversed();
        set(&model, &mut values, "p", VarIndex::Arc(from), 2.0 * theta.sin());
        set(&model, &mut values, "p", VarIndex::Arc(to), -2.0 * theta.sin());
        set(&model, &mut values, "q", VarIndex::Arc(from), 2.0 - 2.0 * theta.cos());
        set(&model, &mut values, "q", VarIndex::Arc(to), 2.0 - 2.0 * theta.cos());
        assert!(model.program().max_violation(&values) < 1e-9);

        // flipping the angle sign breaks Ohm's law on both sides
        set(&model, &mut values, "wi", VarIndex::BusPair((1, 2)), theta.sin());
        assert!(model.program().max_violation(&values) > 0.1);
    }

    #[test]
    fn test_qcwr_rows_hold_at_exact_point() {
        let mut model = GenericModel::from_data(&reversed_line(), Formulation::qcwr()).unwrap();
        model.add_variable(names::VOLTAGE).unwrap();
        model.add_constraint(names::VOLTAGE, Target::Network).unwrap();
        model.add_constraint(names::THETA_REF, Target::Bus(1)).unwrap();
        assert!(model.has_var_group("td"));

        let (vm1, vm2, va2): (f64, f64, f64) = (1.02, 0.97, 0.2);
        let td = -va2;
        let key = VarIndex::BusPair((1, 2));
        let mut values = vec![0.0; model.program().num_variables()];
        set(&model, &mut values, "vm", VarIndex::Bus(1), vm1);
        set(&model, &mut values, "vm", VarIndex::Bus(2), vm2);
        set(&model, &mut values, "va", VarIndex::Bus(2), va2);
        set(&model, &mut values, "w", VarIndex::Bus(1), vm1 * vm1);
        set(&model, &mut values, "w", VarIndex::Bus(2), vm2 * vm2);
        set(&model, &mut values, "td", key, td);
        set(&model, &mut values, "si", key, td.sin());
        set(&model, &mut values, "cs", key, td.cos());
        set(&model, &mut values, "vv", key, vm1 * vm2);
        set(&model, &mut values, "wr", key, vm1 * vm2 * td.cos());
        set(&model, &mut values, "wi", key, vm1 * vm2 * td.sin());
        assert!(model.program().max_violation(&values) < 1e-9);
    }

    #[test]
    fn test_qcwr_unbounded_keeps_magnitude_bounds() {
        let mut model = GenericModel::from_data(&reversed_line(), Formulation::qcwr()).unwrap();
        model.set_bounded(false);
        model.add_variable(names::VOLTAGE).unwrap();
        assert!(!model.bounded());
        let vm = model.var("vm", VarIndex::Bus(2)).unwrap();
        assert_eq!(model.program().bounds(vm), (0.9, 1.1));
        assert!(model.add_constraint(names::VOLTAGE, Target::Network).is_ok());
    }
}
