//! Builders shared by every formulation family.

use gridopt_core::{BranchArc, GridError, GridResult};
use tracing::debug;

use super::{
    branch_params, branch_target, bus_target, dcline_target, gen_target, names, Switched,
};
use crate::formulation::Family;
use crate::model::{GenericModel, Target, VarIndex};
use crate::program::{ConstraintKind, Expr, Sense};

fn limits(bounded: bool, lb: f64, ub: f64) -> (f64, f64) {
    if bounded {
        (lb, ub)
    } else {
        (f64::NEG_INFINITY, f64::INFINITY)
    }
}

// ---------------------------------------------------------------------------
// Variables
// ---------------------------------------------------------------------------

pub fn variable_active_generation(model: &mut GenericModel, _: Target) -> GridResult<()> {
    let reference = model.shared_reference();
    let bounded = model.bounded();
    for (i, gen) in &reference.gen {
        let (lb, ub) = limits(bounded, gen.pmin, gen.pmax);
        model.new_var("pg", VarIndex::Gen(*i), lb, ub);
    }
    Ok(())
}

pub fn variable_reactive_generation(model: &mut GenericModel, _: Target) -> GridResult<()> {
    let reference = model.shared_reference();
    let bounded = model.bounded();
    for (i, gen) in &reference.gen {
        let (lb, ub) = limits(bounded, gen.qmin, gen.qmax);
        model.new_var("qg", VarIndex::Gen(*i), lb, ub);
    }
    Ok(())
}

fn add_flow_vars(
    model: &mut GenericModel,
    arcs: &[BranchArc],
    rate_of: impl Fn(usize) -> Option<f64>,
    index_of: impl Fn(BranchArc) -> VarIndex,
    labels: (&str, &str),
) {
    let bounded = model.bounded();
    let reactive = model.family().has_reactive_power();
    for arc in arcs {
        let (lb, ub) = match rate_of(arc.branch) {
            Some(rate) if bounded => (-rate, rate),
            _ => (f64::NEG_INFINITY, f64::INFINITY),
        };
        model.new_var(labels.0, index_of(*arc), lb, ub);
        if reactive {
            model.new_var(labels.1, index_of(*arc), lb, ub);
        }
    }
}

/// `p` (and `q` for families with reactive power) on every arc.
pub fn variable_branch_flow(model: &mut GenericModel, _: Target) -> GridResult<()> {
    let reference = model.shared_reference();
    add_flow_vars(
        model,
        &reference.arcs,
        |l| reference.branch.get(&l).and_then(|b| b.rate_a),
        VarIndex::Arc,
        ("p", "q"),
    );
    Ok(())
}

/// Flows on candidate-branch arcs.
pub fn variable_branch_flow_ne(model: &mut GenericModel, _: Target) -> GridResult<()> {
    let reference = model.shared_reference();
    let Some(ne) = reference.ne.as_ref() else {
        return Ok(());
    };
    add_flow_vars(
        model,
        &ne.arcs.all,
        |l| ne.branch.get(&l).and_then(|b| b.rate_a),
        VarIndex::NeArc,
        ("p_ne", "q_ne"),
    );
    Ok(())
}

pub fn variable_dcline_flow(model: &mut GenericModel, _: Target) -> GridResult<()> {
    let reference = model.shared_reference();
    let bounded = model.bounded();
    let reactive = model.family().has_reactive_power();
    for arc in &reference.arcs_from_dc {
        let Some(dc) = reference.dcline.get(&arc.branch) else {
            continue;
        };
        let (plb, pub_) = limits(bounded, dc.pminf, dc.pmaxf);
        model.new_var("p_dc", VarIndex::DcArc(*arc), plb, pub_);
        let (tlb, tub) = limits(bounded, dc.pmint, dc.pmaxt);
        model.new_var("p_dc", VarIndex::DcArc(arc.reversed()), tlb, tub);
        if reactive {
            let (lb, ub) = limits(bounded, dc.qminf, dc.qmaxf);
            model.new_var("q_dc", VarIndex::DcArc(*arc), lb, ub);
            let (lb, ub) = limits(bounded, dc.qmint, dc.qmaxt);
            model.new_var("q_dc", VarIndex::DcArc(arc.reversed()), lb, ub);
        }
    }
    Ok(())
}

/// Binary on/off status `z_branch` per branch.
pub fn variable_branch_indicator(model: &mut GenericModel, _: Target) -> GridResult<()> {
    let reference = model.shared_reference();
    for l in reference.branch.keys() {
        model.new_binary("z_branch", VarIndex::Branch(*l));
    }
    Ok(())
}

/// Binary build decision `built` per candidate branch.
pub fn variable_branch_ne(model: &mut GenericModel, _: Target) -> GridResult<()> {
    let reference = model.shared_reference();
    if let Some(ne) = reference.ne.as_ref() {
        for l in ne.branch.keys() {
            model.new_binary("built", VarIndex::NeBranch(*l));
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Bus constraints
// ---------------------------------------------------------------------------

/// `va[i] == 0` at a reference bus.
pub fn constraint_theta_ref(model: &mut GenericModel, target: Target) -> GridResult<()> {
    let i = bus_target(names::THETA_REF, target)?;
    let va = model.var("va", VarIndex::Bus(i))?;
    model.add_row(format!("theta_ref[{i}]"), Expr::var(va), Sense::Equal, 0.0);
    Ok(())
}

/// `w[i] == vm_set^2` for the squared-magnitude families.
pub fn constraint_voltage_magnitude_setpoint_sqr(
    model: &mut GenericModel,
    target: Target,
) -> GridResult<()> {
    let i = bus_target(names::VOLTAGE_MAGNITUDE_SETPOINT, target)?;
    let vm = model
        .reference()
        .bus
        .get(&i)
        .map(|b| b.vm)
        .ok_or_else(|| GridError::data("bus", i, "not an active bus"))?;
    let w = model.var("w", VarIndex::Bus(i))?;
    model.add_row(format!("vm_setpoint[{i}]"), Expr::var(w), Sense::Equal, vm * vm);
    Ok(())
}

/// Squared-voltage expression multiplying the bus shunts.
fn shunt_voltage(model: &GenericModel, i: usize) -> GridResult<Expr> {
    Ok(match model.family() {
        Family::Dc => Expr::constant(1.0),
        Family::AcPolar => {
            let vm = model.var("vm", VarIndex::Bus(i))?;
            Expr::zero().with_quad(1.0, vm, vm)
        }
        Family::Wr | Family::BranchFlow => Expr::var(model.var("w", VarIndex::Bus(i))?),
    })
}

fn kcl(model: &mut GenericModel, i: usize, with_expansion: bool) -> GridResult<()> {
    let reference = model.shared_reference();
    let reactive = model.family().has_reactive_power();
    let w = shunt_voltage(model, i)?;

    let mut p_bal = Expr::zero();
    let mut q_bal = Expr::zero();
    for arc in reference.bus_arcs.get(&i).into_iter().flatten() {
        p_bal.add_term(1.0, model.var("p", VarIndex::Arc(*arc))?);
        if reactive {
            q_bal.add_term(1.0, model.var("q", VarIndex::Arc(*arc))?);
        }
    }
    for arc in reference.bus_arcs_dc.get(&i).into_iter().flatten() {
        p_bal.add_term(1.0, model.var("p_dc", VarIndex::DcArc(*arc))?);
        if reactive {
            q_bal.add_term(1.0, model.var("q_dc", VarIndex::DcArc(*arc))?);
        }
    }
    if with_expansion {
        if let Some(ne) = reference.ne.as_ref() {
            for arc in ne.arcs.bus_arcs.get(&i).into_iter().flatten() {
                p_bal.add_term(1.0, model.var("p_ne", VarIndex::NeArc(*arc))?);
                if reactive {
                    q_bal.add_term(1.0, model.var("q_ne", VarIndex::NeArc(*arc))?);
                }
            }
        }
    }
    for g in reference.bus_gens.get(&i).into_iter().flatten() {
        p_bal.add_term(-1.0, model.var("pg", VarIndex::Gen(*g))?);
        if reactive {
            q_bal.add_term(-1.0, model.var("qg", VarIndex::Gen(*g))?);
        }
    }
    let (mut pd, mut qd) = (0.0, 0.0);
    for d in reference.bus_loads.get(&i).into_iter().flatten() {
        if let Some(load) = reference.load.get(d) {
            pd += load.pd;
            qd += load.qd;
        }
    }
    let (mut gs, mut bs) = (0.0, 0.0);
    for s in reference.bus_shunts.get(&i).into_iter().flatten() {
        if let Some(shunt) = reference.shunt.get(s) {
            gs += shunt.gs;
            bs += shunt.bs;
        }
    }

    // Σp - Σpg + gs w == -pd
    if gs != 0.0 {
        p_bal += w.clone().scaled(gs);
    }
    model.add_row(format!("kcl_p[{i}]"), p_bal, Sense::Equal, -pd);
    if reactive {
        // Σq - Σqg - bs w == -qd
        if bs != 0.0 {
            q_bal += w.scaled(-bs);
        }
        model.add_row(format!("kcl_q[{i}]"), q_bal, Sense::Equal, -qd);
    }
    Ok(())
}

/// Power balance with shunts at bus `i`.
pub fn constraint_kcl_shunt(model: &mut GenericModel, target: Target) -> GridResult<()> {
    let i = bus_target(names::KCL_SHUNT, target)?;
    kcl(model, i, false)
}

/// Power balance including candidate-branch flows.
pub fn constraint_kcl_shunt_ne(model: &mut GenericModel, target: Target) -> GridResult<()> {
    let i = bus_target(names::KCL_SHUNT_NE, target)?;
    kcl(model, i, true)
}

// ---------------------------------------------------------------------------
// Generator and dc-line constraints
// ---------------------------------------------------------------------------

pub fn constraint_active_gen_setpoint(model: &mut GenericModel, target: Target) -> GridResult<()> {
    let g = gen_target(names::ACTIVE_GEN_SETPOINT, target)?;
    let pg_set = model
        .reference()
        .gen
        .get(&g)
        .map(|gen| gen.pg)
        .ok_or_else(|| GridError::data("gen", g, "not an active generator"))?;
    let pg = model.var("pg", VarIndex::Gen(g))?;
    model.add_row(format!("pg_setpoint[{g}]"), Expr::var(pg), Sense::Equal, pg_set);
    Ok(())
}

pub fn constraint_reactive_gen_setpoint(
    model: &mut GenericModel,
    target: Target,
) -> GridResult<()> {
    let g = gen_target(names::REACTIVE_GEN_SETPOINT, target)?;
    let qg_set = model
        .reference()
        .gen
        .get(&g)
        .map(|gen| gen.qg)
        .ok_or_else(|| GridError::data("gen", g, "not an active generator"))?;
    let qg = model.var("qg", VarIndex::Gen(g))?;
    model.add_row(format!("qg_setpoint[{g}]"), Expr::var(qg), Sense::Equal, qg_set);
    Ok(())
}

fn dcline_arcs(model: &GenericModel, l: usize) -> GridResult<(BranchArc, f64, f64, f64, f64)> {
    let dc = model
        .reference()
        .dcline
        .get(&l)
        .ok_or_else(|| GridError::data("dcline", l, "not an active dc line"))?;
    Ok((
        BranchArc::new(l, dc.f_bus, dc.t_bus),
        dc.loss0,
        dc.loss1,
        dc.pf,
        dc.pt,
    ))
}

/// Linear loss model `p_fr + p_to == loss0 + loss1 * p_fr`.
pub fn constraint_dcline(model: &mut GenericModel, target: Target) -> GridResult<()> {
    let l = dcline_target(names::DCLINE, target)?;
    let (arc, loss0, loss1, _, _) = dcline_arcs(model, l)?;
    let p_fr = model.var("p_dc", VarIndex::DcArc(arc))?;
    let p_to = model.var("p_dc", VarIndex::DcArc(arc.reversed()))?;
    let expr = Expr::term(1.0 - loss1, p_fr).with_term(1.0, p_to);
    model.add_row(format!("dcline_losses[{l}]"), expr, Sense::Equal, loss0);
    Ok(())
}

pub fn constraint_active_dcline_setpoint(
    model: &mut GenericModel,
    target: Target,
) -> GridResult<()> {
    let l = dcline_target(names::ACTIVE_DCLINE_SETPOINT, target)?;
    let (arc, _, _, pf, pt) = dcline_arcs(model, l)?;
    let p_fr = model.var("p_dc", VarIndex::DcArc(arc))?;
    let p_to = model.var("p_dc", VarIndex::DcArc(arc.reversed()))?;
    model.add_row(format!("dcline_pf[{l}]"), Expr::var(p_fr), Sense::Equal, pf);
    model.add_row(format!("dcline_pt[{l}]"), Expr::var(p_to), Sense::Equal, pt);
    Ok(())
}

// ---------------------------------------------------------------------------
// Angle differences (polar and DC)
// ---------------------------------------------------------------------------

fn angle_difference(model: &GenericModel, f_bus: usize, t_bus: usize) -> GridResult<Expr> {
    let va_fr = model.var("va", VarIndex::Bus(f_bus))?;
    let va_to = model.var("va", VarIndex::Bus(t_bus))?;
    Ok(Expr::var(va_fr).with_term(-1.0, va_to))
}

/// `angmin <= va_fr - va_to <= angmax`.
pub fn constraint_voltage_angle_difference(
    model: &mut GenericModel,
    target: Target,
) -> GridResult<()> {
    let l = branch_target(names::VOLTAGE_ANGLE_DIFFERENCE, target)?;
    let params = branch_params(model.reference(), l)?;
    let delta = angle_difference(model, params.f_bus, params.t_bus)?;
    model.add_row(format!("vad_lb[{l}]"), delta.clone(), Sense::GreaterEqual, params.angmin);
    model.add_row(format!("vad_ub[{l}]"), delta, Sense::LessEqual, params.angmax);
    Ok(())
}

/// `angmin z + vad_min (1-z) <= va_fr - va_to <= angmax z + vad_max (1-z)`.
fn switched_angle_difference(model: &mut GenericModel, sw: Switched) -> GridResult<()> {
    let reference = model.shared_reference();
    let params = sw.params(&reference)?;
    let z = sw.indicator(model)?;
    let delta = angle_difference(model, params.f_bus, params.t_bus)?;
    let (vad_min, vad_max) = (reference.off_angmin, reference.off_angmax);
    let l = params.index;
    let label = sw.label();
    model.add_row(
        format!("vad_lb_{label}[{l}]"),
        delta.clone().with_term(vad_min - params.angmin, z),
        Sense::GreaterEqual,
        vad_min,
    );
    model.add_row(
        format!("vad_ub_{label}[{l}]"),
        delta.with_term(vad_max - params.angmax, z),
        Sense::LessEqual,
        vad_max,
    );
    Ok(())
}

pub fn constraint_voltage_angle_difference_on_off(
    model: &mut GenericModel,
    target: Target,
) -> GridResult<()> {
    let sw = Switched::from_target(names::VOLTAGE_ANGLE_DIFFERENCE_ON_OFF, target)?;
    switched_angle_difference(model, sw)
}

pub fn constraint_voltage_angle_difference_ne(
    model: &mut GenericModel,
    target: Target,
) -> GridResult<()> {
    let sw = Switched::from_target(names::VOLTAGE_ANGLE_DIFFERENCE_NE, target)?;
    switched_angle_difference(model, sw)
}

// ---------------------------------------------------------------------------
// Conic thermal limits (Wr and BranchFlow)
// ---------------------------------------------------------------------------

fn thermal_limit_conic(model: &mut GenericModel, arc: BranchArc, rate: Option<f64>) -> GridResult<()> {
    let Some(rate) = rate else {
        debug!(branch = arc.branch, "no rate_a, thermal limit skipped");
        return Ok(());
    };
    let p = model.var("p", VarIndex::Arc(arc))?;
    let q = model.var("q", VarIndex::Arc(arc))?;
    model.add_cone(
        format!("thermal[{},{},{}]", arc.branch, arc.from, arc.to),
        ConstraintKind::SecondOrderCone {
            t: Expr::constant(rate),
            xs: vec![Expr::var(p), Expr::var(q)],
        },
    );
    Ok(())
}

/// `||(p_fr, q_fr)|| <= rate_a`.
pub fn constraint_thermal_limit_from_conic(
    model: &mut GenericModel,
    target: Target,
) -> GridResult<()> {
    let l = branch_target(names::THERMAL_LIMIT_FROM, target)?;
    let params = branch_params(model.reference(), l)?;
    thermal_limit_conic(model, params.arc(super::Side::From), params.rate)
}

/// `||(p_to, q_to)|| <= rate_a`.
pub fn constraint_thermal_limit_to_conic(
    model: &mut GenericModel,
    target: Target,
) -> GridResult<()> {
    let l = branch_target(names::THERMAL_LIMIT_TO, target)?;
    let params = branch_params(model.reference(), l)?;
    thermal_limit_conic(model, params.arc(super::Side::To), params.rate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formulation::Formulation;
    use gridopt_core::{Branch, Bus, BusType, DcLine, Gen, Load, NetworkData, Shunt};

    fn case() -> NetworkData {
        NetworkData::new("case")
            .with_bus(Bus {
                index: 1,
                bus_type: BusType::Reference,
                ..Bus::default()
            })
            .with_bus(Bus {
                index: 2,
                ..Bus::default()
            })
            .with_gen(Gen {
                index: 1,
                gen_bus: 1,
                pmin: 0.1,
                pmax: 2.0,
                ..Gen::default()
            })
            .with_branch(Branch {
                index: 1,
                f_bus: 1,
                t_bus: 2,
                br_x: 0.1,
                rate_a: Some(1.5),
                ..Branch::default()
            })
            .with_load(Load {
                index: 1,
                load_bus: 2,
                pd: 0.8,
                ..Load::default()
            })
            .with_shunt(Shunt {
                index: 1,
                shunt_bus: 2,
                gs: 0.05,
                ..Shunt::default()
            })
            .with_dcline(DcLine {
                index: 1,
                f_bus: 1,
                t_bus: 2,
                loss0: 0.01,
                loss1: 0.02,
                pminf: 0.0,
                pmaxf: 0.5,
                pmint: -0.5,
                pmaxt: 0.0,
                ..DcLine::default()
            })
    }

    #[test]
    fn test_flow_variables_bounded_by_rate() {
        let mut model = GenericModel::from_data(&case(), Formulation::dcp()).unwrap();
        model.add_variable(names::BRANCH_FLOW).unwrap();
        let p = model.var("p", VarIndex::Arc(BranchArc::new(1, 2, 1))).unwrap();
        assert_eq!(model.program().bounds(p), (-1.5, 1.5));
        assert!(model.try_var("q", VarIndex::Arc(BranchArc::new(1, 1, 2))).is_none());

        let mut unbounded = GenericModel::from_data(&case(), Formulation::acp()).unwrap();
        unbounded.set_bounded(false);
        unbounded.add_variable(names::BRANCH_FLOW).unwrap();
        let q = unbounded.var("q", VarIndex::Arc(BranchArc::new(1, 1, 2))).unwrap();
        assert!(unbounded.program().bounds(q).1.is_infinite());
    }

    #[test]
    fn test_kcl_balances_at_dispatch() {
        let mut model = GenericModel::from_data(&case(), Formulation::dcp()).unwrap();
        for v in [names::VOLTAGE, names::ACTIVE_GENERATION, names::BRANCH_FLOW, names::DCLINE_FLOW] {
            model.add_variable(v).unwrap();
        }
        model.add_constraint(names::KCL_SHUNT, Target::Bus(2)).unwrap();
        model.add_constraint(names::DCLINE, Target::DcLine(1)).unwrap();

        // Bus 2 receives 0.6 over the line and 0.25 over the dc line; the
        // shunt draws 0.05 and the load 0.8.
        let mut values = vec![0.0; model.program().num_variables()];
        values[model.var("pg", VarIndex::Gen(1)).unwrap().0] = 1.0;
        values[model.var("p", VarIndex::Arc(BranchArc::new(1, 2, 1))).unwrap().0] = -0.6;
        values[model.var("p", VarIndex::Arc(BranchArc::new(1, 1, 2))).unwrap().0] = 0.6;
        let p_dc_fr = model.var("p_dc", VarIndex::DcArc(BranchArc::new(1, 1, 2))).unwrap();
        let p_dc_to = model.var("p_dc", VarIndex::DcArc(BranchArc::new(1, 2, 1))).unwrap();
        // p_fr + p_to == loss0 + loss1 p_fr with p_fr = 0.265306..
        let p_fr = (0.25 + 0.01) / (1.0 - 0.02);
        values[p_dc_fr.0] = p_fr;
        values[p_dc_to.0] = -0.25;
        assert!(model.program().max_violation(&values) < 1e-9);
    }
}
