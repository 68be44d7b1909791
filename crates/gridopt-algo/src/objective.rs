//! Objective builders.
//!
//! Fuel cost is assembled per generator from [`CostModel`]:
//!
//! - polynomials up to degree 2 go into the linear/quadratic objective;
//! - higher degrees are moved to the nonlinear part of the objective;
//! - piecewise-linear costs get an epigraph variable `pg_cost` with one
//!   row per segment.

use gridopt_core::{CostModel, GridResult};
use tracing::debug;

use crate::model::{GenericModel, Target, VarIndex};
use crate::program::{Expr, NlExpr, Objective, Sense};

/// `min Σ cost_g(pg_g)`.
pub fn objective_min_fuel_cost(model: &mut GenericModel, _: Target) -> GridResult<()> {
    let reference = model.shared_reference();
    let mut expr = Expr::zero();
    let mut nonlinear = Vec::new();

    for (i, gen) in &reference.gen {
        let cost = gen.cost_model()?;
        let pg = model.var("pg", VarIndex::Gen(*i))?;
        match &cost {
            CostModel::NoCost => {}
            CostModel::Polynomial(coeffs) => {
                if cost.degree() <= 2 {
                    let c = |k: usize| coeffs.get(k).copied().unwrap_or(0.0);
                    expr += Expr::constant(c(0)).with_term(c(1), pg).with_quad(c(2), pg, pg);
                } else {
                    let terms = coeffs
                        .iter()
                        .enumerate()
                        .filter(|(_, c)| **c != 0.0)
                        .map(|(k, c)| match k {
                            0 => NlExpr::Const(*c),
                            1 => NlExpr::var(pg).scaled(*c),
                            _ => NlExpr::Pow(Box::new(NlExpr::var(pg)), k as i32).scaled(*c),
                        });
                    nonlinear.extend(terms);
                }
            }
            CostModel::PiecewiseLinear(points) => {
                let floor = points.iter().map(|p| p.1).fold(f64::INFINITY, f64::min);
                let epi = model.new_var("pg_cost", VarIndex::Gen(*i), floor, f64::INFINITY);
                for (k, (slope, intercept)) in cost.slope_intercepts().into_iter().enumerate() {
                    model.add_row(
                        format!("pg_cost[{i},{k}]"),
                        Expr::var(epi).with_term(-slope, pg),
                        Sense::GreaterEqual,
                        intercept,
                    );
                }
                expr.add_term(1.0, epi);
            }
        }
    }

    let mut objective = Objective::minimize(expr);
    if !nonlinear.is_empty() {
        debug!(terms = nonlinear.len(), "fuel cost above degree 2, objective is nonlinear");
        objective.nonlinear = Some(NlExpr::Sum(nonlinear));
    }
    model.program_mut().set_objective(objective);
    Ok(())
}

/// `min Σ construction_cost_l built_l` over candidate branches.
pub fn objective_tnep_cost(model: &mut GenericModel, _: Target) -> GridResult<()> {
    let reference = model.shared_reference();
    let mut expr = Expr::zero();
    if let Some(ne) = reference.ne.as_ref() {
        for (l, branch) in &ne.branch {
            let cost = branch.construction_cost.unwrap_or(0.0);
            if cost != 0.0 {
                expr.add_term(cost, model.var("built", VarIndex::NeBranch(*l))?);
            }
        }
    }
    model.program_mut().set_objective(Objective::minimize(expr));
    Ok(())
}
