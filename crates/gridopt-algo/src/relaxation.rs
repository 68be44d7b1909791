//! Convex relaxation primitives.
//!
//! Each function reads the current bounds of its operands from the
//! [`Program`] and appends the rows of one relaxation. The rows only ever
//! depend on those bounds, so a primitive is sound exactly when the bounds
//! it saw are valid for the variables.
//!
//! | Primitive                        | Relaxes                | Rows                          |
//! |----------------------------------|------------------------|-------------------------------|
//! | [`relaxation_product`]           | `z = x y`              | 4 McCormick envelopes         |
//! | [`relaxation_sqr`]               | `y = x^2`              | rotated cone + secant         |
//! | [`relaxation_sin`]               | `y = sin x`            | tangents / secant             |
//! | [`relaxation_cos`]               | `y = cos x`            | quadratic cone + secant       |
//! | [`relaxation_product_on_off`]    | `z = x y` when `ind=1` | 4 gated envelopes             |
//! | [`relaxation_equality_on_off`]   | `y = x` when `ind=1`   | 2 big-M rows                  |
//! | [`relaxation_sqr_on_off`]        | `y = x^2` when `ind=1` | cone + 2 gated rows           |
//! | [`relaxation_complex_product`]   | `c^2 + d^2 = a b`      | rotated cone                  |
//!
//! A zero-width operand interval turns the relaxation into the exact
//! equality. Unbounded operands are rejected with `NumericDegeneracy`
//! before anything is added. The trigonometric primitives require the
//! argument interval inside `[-pi/2, pi/2]`.

use std::f64::consts::FRAC_PI_2;

use gridopt_core::{GridError, GridResult};

use crate::program::{ConstraintKind, Expr, Program, Sense, VarId};

/// Interval widths at or below this are treated as a single point.
pub const ZERO_WIDTH: f64 = 1e-10;

const WINDOW_SLACK: f64 = 1e-9;

fn finite_bounds(program: &Program, v: VarId, relaxation: &str) -> GridResult<(f64, f64)> {
    let (lb, ub) = program.bounds(v);
    let name = &program.variable(v).name;
    if !lb.is_finite() || !ub.is_finite() {
        return Err(GridError::NumericDegeneracy(format!(
            "{relaxation}: variable {name} has unbounded domain [{lb}, {ub}]"
        )));
    }
    if lb > ub + ZERO_WIDTH {
        return Err(GridError::NumericDegeneracy(format!(
            "{relaxation}: variable {name} has empty domain [{lb}, {ub}]"
        )));
    }
    Ok((lb, ub))
}

fn angle_bounds(program: &Program, v: VarId, relaxation: &str) -> GridResult<(f64, f64)> {
    let (lb, ub) = finite_bounds(program, v, relaxation)?;
    if lb < -FRAC_PI_2 - WINDOW_SLACK || ub > FRAC_PI_2 + WINDOW_SLACK {
        return Err(GridError::NumericDegeneracy(format!(
            "{relaxation}: angle {} bounds [{lb}, {ub}] leave [-pi/2, pi/2]",
            program.variable(v).name
        )));
    }
    Ok((lb, ub))
}

fn is_point(lb: f64, ub: f64) -> bool {
    ub - lb <= ZERO_WIDTH
}

/// `a*x + b*y + c*z`, skipping absent terms.
fn lin(terms: &[(f64, VarId)]) -> Expr {
    let mut e = Expr::zero();
    for (c, v) in terms {
        e.add_term(*c, *v);
    }
    e
}

/// McCormick envelope of `z = x * y`.
pub fn relaxation_product(
    program: &mut Program,
    name: &str,
    x: VarId,
    y: VarId,
    z: VarId,
) -> GridResult<()> {
    let (xl, xu) = finite_bounds(program, x, name)?;
    let (yl, yu) = finite_bounds(program, y, name)?;

    if is_point(xl, xu) {
        program.add_row(format!("{name}[fixed_x]"), lin(&[(1.0, z), (-xl, y)]), Sense::Equal, 0.0);
        return Ok(());
    }
    if is_point(yl, yu) {
        program.add_row(format!("{name}[fixed_y]"), lin(&[(1.0, z), (-yl, x)]), Sense::Equal, 0.0);
        return Ok(());
    }

    program.add_row(
        format!("{name}[mc_ll]"),
        lin(&[(1.0, z), (-xl, y), (-yl, x)]),
        Sense::GreaterEqual,
        -xl * yl,
    );
    program.add_row(
        format!("{name}[mc_uu]"),
        lin(&[(1.0, z), (-xu, y), (-yu, x)]),
        Sense::GreaterEqual,
        -xu * yu,
    );
    program.add_row(
        format!("{name}[mc_lu]"),
        lin(&[(1.0, z), (-xl, y), (-yu, x)]),
        Sense::LessEqual,
        -xl * yu,
    );
    program.add_row(
        format!("{name}[mc_ul]"),
        lin(&[(1.0, z), (-xu, y), (-yl, x)]),
        Sense::LessEqual,
        -xu * yl,
    );
    Ok(())
}

/// `y >= x^2` as a rotated cone plus the secant `y <= (l+u) x - l u`.
pub fn relaxation_sqr(program: &mut Program, name: &str, x: VarId, y: VarId) -> GridResult<()> {
    let (l, u) = finite_bounds(program, x, name)?;
    if is_point(l, u) {
        program.add_row(format!("{name}[fixed]"), Expr::var(y), Sense::Equal, l * l);
        return Ok(());
    }
    program.add_constraint(
        format!("{name}[cone]"),
        ConstraintKind::RotatedCone {
            a: Expr::var(y),
            b: Expr::constant(1.0),
            xs: vec![Expr::var(x)],
        },
    );
    program.add_row(
        format!("{name}[secant]"),
        lin(&[(1.0, y), (-(l + u), x)]),
        Sense::LessEqual,
        -l * u,
    );
    Ok(())
}

/// Relaxation of `y = sin(x)` on `[l, u] ⊆ [-pi/2, pi/2]`.
///
/// Tangents at `±m/2` with `m = max(|l|, |u|)` bound the curve where it is
/// convex or concave; the secant replaces the tangent on a one-signed
/// interval.
pub fn relaxation_sin(program: &mut Program, name: &str, x: VarId, y: VarId) -> GridResult<()> {
    let (l, u) = angle_bounds(program, x, name)?;
    if is_point(l, u) {
        program.add_row(format!("{name}[fixed]"), Expr::var(y), Sense::Equal, l.sin());
        return Ok(());
    }
    let half = l.abs().max(u.abs()) / 2.0;
    let slope = half.cos();
    let secant = (l.sin() - u.sin()) / (l - u);

    let upper_tangent = |p: &mut Program| {
        p.add_row(
            format!("{name}[tangent_ub]"),
            lin(&[(1.0, y), (-slope, x)]),
            Sense::LessEqual,
            half.sin() - slope * half,
        );
    };
    let lower_tangent = |p: &mut Program| {
        p.add_row(
            format!("{name}[tangent_lb]"),
            lin(&[(1.0, y), (-slope, x)]),
            Sense::GreaterEqual,
            slope * half - half.sin(),
        );
    };

    if l < 0.0 && u > 0.0 {
        upper_tangent(program);
        lower_tangent(program);
    } else if u <= 0.0 {
        program.add_row(
            format!("{name}[secant_ub]"),
            lin(&[(1.0, y), (-secant, x)]),
            Sense::LessEqual,
            l.sin() - secant * l,
        );
        lower_tangent(program);
    } else {
        upper_tangent(program);
        program.add_row(
            format!("{name}[secant_lb]"),
            lin(&[(1.0, y), (-secant, x)]),
            Sense::GreaterEqual,
            l.sin() - secant * l,
        );
    }
    Ok(())
}

/// Relaxation of `y = cos(x)` on `[l, u] ⊆ [-pi/2, pi/2]`:
/// `y <= 1 - (1 - cos m) / m^2 * x^2` (as a rotated cone) and the secant
/// through `(l, cos l)` and `(u, cos u)` from below.
pub fn relaxation_cos(program: &mut Program, name: &str, x: VarId, y: VarId) -> GridResult<()> {
    let (l, u) = angle_bounds(program, x, name)?;
    if is_point(l, u) {
        program.add_row(format!("{name}[fixed]"), Expr::var(y), Sense::Equal, l.cos());
        return Ok(());
    }
    let m = l.abs().max(u.abs());
    let k = (1.0 - m.cos()) / (m * m);
    program.add_constraint(
        format!("{name}[cap]"),
        ConstraintKind::RotatedCone {
            a: Expr::constant(1.0).with_term(-1.0, y),
            b: Expr::constant(1.0),
            xs: vec![Expr::term(k.sqrt(), x)],
        },
    );
    let secant = (l.cos() - u.cos()) / (l - u);
    program.add_row(
        format!("{name}[secant]"),
        lin(&[(1.0, y), (-secant, x)]),
        Sense::GreaterEqual,
        l.cos() - secant * l,
    );
    Ok(())
}

/// McCormick envelope of `z = x * y` gated by `ind`.
///
/// The bounds of `x` and `y` are their "on" bounds; the caller forces the
/// operands to zero when `ind = 0`.
pub fn relaxation_product_on_off(
    program: &mut Program,
    name: &str,
    x: VarId,
    y: VarId,
    z: VarId,
    ind: VarId,
) -> GridResult<()> {
    let (xl, xu) = finite_bounds(program, x, name)?;
    let (yl, yu) = finite_bounds(program, y, name)?;

    program.add_row(
        format!("{name}[mc_ll]"),
        lin(&[(1.0, z), (-xl, y), (-yl, x), (xl * yl, ind)]),
        Sense::GreaterEqual,
        0.0,
    );
    program.add_row(
        format!("{name}[mc_uu]"),
        lin(&[(1.0, z), (-xu, y), (-yu, x), (xu * yu, ind)]),
        Sense::GreaterEqual,
        0.0,
    );
    program.add_row(
        format!("{name}[mc_lu]"),
        lin(&[(1.0, z), (-xl, y), (-yu, x), (xl * yu, ind)]),
        Sense::LessEqual,
        0.0,
    );
    program.add_row(
        format!("{name}[mc_ul]"),
        lin(&[(1.0, z), (-xu, y), (-yl, x), (xu * yl, ind)]),
        Sense::LessEqual,
        0.0,
    );
    Ok(())
}

/// `y = x` when `ind = 1`, free within the operand bounds otherwise:
/// `x - U (1 - ind) <= y <= x - L (1 - ind)` with `U = x_u - y_l`,
/// `L = x_l - y_u`.
pub fn relaxation_equality_on_off(
    program: &mut Program,
    name: &str,
    x: VarId,
    y: VarId,
    ind: VarId,
) -> GridResult<()> {
    let (xl, xu) = finite_bounds(program, x, name)?;
    let (yl, yu) = finite_bounds(program, y, name)?;
    let upper = xu - yl;
    let lower = xl - yu;
    program.add_row(
        format!("{name}[lb]"),
        lin(&[(1.0, y), (-1.0, x), (-upper, ind)]),
        Sense::GreaterEqual,
        -upper,
    );
    program.add_row(
        format!("{name}[ub]"),
        lin(&[(1.0, y), (-1.0, x), (-lower, ind)]),
        Sense::LessEqual,
        -lower,
    );
    Ok(())
}

/// `y >= x^2` with the secant and the magnitude cap both gated by `ind`.
pub fn relaxation_sqr_on_off(
    program: &mut Program,
    name: &str,
    x: VarId,
    y: VarId,
    ind: VarId,
) -> GridResult<()> {
    let (l, u) = finite_bounds(program, x, name)?;
    program.add_constraint(
        format!("{name}[cone]"),
        ConstraintKind::RotatedCone {
            a: Expr::var(y),
            b: Expr::constant(1.0),
            xs: vec![Expr::var(x)],
        },
    );
    program.add_row(
        format!("{name}[secant]"),
        lin(&[(1.0, y), (-(l + u), x), (l * u, ind)]),
        Sense::LessEqual,
        0.0,
    );
    program.add_row(
        format!("{name}[cap]"),
        lin(&[(1.0, y), (-(l * l).max(u * u), ind)]),
        Sense::LessEqual,
        0.0,
    );
    Ok(())
}

/// `c^2 + d^2 <= a * b`.
pub fn relaxation_complex_product(
    program: &mut Program,
    name: &str,
    a: VarId,
    b: VarId,
    c: VarId,
    d: VarId,
) -> GridResult<()> {
    program.add_constraint(
        name.to_string(),
        ConstraintKind::RotatedCone {
            a: Expr::var(a),
            b: Expr::var(b),
            xs: vec![Expr::var(c), Expr::var(d)],
        },
    );
    Ok(())
}

/// Interval of `x * y` over the bound box.
pub fn product_bounds(x: (f64, f64), y: (f64, f64)) -> (f64, f64) {
    let corners = [x.0 * y.0, x.0 * y.1, x.1 * y.0, x.1 * y.1];
    let lo = corners.iter().copied().fold(f64::INFINITY, f64::min);
    let hi = corners.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    (lo, hi)
}

/// Interval of `sin(x)` for `x` in `[l, u] ⊆ [-pi/2, pi/2]` (monotone there).
pub fn sin_bounds(l: f64, u: f64) -> (f64, f64) {
    (l.sin(), u.sin())
}

/// Interval of `cos(x)` for `x` in `[l, u] ⊆ [-pi/2, pi/2]`.
pub fn cos_bounds(l: f64, u: f64) -> (f64, f64) {
    let lo = l.cos().min(u.cos());
    let hi = if l <= 0.0 && u >= 0.0 {
        1.0
    } else {
        l.cos().max(u.cos())
    };
    (lo, hi)
}
