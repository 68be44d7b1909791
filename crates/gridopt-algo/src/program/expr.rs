//! Algebraic expressions over program variables.
//!
//! [`Expr`] is a quadratic polynomial (constant + linear + bilinear terms);
//! it covers everything the linear, conic and convex-quadratic formulations
//! emit. [`NlExpr`] is a small expression tree for the polar AC equations
//! (trigonometric and higher-order terms) that only a nonlinear oracle can
//! consume.

use std::collections::BTreeMap;
use std::ops::{Add, AddAssign, Mul, Neg, Sub, SubAssign};

use super::VarId;

/// `constant + Σ a_i x_i + Σ q_ij x_i x_j` with `i <= j` in the quadratic keys.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Expr {
    pub constant: f64,
    pub linear: BTreeMap<VarId, f64>,
    pub quadratic: BTreeMap<(VarId, VarId), f64>,
}

impl Expr {
    pub fn zero() -> Self {
        Self::default()
    }

    pub fn constant(value: f64) -> Self {
        Self {
            constant: value,
            ..Self::default()
        }
    }

    pub fn var(v: VarId) -> Self {
        Self::term(1.0, v)
    }

    pub fn term(coeff: f64, v: VarId) -> Self {
        let mut e = Self::default();
        e.add_term(coeff, v);
        e
    }

    /// Sum of variables with unit coefficients.
    pub fn sum(vars: impl IntoIterator<Item = VarId>) -> Self {
        let mut e = Self::default();
        for v in vars {
            e.add_term(1.0, v);
        }
        e
    }

    pub fn add_term(&mut self, coeff: f64, v: VarId) -> &mut Self {
        if coeff != 0.0 {
            let entry = self.linear.entry(v).or_insert(0.0);
            *entry += coeff;
            if *entry == 0.0 {
                self.linear.remove(&v);
            }
        }
        self
    }

    pub fn add_quad(&mut self, coeff: f64, a: VarId, b: VarId) -> &mut Self {
        if coeff != 0.0 {
            let key = if a <= b { (a, b) } else { (b, a) };
            let entry = self.quadratic.entry(key).or_insert(0.0);
            *entry += coeff;
            if *entry == 0.0 {
                self.quadratic.remove(&key);
            }
        }
        self
    }

    pub fn with_term(mut self, coeff: f64, v: VarId) -> Self {
        self.add_term(coeff, v);
        self
    }

    pub fn with_quad(mut self, coeff: f64, a: VarId, b: VarId) -> Self {
        self.add_quad(coeff, a, b);
        self
    }

    pub fn is_linear(&self) -> bool {
        self.quadratic.is_empty()
    }

    pub fn is_constant(&self) -> bool {
        self.linear.is_empty() && self.quadratic.is_empty()
    }

    /// Every variable the expression touches.
    pub fn variables(&self) -> Vec<VarId> {
        let mut vars: Vec<VarId> = self.linear.keys().copied().collect();
        for (a, b) in self.quadratic.keys() {
            vars.push(*a);
            vars.push(*b);
        }
        vars.sort();
        vars.dedup();
        vars
    }

    pub fn eval(&self, values: &[f64]) -> f64 {
        let linear: f64 = self.linear.iter().map(|(v, c)| c * values[v.0]).sum();
        let quad: f64 = self
            .quadratic
            .iter()
            .map(|((a, b), c)| c * values[a.0] * values[b.0])
            .sum();
        self.constant + linear + quad
    }

    pub fn scaled(mut self, factor: f64) -> Self {
        self *= factor;
        self
    }
}

impl From<VarId> for Expr {
    fn from(v: VarId) -> Self {
        Expr::var(v)
    }
}

impl From<f64> for Expr {
    fn from(c: f64) -> Self {
        Expr::constant(c)
    }
}

impl AddAssign<&Expr> for Expr {
    fn add_assign(&mut self, rhs: &Expr) {
        self.constant += rhs.constant;
        for (v, c) in &rhs.linear {
            self.add_term(*c, *v);
        }
        for ((a, b), c) in &rhs.quadratic {
            self.add_quad(*c, *a, *b);
        }
    }
}

impl AddAssign<Expr> for Expr {
    fn add_assign(&mut self, rhs: Expr) {
        *self += &rhs;
    }
}

impl SubAssign<Expr> for Expr {
    fn sub_assign(&mut self, rhs: Expr) {
        *self += &(-rhs);
    }
}

impl std::ops::MulAssign<f64> for Expr {
    fn mul_assign(&mut self, factor: f64) {
        if factor == 0.0 {
            *self = Expr::zero();
            return;
        }
        self.constant *= factor;
        self.linear.values_mut().for_each(|c| *c *= factor);
        self.quadratic.values_mut().for_each(|c| *c *= factor);
    }
}

impl Add for Expr {
    type Output = Expr;
    fn add(mut self, rhs: Expr) -> Expr {
        self += &rhs;
        self
    }
}

impl Sub for Expr {
    type Output = Expr;
    fn sub(mut self, rhs: Expr) -> Expr {
        self -= rhs;
        self
    }
}

impl Neg for Expr {
    type Output = Expr;
    fn neg(self) -> Expr {
        self.scaled(-1.0)
    }
}

impl Mul<f64> for Expr {
    type Output = Expr;
    fn mul(self, factor: f64) -> Expr {
        self.scaled(factor)
    }
}

impl Add<f64> for Expr {
    type Output = Expr;
    fn add(mut self, c: f64) -> Expr {
        self.constant += c;
        self
    }
}

/// Expression tree for nonlinear equations.
#[derive(Debug, Clone, PartialEq)]
pub enum NlExpr {
    Const(f64),
    Var(VarId),
    Sum(Vec<NlExpr>),
    Product(Vec<NlExpr>),
    Pow(Box<NlExpr>, i32),
    Sin(Box<NlExpr>),
    Cos(Box<NlExpr>),
}

impl NlExpr {
    pub fn var(v: VarId) -> Self {
        NlExpr::Var(v)
    }

    pub fn scaled(self, coeff: f64) -> Self {
        NlExpr::Product(vec![NlExpr::Const(coeff), self])
    }

    pub fn sqr(self) -> Self {
        NlExpr::Pow(Box::new(self), 2)
    }

    pub fn sin(self) -> Self {
        NlExpr::Sin(Box::new(self))
    }

    pub fn cos(self) -> Self {
        NlExpr::Cos(Box::new(self))
    }

    /// `a - b` for two variables.
    pub fn diff(a: VarId, b: VarId) -> Self {
        NlExpr::Sum(vec![NlExpr::Var(a), NlExpr::Var(b).scaled(-1.0)])
    }

    pub fn eval(&self, values: &[f64]) -> f64 {
        match self {
            NlExpr::Const(c) => *c,
            NlExpr::Var(v) => values[v.0],
            NlExpr::Sum(terms) => terms.iter().map(|t| t.eval(values)).sum(),
            NlExpr::Product(terms) => terms.iter().map(|t| t.eval(values)).product(),
            NlExpr::Pow(base, k) => base.eval(values).powi(*k),
            NlExpr::Sin(arg) => arg.eval(values).sin(),
            NlExpr::Cos(arg) => arg.eval(values).cos(),
        }
    }

    pub fn collect_variables(&self, out: &mut Vec<VarId>) {
        match self {
            NlExpr::Const(_) => {}
            NlExpr::Var(v) => out.push(*v),
            NlExpr::Sum(terms) | NlExpr::Product(terms) => {
                terms.iter().for_each(|t| t.collect_variables(out))
            }
            NlExpr::Pow(inner, _) | NlExpr::Sin(inner) | NlExpr::Cos(inner) => {
                inner.collect_variables(out)
            }
        }
    }
}

impl From<&Expr> for NlExpr {
    fn from(expr: &Expr) -> Self {
        let mut terms = vec![NlExpr::Const(expr.constant)];
        for (v, c) in &expr.linear {
            terms.push(NlExpr::Var(*v).scaled(*c));
        }
        for ((a, b), c) in &expr.quadratic {
            terms.push(NlExpr::Product(vec![
                NlExpr::Const(*c),
                NlExpr::Var(*a),
                NlExpr::Var(*b),
            ]));
        }
        NlExpr::Sum(terms)
    }
}
