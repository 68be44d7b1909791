//! Generic optimization model.
//!
//! A [`GenericModel`] couples one [`ReferenceModel`] with one
//! [`Formulation`] and grows a [`Program`] through three extension points:
//!
//! | Call                         | Registry namespace       |
//! |------------------------------|--------------------------|
//! | [`GenericModel::add_variable`]   | [`Extension::Variable`]   |
//! | [`GenericModel::add_constraint`] | [`Extension::Constraint`] |
//! | [`GenericModel::add_objective`]  | [`Extension::Objective`]  |
//!
//! Problem specifications only name what they want (`"ohms_yt_from"` for
//! branch 3); the registry decides what the current formulation emits.
//! Variables are registered under `(name, index, network id)` so that later
//! builders can look them up, and a lookup of a variable the formulation
//! never created fails with `UnsupportedFormulation` instead of panicking.

pub mod registry;

pub use registry::{BuilderFn, BuilderRegistry, DispatchKey, Entry, Extension, Resolution};

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use gridopt_core::{build_ref, BranchArc, BusPairKey, GridError, GridResult, NetworkData, ReferenceModel};
use tracing::debug;

use crate::formulation::{Family, Formulation};
use crate::program::{ConstraintId, ConstraintKind, Expr, Program, Sense, VarId};

/// Network id used by single-network models.
pub const DEFAULT_NW: usize = 0;

/// Component a constraint builder is applied to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Target {
    Network,
    Bus(usize),
    Gen(usize),
    Branch(usize),
    DcLine(usize),
    NeBranch(usize),
    BusPair(BusPairKey),
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Network => write!(f, "network"),
            Target::Bus(i) => write!(f, "bus {i}"),
            Target::Gen(i) => write!(f, "gen {i}"),
            Target::Branch(i) => write!(f, "branch {i}"),
            Target::DcLine(i) => write!(f, "dcline {i}"),
            Target::NeBranch(i) => write!(f, "ne_branch {i}"),
            Target::BusPair((i, j)) => write!(f, "buspair ({i},{j})"),
        }
    }
}

/// Index of one variable inside a named variable group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum VarIndex {
    Bus(usize),
    Gen(usize),
    Branch(usize),
    Arc(BranchArc),
    BusPair(BusPairKey),
    DcArc(BranchArc),
    NeBranch(usize),
    NeArc(BranchArc),
}

impl fmt::Display for VarIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VarIndex::Bus(i) | VarIndex::Gen(i) | VarIndex::Branch(i) | VarIndex::NeBranch(i) => {
                write!(f, "{i}")
            }
            VarIndex::Arc(a) | VarIndex::DcArc(a) | VarIndex::NeArc(a) => {
                write!(f, "{},{},{}", a.branch, a.from, a.to)
            }
            VarIndex::BusPair((i, j)) => write!(f, "{i},{j}"),
        }
    }
}

/// Registry key of a model variable.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VarKey {
    pub name: String,
    pub index: VarIndex,
    pub nw: usize,
}

/// One resolved extension call, kept for inspection and tests.
#[derive(Debug, Clone, PartialEq)]
pub struct AppliedEntry {
    pub extension: Extension,
    pub name: String,
    pub target: Target,
    pub matched: DispatchKey,
    /// Reason string when the entry was a no-op.
    pub noop: Option<String>,
}

/// Program under construction for one formulation of one network.
#[derive(Clone)]
pub struct GenericModel {
    formulation: Formulation,
    reference: Arc<ReferenceModel>,
    registry: Arc<BuilderRegistry>,
    program: Program,
    vars: BTreeMap<VarKey, VarId>,
    nw: usize,
    bounded: bool,
    applied: Vec<AppliedEntry>,
}

impl fmt::Debug for GenericModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GenericModel")
            .field("formulation", &self.formulation)
            .field("network", &self.reference.name)
            .field("variables", &self.program.num_variables())
            .field("constraints", &self.program.num_constraints())
            .finish()
    }
}

impl GenericModel {
    pub fn new(
        reference: Arc<ReferenceModel>,
        formulation: Formulation,
        registry: Arc<BuilderRegistry>,
    ) -> Self {
        Self {
            formulation,
            reference,
            registry,
            program: Program::new(),
            vars: BTreeMap::new(),
            nw: DEFAULT_NW,
            bounded: true,
            applied: Vec::new(),
        }
    }

    /// Build the reference model for `data` and use the default registry.
    pub fn from_data(data: &NetworkData, formulation: Formulation) -> GridResult<Self> {
        let reference = build_ref(data)?;
        Ok(Self::new(
            Arc::new(reference),
            formulation,
            Arc::new(BuilderRegistry::with_defaults()),
        ))
    }

    /// Whether variable builders apply operating limits as bounds.
    pub fn bounded(&self) -> bool {
        self.bounded
    }

    pub fn set_bounded(&mut self, bounded: bool) {
        self.bounded = bounded;
    }

    pub fn formulation(&self) -> &Formulation {
        &self.formulation
    }

    pub fn family(&self) -> Family {
        self.formulation.family()
    }

    pub fn reference(&self) -> &ReferenceModel {
        &self.reference
    }

    /// Shared handle, for builders that read the reference while mutating the model.
    pub fn shared_reference(&self) -> Arc<ReferenceModel> {
        Arc::clone(&self.reference)
    }

    pub fn registry(&self) -> &BuilderRegistry {
        &self.registry
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    pub fn program_mut(&mut self) -> &mut Program {
        &mut self.program
    }

    pub fn into_program(self) -> Program {
        self.program
    }

    pub fn applied(&self) -> &[AppliedEntry] {
        &self.applied
    }

    // ---------------------------------------------------------------------
    // Extension points
    // ---------------------------------------------------------------------

    /// Add the variable group `name` for the whole network.
    pub fn add_variable(&mut self, name: &str) -> GridResult<()> {
        self.dispatch(Extension::Variable, name, Target::Network)
    }

    /// Add constraint `name` for one component.
    pub fn add_constraint(&mut self, name: &str, target: Target) -> GridResult<()> {
        self.dispatch(Extension::Constraint, name, target)
    }

    /// Add objective term `name`.
    pub fn add_objective(&mut self, name: &str) -> GridResult<()> {
        self.dispatch(Extension::Objective, name, Target::Network)
    }

    fn dispatch(&mut self, ext: Extension, name: &str, target: Target) -> GridResult<()> {
        let Resolution { entry, matched } = self.registry.resolve(ext, name, &self.formulation)?;
        let noop = match entry {
            Entry::Build(builder) => {
                builder(self, target)?;
                None
            }
            Entry::NoOp { reason } => {
                debug!(
                    formulation = %self.formulation,
                    %ext,
                    builder = name,
                    %target,
                    reason = %reason,
                    "no-op entry"
                );
                Some(reason)
            }
        };
        self.applied.push(AppliedEntry {
            extension: ext,
            name: name.to_string(),
            target,
            matched,
            noop,
        });
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Variable registry
    // ---------------------------------------------------------------------

    fn key(&self, name: &str, index: VarIndex) -> VarKey {
        VarKey {
            name: name.to_string(),
            index,
            nw: self.nw,
        }
    }

    /// Create and register a continuous variable.
    ///
    /// Re-registering an existing key returns the existing variable, so two
    /// builders that both need e.g. `va` can both ask for it.
    pub fn new_var(&mut self, name: &str, index: VarIndex, lb: f64, ub: f64) -> VarId {
        let key = self.key(name, index);
        if let Some(v) = self.vars.get(&key) {
            return *v;
        }
        let v = self.program.add_variable(format!("{name}[{index}]"), lb, ub);
        self.vars.insert(key, v);
        v
    }

    /// Create and register a binary variable.
    pub fn new_binary(&mut self, name: &str, index: VarIndex) -> VarId {
        let key = self.key(name, index);
        if let Some(v) = self.vars.get(&key) {
            return *v;
        }
        let v = self.program.add_binary(format!("{name}[{index}]"));
        self.vars.insert(key, v);
        v
    }

    pub fn try_var(&self, name: &str, index: VarIndex) -> Option<VarId> {
        self.vars.get(&self.key(name, index)).copied()
    }

    /// Look up a registered variable; missing variables mean the current
    /// formulation does not provide them.
    pub fn var(&self, name: &str, index: VarIndex) -> GridResult<VarId> {
        self.try_var(name, index).ok_or_else(|| {
            GridError::unsupported(format!("variable {name}[{index}]"), self.formulation.name())
        })
    }

    /// Whether any variable of group `name` exists.
    pub fn has_var_group(&self, name: &str) -> bool {
        self.vars.keys().any(|k| k.name == name && k.nw == self.nw)
    }

    /// All registered variables in key order.
    pub fn var_entries(&self) -> impl Iterator<Item = (&VarKey, VarId)> {
        self.vars.iter().map(|(k, v)| (k, *v))
    }

    // ---------------------------------------------------------------------
    // Row helpers
    // ---------------------------------------------------------------------

    pub fn add_row(&mut self, name: String, expr: Expr, sense: Sense, rhs: f64) -> ConstraintId {
        self.program.add_row(name, expr, sense, rhs)
    }

    /// `lhs == rhs`, both sides as expressions.
    pub fn add_equal(&mut self, name: String, lhs: Expr, rhs: Expr) -> ConstraintId {
        self.program.add_row(name, lhs - rhs, Sense::Equal, 0.0)
    }

    /// `lhs <= rhs`, both sides as expressions.
    pub fn add_less_equal(&mut self, name: String, lhs: Expr, rhs: Expr) -> ConstraintId {
        self.program.add_row(name, lhs - rhs, Sense::LessEqual, 0.0)
    }

    pub fn add_cone(&mut self, name: String, kind: ConstraintKind) -> ConstraintId {
        self.program.add_constraint(name, kind)
    }
}
