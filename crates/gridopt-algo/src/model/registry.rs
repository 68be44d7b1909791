//! Builder registry: the `(name, formulation) -> builder` capability table.
//!
//! Lookup is two-level: an entry registered for the exact formulation tag
//! wins, otherwise the entry for the formulation's family is used, otherwise
//! the call fails with `UnsupportedFormulation`. A formulation that has
//! nothing to add for some name must say so with a [`Entry::NoOp`] carrying
//! the reason; a missing entry is always an error.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use gridopt_core::{GridError, GridResult};

use super::{GenericModel, Target};
use crate::formulation::{Family, Formulation};

/// The three extension points of a [`GenericModel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Extension {
    Variable,
    Constraint,
    Objective,
}

impl fmt::Display for Extension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Extension::Variable => write!(f, "variable"),
            Extension::Constraint => write!(f, "constraint"),
            Extension::Objective => write!(f, "objective"),
        }
    }
}

/// Second half of a registry key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DispatchKey {
    Tag(String),
    Family(Family),
}

impl fmt::Display for DispatchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchKey::Tag(tag) => write!(f, "tag {tag}"),
            DispatchKey::Family(family) => write!(f, "family {family}"),
        }
    }
}

/// Signature shared by every builder.
pub type BuilderFn = dyn Fn(&mut GenericModel, Target) -> GridResult<()> + Send + Sync;

#[derive(Clone)]
pub enum Entry {
    Build(Arc<BuilderFn>),
    /// Deliberately adds nothing.
    NoOp { reason: String },
}

impl Entry {
    pub fn build<F>(f: F) -> Self
    where
        F: Fn(&mut GenericModel, Target) -> GridResult<()> + Send + Sync + 'static,
    {
        Entry::Build(Arc::new(f))
    }

    pub fn noop(reason: impl Into<String>) -> Self {
        Entry::NoOp {
            reason: reason.into(),
        }
    }

    pub fn is_noop(&self) -> bool {
        matches!(self, Entry::NoOp { .. })
    }
}

impl fmt::Debug for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Entry::Build(_) => write!(f, "Build(..)"),
            Entry::NoOp { reason } => write!(f, "NoOp({reason})"),
        }
    }
}

/// A resolved entry plus the key that matched.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub entry: Entry,
    pub matched: DispatchKey,
}

type Key = (Extension, String, DispatchKey);

/// Holds all registered builders.
///
/// Create with `BuilderRegistry::new()` for empty or
/// `BuilderRegistry::with_defaults()` for the built-in formulations.
#[derive(Default, Clone)]
pub struct BuilderRegistry {
    entries: HashMap<Key, Entry>,
}

impl BuilderRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every built-in formulation's builders.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        crate::forms::register_defaults(&mut registry);
        registry
    }

    pub fn register(&mut self, ext: Extension, name: &str, key: DispatchKey, entry: Entry) {
        self.entries.insert((ext, name.to_string(), key), entry);
    }

    /// Register for one formulation tag.
    pub fn register_tag(&mut self, ext: Extension, name: &str, tag: &str, entry: Entry) {
        self.register(ext, name, DispatchKey::Tag(tag.to_string()), entry);
    }

    /// Register a family default.
    pub fn register_family(&mut self, ext: Extension, name: &str, family: Family, entry: Entry) {
        self.register(ext, name, DispatchKey::Family(family), entry);
    }

    /// Register the same entry as the default of every family.
    pub fn register_all_families(&mut self, ext: Extension, name: &str, entry: Entry) {
        for family in Family::ALL {
            self.register_family(ext, name, family, entry.clone());
        }
    }

    pub fn contains(&self, ext: Extension, name: &str, key: &DispatchKey) -> bool {
        self.entries
            .contains_key(&(ext, name.to_string(), key.clone()))
    }

    /// Exact tag, then family, then `UnsupportedFormulation`.
    pub fn resolve(
        &self,
        ext: Extension,
        name: &str,
        formulation: &Formulation,
    ) -> GridResult<Resolution> {
        let candidates = [
            DispatchKey::Tag(formulation.name().to_string()),
            DispatchKey::Family(formulation.family()),
        ];
        for key in candidates {
            if let Some(entry) = self.entries.get(&(ext, name.to_string(), key.clone())) {
                return Ok(Resolution {
                    entry: entry.clone(),
                    matched: key,
                });
            }
        }
        Err(GridError::unsupported(
            format!("{ext} {name}"),
            formulation.name(),
        ))
    }

    /// Names registered for an extension point, sorted and deduplicated.
    pub fn names(&self, ext: Extension) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .entries
            .keys()
            .filter(|(e, _, _)| *e == ext)
            .map(|(_, n, _)| n.as_str())
            .collect();
        names.sort_unstable();
        names.dedup();
        names
    }

    /// Every explicit no-op with its reason, for auditing.
    pub fn noops(&self) -> Vec<(Extension, &str, &DispatchKey, &str)> {
        let mut out: Vec<_> = self
            .entries
            .iter()
            .filter_map(|((ext, name, key), entry)| match entry {
                Entry::NoOp { reason } => Some((*ext, name.as_str(), key, reason.as_str())),
                Entry::Build(_) => None,
            })
            .collect();
        out.sort_by(|a, b| (a.0, a.1, a.2.to_string()).cmp(&(b.0, b.1, b.2.to_string())));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok(_: &mut GenericModel, _: Target) -> GridResult<()> {
        Ok(())
    }

    #[test]
    fn test_tag_wins_over_family() {
        let mut registry = BuilderRegistry::new();
        registry.register_family(Extension::Constraint, "c", Family::Dc, Entry::build(ok));
        registry.register_tag(
            Extension::Constraint,
            "c",
            "NFA",
            Entry::noop("no Ohm's law"),
        );

        let nfa = registry
            .resolve(Extension::Constraint, "c", &Formulation::nfa())
            .unwrap();
        assert!(nfa.entry.is_noop());
        assert_eq!(nfa.matched, DispatchKey::Tag("NFA".into()));

        let dcp = registry
            .resolve(Extension::Constraint, "c", &Formulation::dcp())
            .unwrap();
        assert!(!dcp.entry.is_noop());
        assert_eq!(dcp.matched, DispatchKey::Family(Family::Dc));
    }

    #[test]
    fn test_missing_entry_is_unsupported() {
        let registry = BuilderRegistry::new();
        let err = registry
            .resolve(Extension::Variable, "voltage", &Formulation::acp())
            .unwrap_err();
        assert!(matches!(err, GridError::UnsupportedFormulation { .. }));
    }

    #[test]
    fn test_extensions_are_separate_namespaces() {
        let mut registry = BuilderRegistry::new();
        registry.register_all_families(Extension::Variable, "branch_current", Entry::build(ok));
        assert!(registry
            .resolve(Extension::Constraint, "branch_current", &Formulation::socbf())
            .is_err());
        assert_eq!(registry.names(Extension::Variable), vec!["branch_current"]);
    }
}
