//! Formulation tags and families.
//!
//! A formulation is an open tag (its name) plus the family whose builders it
//! falls back to. The built-in tags:
//!
//! | Tag     | Family       | Description                                   |
//! |---------|--------------|-----------------------------------------------|
//! | `ACP`   | `AcPolar`    | exact AC power flow in polar voltage form     |
//! | `DCP`   | `Dc`         | linearized active-power flow                  |
//! | `NFA`   | `Dc`         | network-flow approximation (no Ohm's law)     |
//! | `SOCWR` | `Wr`         | second-order-cone relaxation in W-space       |
//! | `QCWR`  | `Wr`         | quadratic-convex relaxation (adds `vm`, `va`, `td` lifting) |
//! | `SOCBF` | `BranchFlow` | second-order-cone branch-flow relaxation      |
//!
//! User formulations pick any new name and an existing family, then register
//! the builders that differ from that family's defaults.

use std::fmt;
use std::str::FromStr;

use gridopt_core::GridError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Formulation family: the fallback key for builder lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Family {
    AcPolar,
    Dc,
    Wr,
    BranchFlow,
}

impl Family {
    pub const ALL: [Family; 4] = [Family::AcPolar, Family::Dc, Family::Wr, Family::BranchFlow];

    /// Whether formulations of this family carry reactive power.
    pub fn has_reactive_power(&self) -> bool {
        !matches!(self, Family::Dc)
    }
}

impl fmt::Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Family::AcPolar => write!(f, "ac_polar"),
            Family::Dc => write!(f, "dc"),
            Family::Wr => write!(f, "wr"),
            Family::BranchFlow => write!(f, "branch_flow"),
        }
    }
}

/// A formulation tag.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Formulation {
    name: String,
    family: Family,
}

impl Formulation {
    pub const ACP: &'static str = "ACP";
    pub const DCP: &'static str = "DCP";
    pub const NFA: &'static str = "NFA";
    pub const SOCWR: &'static str = "SOCWR";
    pub const QCWR: &'static str = "QCWR";
    pub const SOCBF: &'static str = "SOCBF";

    /// A user-defined formulation refining `family`.
    pub fn new(name: impl Into<String>, family: Family) -> Self {
        Self {
            name: name.into(),
            family,
        }
    }

    pub fn acp() -> Self {
        Self::new(Self::ACP, Family::AcPolar)
    }

    pub fn dcp() -> Self {
        Self::new(Self::DCP, Family::Dc)
    }

    pub fn nfa() -> Self {
        Self::new(Self::NFA, Family::Dc)
    }

    pub fn socwr() -> Self {
        Self::new(Self::SOCWR, Family::Wr)
    }

    pub fn qcwr() -> Self {
        Self::new(Self::QCWR, Family::Wr)
    }

    pub fn socbf() -> Self {
        Self::new(Self::SOCBF, Family::BranchFlow)
    }

    pub fn builtin() -> Vec<Formulation> {
        vec![
            Self::acp(),
            Self::dcp(),
            Self::nfa(),
            Self::socwr(),
            Self::qcwr(),
            Self::socbf(),
        ]
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn family(&self) -> Family {
        self.family
    }
}

impl fmt::Display for Formulation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

impl FromStr for Formulation {
    type Err = GridError;

    /// Parses a built-in tag, case-insensitively.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::builtin()
            .into_iter()
            .find(|f| f.name.eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| {
                GridError::Config(format!(
                    "unknown formulation '{s}' (expected one of ACP, DCP, NFA, SOCWR, QCWR, SOCBF)"
                ))
            })
    }
}

impl Serialize for Formulation {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.name)
    }
}

impl<'de> Deserialize<'de> for Formulation {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        name.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_builtin() {
        let f: Formulation = "qcwr".parse().unwrap();
        assert_eq!(f.name(), "QCWR");
        assert_eq!(f.family(), Family::Wr);
        assert!("XYZ".parse::<Formulation>().is_err());
    }

    #[test]
    fn test_user_formulation_keeps_family() {
        let f = Formulation::new("MyDC", Family::Dc);
        assert_eq!(f.to_string(), "MyDC");
        assert!(!f.family().has_reactive_power());
    }
}
