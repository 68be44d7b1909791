//! Run settings.
//!
//! Every section uses `#[serde(default)]`, so a partial TOML file only needs
//! the keys it changes:
//!
//! ```toml
//! formulation = "SOCWR"
//!
//! [output]
//! branch_flows = true
//!
//! [obbt]
//! max_iter = 5
//! termination = "max"
//! upper_bound = 5812.6
//! upper_bound_constraint = true
//! ```

use std::path::Path;

use gridopt_core::{GridError, GridResult};
use serde::{Deserialize, Serialize};

use crate::formulation::Formulation;
use crate::oracle::SolverConfig;

/// Top-level settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Formulation used by [`crate::problems::run_model`] callers that do not pass one.
    pub formulation: Formulation,
    pub output: OutputSettings,
    pub solver: SolverConfig,
    pub obbt: ObbtSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            formulation: Formulation::dcp(),
            output: OutputSettings::default(),
            solver: SolverConfig::default(),
            obbt: ObbtSettings::default(),
        }
    }
}

impl Settings {
    pub fn from_toml_str(text: &str) -> GridResult<Self> {
        let settings: Settings =
            toml::from_str(text).map_err(|e| GridError::Config(e.to_string()))?;
        settings.obbt.validate()?;
        Ok(settings)
    }

    pub fn load(path: impl AsRef<Path>) -> GridResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn to_toml_string(&self) -> GridResult<String> {
        toml::to_string_pretty(self).map_err(|e| GridError::Config(e.to_string()))
    }
}

/// What goes into the solution map.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputSettings {
    /// Report `pf/qf/pt/qt` for branches.
    pub branch_flows: bool,
}

/// How OBBT measures progress between passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationCriterion {
    /// Average relative width reduction over all targets.
    #[default]
    Avg,
    /// Largest relative width reduction of any target.
    Max,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObbtSettings {
    /// Relaxation solved by every bound sub-problem.
    pub model: Formulation,
    pub max_iter: usize,
    /// Wall-clock budget in seconds, checked between passes.
    pub time_limit: f64,
    /// Objective of a known feasible solution.
    pub upper_bound: Option<f64>,
    /// Add `objective <= upper_bound` to every sub-problem.
    pub upper_bound_constraint: bool,
    /// Stop once the relaxation gap to `upper_bound` falls below this.
    /// The default (infinite) disables the check.
    pub rel_gap_tol: f64,
    /// Targets narrower than this are no longer tightened.
    pub min_bound_width: f64,
    pub improvement_tol: f64,
    /// Decimal digits kept when rounding tightened bounds outward.
    pub precision: u32,
    pub termination: TerminationCriterion,
}

impl Default for ObbtSettings {
    fn default() -> Self {
        Self {
            model: Formulation::qcwr(),
            max_iter: 100,
            time_limit: 3600.0,
            upper_bound: None,
            upper_bound_constraint: false,
            rel_gap_tol: f64::INFINITY,
            min_bound_width: 1e-2,
            improvement_tol: 1e-3,
            precision: 4,
            termination: TerminationCriterion::Avg,
        }
    }
}

impl ObbtSettings {
    pub fn validate(&self) -> GridResult<()> {
        if self.upper_bound_constraint && self.upper_bound.is_none() {
            return Err(GridError::Config(
                "obbt.upper_bound_constraint requires obbt.upper_bound".into(),
            ));
        }
        if self.time_limit <= 0.0 {
            return Err(GridError::Config("obbt.time_limit must be positive".into()));
        }
        if self.min_bound_width < 0.0 || self.improvement_tol < 0.0 || self.rel_gap_tol < 0.0 {
            return Err(GridError::Config(
                "obbt tolerances must be non-negative".into(),
            ));
        }
        if self.precision > 15 {
            return Err(GridError::Config(format!(
                "obbt.precision {} exceeds f64 resolution",
                self.precision
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let s = Settings::default();
        assert_eq!(s.formulation.name(), "DCP");
        assert_eq!(s.obbt.model.name(), "QCWR");
        assert_eq!(s.obbt.max_iter, 100);
        assert_eq!(s.obbt.precision, 4);
        assert!(s.obbt.rel_gap_tol.is_infinite());
        assert!(!s.output.branch_flows);
    }

    #[test]
    fn test_partial_toml() {
        let s = Settings::from_toml_str(
            r#"
            formulation = "socwr"
            [obbt]
            max_iter = 3
            termination = "max"
            "#,
        )
        .unwrap();
        assert_eq!(s.formulation.name(), "SOCWR");
        assert_eq!(s.obbt.max_iter, 3);
        assert_eq!(s.obbt.termination, TerminationCriterion::Max);
        assert_eq!(s.obbt.min_bound_width, 1e-2);
    }

    #[test]
    fn test_cutoff_without_bound_is_config_error() {
        let err = Settings::from_toml_str("[obbt]\nupper_bound_constraint = true\n").unwrap_err();
        assert!(matches!(err, GridError::Config(_)));
    }

    #[test]
    fn test_unknown_formulation_rejected() {
        assert!(Settings::from_toml_str("formulation = \"XYZ\"").is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[output]\nbranch_flows = true").unwrap();
        let s = Settings::load(file.path()).unwrap();
        assert!(s.output.branch_flows);
    }
}
