//! Unified error type for gridopt
//!
//! Construction-time failures (bad topology, a template with no builder for
//! the active formulation, a relaxation fed an unbounded variable) are
//! reported through [`GridError`]. Solver outcomes are *not* errors: an
//! infeasible or failed solve comes back as a status on the result record.
//!
//! # Example
//!
//! ```ignore
//! use gridopt_core::{build_ref, GridResult, NetworkData};
//!
//! fn count_arcs(json: &str) -> GridResult<usize> {
//!     let data = NetworkData::from_json_str(json)?;
//!     Ok(build_ref(&data)?.arcs.len())
//! }
//! ```

use thiserror::Error;

/// Unified error type for all gridopt operations.
#[derive(Error, Debug)]
pub enum GridError {
    /// Malformed or incomplete network data. Always names the offending record.
    #[error("data inconsistency in {component} '{id}': {reason}")]
    DataInconsistency {
        component: String,
        id: String,
        reason: String,
    },

    /// A named variable/constraint/objective has no builder for the active
    /// formulation tag nor for its family.
    #[error("'{name}' is not supported by formulation {formulation}")]
    UnsupportedFormulation { name: String, formulation: String },

    /// The solve oracle could not be used at all (unavailable, rejected the
    /// program class, or crashed).
    #[error("Solve failure: {0}")]
    SolveFailure(String),

    /// A relaxation primitive received bounds it cannot represent.
    #[error("Numeric degeneracy: {0}")]
    NumericDegeneracy(String),

    /// Invalid settings.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Parsing/deserialization errors
    #[error("Parse error: {0}")]
    Parse(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience type alias for Results using GridError.
pub type GridResult<T> = Result<T, GridError>;

impl GridError {
    /// Shorthand for [`GridError::DataInconsistency`].
    pub fn data(
        component: impl Into<String>,
        id: impl ToString,
        reason: impl Into<String>,
    ) -> Self {
        GridError::DataInconsistency {
            component: component.into(),
            id: id.to_string(),
            reason: reason.into(),
        }
    }

    /// Shorthand for [`GridError::UnsupportedFormulation`].
    pub fn unsupported(name: impl Into<String>, formulation: impl Into<String>) -> Self {
        GridError::UnsupportedFormulation {
            name: name.into(),
            formulation: formulation.into(),
        }
    }
}

impl From<anyhow::Error> for GridError {
    fn from(err: anyhow::Error) -> Self {
        GridError::SolveFailure(err.to_string())
    }
}

impl From<serde_json::Error> for GridError {
    fn from(err: serde_json::Error) -> Self {
        GridError::Parse(err.to_string())
    }
}
