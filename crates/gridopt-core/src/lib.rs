//! # gridopt-core
//!
//! Data layer for steady-state network optimization:
//!
//! - [`data`]: the canonical, string-keyed network data dictionary
//! - [`reference`]: the reference-model builder (active sets, arcs, bus pairs)
//! - [`graph_utils`]: island analysis
//! - [`solution`]: sparse solution maps and [`update_data`]
//! - [`error`]: the unified [`GridError`]

pub mod cost;
pub mod data;
pub mod error;
pub mod graph_utils;
pub mod reference;
pub mod solution;

pub use cost::CostModel;
pub use data::{
    update_data, Branch, Bus, BusType, ComponentMap, DcLine, Gen, Load, NetworkData, Shunt,
    DEFAULT_ANGLE_DIFF,
};
pub use error::{GridError, GridResult};
pub use reference::{
    build_ref, pair_key, ArcSet, BranchArc, BusPair, BusPairKey, ComponentKeys, ExpansionRef,
    ReferenceModel,
};
pub use solution::{FieldValues, SolutionData};
