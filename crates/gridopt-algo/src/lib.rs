//! # gridopt-algo: Formulation-Generic Network Optimization
//!
//! Problems are written once against formulation-agnostic [`templates`] and
//! instantiated for any formulation registered in a [`BuilderRegistry`]:
//!
//! | Formulation | Family       | Voltage variables        | Problem class |
//! |-------------|--------------|--------------------------|---------------|
//! | `ACP`       | Polar        | `va`, `vm`               | Nonlinear     |
//! | `DCP`       | Angle        | `va`                     | Linear        |
//! | `NFA`       | Angle        | none                     | Linear        |
//! | `SOCWR`     | Wr           | `w`, `wr`, `wi`          | Conic         |
//! | `QCWR`      | Wr           | `w`, `wr`, `wi`, `vm`, `td` | Conic      |
//! | `SOCBF`     | BranchFlow   | `w`, `ccm`               | Conic         |
//!
//! ### Architecture
//!
//! - **[`GenericModel`]**: variable registry, program under construction and
//!   the dispatch log of applied builders
//! - **[`BuilderRegistry`]**: `(extension, name)` to builder per formulation
//!   tag or family; user code can register new formulations at runtime
//! - **[`relaxation`]**: convex envelopes of products, squares, sine and
//!   cosine used by the `W` families
//! - **[`SolveOracle`]**: the seam between a built [`Program`] and a solver
//!   backend ([`ClarabelOracle`], [`GoodLpOracle`])
//! - **[`obbt`]**: bound tightening on top of a relaxation
//!
//! ## Example
//!
//! ```ignore
//! use gridopt_algo::{build_opf, run_model, ClarabelOracle, Formulation, Settings};
//!
//! let settings = Settings::default();
//! let result = run_model(&data, Formulation::socwr(), build_opf, &ClarabelOracle::new(), &settings)?;
//! println!("{} {:.2}", result.status, result.objective);
//! ```

pub mod forms;
pub mod formulation;
pub mod model;
pub mod obbt;
pub mod objective;
pub mod oracle;
pub mod problems;
pub mod program;
pub mod relaxation;
pub mod result;
pub mod settings;
pub mod templates;

pub use formulation::{Family, Formulation};
pub use model::{
    AppliedEntry, BuilderRegistry, DispatchKey, Entry, Extension, GenericModel, Target, VarIndex,
    VarKey,
};
pub use obbt::{run_obbt, ObbtOutput, ObbtStats, ObbtTermination};
pub use oracle::{
    default_oracles, select_oracle, ClarabelOracle, GoodLpOracle, OracleOutput, SolveOracle,
    SolveStatus, SolverConfig,
};
pub use problems::{
    build_opf, build_opf_bf, build_ots, build_pf, build_tnep, instantiate_model, run_model,
    ProblemBuilder,
};
pub use program::{Expr, ProblemClass, Program, VarId};
pub use result::{CaseSummary, SolveResult};
pub use settings::{ObbtSettings, OutputSettings, Settings, TerminationCriterion};
