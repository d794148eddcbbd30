pub mod cell_eval;
pub mod error;
pub mod expression;
pub mod formula;
pub mod indices;
pub mod mapping;
pub mod normalizer;
pub mod outputs;
pub mod pipelines;
pub mod reference;
pub mod unification;
pub mod verification;

pub use error::{Result, StitchError};
pub use mapping::MappingConfig;
pub use pipelines::{run, stitch, ExecutionContext, RunOptions, RunReport, StitchOutcome};
pub use reference::ElementalReference;
pub use unification::UnifiedTable;
