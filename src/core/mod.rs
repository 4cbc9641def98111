// Public modules
pub mod artifact;
pub mod collect;
pub mod context;
pub mod defaults;
pub mod deps;
pub mod error;
pub mod orchestrator;
pub mod output;
pub mod paths;
pub mod prereq;
pub mod prompt;
pub mod provision;
pub mod service;

// Internal modules - not part of public API
pub(crate) mod permissions;

// Re-export common types for convenience
pub use error::{Error, ErrorCode, Result};
pub use output::{ArtifactRecord, StepOutcome, StepRecord};
