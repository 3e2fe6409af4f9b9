//! conveyor - a pipeline orchestration engine
//!
//! Executes dependency-ordered build and deploy stages defined in YAML,
//! propagating artifacts between stages and tearing environments down even
//! when earlier stages fail.

pub mod artifact;
pub mod cli;
pub mod core;
pub mod execution;
pub mod persistence;
pub mod report;
pub mod secrets;

// Re-export commonly used types
pub use artifact::{ArtifactError, ArtifactKey, ArtifactStore, DiskArtifactStore, MemoryArtifactStore};
pub use crate::core::{PipelineConfig, PipelineRun, RunStatus, StageState, StepExit, Trigger};
pub use execution::{EngineConfig, PipelineEngine, PipelineEvent};
pub use report::RunReport;
pub use secrets::{EnvSecretProvider, SecretProvider, StaticSecretProvider};
