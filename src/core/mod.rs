//! Core domain models
//!
//! This module defines the fundamental data structures that represent
//! pipeline definitions, stages, steps, and run state.

pub mod config;
pub mod context;
pub mod graph;
pub mod run;
pub mod stage;
pub mod state;
pub mod step;

pub use config::{EnvironmentOverlay, PipelineConfig, StageConfig, StepConfig};
pub use context::RunContext;
pub use graph::{DefinitionError, DependencyGraph};
pub use run::{PipelineRun, Trigger};
pub use stage::{ArtifactInput, ArtifactOutput, Stage};
pub use state::{RunState, RunStatus, StageState, StageStatus};
pub use step::{Shell, Step, StepAttempt, StepExit, StepRecord};
