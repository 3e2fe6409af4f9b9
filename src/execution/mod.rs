pub mod engine;
pub mod executor;

pub use engine::{EngineConfig, EventHandler, PipelineEngine, PipelineEvent};
pub use executor::{ExecError, ExecOutcome, StepExecutor, DEFAULT_CAPTURE_LIMIT};
