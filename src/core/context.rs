//! Run-scoped context
//!
//! Explicit configuration object handed to every stage worker. Nothing in
//! the engine reads process-wide globals.

use crate::core::{run::PipelineRun, stage::Stage};
use std::collections::HashMap;
use uuid::Uuid;

/// Immutable run-scoped data shared with every stage and step
#[derive(Debug, Clone)]
pub struct RunContext {
    pub run_number: u64,
    pub execution_id: Uuid,
    pub pipeline: String,
    pub params: HashMap<String, String>,
}

impl RunContext {
    pub fn from_run(run: &PipelineRun) -> Self {
        Self {
            run_number: run.state.run_number,
            execution_id: run.state.execution_id,
            pipeline: run.name.clone(),
            params: run.params.clone(),
        }
    }

    /// Base environment for every step: run parameters plus the built-in
    /// `CONVEYOR_*` variables.
    pub fn base_env(&self) -> HashMap<String, String> {
        let mut env = self.params.clone();
        env.insert("CONVEYOR_PIPELINE".to_string(), self.pipeline.clone());
        env.insert(
            "CONVEYOR_RUN_NUMBER".to_string(),
            self.run_number.to_string(),
        );
        env.insert(
            "CONVEYOR_EXECUTION_ID".to_string(),
            self.execution_id.to_string(),
        );
        env
    }

    /// Environment for one stage: base env, the stage overlay, the stage
    /// name, and any recorded upstream failures (continue-on-failure stages
    /// see what broke above them).
    pub fn stage_env(&self, stage: &Stage, upstream_failed: &[String]) -> HashMap<String, String> {
        let mut env = self.base_env();
        env.extend(stage.env.clone());
        env.insert("CONVEYOR_STAGE".to_string(), stage.name.clone());
        if !upstream_failed.is_empty() {
            env.insert(
                "CONVEYOR_UPSTREAM_FAILED".to_string(),
                upstream_failed.join(","),
            );
        }
        env
    }
}
