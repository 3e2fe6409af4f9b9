//! Stage domain model

use crate::core::{
    state::StageState,
    step::{Step, StepDefaults, StepRecord},
};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Declared artifact consumed by a stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactInput {
    /// Producing stage (must be a declared dependency)
    pub from: String,
    /// Logical artifact name
    pub name: String,
}

/// Declared artifact produced by a stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactOutput {
    /// Logical artifact name
    pub name: String,
    /// Path relative to the stage working directory holding the content
    pub path: String,
}

/// A named, ordered group of steps with a single pass/fail outcome
#[derive(Debug, Clone)]
pub struct Stage {
    /// Stage name, unique within the pipeline
    pub name: String,

    /// Names of stages that must complete before this one starts
    pub dependencies: Vec<String>,

    /// Steps, executed strictly in declaration order
    pub steps: Vec<Step>,

    /// Artifacts fetched into the working directory before the first step
    pub inputs: Vec<ArtifactInput>,

    /// Artifacts published after the last step exits 0
    pub outputs: Vec<ArtifactOutput>,

    /// Run even when an upstream dependency failed. The upstream failure is
    /// recorded in the stage environment. Also used for teardown stages.
    pub continue_on_failure: bool,

    /// Total attempts a failing step is given before the stage fails
    pub max_attempts: usize,

    /// Environment overlay applied to every step in the stage
    pub env: HashMap<String, String>,

    /// Runtime state, mutated only by the engine
    pub state: StageState,

    /// Per-step attempt records, filled in as the stage executes
    pub records: Vec<StepRecord>,
}

impl Stage {
    /// Create a stage from its config
    pub fn from_config(config: &crate::core::config::StageConfig, defaults: &StageDefaults) -> Self {
        let steps = config
            .steps
            .iter()
            .map(|s| Step::from_config(s, &defaults.step))
            .collect();

        Stage {
            name: config.name.clone(),
            dependencies: config.depends_on.clone(),
            steps,
            inputs: config.inputs.clone(),
            outputs: config.outputs.clone(),
            continue_on_failure: config.continue_on_failure,
            max_attempts: config.max_attempts.unwrap_or(defaults.max_attempts),
            env: config.env.clone(),
            state: StageState::Pending,
            records: Vec::new(),
        }
    }

    /// All dependencies succeeded
    pub fn dependencies_succeeded(&self, succeeded: &HashSet<String>) -> bool {
        self.dependencies.iter().all(|d| succeeded.contains(d))
    }

    /// All dependencies reached a terminal state (used for
    /// continue-on-failure stages, which run even after upstream failures)
    pub fn dependencies_terminal(&self, terminal: &HashSet<String>) -> bool {
        self.dependencies.iter().all(|d| terminal.contains(d))
    }
}

/// Global defaults applied to stages that do not override them
#[derive(Debug, Clone)]
pub struct StageDefaults {
    pub max_attempts: usize,
    pub step: StepDefaults,
}

impl Default for StageDefaults {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            step: StepDefaults::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stage_with_deps(deps: &[&str]) -> Stage {
        Stage {
            name: "test".to_string(),
            dependencies: deps.iter().map(|s| s.to_string()).collect(),
            steps: vec![],
            inputs: vec![],
            outputs: vec![],
            continue_on_failure: false,
            max_attempts: 1,
            env: HashMap::new(),
            state: StageState::Pending,
            records: Vec::new(),
        }
    }

    #[test]
    fn test_dependencies_succeeded() {
        let stage = stage_with_deps(&["compile", "lint"]);

        let mut succeeded = HashSet::new();
        succeeded.insert("compile".to_string());
        assert!(!stage.dependencies_succeeded(&succeeded));

        succeeded.insert("lint".to_string());
        assert!(stage.dependencies_succeeded(&succeeded));
    }

    #[test]
    fn test_no_dependencies_always_ready() {
        let stage = stage_with_deps(&[]);
        assert!(stage.dependencies_succeeded(&HashSet::new()));
    }
}
