//! Pipeline definitions loaded from YAML
//!
//! A definition is loaded once per run and fully validated before execution
//! begins. Environment overlays let one parameterized definition serve
//! several deployment targets (registry URL, credential reference, resource
//! group naming) instead of near-duplicate copies.

use crate::core::{
    graph::{DefinitionError, DependencyGraph},
    stage::{ArtifactInput, ArtifactOutput, StageDefaults},
    step::{Shell, StepDefaults},
};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;

/// Top-level pipeline definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Pipeline name
    pub name: String,

    /// Run-scoped parameters, exported to every step's environment
    #[serde(default)]
    pub params: HashMap<String, String>,

    /// Named parameter overlays resolved at load time
    #[serde(default)]
    pub environments: HashMap<String, EnvironmentOverlay>,

    /// Maximum number of stages running at once
    #[serde(default)]
    pub concurrency: Option<usize>,

    /// Default total attempts per step (overridable per stage)
    #[serde(default)]
    pub max_attempts: Option<usize>,

    /// Default step timeout in seconds (overridable per step)
    #[serde(default)]
    pub default_timeout_secs: Option<u64>,

    /// Hours to retain run artifacts after the run reaches a terminal status
    #[serde(default)]
    pub artifact_retention_hours: Option<u64>,

    /// Pipeline stages
    pub stages: Vec<StageConfig>,
}

/// Parameter overrides for one deployment target
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnvironmentOverlay {
    #[serde(default)]
    pub params: HashMap<String, String>,
}

/// Stage as defined in YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageConfig {
    /// Unique stage name
    pub name: String,

    /// Stages that must complete before this one starts
    #[serde(default)]
    pub depends_on: Vec<String>,

    /// Environment overlay applied to every step in the stage
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Artifacts fetched from upstream stages before the first step runs
    #[serde(default)]
    pub inputs: Vec<ArtifactInput>,

    /// Artifacts published after the last step exits 0
    #[serde(default)]
    pub outputs: Vec<ArtifactOutput>,

    /// Run even when an upstream dependency failed (teardown stages)
    #[serde(default)]
    pub continue_on_failure: bool,

    /// Total attempts per step (overrides the pipeline default)
    #[serde(default)]
    pub max_attempts: Option<usize>,

    /// Ordered steps
    #[serde(default)]
    pub steps: Vec<StepConfig>,
}

/// Step as defined in YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepConfig {
    /// Step name, unique within the stage
    pub name: String,

    /// Opaque shell command
    pub run: String,

    /// Shell selection (defaults to sh)
    #[serde(default)]
    pub shell: Option<Shell>,

    /// Environment overlay for this step only
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Secret names injected into the environment at invocation time
    #[serde(default)]
    pub secrets: Vec<String>,

    /// Timeout for this step (overrides the pipeline default)
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl PipelineConfig {
    /// Load a pipeline definition from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path).with_context(|| {
            format!("failed to read pipeline file {}", path.as_ref().display())
        })?;
        Self::from_yaml(&content)
    }

    /// Parse and validate a pipeline definition from a YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: PipelineConfig =
            serde_yaml::from_str(yaml).context("failed to parse pipeline YAML")?;
        config.validate()?;
        Ok(config)
    }

    /// Build the dependency graph over the declared stages. Duplicate names
    /// and cycles surface here.
    pub fn build_graph(&self) -> Result<DependencyGraph, DefinitionError> {
        let mut graph = DependencyGraph::new();
        for stage in &self.stages {
            graph.add_stage(&stage.name, &stage.depends_on)?;
        }
        Ok(graph)
    }

    /// Validate the definition: unique stage and step names, no orphaned
    /// dependencies, no cycles, and consistent artifact wiring.
    pub fn validate(&self) -> Result<(), DefinitionError> {
        let graph = self.build_graph()?;
        graph.validate()?;

        // (producing stage, logical name) pairs, for input wiring checks
        let mut producers: HashSet<(&str, &str)> = HashSet::new();
        for stage in &self.stages {
            for output in &stage.outputs {
                producers.insert((stage.name.as_str(), output.name.as_str()));
            }
        }

        for stage in &self.stages {
            let mut seen_steps = HashSet::new();
            for step in &stage.steps {
                if !seen_steps.insert(step.name.as_str()) {
                    return Err(DefinitionError::DuplicateStep {
                        stage: stage.name.clone(),
                        step: step.name.clone(),
                    });
                }
            }

            for output in &stage.outputs {
                if output.path.is_empty() {
                    return Err(DefinitionError::BadArtifact {
                        stage: stage.name.clone(),
                        detail: format!("output '{}' has an empty path", output.name),
                    });
                }
            }

            for input in &stage.inputs {
                if !stage.depends_on.contains(&input.from) {
                    return Err(DefinitionError::BadArtifact {
                        stage: stage.name.clone(),
                        detail: format!(
                            "input '{}' comes from '{}', which is not a declared dependency",
                            input.name, input.from
                        ),
                    });
                }
                if !producers.contains(&(input.from.as_str(), input.name.as_str())) {
                    return Err(DefinitionError::BadArtifact {
                        stage: stage.name.clone(),
                        detail: format!(
                            "input '{}' is not declared as an output of stage '{}'",
                            input.name, input.from
                        ),
                    });
                }
            }
        }

        Ok(())
    }

    /// Resolve an environment overlay into a standalone definition. With no
    /// environment the definition is returned unchanged.
    pub fn resolve(&self, environment: Option<&str>) -> Result<PipelineConfig, DefinitionError> {
        let mut resolved = self.clone();
        if let Some(env_name) = environment {
            let overlay = self
                .environments
                .get(env_name)
                .ok_or_else(|| DefinitionError::UnknownEnvironment(env_name.to_string()))?;
            for (key, value) in &overlay.params {
                resolved.params.insert(key.clone(), value.clone());
            }
        }
        Ok(resolved)
    }

    /// Defaults passed down to stages and steps
    pub fn defaults(&self) -> StageDefaults {
        StageDefaults {
            max_attempts: self.max_attempts.unwrap_or(1),
            step: StepDefaults {
                timeout_secs: self
                    .default_timeout_secs
                    .unwrap_or_else(|| StepDefaults::default().timeout_secs),
            },
        }
    }
}
