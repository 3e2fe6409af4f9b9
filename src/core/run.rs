//! Pipeline run domain model

use crate::core::{
    config::PipelineConfig,
    graph::{DefinitionError, DependencyGraph},
    stage::Stage,
    state::{RunState, RunStatus, StageState},
};
use chrono::Utc;
use std::collections::{HashMap, HashSet};

/// Run-start event handed in by the external trigger collaborator
#[derive(Debug, Clone, Default)]
pub struct Trigger {
    /// Monotonic run number
    pub run_number: u64,
    /// Initial key/value parameters, merged over the definition's params
    pub parameters: HashMap<String, String>,
}

impl Trigger {
    pub fn new(run_number: u64) -> Self {
        Self {
            run_number,
            parameters: HashMap::new(),
        }
    }
}

/// One end-to-end execution instance of a pipeline definition
#[derive(Debug, Clone)]
pub struct PipelineRun {
    /// Pipeline name
    pub name: String,

    /// Run-scoped parameters (definition params + trigger overrides)
    pub params: HashMap<String, String>,

    /// Stages in declaration order
    pub stages: Vec<Stage>,

    /// Dependency graph over stage names
    pub graph: DependencyGraph,

    /// Execution state
    pub state: RunState,

    index: HashMap<String, usize>,
}

impl PipelineRun {
    /// Build a run from a validated definition and a trigger event
    pub fn new(config: &PipelineConfig, trigger: Trigger) -> Result<Self, DefinitionError> {
        let graph = config.build_graph()?;
        graph.validate()?;

        let defaults = config.defaults();
        let stages: Vec<Stage> = config
            .stages
            .iter()
            .map(|s| Stage::from_config(s, &defaults))
            .collect();

        let index = stages
            .iter()
            .enumerate()
            .map(|(i, s)| (s.name.clone(), i))
            .collect();

        let mut params = config.params.clone();
        params.extend(trigger.parameters);

        Ok(PipelineRun {
            name: config.name.clone(),
            params,
            stages,
            graph,
            state: RunState::new(trigger.run_number),
            index,
        })
    }

    /// Get a stage by name
    pub fn stage(&self, name: &str) -> Option<&Stage> {
        self.index.get(name).map(|&i| &self.stages[i])
    }

    /// Get a mutable stage by name
    pub fn stage_mut(&mut self, name: &str) -> Option<&mut Stage> {
        let i = *self.index.get(name)?;
        Some(&mut self.stages[i])
    }

    /// Names of stages that have succeeded
    pub fn succeeded_set(&self) -> HashSet<String> {
        self.stages
            .iter()
            .filter(|s| matches!(s.state, StageState::Succeeded { .. }))
            .map(|s| s.name.clone())
            .collect()
    }

    /// Names of stages in any terminal state
    pub fn terminal_set(&self) -> HashSet<String> {
        self.stages
            .iter()
            .filter(|s| s.state.is_terminal())
            .map(|s| s.name.clone())
            .collect()
    }

    /// Pending stages whose dependencies are satisfied, in declaration order.
    /// A continue-on-failure stage becomes ready once all its dependencies
    /// are terminal, regardless of their outcome.
    pub fn ready_stages(&self) -> Vec<String> {
        let succeeded = self.succeeded_set();
        let terminal = self.terminal_set();

        self.stages
            .iter()
            .filter(|s| matches!(s.state, StageState::Pending))
            .filter(|s| {
                if s.continue_on_failure {
                    s.dependencies_terminal(&terminal)
                } else {
                    s.dependencies_succeeded(&succeeded)
                }
            })
            .map(|s| s.name.clone())
            .collect()
    }

    /// Names of the currently running stages
    pub fn running_stages(&self) -> Vec<String> {
        self.stages
            .iter()
            .filter(|s| matches!(s.state, StageState::Running { .. }))
            .map(|s| s.name.clone())
            .collect()
    }

    /// Direct dependencies of `stage` that failed, were skipped, or were
    /// cancelled. Recorded into the environment of continue-on-failure
    /// stages.
    pub fn failed_dependencies(&self, stage: &str) -> Vec<String> {
        self.graph
            .dependencies(stage)
            .iter()
            .filter(|d| {
                self.stage(d).is_some_and(|s| {
                    matches!(
                        s.state,
                        StageState::Failed { .. } | StageState::Skipped { .. } | StageState::Cancelled
                    )
                })
            })
            .cloned()
            .collect()
    }

    /// Fail-fast propagation: mark pending stages with a failed (or skipped)
    /// dependency as Skipped, unless they opted into continue-on-failure.
    /// A cancelled dependency is not a skip trigger; `cancel_remaining`
    /// labels those dependents Cancelled instead. Returns the newly skipped
    /// stages with reasons. Iterates to a fixed point so skips cascade
    /// transitively.
    pub fn apply_skips(&mut self) -> Vec<(String, String)> {
        let mut newly_skipped = Vec::new();

        loop {
            let mut changed = false;

            for i in 0..self.stages.len() {
                if !matches!(self.stages[i].state, StageState::Pending)
                    || self.stages[i].continue_on_failure
                {
                    continue;
                }
                let name = self.stages[i].name.clone();
                let trigger = self
                    .graph
                    .dependencies(&name)
                    .iter()
                    .find(|d| {
                        self.stage(d).is_some_and(|s| {
                            matches!(
                                s.state,
                                StageState::Failed { .. } | StageState::Skipped { .. }
                            )
                        })
                    })
                    .cloned();
                if let Some(first) = trigger {
                    let reason = format!("upstream stage '{}' did not succeed", first);
                    self.stages[i].state = StageState::Skipped {
                        reason: reason.clone(),
                    };
                    newly_skipped.push((self.stages[i].name.clone(), reason));
                    changed = true;
                }
            }

            if !changed {
                break;
            }
        }

        newly_skipped
    }

    /// Mark every stage that never reached a terminal state as Cancelled
    pub fn cancel_remaining(&mut self) {
        for stage in &mut self.stages {
            if !stage.state.is_terminal() {
                stage.state = StageState::Cancelled;
            }
        }
    }

    /// All stages in a terminal state
    pub fn is_complete(&self) -> bool {
        self.stages.iter().all(|s| s.state.is_terminal())
    }

    pub fn has_failed(&self) -> bool {
        self.stages
            .iter()
            .any(|s| matches!(s.state, StageState::Failed { .. }))
    }

    /// Compute and record the terminal run status. Only meaningful once no
    /// stage remains Pending or Running.
    pub fn finalize(&mut self, cancelled: bool) -> RunStatus {
        let mut succeeded = 0;
        let mut failed = 0;
        let mut skipped = 0;
        let mut any_cancelled = false;

        for stage in &self.stages {
            match &stage.state {
                StageState::Succeeded { .. } => succeeded += 1,
                StageState::Failed { .. } => failed += 1,
                StageState::Skipped { .. } => skipped += 1,
                StageState::Cancelled => any_cancelled = true,
                _ => {}
            }
        }

        self.state.update_counts(succeeded, failed, skipped);

        // Failed beats Cancelled beats Succeeded; Skipped never blocks success.
        let status = if failed > 0 {
            RunStatus::Failed
        } else if cancelled || any_cancelled {
            RunStatus::Cancelled
        } else {
            RunStatus::Succeeded
        };

        self.state.finish(status);
        status
    }

    /// Earliest failed stage in dependency order: the first root cause, as
    /// opposed to cascaded skips.
    pub fn root_cause(&self) -> Option<String> {
        self.graph
            .topo_order()
            .into_iter()
            .find(|name| {
                self.stage(name)
                    .is_some_and(|s| matches!(s.state, StageState::Failed { .. }))
            })
    }

    /// Record a stage transition to Running. A stage never starts twice: the
    /// caller must only pass stages returned by `ready_stages`.
    pub fn mark_running(&mut self, name: &str) {
        if let Some(stage) = self.stage_mut(name) {
            stage.state = StageState::Running {
                started_at: Utc::now(),
            };
        }
    }
}
