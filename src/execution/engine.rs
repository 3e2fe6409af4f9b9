//! Pipeline execution engine
//!
//! Drives a [`PipelineRun`] to completion: dispatches ready stages into a
//! bounded worker pool, runs each stage's steps sequentially, propagates
//! skips after failures, and reacts to cancellation. Observers subscribe to
//! [`PipelineEvent`]s; the engine itself never prints.

use crate::artifact::{ArtifactKey, ArtifactStore};
use crate::core::{
    PipelineRun, RunContext, RunStatus, Stage, StageState, StepAttempt, StepExit, StepRecord,
};
use crate::execution::executor::{StepExecutor, DEFAULT_CAPTURE_LIMIT};
use crate::report::RunReport;
use crate::secrets::SecretProvider;
use anyhow::bail;
use chrono::Utc;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Events emitted during pipeline execution
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    RunStarted {
        execution_id: Uuid,
        run_number: u64,
        pipeline: String,
    },
    StageStarted {
        stage: String,
    },
    StepStarted {
        stage: String,
        step: String,
        attempt: usize,
        max_attempts: usize,
    },
    StepFinished {
        stage: String,
        step: String,
        exit: StepExit,
        duration_ms: u64,
    },
    StageSucceeded {
        stage: String,
    },
    StageFailed {
        stage: String,
        error: String,
    },
    StageSkipped {
        stage: String,
        reason: String,
    },
    ArtifactPublished {
        stage: String,
        name: String,
        size: u64,
    },
    RunCompleted {
        execution_id: Uuid,
        status: RunStatus,
    },
}

pub type EventHandler = Arc<dyn Fn(PipelineEvent) + Send + Sync>;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Maximum number of stages executing at once
    pub concurrency: usize,
    /// Root under which per-run working directories are created
    pub workdir_root: PathBuf,
    /// Cap on captured output per step invocation
    pub capture_limit: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            workdir_root: std::env::temp_dir().join("conveyor"),
            capture_limit: DEFAULT_CAPTURE_LIMIT,
        }
    }
}

pub struct PipelineEngine {
    executor: Arc<StepExecutor>,
    store: Arc<dyn ArtifactStore>,
    secrets: Arc<dyn SecretProvider>,
    config: EngineConfig,
    handlers: Arc<Mutex<Vec<EventHandler>>>,
    cancel: watch::Sender<bool>,
}

impl PipelineEngine {
    pub fn new(
        store: Arc<dyn ArtifactStore>,
        secrets: Arc<dyn SecretProvider>,
        config: EngineConfig,
    ) -> Self {
        let (cancel, _) = watch::channel(false);
        Self {
            executor: Arc::new(StepExecutor::new(config.capture_limit)),
            store,
            secrets,
            config,
            handlers: Arc::new(Mutex::new(Vec::new())),
            cancel,
        }
    }

    /// Register an observer invoked for every event, in registration order
    pub fn add_event_handler(&self, handler: EventHandler) {
        if let Ok(mut handlers) = self.handlers.lock() {
            handlers.push(handler);
        }
    }

    /// Request cancellation. Running steps are killed; stages that never
    /// started end Cancelled.
    pub fn cancel(&self) {
        let _ = self.cancel.send(true);
    }

    fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    /// Execute the run to a terminal status and produce its report
    pub async fn execute(&self, run: &mut PipelineRun) -> anyhow::Result<RunReport> {
        let ctx = RunContext::from_run(run);
        run.state.start(run.stages.len());

        info!(
            pipeline = %ctx.pipeline,
            run_number = ctx.run_number,
            "starting run {}",
            ctx.execution_id
        );
        emit(
            &self.handlers,
            PipelineEvent::RunStarted {
                execution_id: ctx.execution_id,
                run_number: ctx.run_number,
                pipeline: ctx.pipeline.clone(),
            },
        );

        let run_root = self
            .config
            .workdir_root
            .join(format!("run-{}", ctx.run_number));
        let mut pool: JoinSet<(String, StageOutcome)> = JoinSet::new();

        loop {
            for (stage, reason) in run.apply_skips() {
                debug!(%stage, "skipped: {}", reason);
                emit(&self.handlers, PipelineEvent::StageSkipped { stage, reason });
            }

            if !self.is_cancelled() {
                for name in run.ready_stages() {
                    if pool.len() >= self.config.concurrency {
                        break;
                    }
                    self.dispatch(run, &ctx, &name, &run_root, &mut pool);
                }
            }

            if pool.is_empty() {
                if run.is_complete() {
                    break;
                }
                if self.is_cancelled() {
                    run.cancel_remaining();
                    break;
                }
                // ready_stages empty with pending stages left means the
                // graph validation was bypassed
                bail!("no runnable stages and none in flight");
            }

            if let Some(joined) = pool.join_next().await {
                let (name, outcome) = joined?;
                self.settle(run, &name, outcome);
            }
        }

        let cancelled = self.is_cancelled();
        let status = run.finalize(cancelled);
        info!(pipeline = %ctx.pipeline, ?status, "run {} finished", ctx.execution_id);
        emit(
            &self.handlers,
            PipelineEvent::RunCompleted {
                execution_id: ctx.execution_id,
                status,
            },
        );

        let artifacts = self
            .store
            .manifest(ctx.run_number)
            .await
            .unwrap_or_default();
        Ok(RunReport::from_run(run, artifacts))
    }

    fn dispatch(
        &self,
        run: &mut PipelineRun,
        ctx: &RunContext,
        name: &str,
        run_root: &std::path::Path,
        pool: &mut JoinSet<(String, StageOutcome)>,
    ) {
        let upstream_failed = run.failed_dependencies(name);
        run.mark_running(name);

        let stage = match run.stage(name) {
            Some(stage) => stage.clone(),
            None => return,
        };
        let env = ctx.stage_env(&stage, &upstream_failed);

        emit(
            &self.handlers,
            PipelineEvent::StageStarted {
                stage: name.to_string(),
            },
        );

        let shared = WorkerShared {
            executor: Arc::clone(&self.executor),
            store: Arc::clone(&self.store),
            secrets: Arc::clone(&self.secrets),
            handlers: Arc::clone(&self.handlers),
            cancel: self.cancel.subscribe(),
            run_number: ctx.run_number,
        };
        let workdir = run_root.join(&stage.name);
        pool.spawn(run_stage(shared, stage, env, workdir));
    }

    fn settle(&self, run: &mut PipelineRun, name: &str, outcome: StageOutcome) {
        let started_at = match run.stage(name).map(|s| &s.state) {
            Some(StageState::Running { started_at }) => Some(*started_at),
            _ => None,
        };

        if let Some(stage) = run.stage_mut(name) {
            stage.records = outcome.records;
            stage.state = match outcome.conclusion {
                StageConclusion::Succeeded => StageState::Succeeded {
                    started_at: started_at.unwrap_or_else(Utc::now),
                    finished_at: Utc::now(),
                },
                StageConclusion::Failed(ref error) => StageState::Failed {
                    error: error.clone(),
                    started_at,
                    finished_at: Utc::now(),
                },
                StageConclusion::Cancelled => StageState::Cancelled,
            };
        }

        match outcome.conclusion {
            StageConclusion::Succeeded => emit(
                &self.handlers,
                PipelineEvent::StageSucceeded {
                    stage: name.to_string(),
                },
            ),
            StageConclusion::Failed(error) => {
                warn!(stage = %name, "stage failed: {}", error);
                emit(
                    &self.handlers,
                    PipelineEvent::StageFailed {
                        stage: name.to_string(),
                        error,
                    },
                );
            }
            StageConclusion::Cancelled => {}
        }
    }
}

fn emit(handlers: &Arc<Mutex<Vec<EventHandler>>>, event: PipelineEvent) {
    if let Ok(handlers) = handlers.lock() {
        for handler in handlers.iter() {
            handler(event.clone());
        }
    }
}

enum StageConclusion {
    Succeeded,
    Failed(String),
    Cancelled,
}

struct StageOutcome {
    conclusion: StageConclusion,
    records: Vec<StepRecord>,
}

impl StageOutcome {
    fn failed(records: Vec<StepRecord>, error: impl Into<String>) -> Self {
        Self {
            conclusion: StageConclusion::Failed(error.into()),
            records,
        }
    }
}

struct WorkerShared {
    executor: Arc<StepExecutor>,
    store: Arc<dyn ArtifactStore>,
    secrets: Arc<dyn SecretProvider>,
    handlers: Arc<Mutex<Vec<EventHandler>>>,
    cancel: watch::Receiver<bool>,
    run_number: u64,
}

/// Run a single stage: materialize inputs, execute steps in order with
/// their attempt budgets, then publish declared outputs.
async fn run_stage(
    shared: WorkerShared,
    stage: Stage,
    base_env: HashMap<String, String>,
    workdir: PathBuf,
) -> (String, StageOutcome) {
    let name = stage.name.clone();
    let outcome = run_stage_inner(shared, stage, base_env, workdir).await;
    (name, outcome)
}

async fn run_stage_inner(
    shared: WorkerShared,
    stage: Stage,
    base_env: HashMap<String, String>,
    workdir: PathBuf,
) -> StageOutcome {
    let mut records: Vec<StepRecord> = Vec::new();

    if let Err(e) = tokio::fs::create_dir_all(&workdir).await {
        return StageOutcome::failed(
            records,
            format!("failed to create working directory: {}", e),
        );
    }

    // inputs land under .artifacts/<producer>/<name>
    for input in &stage.inputs {
        let key = ArtifactKey::new(shared.run_number, input.from.as_str(), input.name.as_str());
        let blob = match shared.store.fetch(&key).await {
            Ok(blob) => blob,
            Err(e) => return StageOutcome::failed(records, format!("input artifact: {}", e)),
        };
        let dest = workdir.join(".artifacts").join(&input.from).join(&input.name);
        if let Some(parent) = dest.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                return StageOutcome::failed(records, format!("input artifact: {}", e));
            }
        }
        if let Err(e) = tokio::fs::write(&dest, blob.as_slice()).await {
            return StageOutcome::failed(records, format!("input artifact: {}", e));
        }
    }

    for step in &stage.steps {
        // secret resolution failures are infrastructure errors and never
        // consume the attempt budget
        let mut env = base_env.clone();
        let mut redact = Vec::new();
        for secret in &step.secrets {
            match shared.secrets.resolve(secret).await {
                Ok(value) => {
                    redact.push(value.clone());
                    env.insert(secret.clone(), value);
                }
                Err(e) => {
                    return StageOutcome::failed(
                        records,
                        format!("step '{}': {}", step.name, e),
                    );
                }
            }
        }
        env.extend(step.env.clone());

        let mut record = StepRecord {
            step: step.name.clone(),
            attempts: Vec::new(),
        };
        let mut last_exit = None;

        for attempt in 1..=stage.max_attempts {
            if *shared.cancel.borrow() {
                records.push(record);
                return StageOutcome {
                    conclusion: StageConclusion::Cancelled,
                    records,
                };
            }

            emit(
                &shared.handlers,
                PipelineEvent::StepStarted {
                    stage: stage.name.clone(),
                    step: step.name.clone(),
                    attempt,
                    max_attempts: stage.max_attempts,
                },
            );

            let exec = match shared
                .executor
                .run(step, &env, &workdir, &redact, shared.cancel.clone())
                .await
            {
                Ok(exec) => exec,
                Err(e) => {
                    records.push(record);
                    return StageOutcome::failed(
                        records,
                        format!("step '{}': {}", step.name, e),
                    );
                }
            };

            let duration_ms = exec.duration.as_millis() as u64;
            record.attempts.push(StepAttempt {
                exit: exec.exit.clone(),
                duration_ms,
                output: exec.output,
                truncated: exec.truncated,
            });
            emit(
                &shared.handlers,
                PipelineEvent::StepFinished {
                    stage: stage.name.clone(),
                    step: step.name.clone(),
                    exit: exec.exit.clone(),
                    duration_ms,
                },
            );

            last_exit = Some(exec.exit);
            match last_exit.as_ref() {
                Some(StepExit::Exited(0)) => break,
                Some(StepExit::Terminated) => {
                    records.push(record);
                    return StageOutcome {
                        conclusion: StageConclusion::Cancelled,
                        records,
                    };
                }
                _ => {}
            }
        }

        let succeeded = matches!(last_exit, Some(StepExit::Exited(0)));
        records.push(record);

        if !succeeded {
            let detail = match last_exit {
                Some(StepExit::Exited(code)) => format!("exit code {}", code),
                Some(StepExit::TimedOut { after_secs }) => {
                    format!("timed out after {}s", after_secs)
                }
                _ => "did not run".to_string(),
            };
            return StageOutcome::failed(
                records,
                format!(
                    "step '{}' failed after {} attempt(s): {}",
                    step.name, stage.max_attempts, detail
                ),
            );
        }
    }

    // outputs publish only after every step exited 0
    for output in &stage.outputs {
        let path = workdir.join(&output.path);
        let blob = match tokio::fs::read(&path).await {
            Ok(blob) => blob,
            Err(e) => {
                return StageOutcome::failed(
                    records,
                    format!(
                        "declared output '{}' missing at '{}': {}",
                        output.name, output.path, e
                    ),
                );
            }
        };
        let size = blob.len() as u64;
        let key = ArtifactKey::new(shared.run_number, stage.name.as_str(), output.name.as_str());
        if let Err(e) = shared.store.publish(key, blob).await {
            return StageOutcome::failed(records, format!("publish failed: {}", e));
        }
        emit(
            &shared.handlers,
            PipelineEvent::ArtifactPublished {
                stage: stage.name.clone(),
                name: output.name.clone(),
                size,
            },
        );
    }

    StageOutcome {
        conclusion: StageConclusion::Succeeded,
        records,
    }
}
