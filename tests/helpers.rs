//! Shared helpers for integration tests

use conveyor::{
    EngineConfig, PipelineConfig, PipelineEngine, PipelineEvent, PipelineRun, RunReport,
    StaticSecretProvider, Trigger,
};
use conveyor::artifact::MemoryArtifactStore;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

pub fn run_from_yaml(yaml: &str) -> PipelineRun {
    let config = PipelineConfig::from_yaml(yaml).unwrap();
    PipelineRun::new(&config, Trigger::new(1)).unwrap()
}

pub fn test_engine(concurrency: usize) -> PipelineEngine {
    PipelineEngine::new(
        Arc::new(MemoryArtifactStore::new()),
        Arc::new(StaticSecretProvider::new(HashMap::new())),
        EngineConfig {
            concurrency,
            workdir_root: std::env::temp_dir().join(format!("conveyor-it-{}", Uuid::new_v4())),
            ..EngineConfig::default()
        },
    )
}

/// Attach a recording handler and return the shared event log
pub fn record_events(engine: &PipelineEngine) -> Arc<Mutex<Vec<PipelineEvent>>> {
    let events: Arc<Mutex<Vec<PipelineEvent>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    engine.add_event_handler(Arc::new(move |event| {
        sink.lock().unwrap().push(event);
    }));
    events
}

pub async fn execute(yaml: &str) -> (PipelineRun, RunReport, Vec<PipelineEvent>) {
    let engine = test_engine(4);
    let events = record_events(&engine);
    let mut run = run_from_yaml(yaml);
    let report = engine.execute(&mut run).await.unwrap();
    let events = events.lock().unwrap().clone();
    (run, report, events)
}

pub fn stages_started(events: &[PipelineEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match e {
            PipelineEvent::StageStarted { stage } => Some(stage.clone()),
            _ => None,
        })
        .collect()
}

pub fn step_invocations(events: &[PipelineEvent], stage_name: &str, step_name: &str) -> usize {
    events
        .iter()
        .filter(|e| {
            matches!(
                e,
                PipelineEvent::StepStarted { stage, step, .. }
                    if stage == stage_name && step == step_name
            )
        })
        .count()
}
