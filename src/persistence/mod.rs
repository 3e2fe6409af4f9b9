//! Persistence layer for run history

#[cfg(feature = "sqlite")]
pub mod store;

#[cfg(feature = "sqlite")]
pub use store::SqliteRunStore;

use crate::core::{PipelineRun, RunStatus};
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Summary of a pipeline run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    /// Unique execution ID
    pub execution_id: Uuid,

    /// Pipeline name
    pub pipeline_name: String,

    /// Monotonic run number within the pipeline
    pub run_number: u64,

    /// Terminal run status
    pub status: RunStatus,

    /// When the run started
    pub started_at: DateTime<Utc>,

    /// When the run finished (if finished)
    pub finished_at: Option<DateTime<Utc>>,

    /// Total number of stages
    pub total_stages: usize,

    /// Number of succeeded stages
    pub succeeded_stages: usize,

    /// Number of failed stages
    pub failed_stages: usize,
}

/// Trait for persistence backends
#[async_trait::async_trait]
pub trait PersistenceBackend: Send + Sync {
    /// Save a run summary
    async fn save_run(&self, run: &RunSummary) -> Result<()>;

    /// Load a run by execution ID
    async fn load_run(&self, execution_id: Uuid) -> Result<Option<RunSummary>>;

    /// List all runs for a pipeline, most recent first
    async fn list_runs(&self, pipeline_name: &str) -> Result<Vec<RunSummary>>;

    /// List all pipeline names
    async fn list_pipelines(&self) -> Result<Vec<String>>;

    /// Next run number for a pipeline (1 for a pipeline with no history)
    async fn next_run_number(&self, pipeline_name: &str) -> Result<u64>;
}

/// In-memory persistence (for testing or ephemeral use)
pub struct InMemoryPersistence {
    runs: tokio::sync::RwLock<std::collections::HashMap<Uuid, RunSummary>>,
    by_pipeline: tokio::sync::RwLock<std::collections::HashMap<String, Vec<Uuid>>>,
}

impl InMemoryPersistence {
    pub fn new() -> Self {
        Self {
            runs: tokio::sync::RwLock::new(std::collections::HashMap::new()),
            by_pipeline: tokio::sync::RwLock::new(std::collections::HashMap::new()),
        }
    }
}

impl Default for InMemoryPersistence {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl PersistenceBackend for InMemoryPersistence {
    async fn save_run(&self, run: &RunSummary) -> Result<()> {
        let mut runs = self.runs.write().await;
        runs.insert(run.execution_id, run.clone());

        let mut by_pipeline = self.by_pipeline.write().await;
        by_pipeline
            .entry(run.pipeline_name.clone())
            .or_default()
            .push(run.execution_id);

        Ok(())
    }

    async fn load_run(&self, execution_id: Uuid) -> Result<Option<RunSummary>> {
        let runs = self.runs.read().await;
        Ok(runs.get(&execution_id).cloned())
    }

    async fn list_runs(&self, pipeline_name: &str) -> Result<Vec<RunSummary>> {
        let runs = self.runs.read().await;
        let by_pipeline = self.by_pipeline.read().await;

        let mut result: Vec<RunSummary> = by_pipeline
            .get(pipeline_name)
            .map(|ids| ids.iter().filter_map(|id| runs.get(id).cloned()).collect())
            .unwrap_or_default();
        result.sort_by(|a, b| b.run_number.cmp(&a.run_number));
        Ok(result)
    }

    async fn list_pipelines(&self) -> Result<Vec<String>> {
        let by_pipeline = self.by_pipeline.read().await;
        let mut names: Vec<String> = by_pipeline.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    async fn next_run_number(&self, pipeline_name: &str) -> Result<u64> {
        let runs = self.list_runs(pipeline_name).await?;
        Ok(runs.iter().map(|r| r.run_number).max().unwrap_or(0) + 1)
    }
}

/// Create a summary from a finished run
pub fn create_summary(run: &PipelineRun) -> RunSummary {
    RunSummary {
        execution_id: run.state.execution_id,
        pipeline_name: run.name.clone(),
        run_number: run.state.run_number,
        status: run.state.status,
        started_at: run.state.started_at.unwrap_or_else(Utc::now),
        finished_at: run.state.finished_at,
        total_stages: run.state.total_stages,
        succeeded_stages: run.state.succeeded_stages,
        failed_stages: run.state.failed_stages,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(pipeline: &str, run_number: u64, status: RunStatus) -> RunSummary {
        RunSummary {
            execution_id: Uuid::new_v4(),
            pipeline_name: pipeline.to_string(),
            run_number,
            status,
            started_at: Utc::now(),
            finished_at: Some(Utc::now()),
            total_stages: 3,
            succeeded_stages: 3,
            failed_stages: 0,
        }
    }

    #[tokio::test]
    async fn test_in_memory_roundtrip() {
        let backend = InMemoryPersistence::new();
        let run = summary("deploy", 1, RunStatus::Succeeded);

        backend.save_run(&run).await.unwrap();
        let loaded = backend.load_run(run.execution_id).await.unwrap().unwrap();
        assert_eq!(loaded.pipeline_name, "deploy");
        assert_eq!(loaded.run_number, 1);
    }

    #[tokio::test]
    async fn test_run_numbers_are_monotonic() {
        let backend = InMemoryPersistence::new();
        assert_eq!(backend.next_run_number("deploy").await.unwrap(), 1);

        backend
            .save_run(&summary("deploy", 1, RunStatus::Succeeded))
            .await
            .unwrap();
        backend
            .save_run(&summary("deploy", 2, RunStatus::Failed))
            .await
            .unwrap();

        assert_eq!(backend.next_run_number("deploy").await.unwrap(), 3);
        // other pipelines keep their own counter
        assert_eq!(backend.next_run_number("release").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_list_runs_most_recent_first() {
        let backend = InMemoryPersistence::new();
        backend
            .save_run(&summary("deploy", 1, RunStatus::Succeeded))
            .await
            .unwrap();
        backend
            .save_run(&summary("deploy", 2, RunStatus::Failed))
            .await
            .unwrap();

        let runs = backend.list_runs("deploy").await.unwrap();
        assert_eq!(runs[0].run_number, 2);
        assert_eq!(runs[1].run_number, 1);
    }
}
