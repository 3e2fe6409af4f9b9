//! Run report
//!
//! Machine-readable summary of a finished run: per-stage outcomes with
//! their step attempt records, the published artifact manifest, and the
//! root-cause stage when the run failed.

use crate::artifact::ArtifactEntry;
use crate::core::{PipelineRun, RunStatus, StageState, StageStatus, StepRecord};
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub pipeline: String,
    pub run_number: u64,
    pub execution_id: Uuid,
    pub status: RunStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub stages: Vec<StageReport>,
    pub artifacts: Vec<ArtifactEntry>,
    /// Earliest failed stage in dependency order, if any stage failed
    pub root_cause: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StageReport {
    pub name: String,
    pub status: StageStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<String>,
    pub steps: Vec<StepRecord>,
}

impl RunReport {
    /// Snapshot a finalized run. Stages appear in declaration order.
    pub fn from_run(run: &PipelineRun, artifacts: Vec<ArtifactEntry>) -> Self {
        let stages = run.stages.iter().map(stage_report).collect();

        RunReport {
            pipeline: run.name.clone(),
            run_number: run.state.run_number,
            execution_id: run.state.execution_id,
            status: run.state.status,
            started_at: run.state.started_at,
            finished_at: run.state.finished_at,
            stages,
            artifacts,
            root_cause: run.root_cause(),
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

fn stage_report(stage: &crate::core::Stage) -> StageReport {
    let (started_at, finished_at, error, skip_reason) = match &stage.state {
        StageState::Running { started_at } => (Some(*started_at), None, None, None),
        StageState::Succeeded {
            started_at,
            finished_at,
        } => (Some(*started_at), Some(*finished_at), None, None),
        StageState::Failed {
            error,
            started_at,
            finished_at,
        } => (*started_at, Some(*finished_at), Some(error.clone()), None),
        StageState::Skipped { reason } => (None, None, None, Some(reason.clone())),
        _ => (None, None, None, None),
    };

    StageReport {
        name: stage.name.clone(),
        status: stage.state.status(),
        started_at,
        finished_at,
        error,
        skip_reason,
        steps: stage.records.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{PipelineConfig, Trigger};
    use chrono::Utc;

    fn run_from(yaml: &str) -> PipelineRun {
        let config = PipelineConfig::from_yaml(yaml).unwrap();
        PipelineRun::new(&config, Trigger::new(12)).unwrap()
    }

    #[test]
    fn test_report_captures_failure_and_root_cause() {
        let mut run = run_from(
            r#"
name: "Chain"
stages:
  - name: compile
    steps: [{ name: b, run: "true" }]
  - name: test
    depends_on: [compile]
    steps: [{ name: t, run: "true" }]
"#,
        );
        run.state.start(2);
        run.stage_mut("compile").unwrap().state = StageState::Failed {
            error: "exit code 2".to_string(),
            started_at: Some(Utc::now()),
            finished_at: Utc::now(),
        };
        run.apply_skips();
        run.finalize(false);

        let report = RunReport::from_run(&run, Vec::new());
        assert_eq!(report.status, RunStatus::Failed);
        assert_eq!(report.root_cause.as_deref(), Some("compile"));
        assert_eq!(report.run_number, 12);

        assert_eq!(report.stages[0].status, StageStatus::Failed);
        assert_eq!(report.stages[0].error.as_deref(), Some("exit code 2"));
        assert_eq!(report.stages[1].status, StageStatus::Skipped);
        assert!(report.stages[1].skip_reason.is_some());
    }

    #[test]
    fn test_report_serializes_to_json() {
        let mut run = run_from(
            r#"
name: "Simple"
stages:
  - name: only
    steps: [{ name: s, run: "true" }]
"#,
        );
        run.state.start(1);
        run.stage_mut("only").unwrap().state = StageState::Succeeded {
            started_at: Utc::now(),
            finished_at: Utc::now(),
        };
        run.finalize(false);

        let json = RunReport::from_run(&run, Vec::new()).to_json().unwrap();
        assert!(json.contains("\"pipeline\": \"Simple\""));
        assert!(json.contains("\"Succeeded\""));
        // terminal runs without failures carry no root cause
        assert!(json.contains("\"root_cause\": null"));
    }
}
