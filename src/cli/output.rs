//! CLI output formatting

use crate::{
    core::{RunStatus, StageStatus, StepExit},
    execution::PipelineEvent,
    persistence::RunSummary,
    report::RunReport,
};
use console::Emoji;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

// Re-export style
pub use console::style;

// Emojis for output
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "✓ ");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "✗ ");
pub static SPINNER: Emoji<'_, '_> = Emoji("⏳ ", "~ ");
pub static INFO: Emoji<'_, '_> = Emoji("ℹ️  ", "i ");
pub static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "! ");
pub static ROCKET: Emoji<'_, '_> = Emoji("🚀 ", "> ");
pub static PACKAGE: Emoji<'_, '_> = Emoji("📦 ", "* ");

/// Create a progress bar over stages
pub fn create_progress_bar(total: usize) -> ProgressBar {
    let progress = ProgressBar::new(total as u64);
    progress.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .unwrap()
            .progress_chars("#>-"),
    );
    progress.enable_steady_tick(Duration::from_millis(100));
    progress
}

/// Format a stage status for display
pub fn format_stage_status(status: StageStatus) -> String {
    match status {
        StageStatus::Pending => style("PENDING").dim().to_string(),
        StageStatus::Running => style("RUNNING").yellow().to_string(),
        StageStatus::Succeeded => style("SUCCEEDED").green().to_string(),
        StageStatus::Failed => style("FAILED").red().to_string(),
        StageStatus::Skipped => style("SKIPPED").dim().to_string(),
        StageStatus::Cancelled => style("CANCELLED").yellow().to_string(),
    }
}

/// Format a run status for display
pub fn format_run_status(status: RunStatus) -> String {
    match status {
        RunStatus::Pending => style("PENDING").dim().to_string(),
        RunStatus::Running => style("RUNNING").yellow().to_string(),
        RunStatus::Succeeded => style("SUCCEEDED").green().to_string(),
        RunStatus::Failed => style("FAILED").red().to_string(),
        RunStatus::Cancelled => style("CANCELLED").yellow().to_string(),
    }
}

/// Format a run summary line for history listings
pub fn format_run_summary(summary: &RunSummary) -> String {
    let status_icon = match summary.status {
        RunStatus::Succeeded => CHECK,
        RunStatus::Failed => CROSS,
        RunStatus::Running => SPINNER,
        _ => INFO,
    };

    format!(
        "{} #{} {} - {} - {} ({}/{} stages)",
        status_icon,
        style(summary.run_number).bold(),
        style(&summary.execution_id.to_string()[..8]).dim(),
        style(&summary.pipeline_name).bold(),
        format_run_status(summary.status),
        summary.succeeded_stages,
        summary.total_stages,
    )
}

/// Format an execution event for display
pub fn format_event(event: &PipelineEvent) -> String {
    match event {
        PipelineEvent::RunStarted {
            execution_id,
            run_number,
            pipeline,
        } => format!(
            "{} Starting {} run #{} ({})",
            ROCKET,
            style(pipeline).bold(),
            style(run_number).cyan(),
            style(&execution_id.to_string()[..8]).dim()
        ),
        PipelineEvent::StageStarted { stage } => {
            format!("{} {}", SPINNER, style(stage).cyan())
        }
        PipelineEvent::StepStarted {
            stage,
            step,
            attempt,
            max_attempts,
        } => {
            if *attempt > 1 {
                format!(
                    "{} {}/{} (attempt {}/{})",
                    WARN,
                    style(stage).dim(),
                    style(step).yellow(),
                    attempt,
                    max_attempts
                )
            } else {
                format!("{} {}/{}", SPINNER, style(stage).dim(), style(step).cyan())
            }
        }
        PipelineEvent::StepFinished {
            stage,
            step,
            exit,
            duration_ms,
        } => {
            let (icon, detail) = match exit {
                StepExit::Exited(0) => (CHECK, style("ok").green().to_string()),
                StepExit::Exited(code) => {
                    (CROSS, style(format!("exit code {}", code)).red().to_string())
                }
                StepExit::TimedOut { after_secs } => (
                    CROSS,
                    style(format!("timed out after {}s", after_secs))
                        .red()
                        .to_string(),
                ),
                StepExit::Terminated => (WARN, style("terminated").yellow().to_string()),
            };
            format!(
                "{} {}/{} {} ({})",
                icon,
                style(stage).dim(),
                step,
                detail,
                style(format_duration(Duration::from_millis(*duration_ms))).dim()
            )
        }
        PipelineEvent::StageSucceeded { stage } => {
            format!("{} {}", CHECK, style(stage).green())
        }
        PipelineEvent::StageFailed { stage, error } => {
            format!("{} {}: {}", CROSS, style(stage).red(), style(error).dim())
        }
        PipelineEvent::StageSkipped { stage, reason } => {
            format!("{} {} skipped: {}", WARN, style(stage).dim(), reason)
        }
        PipelineEvent::ArtifactPublished { stage, name, size } => format!(
            "{} {} published {} ({} bytes)",
            PACKAGE,
            style(stage).dim(),
            style(name).cyan(),
            size
        ),
        PipelineEvent::RunCompleted {
            execution_id,
            status,
        } => format!(
            "{} Run ({}) {}",
            INFO,
            style(&execution_id.to_string()[..8]).dim(),
            format_run_status(*status)
        ),
    }
}

/// Print a human-readable run report
pub fn format_run_report(report: &RunReport) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "\n{} run #{}: {}\n",
        style(&report.pipeline).bold(),
        report.run_number,
        format_run_status(report.status)
    ));

    for stage in &report.stages {
        out.push_str(&format!(
            "  {} {}",
            format_stage_status(stage.status),
            stage.name
        ));
        if let Some(error) = &stage.error {
            out.push_str(&format!(" - {}", style(error).red()));
        }
        if let Some(reason) = &stage.skip_reason {
            out.push_str(&format!(" - {}", style(reason).dim()));
        }
        out.push('\n');
    }

    if let Some(root_cause) = &report.root_cause {
        out.push_str(&format!(
            "  root cause: {}\n",
            style(root_cause).red().bold()
        ));
    }

    if !report.artifacts.is_empty() {
        out.push_str("  artifacts:\n");
        for artifact in &report.artifacts {
            out.push_str(&format!(
                "    {} {}/{} ({} bytes)\n",
                PACKAGE, artifact.stage, artifact.name, artifact.size
            ));
        }
    }

    out
}

/// Format step output with truncation
pub fn format_output(output: &str, max_lines: usize) -> String {
    let lines: Vec<&str> = output.lines().collect();

    if lines.len() <= max_lines {
        output.to_string()
    } else {
        let truncated = lines[..max_lines].join("\n");
        format!(
            "{}\n{}... ({} more lines)",
            truncated,
            style("[truncated]").dim(),
            lines.len() - max_lines
        )
    }
}

/// Human-readable duration
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs < 1 {
        format!("{}ms", duration.as_millis())
    } else if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_output_truncates() {
        let output = "a\nb\nc\nd\ne";
        let formatted = format_output(output, 3);
        assert!(formatted.starts_with("a\nb\nc\n"));
        assert!(formatted.contains("2 more lines"));
        assert_eq!(format_output("a\nb", 3), "a\nb");
    }

    #[test]
    fn test_progress_bar_tracks_stage_count() {
        let pb = create_progress_bar(4);
        assert_eq!(pb.length(), Some(4));
        pb.inc(1);
        assert_eq!(pb.position(), 1);
        pb.finish_and_clear();
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_millis(250)), "250ms");
        assert_eq!(format_duration(Duration::from_secs(42)), "42s");
        assert_eq!(format_duration(Duration::from_secs(90)), "1m 30s");
        assert_eq!(format_duration(Duration::from_secs(3700)), "1h 1m 40s");
    }
}
