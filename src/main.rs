mod artifact;
mod cli;
mod core;
mod execution;
mod persistence;
mod report;
mod secrets;

use anyhow::{Context, Result};
use artifact::DiskArtifactStore;
use cli::commands::{HistoryCommand, ListCommand, RunCommand, ValidateCommand};
use cli::output::*;
use cli::{Cli, Command};
use crate::core::{PipelineConfig, PipelineRun, RunStatus, Trigger};
use execution::{EngineConfig, PipelineEngine, PipelineEvent};
use persistence::{create_summary, InMemoryPersistence, PersistenceBackend};
use secrets::EnvSecretProvider;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{warn, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::from_args();

    // Initialize logging
    let log_level = if cli.verbose { Level::DEBUG } else { Level::WARN };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set logging subscriber")?;

    // Execute command
    match &cli.command {
        Command::Run(cmd) => run_pipeline(cmd).await?,
        Command::Validate(cmd) => validate_pipeline(cmd)?,
        Command::List(cmd) => list_pipelines(cmd).await?,
        Command::History(cmd) => show_history(cmd).await?,
    }

    Ok(())
}

fn data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("conveyor")
}

async fn history_backend(no_history: bool) -> Result<Arc<dyn PersistenceBackend>> {
    #[cfg(feature = "sqlite")]
    if !no_history {
        return Ok(Arc::new(
            persistence::SqliteRunStore::with_default_path().await?,
        ));
    }
    let _ = no_history;
    Ok(Arc::new(InMemoryPersistence::new()))
}

async fn run_pipeline(cmd: &RunCommand) -> Result<()> {
    // Load and resolve the pipeline definition
    let config = PipelineConfig::from_file(&cmd.file).context("Failed to load pipeline definition")?;
    let config = config.resolve(cmd.environment.as_deref())?;

    println!("{} Loaded pipeline: {}", INFO, style(&config.name).bold());
    if let Some(environment) = &cmd.environment {
        println!("{} Environment: {}", INFO, style(environment).cyan());
    }

    // Set up persistence and assign the run number
    let store = history_backend(cmd.no_history).await?;
    let run_number = store.next_run_number(&config.name).await?;

    let mut trigger = Trigger::new(run_number);
    for (key, value) in &cmd.param {
        trigger.parameters.insert(key.clone(), value.clone());
        println!(
            "{} Parameter override: {} = {}",
            INFO,
            style(key).cyan(),
            style(value).dim()
        );
    }

    let mut run = PipelineRun::new(&config, trigger)?;

    // Artifact store and secrets
    let artifact_root = cmd
        .artifact_dir
        .clone()
        .unwrap_or_else(|| data_dir().join("artifacts"));
    let artifacts = Arc::new(DiskArtifactStore::new(artifact_root));
    let secret_provider = Arc::new(EnvSecretProvider::new());

    // Engine configuration
    let mut engine_config = EngineConfig::default();
    if let Some(concurrency) = cmd.concurrency.or(config.concurrency) {
        engine_config.concurrency = concurrency.max(1);
    }
    if let Some(workdir) = &cmd.workdir {
        engine_config.workdir_root = workdir.clone();
    }

    let engine = Arc::new(PipelineEngine::new(
        Arc::clone(&artifacts) as Arc<dyn artifact::ArtifactStore>,
        secret_provider,
        engine_config,
    ));

    // Console event output, with a stage-level progress bar
    let progress = if cmd.json {
        None
    } else {
        Some(create_progress_bar(run.stages.len()))
    };
    if let Some(pb) = &progress {
        let pb = pb.clone();
        engine.add_event_handler(Arc::new(move |event| {
            match &event {
                PipelineEvent::StageStarted { stage } => pb.set_message(stage.clone()),
                PipelineEvent::StageSucceeded { .. }
                | PipelineEvent::StageFailed { .. }
                | PipelineEvent::StageSkipped { .. } => pb.inc(1),
                _ => {}
            }
            pb.println(format_event(&event));
        }));
    }

    // Ctrl-C requests cancellation; running steps are killed
    let canceller = Arc::clone(&engine);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\n{} Cancellation requested, stopping stages...", WARN);
            canceller.cancel();
        }
    });

    println!();
    let report = engine.execute(&mut run).await?;
    if let Some(pb) = progress {
        pb.finish_and_clear();
    }

    // Save to history
    if !cmd.no_history {
        let summary = create_summary(&run);
        store.save_run(&summary).await?;
    }

    // Expired artifact cleanup, best-effort
    if let Some(hours) = config.artifact_retention_hours {
        let swept = artifacts.sweep(Duration::from_secs(hours * 3600)).await;
        if swept > 0 {
            warn!("removed artifacts of {} expired run(s)", swept);
        }
    }

    if cmd.json {
        println!("{}", report.to_json()?);
    } else {
        println!("{}", format_run_report(&report));
    }

    if report.status != RunStatus::Succeeded {
        std::process::exit(1);
    }
    Ok(())
}

fn validate_pipeline(cmd: &ValidateCommand) -> Result<()> {
    println!("{} Validating pipeline...", INFO);

    match PipelineConfig::from_file(&cmd.file) {
        Ok(config) => {
            println!("{} Pipeline definition is valid!", CHECK);
            println!("  Name: {}", style(&config.name).bold());
            println!("  Stages: {}", style(config.stages.len()).cyan());
            println!("  Environments: {}", style(config.environments.len()).cyan());

            if cmd.json {
                let json = serde_json::to_string_pretty(&config)?;
                println!("\n{}", json);
            }
            Ok(())
        }
        Err(e) => {
            println!("{} Validation failed:", CROSS);
            println!("  {}", style(e).red());
            std::process::exit(1);
        }
    }
}

async fn list_pipelines(cmd: &ListCommand) -> Result<()> {
    let store = history_backend(false).await?;
    let pipelines = store.list_pipelines().await?;

    if pipelines.is_empty() {
        println!("{} No pipelines found in history", INFO);
        return Ok(());
    }

    println!("{} Pipelines in history:", INFO);

    for pipeline_name in &pipelines {
        let runs = store.list_runs(pipeline_name).await?;

        if cmd.with_counts {
            let succeeded = runs
                .iter()
                .filter(|r| r.status == RunStatus::Succeeded)
                .count();
            let failed = runs.iter().filter(|r| r.status == RunStatus::Failed).count();
            println!(
                "  {} ({} runs: {} succeeded, {} failed)",
                style(pipeline_name).bold(),
                style(runs.len()).cyan(),
                style(succeeded).green(),
                style(failed).red()
            );
        } else {
            println!("  {}", style(pipeline_name).bold());
        }
    }

    if cmd.json {
        let mut json_data = Vec::new();
        for pipeline in &pipelines {
            let runs = store.list_runs(pipeline).await.ok();
            json_data.push(serde_json::json!({
                "name": pipeline,
                "run_count": runs.as_ref().map(|r| r.len()).unwrap_or(0)
            }));
        }
        let data = serde_json::json!({ "pipelines": json_data });
        println!("\n{}", serde_json::to_string_pretty(&data)?);
    }

    Ok(())
}

async fn show_history(cmd: &HistoryCommand) -> Result<()> {
    let store = history_backend(false).await?;

    // A specific run by execution ID
    if let Some(exec_id_str) = &cmd.execution_id {
        let exec_id =
            uuid::Uuid::parse_str(exec_id_str).context("Invalid execution ID format")?;
        match store.load_run(exec_id).await? {
            Some(summary) => print_run_details(&summary, cmd.verbose)?,
            None => println!("{} Run not found", WARN),
        }
        return Ok(());
    }

    // Runs for one pipeline, or the most recent across all of them
    let runs = if let Some(pipeline_name) = &cmd.pipeline {
        store
            .list_runs(pipeline_name)
            .await?
            .into_iter()
            .take(cmd.limit)
            .collect()
    } else {
        let pipelines = store.list_pipelines().await?;
        let mut all_runs = Vec::new();
        for pipeline in &pipelines {
            all_runs.extend(store.list_runs(pipeline).await?);
        }
        all_runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        all_runs.into_iter().take(cmd.limit).collect::<Vec<_>>()
    };

    if runs.is_empty() {
        println!("{} No runs found", INFO);
        return Ok(());
    }

    if cmd.json {
        let data = serde_json::json!({ "runs": runs });
        println!("{}", serde_json::to_string_pretty(&data)?);
    } else {
        println!("{} Run history (showing latest {}):", INFO, cmd.limit);
        for summary in &runs {
            println!("  {}", format_run_summary(summary));
        }
    }

    Ok(())
}

fn print_run_details(summary: &persistence::RunSummary, verbose: bool) -> Result<()> {
    println!("{} Run Details", INFO);
    println!("  ID: {}", style(summary.execution_id).cyan());
    println!("  Pipeline: {}", style(&summary.pipeline_name).bold());
    println!("  Run number: {}", style(summary.run_number).cyan());
    println!("  Status: {}", format_run_status(summary.status));
    println!("  Started: {}", style(summary.started_at.to_rfc3339()).dim());
    if let Some(finished) = summary.finished_at {
        println!("  Finished: {}", style(finished.to_rfc3339()).dim());
        if let Ok(duration) = finished.signed_duration_since(summary.started_at).to_std() {
            println!("  Duration: {}", style(format_duration(duration)).dim());
        }
    }
    println!(
        "  Stages: {} succeeded, {} failed, {} total",
        style(summary.succeeded_stages).green(),
        style(summary.failed_stages).red(),
        summary.total_stages
    );

    if verbose {
        println!("\n  {}", style("Full details:").bold());
        let json = serde_json::to_string_pretty(summary)?;
        for line in json.lines() {
            println!("    {}", line);
        }
    }

    Ok(())
}
