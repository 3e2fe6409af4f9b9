//! CLI command definitions

use clap::Args;
use std::path::PathBuf;

/// Run a pipeline
#[derive(Debug, Args, Clone)]
pub struct RunCommand {
    /// Path to pipeline YAML file
    #[arg(short, long)]
    pub file: String,

    /// Named environment overlay to resolve (e.g. staging, production)
    #[arg(short, long)]
    pub environment: Option<String>,

    /// Parameter overrides (key=value)
    #[arg(long, value_parser = parse_key_value)]
    pub param: Vec<(String, String)>,

    /// Maximum number of stages running at once
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Directory for published artifacts
    #[arg(long)]
    pub artifact_dir: Option<PathBuf>,

    /// Root directory for stage working directories
    #[arg(long)]
    pub workdir: Option<PathBuf>,

    /// Don't save the run to history
    #[arg(long)]
    pub no_history: bool,

    /// Print the run report as JSON
    #[arg(long)]
    pub json: bool,
}

/// Validate a pipeline definition
#[derive(Debug, Args, Clone)]
pub struct ValidateCommand {
    /// Path to pipeline YAML file
    #[arg(short, long)]
    pub file: String,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// List pipelines with recorded runs
#[derive(Debug, Args, Clone)]
pub struct ListCommand {
    /// Show run counts
    #[arg(long)]
    pub with_counts: bool,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Show run history
#[derive(Debug, Args, Clone)]
pub struct HistoryCommand {
    /// Pipeline name to filter by
    #[arg(short, long)]
    pub pipeline: Option<String>,

    /// Number of recent runs to show
    #[arg(short, long, default_value_t = 10)]
    pub limit: usize,

    /// Show full details
    #[arg(long)]
    pub verbose: bool,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,

    /// Show a specific run by execution ID
    #[arg(long)]
    pub execution_id: Option<String>,
}

/// Parse key=value pairs
pub fn parse_key_value(s: &str) -> Result<(String, String), String> {
    let parts: Vec<&str> = s.splitn(2, '=').collect();
    if parts.len() != 2 {
        return Err(format!("Invalid key=value pair: {}", s));
    }
    Ok((parts[0].to_string(), parts[1].to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_key_value() {
        assert_eq!(
            parse_key_value("region=eu-west-1").unwrap(),
            ("region".to_string(), "eu-west-1".to_string())
        );
        // value may contain '='
        assert_eq!(
            parse_key_value("flags=a=b").unwrap(),
            ("flags".to_string(), "a=b".to_string())
        );
        assert!(parse_key_value("bare").is_err());
    }
}
