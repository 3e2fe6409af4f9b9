//! Step domain model

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Shell used to launch a step's command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Shell {
    /// POSIX sh
    Sh,
    /// Bash
    Bash,
}

impl Shell {
    /// Shell executable and leading arguments
    pub fn command_line(&self) -> (&'static str, &'static [&'static str]) {
        match self {
            Shell::Sh => ("sh", &["-c"]),
            Shell::Bash => ("bash", &["-c"]),
        }
    }
}

impl Default for Shell {
    fn default() -> Self {
        Shell::Sh
    }
}

/// A single executable unit within a stage
///
/// The command is opaque to the engine; only the exit code and captured
/// output are observed.
#[derive(Debug, Clone)]
pub struct Step {
    /// Step name, unique within its stage
    pub name: String,

    /// Opaque shell command
    pub command: String,

    /// Shell to run the command with
    pub shell: Shell,

    /// Environment overlay, merged over run parameters and stage env
    pub env: HashMap<String, String>,

    /// Names of secrets to resolve and inject at invocation time
    pub secrets: Vec<String>,

    /// Timeout in seconds
    pub timeout_secs: u64,
}

impl Step {
    /// Create a step from its config
    pub fn from_config(config: &crate::core::config::StepConfig, defaults: &StepDefaults) -> Self {
        Step {
            name: config.name.clone(),
            command: config.run.clone(),
            shell: config.shell.unwrap_or_default(),
            env: config.env.clone(),
            secrets: config.secrets.clone(),
            timeout_secs: config.timeout_secs.unwrap_or(defaults.timeout_secs),
        }
    }
}

/// Global defaults applied to steps that do not override them
#[derive(Debug, Clone)]
pub struct StepDefaults {
    pub timeout_secs: u64,
}

impl Default for StepDefaults {
    fn default() -> Self {
        Self {
            timeout_secs: 300, // 5 minutes
        }
    }
}

/// How a step's process ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepExit {
    /// Process exited with a code
    Exited(i32),
    /// Process was killed after exceeding its timeout
    TimedOut { after_secs: u64 },
    /// Process was killed because the run was cancelled
    Terminated,
}

impl StepExit {
    pub fn success(&self) -> bool {
        matches!(self, StepExit::Exited(0))
    }
}

/// One recorded invocation of a step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepAttempt {
    pub exit: StepExit,
    pub duration_ms: u64,
    /// Combined stdout+stderr, secrets redacted
    pub output: String,
    /// True when the capture buffer overflowed and output was cut
    pub truncated: bool,
}

/// All attempts of a step within one run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    pub step: String,
    pub attempts: Vec<StepAttempt>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shell_command_line() {
        let (prog, args) = Shell::Sh.command_line();
        assert_eq!(prog, "sh");
        assert_eq!(args, &["-c"]);

        let (prog, _) = Shell::Bash.command_line();
        assert_eq!(prog, "bash");
    }

    #[test]
    fn test_step_exit_success() {
        assert!(StepExit::Exited(0).success());
        assert!(!StepExit::Exited(1).success());
        assert!(!StepExit::TimedOut { after_secs: 5 }.success());
        assert!(!StepExit::Terminated.success());
    }
}
