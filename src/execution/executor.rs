//! Shell step execution
//!
//! Runs a single step command under a shell, streams its combined output
//! into a bounded capture buffer, and turns the outcome into a [`StepExit`].
//! Timeouts and cancellation kill the child's process group; spawn and wait
//! failures surface as infrastructure errors rather than step failures.

use crate::core::{Step, StepExit};
use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, watch};
use tracing::debug;

/// Default cap on captured step output (1 MiB).
pub const DEFAULT_CAPTURE_LIMIT: usize = 1024 * 1024;

/// How long to wait for the output pipes to drain after the child exits.
/// A descendant that outlives the process group kill can keep the pipes
/// open; the step result must not wait for it.
const DRAIN_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("failed to spawn command: {0}")]
    Spawn(std::io::Error),
    #[error("failed to wait for command: {0}")]
    Wait(std::io::Error),
}

/// Result of a single step invocation.
#[derive(Debug)]
pub struct ExecOutcome {
    pub exit: StepExit,
    pub output: String,
    pub truncated: bool,
    pub duration: Duration,
}

pub struct StepExecutor {
    capture_limit: usize,
}

impl Default for StepExecutor {
    fn default() -> Self {
        Self::new(DEFAULT_CAPTURE_LIMIT)
    }
}

impl StepExecutor {
    pub fn new(capture_limit: usize) -> Self {
        Self { capture_limit }
    }

    /// Run one step to completion. `env` fully describes the extra
    /// environment; the child also inherits the parent environment.
    /// `redact` holds secret values to mask in the captured output.
    pub async fn run(
        &self,
        step: &Step,
        env: &HashMap<String, String>,
        workdir: &Path,
        redact: &[String],
        mut cancel: watch::Receiver<bool>,
    ) -> Result<ExecOutcome, ExecError> {
        let (program, args) = step.shell.command_line();

        let mut cmd = Command::new(program);
        cmd.args(args)
            .arg(&step.command)
            .current_dir(workdir)
            .envs(env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        // Own process group so timeouts and cancellation can take out the
        // whole shell tree, not just the direct child.
        #[cfg(unix)]
        cmd.process_group(0);

        debug!(step = %step.name, "spawning {} {}", program, step.command);
        let started = Instant::now();
        let mut child = cmd.spawn().map_err(ExecError::Spawn)?;
        let pid = child.id();

        let (line_tx, mut line_rx) = mpsc::unbounded_channel::<String>();
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(pump_lines(stdout, line_tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(pump_lines(stderr, line_tx.clone()));
        }
        drop(line_tx);

        let capture_limit = self.capture_limit;
        let collector = tokio::spawn(async move {
            let mut output = String::new();
            let mut truncated = false;
            while let Some(line) = line_rx.recv().await {
                // keep draining so the child never blocks on a full pipe
                if truncated {
                    continue;
                }
                if output.len() + line.len() + 1 > capture_limit {
                    truncated = true;
                    continue;
                }
                output.push_str(&line);
                output.push('\n');
            }
            (output, truncated)
        });

        let timeout = Duration::from_secs(step.timeout_secs);
        let exit = tokio::select! {
            status = child.wait() => {
                let status = status.map_err(ExecError::Wait)?;
                StepExit::Exited(status.code().unwrap_or(-1))
            }
            _ = tokio::time::sleep(timeout) => {
                terminate(&mut child, pid).await;
                StepExit::TimedOut { after_secs: step.timeout_secs }
            }
            _ = cancelled(&mut cancel) => {
                terminate(&mut child, pid).await;
                StepExit::Terminated
            }
        };

        let duration = started.elapsed();
        let (mut output, truncated) = match tokio::time::timeout(DRAIN_GRACE, collector).await {
            Ok(joined) => joined.unwrap_or_default(),
            Err(_) => (String::new(), true),
        };
        for value in redact {
            if !value.is_empty() {
                output = output.replace(value.as_str(), "***");
            }
        }

        Ok(ExecOutcome {
            exit,
            output,
            truncated,
            duration,
        })
    }
}

/// Kill the child's entire process group so shell descendants release the
/// output pipes, then reap the direct child.
async fn terminate(child: &mut Child, pid: Option<u32>) {
    #[cfg(unix)]
    if let Some(pid) = pid {
        // SAFETY: a negative pid signals every member of the process group.
        unsafe {
            libc::kill(-(pid as i32), libc::SIGKILL);
        }
    }
    #[cfg(not(unix))]
    let _ = pid;
    let _ = child.kill().await;
    let _ = child.wait().await;
}

async fn pump_lines(stream: impl AsyncRead + Unpin, tx: mpsc::UnboundedSender<String>) {
    let mut lines = BufReader::new(stream).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if tx.send(line).is_err() {
            break;
        }
    }
}

/// Resolves once the cancel flag flips to true; pends forever if the sender
/// is dropped without cancelling.
async fn cancelled(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Shell, Step};

    fn step(command: &str) -> Step {
        Step {
            name: "test-step".to_string(),
            command: command.to_string(),
            shell: Shell::Sh,
            env: HashMap::new(),
            secrets: Vec::new(),
            timeout_secs: 10,
        }
    }

    fn no_cancel() -> watch::Receiver<bool> {
        let (tx, rx) = watch::channel(false);
        // leaked so cancelled() keeps pending
        std::mem::forget(tx);
        rx
    }

    #[tokio::test]
    async fn test_run_captures_output() {
        let executor = StepExecutor::default();
        let dir = tempfile::tempdir().unwrap();
        let outcome = executor
            .run(&step("echo hello"), &HashMap::new(), dir.path(), &[], no_cancel())
            .await
            .unwrap();

        assert_eq!(outcome.exit, StepExit::Exited(0));
        assert_eq!(outcome.output.trim(), "hello");
        assert!(!outcome.truncated);
    }

    #[tokio::test]
    async fn test_run_reports_exit_code() {
        let executor = StepExecutor::default();
        let dir = tempfile::tempdir().unwrap();
        let outcome = executor
            .run(&step("exit 42"), &HashMap::new(), dir.path(), &[], no_cancel())
            .await
            .unwrap();

        assert_eq!(outcome.exit, StepExit::Exited(42));
    }

    #[tokio::test]
    async fn test_run_times_out() {
        let executor = StepExecutor::default();
        let dir = tempfile::tempdir().unwrap();
        let mut slow = step("sleep 30");
        slow.timeout_secs = 1;

        let outcome = executor
            .run(&slow, &HashMap::new(), dir.path(), &[], no_cancel())
            .await
            .unwrap();

        assert_eq!(outcome.exit, StepExit::TimedOut { after_secs: 1 });
    }

    #[tokio::test]
    async fn test_timeout_kills_shell_descendants() {
        let executor = StepExecutor::default();
        let dir = tempfile::tempdir().unwrap();
        // the background sleep inherits the output pipes; the step must not
        // block on it after the timeout fires
        let mut slow = step("sleep 30 & sleep 30");
        slow.timeout_secs = 1;

        let started = Instant::now();
        let outcome = executor
            .run(&slow, &HashMap::new(), dir.path(), &[], no_cancel())
            .await
            .unwrap();

        assert_eq!(outcome.exit, StepExit::TimedOut { after_secs: 1 });
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_run_terminates_on_cancel() {
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            let executor = StepExecutor::default();
            let dir = tempfile::tempdir().unwrap();
            executor
                .run(&step("sleep 30"), &HashMap::new(), dir.path(), &[], rx)
                .await
        });

        tokio::time::sleep(Duration::from_millis(100)).await;
        tx.send(true).unwrap();
        let outcome = handle.await.unwrap().unwrap();
        assert_eq!(outcome.exit, StepExit::Terminated);
    }

    #[tokio::test]
    async fn test_run_redacts_secret_values() {
        let executor = StepExecutor::default();
        let dir = tempfile::tempdir().unwrap();
        let outcome = executor
            .run(
                &step("echo token=hunter2"),
                &HashMap::new(),
                dir.path(),
                &["hunter2".to_string()],
                no_cancel(),
            )
            .await
            .unwrap();

        assert_eq!(outcome.output.trim(), "token=***");
    }

    #[tokio::test]
    async fn test_run_truncates_long_output() {
        let executor = StepExecutor::new(64);
        let dir = tempfile::tempdir().unwrap();
        let outcome = executor
            .run(
                &step("for i in $(seq 1 100); do echo line-$i; done"),
                &HashMap::new(),
                dir.path(),
                &[],
                no_cancel(),
            )
            .await
            .unwrap();

        assert_eq!(outcome.exit, StepExit::Exited(0));
        assert!(outcome.truncated);
        assert!(outcome.output.len() <= 64);
    }

    #[tokio::test]
    async fn test_run_passes_environment() {
        let executor = StepExecutor::default();
        let dir = tempfile::tempdir().unwrap();
        let mut env = HashMap::new();
        env.insert("GREETING".to_string(), "hi there".to_string());

        let outcome = executor
            .run(&step("echo $GREETING"), &env, dir.path(), &[], no_cancel())
            .await
            .unwrap();

        assert_eq!(outcome.output.trim(), "hi there");
    }

    #[tokio::test]
    async fn test_spawn_failure_is_infrastructure_error() {
        let executor = StepExecutor::default();
        let err = executor
            .run(
                &step("echo hi"),
                &HashMap::new(),
                Path::new("/definitely/not/a/real/dir"),
                &[],
                no_cancel(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ExecError::Spawn(_)));
    }
}
