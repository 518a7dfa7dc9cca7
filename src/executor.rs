use std::future::Future;
use std::process::Stdio;

use chrono::{DateTime, Utc};
use tokio::process::Command;

use crate::config::ToolConfig;

/// Format of the timestamp suffix in snapshot names.
pub const SNAPSHOT_TIME_FORMAT: &str = "%Y%m%d%H%M%S";

/// One job to run: an entry in the schedule directory.
///
/// The entry name identifies both the job and the resource it snapshots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub name: String,
    pub resource: String,
}

impl Job {
    pub fn from_entry(entry: &str) -> Self {
        Self {
            name: entry.to_string(),
            resource: entry.to_string(),
        }
    }

    /// Label used when logging this job.
    pub fn label(&self) -> String {
        format!("Snapshot-{}", self.name)
    }
}

/// Result of one external tool invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    pub success: bool,
    pub exit_code: Option<i32>,
    pub output: Option<String>,
    pub error: Option<String>,
}

impl ExecutionResult {
    pub fn succeeded() -> Self {
        Self {
            success: true,
            exit_code: Some(0),
            output: None,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            exit_code: None,
            output: None,
            error: Some(error.into()),
        }
    }
}

/// Runs a single job to completion.
///
/// Implementations never retry and never fail past the returned
/// [`ExecutionResult`]; a launch error is just another failed result.
pub trait Execute {
    fn execute(&self, job: &Job) -> impl Future<Output = ExecutionResult> + Send;
}

/// Snapshot name `<job>-snapshot-<yyyymmddhhmmss>` for a UTC instant.
pub fn snapshot_name(job: &Job, at: DateTime<Utc>) -> String {
    format!("{}-snapshot-{}", job.name, at.format(SNAPSHOT_TIME_FORMAT))
}

/// Invokes `<tool> create <snapshot-name> <resource>` for each job.
#[derive(Debug, Clone, Default)]
pub struct SnapshotExecutor {
    config: ToolConfig,
}

impl SnapshotExecutor {
    pub fn new(config: ToolConfig) -> Self {
        Self { config }
    }

    /// Arguments passed to the tool for `job` at time `at`.
    pub fn command_args(job: &Job, at: DateTime<Utc>) -> Vec<String> {
        vec![
            "create".to_string(),
            snapshot_name(job, at),
            job.resource.clone(),
        ]
    }

    async fn run_tool(&self, job: &Job) -> ExecutionResult {
        let args = Self::command_args(job, Utc::now());
        tracing::debug!(
            job = %job.label(),
            program = %self.config.program.display(),
            args = ?args,
            "Running command"
        );

        let result = Command::new(&self.config.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await;

        Self::process_output(job, result)
    }

    fn process_output(
        job: &Job,
        result: Result<std::process::Output, std::io::Error>,
    ) -> ExecutionResult {
        match result {
            Ok(output) => {
                let stdout = String::from_utf8_lossy(&output.stdout).to_string();
                let stderr = String::from_utf8_lossy(&output.stderr).to_string();
                let exit_code = output.status.code();

                tracing::debug!(job = %job.label(), exit_code = ?exit_code, "Command returned");

                let error = if output.status.success() {
                    None
                } else if stderr.is_empty() {
                    Some(format!("Exit status: {}", output.status))
                } else {
                    Some(stderr)
                };

                ExecutionResult {
                    success: output.status.success(),
                    exit_code,
                    output: if stdout.is_empty() { None } else { Some(stdout) },
                    error,
                }
            }
            Err(e) => {
                tracing::error!(job = %job.label(), error = %e, "Failed to launch snapshot tool");
                ExecutionResult::failed(e.to_string())
            }
        }
    }
}

impl Execute for SnapshotExecutor {
    async fn execute(&self, job: &Job) -> ExecutionResult {
        self.run_tool(job).await
    }
}
