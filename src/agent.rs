//! One agent run over a period's schedule directory.
//!
//! # Run flow
//!
//! 1. Capture a [`RunContext`] (start time floored to whole seconds)
//! 2. List the schedule entries in name order
//! 3. For each entry: claim it, run the job if its mtime predates the run
//!    start, touch it on success, release the claim
//! 4. Collect one [`Outcome`] per entry into a [`RunSummary`]
//!
//! An entry can only produce an [`Outcome`]; nothing that goes wrong with
//! one entry stops the loop. Only an unreadable schedule directory fails
//! the run as a whole.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::Serialize;

use crate::config::AgentConfig;
use crate::discovery::list_entries;
use crate::error::Result;
use crate::executor::{Execute, ExecutionResult, Job};
use crate::lock::{try_claim, Claim, EntryLock};

/// Immutable per-run state, captured once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunContext {
    start_time: SystemTime,
}

impl RunContext {
    /// Capture the current time as the run start.
    pub fn capture() -> Self {
        Self::at(SystemTime::now())
    }

    /// Run context starting at `time`, floored to whole seconds.
    ///
    /// An entry touched earlier within the same second must not look due
    /// to this run.
    pub fn at(time: SystemTime) -> Self {
        let start_time = match time.duration_since(UNIX_EPOCH) {
            Ok(since_epoch) => UNIX_EPOCH + Duration::from_secs(since_epoch.as_secs()),
            Err(_) => time,
        };
        Self { start_time }
    }

    pub fn start_time(&self) -> SystemTime {
        self.start_time
    }

    /// An entry is due iff it was last modified before the run started.
    pub fn is_due(&self, last_modified: SystemTime) -> bool {
        last_modified < self.start_time
    }
}

/// What happened to a single entry during a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    /// The job ran and the entry was touched.
    Succeeded,
    /// The job ran and failed; the entry stays due.
    Failed { error: String },
    /// Another agent holds the entry.
    Skipped,
    /// The entry was touched at or after this run's start.
    AlreadyProcessed,
    /// The entry could not be opened or claimed.
    OpenFailed { error: String },
}

impl Outcome {
    /// Outcomes that count against the run's exit status.
    pub fn is_failure(&self) -> bool {
        matches!(self, Outcome::Failed { .. } | Outcome::OpenFailed { .. })
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Outcome::Succeeded => f.pad("succeeded"),
            Outcome::Failed { .. } => f.pad("failed"),
            Outcome::Skipped => f.pad("skipped"),
            Outcome::AlreadyProcessed => f.pad("already_processed"),
            Outcome::OpenFailed { .. } => f.pad("open_failed"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntryReport {
    pub entry: String,
    #[serde(flatten)]
    pub outcome: Outcome,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OutcomeCounts {
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub already_processed: usize,
    pub open_failed: usize,
}

/// Per-entry outcomes of one run, in processing order.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub period: String,
    pub started_at: DateTime<Utc>,
    pub entries: Vec<EntryReport>,
}

impl RunSummary {
    pub fn outcome(&self, entry: &str) -> Option<&Outcome> {
        self.entries
            .iter()
            .find(|report| report.entry == entry)
            .map(|report| &report.outcome)
    }

    pub fn counts(&self) -> OutcomeCounts {
        let mut counts = OutcomeCounts::default();
        for report in &self.entries {
            match report.outcome {
                Outcome::Succeeded => counts.succeeded += 1,
                Outcome::Failed { .. } => counts.failed += 1,
                Outcome::Skipped => counts.skipped += 1,
                Outcome::AlreadyProcessed => counts.already_processed += 1,
                Outcome::OpenFailed { .. } => counts.open_failed += 1,
            }
        }
        counts
    }

    pub fn has_failures(&self) -> bool {
        self.entries.iter().any(|report| report.outcome.is_failure())
    }
}

/// Processes every entry of one schedule directory, one at a time.
#[derive(Debug, Clone)]
pub struct Agent<E> {
    config: AgentConfig,
    executor: E,
}

impl<E: Execute> Agent<E> {
    pub fn new(config: AgentConfig, executor: E) -> Self {
        Self { config, executor }
    }

    /// Visit every entry in the schedule directory once.
    ///
    /// Fails only if the directory itself cannot be listed.
    pub async fn run(&self, ctx: &RunContext) -> Result<RunSummary> {
        let started_at = DateTime::<Utc>::from(ctx.start_time());
        let schedule_dir = &self.config.schedule_dir;

        tracing::info!(
            period = %self.config.period,
            started_at = %started_at,
            dir = %schedule_dir.display(),
            "Jobs agent started"
        );

        let entries = list_entries(schedule_dir).await?;
        tracing::info!(
            count = entries.len(),
            dir = %schedule_dir.display(),
            "Found scheduled jobs"
        );

        let mut reports = Vec::with_capacity(entries.len());
        for entry in entries {
            tracing::debug!(entry = %entry, "Processing job");
            let outcome = self.process_entry(ctx, &entry).await;
            reports.push(EntryReport { entry, outcome });
        }

        let summary = RunSummary {
            period: self.config.period.clone(),
            started_at,
            entries: reports,
        };
        let counts = summary.counts();
        tracing::info!(
            period = %summary.period,
            succeeded = counts.succeeded,
            failed = counts.failed,
            skipped = counts.skipped,
            already_processed = counts.already_processed,
            open_failed = counts.open_failed,
            "Jobs agent finished"
        );

        Ok(summary)
    }

    /// Claim, run and release a single entry.
    pub async fn process_entry(&self, ctx: &RunContext, entry: &str) -> Outcome {
        let path = self.config.schedule_dir.join(entry);
        let job = Job::from_entry(entry);

        let lock = match try_claim(&path) {
            Ok(Claim::Claimed(lock)) => lock,
            Ok(Claim::Busy) => {
                tracing::info!(job = %job.label(), "Job is being processed by another agent");
                return Outcome::Skipped;
            }
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "Failed to claim entry");
                tracing::error!(job = %job.label(), error = %e, "Failed to process job");
                return Outcome::OpenFailed {
                    error: e.to_string(),
                };
            }
        };

        let outcome = self.run_claimed(ctx, &job, &lock, &path).await;

        if let Err(e) = lock.release() {
            tracing::warn!(job = %job.label(), error = %e, "Failed to release entry lock");
        }

        outcome
    }

    async fn run_claimed(
        &self,
        ctx: &RunContext,
        job: &Job,
        lock: &EntryLock,
        path: &Path,
    ) -> Outcome {
        let last_modified = lock.last_modified();
        tracing::debug!(
            path = %path.display(),
            last_modified = %DateTime::<Utc>::from(last_modified),
            "Entry last modified"
        );

        if !ctx.is_due(last_modified) {
            tracing::info!(job = %job.label(), "Job has been processed already");
            return Outcome::AlreadyProcessed;
        }

        // A panicking executor fails this entry only.
        let result = match AssertUnwindSafe(self.executor.execute(job))
            .catch_unwind()
            .await
        {
            Ok(result) => result,
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                tracing::error!(job = %job.label(), panic = %message, "Executor panicked");
                ExecutionResult::failed(format!("executor panicked: {}", message))
            }
        };

        if !result.success {
            let error = result
                .error
                .unwrap_or_else(|| format!("exit code {:?}", result.exit_code));
            tracing::error!(
                job = %job.label(),
                exit_code = ?result.exit_code,
                "Job failed"
            );
            tracing::error!(job = %job.label(), output = %error, "Command output");
            return Outcome::Failed { error };
        }

        if !lock.still_present() {
            tracing::warn!(
                job = %job.label(),
                path = %path.display(),
                "Entry was removed or replaced while the job ran"
            );
        }

        if let Err(e) = lock.touch() {
            tracing::error!(job = %job.label(), error = %e, "Failed to record job completion");
        }

        tracing::info!(job = %job.label(), "Job succeeded");
        Outcome::Succeeded
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Exit status for a finished (or failed-to-start) run.
///
/// `0` when every entry was visited without a `Failed` or `OpenFailed`
/// outcome, `1` when at least one entry failed, `2` when the run could not
/// list its schedule directory.
pub fn exit_status(result: &Result<RunSummary>) -> u8 {
    match result {
        Ok(summary) if summary.has_failures() => EXIT_ENTRY_FAILURES,
        Ok(_) => EXIT_OK,
        Err(_) => EXIT_RUN_ERROR,
    }
}

/// Every entry visited, none failed.
pub const EXIT_OK: u8 = 0;
/// Run completed with at least one failed or unopenable entry.
pub const EXIT_ENTRY_FAILURES: u8 = 1;
/// Run could not start.
pub const EXIT_RUN_ERROR: u8 = 2;

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(n: u64) -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(n)
    }

    #[test]
    fn run_context_floors_to_whole_seconds() {
        let ctx = RunContext::at(secs(1_700_000_000) + Duration::from_millis(987));
        assert_eq!(ctx.start_time(), secs(1_700_000_000));
    }

    #[test]
    fn entry_is_due_only_when_older_than_start() {
        let ctx = RunContext::at(secs(100));
        assert!(ctx.is_due(secs(99)));
        assert!(!ctx.is_due(secs(100)));
        assert!(!ctx.is_due(secs(101)));
    }

    #[test]
    fn touch_within_same_second_is_not_due() {
        let ctx = RunContext::at(secs(500) + Duration::from_millis(700));
        assert!(!ctx.is_due(secs(500) + Duration::from_millis(200)));
    }

    #[test]
    fn outcome_display() {
        assert_eq!(Outcome::Succeeded.to_string(), "succeeded");
        assert_eq!(
            Outcome::Failed {
                error: "boom".into()
            }
            .to_string(),
            "failed"
        );
        assert_eq!(Outcome::Skipped.to_string(), "skipped");
        assert_eq!(Outcome::AlreadyProcessed.to_string(), "already_processed");
        assert_eq!(
            Outcome::OpenFailed {
                error: "gone".into()
            }
            .to_string(),
            "open_failed"
        );
    }

    #[test]
    fn only_failed_and_open_failed_are_failures() {
        assert!(!Outcome::Succeeded.is_failure());
        assert!(!Outcome::Skipped.is_failure());
        assert!(!Outcome::AlreadyProcessed.is_failure());
        assert!(Outcome::Failed { error: String::new() }.is_failure());
        assert!(Outcome::OpenFailed { error: String::new() }.is_failure());
    }

    #[test]
    fn summary_counts_and_lookup() {
        let summary = RunSummary {
            period: "daily".to_string(),
            started_at: DateTime::<Utc>::from(secs(0)),
            entries: vec![
                EntryReport {
                    entry: "a".to_string(),
                    outcome: Outcome::Succeeded,
                },
                EntryReport {
                    entry: "b".to_string(),
                    outcome: Outcome::Skipped,
                },
                EntryReport {
                    entry: "c".to_string(),
                    outcome: Outcome::AlreadyProcessed,
                },
            ],
        };

        let counts = summary.counts();
        assert_eq!(counts.succeeded, 1);
        assert_eq!(counts.skipped, 1);
        assert_eq!(counts.already_processed, 1);
        assert_eq!(counts.failed, 0);
        assert!(!summary.has_failures());
        assert_eq!(summary.outcome("b"), Some(&Outcome::Skipped));
        assert_eq!(summary.outcome("z"), None);
    }

    fn summary_with(outcomes: Vec<Outcome>) -> RunSummary {
        RunSummary {
            period: "hourly".to_string(),
            started_at: DateTime::<Utc>::from(secs(0)),
            entries: outcomes
                .into_iter()
                .enumerate()
                .map(|(i, outcome)| EntryReport {
                    entry: format!("vol{}", i),
                    outcome,
                })
                .collect(),
        }
    }

    #[test]
    fn exit_status_zero_without_failures() {
        let summary = summary_with(vec![
            Outcome::Succeeded,
            Outcome::Skipped,
            Outcome::AlreadyProcessed,
        ]);
        assert_eq!(exit_status(&Ok(summary)), EXIT_OK);
        assert_eq!(exit_status(&Ok(summary_with(vec![]))), EXIT_OK);
    }

    #[test]
    fn exit_status_one_on_entry_failure() {
        let failed = summary_with(vec![
            Outcome::Succeeded,
            Outcome::Failed {
                error: "boom".into(),
            },
        ]);
        assert_eq!(exit_status(&Ok(failed)), EXIT_ENTRY_FAILURES);

        let open_failed = summary_with(vec![Outcome::OpenFailed {
            error: "gone".into(),
        }]);
        assert_eq!(exit_status(&Ok(open_failed)), EXIT_ENTRY_FAILURES);
    }

    #[test]
    fn exit_status_two_when_run_cannot_start() {
        let err = crate::error::AgentError::Discovery {
            dir: "/mnt/shared/hourly".into(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "missing"),
        };
        assert_eq!(exit_status(&Err(err)), EXIT_RUN_ERROR);

        let err = crate::error::AgentError::Config("no period".to_string());
        assert_eq!(exit_status(&Err(err)), EXIT_RUN_ERROR);
    }

    #[test]
    fn panic_message_reads_str_and_string_payloads() {
        let payload: Box<dyn Any + Send> = Box::new("static message");
        assert_eq!(panic_message(payload.as_ref()), "static message");

        let payload: Box<dyn Any + Send> = Box::new(String::from("owned message"));
        assert_eq!(panic_message(payload.as_ref()), "owned message");

        let payload: Box<dyn Any + Send> = Box::new(42u32);
        assert_eq!(panic_message(payload.as_ref()), "unknown panic");
    }

    #[test]
    fn summary_serializes_outcome_inline() {
        let report = EntryReport {
            entry: "vol1".to_string(),
            outcome: Outcome::Failed {
                error: "snapshot failed".to_string(),
            },
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["entry"], "vol1");
        assert_eq!(json["outcome"], "failed");
        assert_eq!(json["error"], "snapshot failed");
    }
}
