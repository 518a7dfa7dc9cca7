use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use crate::error::{AgentError, Result};

/// Root under which each period keeps its schedule directory.
pub const DEFAULT_SHARED_ROOT: &str = "/mnt/shared";

/// Snapshot tool invoked for every due entry.
pub const DEFAULT_TOOL: &str = "/usr/sbin/gluster";

/// Configuration for the external snapshot tool.
#[derive(Debug, Clone)]
pub struct ToolConfig {
    /// Executable invoked as `<program> create <snapshot> <resource>`
    pub program: PathBuf,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            program: PathBuf::from(DEFAULT_TOOL),
        }
    }
}

/// Everything one agent run needs to know before it starts.
///
/// The schedule directory is an explicit value. Deriving it from the
/// program's invocation name is only a default applied by [`AgentConfig::resolve`].
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Period label used in logs (e.g. "hourly", "daily")
    pub period: String,
    /// Directory whose regular files are the jobs due this period
    pub schedule_dir: PathBuf,
    pub tool: ToolConfig,
}

impl AgentConfig {
    pub fn new(period: impl Into<String>, schedule_dir: impl Into<PathBuf>) -> Self {
        Self {
            period: period.into(),
            schedule_dir: schedule_dir.into(),
            tool: ToolConfig::default(),
        }
    }

    /// Schedule directory `<shared_root>/<period>`.
    pub fn for_period(shared_root: &Path, period: &str) -> Self {
        Self::new(period, shared_root.join(period))
    }

    pub fn with_tool(mut self, program: impl Into<PathBuf>) -> Self {
        self.tool.program = program.into();
        self
    }

    /// Resolve the configuration with precedence: explicit schedule
    /// directory, then explicit period, then the invocation name.
    pub fn resolve(
        schedule_dir: Option<PathBuf>,
        period: Option<String>,
        shared_root: &Path,
        argv0: Option<&OsStr>,
    ) -> Result<Self> {
        let period = match period {
            Some(p) => Some(p),
            None => argv0.and_then(period_from_invocation),
        };

        match (schedule_dir, period) {
            (Some(dir), period) => {
                let period = period
                    .or_else(|| dir.file_name().and_then(|n| n.to_str()).map(String::from))
                    .unwrap_or_else(|| "custom".to_string());
                Ok(Self::new(period, dir))
            }
            (None, Some(period)) => {
                validate_period(&period)?;
                Ok(Self::for_period(shared_root, &period))
            }
            (None, None) => Err(AgentError::Config(
                "cannot determine period from invocation name; pass --period or --schedule-dir"
                    .to_string(),
            )),
        }
    }
}

/// Period named by the program's own invocation (basename of argv[0]).
///
/// A binary installed as `/etc/cron.hourly/hourly` or symlinked as `daily`
/// serves that period without any flags.
pub fn period_from_invocation(argv0: &OsStr) -> Option<String> {
    let name = Path::new(argv0).file_name()?.to_str()?;
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}

fn validate_period(period: &str) -> Result<()> {
    if period.is_empty() || period == "." || period == ".." || period.contains('/') {
        return Err(AgentError::Config(format!(
            "invalid period name {:?}",
            period
        )));
    }
    Ok(())
}
