use clap::{Parser, ValueEnum};
use std::fmt::Write as _;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use snapcron::agent::{exit_status, Agent, Outcome, RunContext, RunSummary, EXIT_RUN_ERROR};
use snapcron::config::{AgentConfig, DEFAULT_SHARED_ROOT, DEFAULT_TOOL};
use snapcron::executor::SnapshotExecutor;

#[derive(Parser, Debug)]
#[command(name = "snapcron")]
#[command(version)]
#[command(about = "Periodic snapshot agent for a shared schedule directory")]
#[command(
    long_about = "Runs every job listed in a shared schedule directory at most once per \
    period, racing safely with agents on other hosts. Without flags the period is the \
    name this program was invoked as (e.g. a symlink named `hourly`)."
)]
struct Args {
    /// Period to process (default: the program's invocation name)
    #[arg(long)]
    period: Option<String>,

    /// Root holding one schedule directory per period
    #[arg(long, default_value = DEFAULT_SHARED_ROOT)]
    shared_root: PathBuf,

    /// Schedule directory to process, overriding period resolution
    #[arg(long)]
    schedule_dir: Option<PathBuf>,

    /// Snapshot tool to invoke for each due job
    #[arg(long, default_value = DEFAULT_TOOL)]
    tool: PathBuf,

    /// Also write debug-level logs to this file
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Output format of the run summary
    #[arg(long, short = 'o', default_value = "table")]
    output: OutputFormat,
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

fn init_tracing(
    log_file: Option<&PathBuf>,
) -> Result<Option<WorkerGuard>, Box<dyn std::error::Error>> {
    let console = fmt::layer().with_writer(std::io::stderr).with_filter(
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    );

    let (file_layer, guard) = match log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            let (writer, guard) = tracing_appender::non_blocking(file);
            let layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_filter(EnvFilter::new("debug"));
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(console)
        .with(file_layer)
        .init();

    Ok(guard)
}

fn render_summary(summary: &RunSummary, format: &OutputFormat) -> Result<String, serde_json::Error> {
    let mut out = String::new();
    match format {
        OutputFormat::Json => {
            out.push_str(&serde_json::to_string_pretty(summary)?);
            out.push('\n');
        }
        OutputFormat::Table => {
            if summary.entries.is_empty() {
                out.push_str("No jobs found.\n");
                return Ok(out);
            }
            let _ = writeln!(out, "{:<32} {:<18} DETAIL", "JOB", "OUTCOME");
            let _ = writeln!(out, "{}", "-".repeat(70));
            for report in &summary.entries {
                let detail = match &report.outcome {
                    Outcome::Failed { error } | Outcome::OpenFailed { error } => {
                        error.lines().next().unwrap_or_default().to_string()
                    }
                    _ => String::new(),
                };
                let _ = writeln!(
                    out,
                    "{:<32} {:<18} {}",
                    report.entry, report.outcome, detail
                );
            }
            let counts = summary.counts();
            let _ = writeln!(out);
            let _ = writeln!(
                out,
                "{} succeeded, {} failed, {} skipped, {} already processed, {} open failed",
                counts.succeeded,
                counts.failed,
                counts.skipped,
                counts.already_processed,
                counts.open_failed
            );
        }
    }
    Ok(out)
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    // Run start is taken before argument parsing and logging setup.
    let ctx = RunContext::capture();
    let args = Args::parse();

    let _guard = match init_tracing(args.log_file.as_ref()) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Error: failed to open log file: {}", e);
            return ExitCode::from(EXIT_RUN_ERROR);
        }
    };

    let argv0 = std::env::args_os().next();
    let config = match AgentConfig::resolve(
        args.schedule_dir,
        args.period,
        &args.shared_root,
        argv0.as_deref(),
    ) {
        Ok(config) => config.with_tool(args.tool),
        Err(e) => {
            tracing::error!(error = %e, "Invalid configuration");
            return ExitCode::from(EXIT_RUN_ERROR);
        }
    };

    let executor = SnapshotExecutor::new(config.tool.clone());
    let agent = Agent::new(config, executor);

    let result = agent.run(&ctx).await;
    match &result {
        Ok(summary) => match render_summary(summary, &args.output) {
            Ok(rendered) => print!("{}", rendered),
            Err(e) => tracing::error!(error = %e, "Failed to print run summary"),
        },
        Err(e) => tracing::error!(error = %e, "Jobs agent failed"),
    }

    ExitCode::from(exit_status(&result))
}
