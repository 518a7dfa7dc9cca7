use std::path::PathBuf;

use snapcron::config::ToolConfig;
use snapcron::executor::{Execute, Job, SnapshotExecutor};

fn executor_with(program: &str) -> SnapshotExecutor {
    SnapshotExecutor::new(ToolConfig {
        program: PathBuf::from(program),
    })
}

#[tokio::test]
async fn test_execute_passes_create_arguments() {
    // echo prints the arguments it was given
    let executor = executor_with("echo");
    let job = Job::from_entry("vol1");

    let result = executor.execute(&job).await;

    assert!(result.success);
    assert_eq!(result.exit_code, Some(0));
    assert!(result.error.is_none());

    let output = result.output.expect("echo output");
    let args: Vec<&str> = output.split_whitespace().collect();
    assert_eq!(args.len(), 3);
    assert_eq!(args[0], "create");
    assert_eq!(args[2], "vol1");

    let suffix = args[1]
        .strip_prefix("vol1-snapshot-")
        .expect("snapshot name prefix");
    assert_eq!(suffix.len(), 14);
    assert!(suffix.chars().all(|c| c.is_ascii_digit()));
}

#[tokio::test]
async fn test_execute_uses_resource_name() {
    let executor = executor_with("echo");
    let job = Job {
        name: "nightly".to_string(),
        resource: "gv0".to_string(),
    };

    let result = executor.execute(&job).await;

    assert!(result.success);
    let output = result.output.expect("echo output");
    assert!(output.starts_with("create nightly-snapshot-"));
    assert!(output.trim_end().ends_with(" gv0"));
}

#[tokio::test]
async fn test_execute_empty_output() {
    let executor = executor_with("true");
    let result = executor.execute(&Job::from_entry("vol1")).await;

    assert!(result.success);
    assert!(result.output.is_none());
    assert!(result.error.is_none());
}

#[tokio::test]
async fn test_execute_nonzero_exit_is_failure() {
    let executor = executor_with("false");
    let result = executor.execute(&Job::from_entry("vol1")).await;

    assert!(!result.success);
    assert_eq!(result.exit_code, Some(1));
    // No stderr, so the exit status is reported instead
    assert!(result.error.unwrap().contains("exit status"));
}

#[tokio::test]
async fn test_execute_captures_stderr_on_failure() {
    // `sh create ...` fails to open a script named "create" and says so on stderr
    let executor = executor_with("sh");
    let result = executor.execute(&Job::from_entry("vol1")).await;

    assert!(!result.success);
    assert!(result.exit_code.is_some());
    assert_ne!(result.exit_code, Some(0));
    assert!(result.error.unwrap().contains("create"));
}

#[tokio::test]
async fn test_execute_missing_tool_is_failure() {
    let executor = executor_with("/nonexistent/snapshot-tool-12345");
    let result = executor.execute(&Job::from_entry("vol1")).await;

    assert!(!result.success);
    assert!(result.exit_code.is_none());
    assert!(result.error.is_some());
}
