use super::*;
use std::time::Duration;

#[tokio::test]
async fn test_production_runner_success() {
    let runner = runner::TokioProcessRunner;
    let command = ProcessCommandBuilder::new("echo")
        .arg("hello world")
        .build();

    let output = runner.run(command).await.unwrap();
    assert!(output.status.success());
    assert_eq!(output.stdout.trim(), "hello world");
    assert!(output.stderr.is_empty());
}

#[tokio::test]
async fn test_production_runner_failure() {
    let runner = runner::TokioProcessRunner;
    let command = ProcessCommandBuilder::new("false").build();

    let output = runner.run(command).await.unwrap();
    assert!(!output.status.success());
    assert_eq!(output.status.code(), Some(1));
}

#[tokio::test]
async fn test_production_runner_command_not_found() {
    let runner = runner::TokioProcessRunner;
    let command = ProcessCommandBuilder::new("nonexistent-command-12345").build();

    let result = runner.run(command).await;
    assert!(matches!(result, Err(ProcessError::CommandNotFound(_))));
}

#[tokio::test]
async fn test_production_runner_timeout() {
    let runner = runner::TokioProcessRunner;
    let command = ProcessCommandBuilder::new("sleep")
        .arg("5")
        .timeout_opt(Some(Duration::from_millis(100)))
        .build();

    let result = runner.run(command).await;
    assert!(matches!(result, Err(ProcessError::Timeout(_))));
}

#[tokio::test]
async fn test_production_runner_closes_stdin() {
    let runner = runner::TokioProcessRunner;
    let command = ProcessCommandBuilder::new("cat").build();

    let output = runner.run(command).await.unwrap();
    assert!(output.status.success());
    assert!(output.stdout.is_empty());
}

#[tokio::test]
async fn test_mock_runner_matches_args() {
    let mut mock = MockProcessRunner::new();

    mock.expect_command("ssh")
        .with_args(|args| args.iter().any(|a| a.contains("cleanup_")))
        .returns_exit_code(255)
        .returns_stderr("Connection refused")
        .finish();
    mock.expect_command("ssh").returns_success().finish();

    let failing = mock
        .run(
            ProcessCommandBuilder::new("ssh")
                .args(["u1@h1", "cd /tmp && sh cleanup_u1.sh"])
                .build(),
        )
        .await
        .unwrap();
    assert_eq!(failing.status.code(), Some(255));
    assert_eq!(failing.stderr, "Connection refused");

    let ok = mock
        .run(ProcessCommandBuilder::new("ssh").args(["u1@h1", "true"]).build())
        .await
        .unwrap();
    assert!(ok.status.success());
    assert!(mock.verify_called("ssh", 2));
}

#[tokio::test]
async fn test_mock_runner_times_limit() {
    let mut mock = MockProcessRunner::new();
    mock.expect_command("scp").returns_success().times(1).finish();

    let cmd = ProcessCommandBuilder::new("scp").arg("a").build();
    assert!(mock.run(cmd.clone()).await.is_ok());
    assert!(matches!(
        mock.run(cmd).await,
        Err(ProcessError::MockExpectationNotMet(_))
    ));
}

#[tokio::test]
async fn test_mock_runner_records_detached_separately() {
    let (manager, mut mock) = SubprocessManager::mock();
    mock.expect_command("ssh").returns_success().finish();

    let runner = manager.runner();
    runner
        .spawn_detached(ProcessCommandBuilder::new("ssh").arg("h1").build())
        .await
        .unwrap();

    assert!(mock.get_call_history().is_empty());
    assert_eq!(mock.get_detached_history().len(), 1);
    assert_eq!(mock.count_calls(|c| c.program == "ssh"), 1);
}

#[tokio::test]
async fn test_mock_runner_unexpected_command() {
    let mock = MockProcessRunner::new();
    let result = mock
        .run(ProcessCommandBuilder::new("rsync").build())
        .await;
    assert!(matches!(result, Err(ProcessError::MockExpectationNotMet(_))));
}
