use blocks_gcs_proxy::worker::JobExecutor;
use blocks_gcs_proxy::ProxyError;

fn args(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

#[tokio::test]
async fn test_execute_simple_command() {
    let executor = JobExecutor::new();

    let result = executor.execute("msg-1", &args(&["echo", "hello"])).await.unwrap();

    assert!(result.success);
    assert_eq!(result.exit_code, Some(0));
    assert_eq!(result.output, "hello\n");
}

#[tokio::test]
async fn test_execute_empty_output() {
    let executor = JobExecutor::new();

    let result = executor.execute("msg-1", &args(&["true"])).await.unwrap();

    assert!(result.success);
    assert!(result.output.is_empty());
}

#[tokio::test]
async fn test_execute_large_output() {
    let executor = JobExecutor::new();

    let result = executor.execute("msg-1", &args(&["seq", "1", "1000"])).await.unwrap();

    assert!(result.success);
    assert_eq!(result.output.lines().count(), 1000);
}

#[tokio::test]
async fn test_execute_command_failure() {
    let executor = JobExecutor::new();
    let cmd = args(&["sh", "-c", "exit 3"]);

    let result = executor.execute("msg-1", &cmd).await.unwrap();

    assert!(!result.success);
    assert_eq!(result.exit_code, Some(3));
    assert!(matches!(
        result.into_result(&cmd),
        Err(ProxyError::Execution { .. })
    ));
}

#[tokio::test]
async fn test_execute_command_with_stderr() {
    let executor = JobExecutor::new();
    let cmd = args(&["sh", "-c", "echo 'error message' >&2 && exit 1"]);

    let result = executor.execute("msg-1", &cmd).await.unwrap();

    assert!(!result.success);
    match result.into_result(&cmd) {
        Err(ProxyError::Execution { output, .. }) => assert!(output.contains("error message")),
        other => panic!("expected execution error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_execute_combines_stdout_and_stderr() {
    let executor = JobExecutor::new();

    let result = executor
        .execute("msg-1", &args(&["sh", "-c", "echo out; echo err >&2"]))
        .await
        .unwrap();

    assert!(result.success);
    assert!(result.output.contains("out\n"));
    assert!(result.output.contains("err\n"));
}

#[tokio::test]
async fn test_execute_invalid_command() {
    let executor = JobExecutor::new();

    let result = executor
        .execute("msg-1", &args(&["nonexistent_command_12345"]))
        .await;

    assert!(matches!(result, Err(ProxyError::Execution { .. })));
}

#[tokio::test]
async fn test_execute_empty_command() {
    let executor = JobExecutor::new();

    let result = executor.execute("msg-1", &[]).await;

    assert!(matches!(result, Err(ProxyError::Execution { .. })));
}

#[tokio::test]
async fn test_arguments_are_not_shell_interpreted() {
    let executor = JobExecutor::new();

    let result = executor
        .execute("msg-1", &args(&["echo", "hello $USER", "a;b", "*"]))
        .await
        .unwrap();

    assert!(result.success);
    assert_eq!(result.output, "hello $USER a;b *\n");
}
