//! Runs in its own test binary: the temp directory is process-wide.
mod test_harness;

use std::sync::Arc;

use blocks_gcs_proxy::config::{CommandConfig, SustainerConfig};
use blocks_gcs_proxy::job::Job;
use blocks_gcs_proxy::worker::JobMessage;
use blocks_gcs_proxy::ProxyError;
use test_harness::{notification, received, FakePublisher, FakePuller, FakeStorage, SUBSCRIPTION};

#[tokio::test]
async fn test_workspace_failure_is_reported_as_preparing() {
    std::env::set_var("TMPDIR", "/nonexistent/blocks-gcs-proxy-tmp");

    let puller = Arc::new(FakePuller::new());
    let publisher = Arc::new(FakePublisher::default());
    let storage = Arc::new(FakeStorage::default().with_object("bucket", "a.txt", "A"));
    let raw = received("msg-1", &[("download_files", r#"["gs://bucket/a.txt"]"#)], "");
    let message = JobMessage::new(SUBSCRIPTION, raw, SustainerConfig::default(), puller.clone());
    let config = CommandConfig {
        template: vec!["true".to_string()],
        ..Default::default()
    };
    let job = Job::new(
        Arc::new(config),
        message,
        notification(publisher.clone(), "info"),
        storage.clone(),
    )
    .with_sustain(false);

    let result = job.run().await;

    assert!(matches!(result, Err(ProxyError::Io(_))));
    let steps: Vec<String> = publisher
        .steps()
        .into_iter()
        .map(|(step, status)| format!("{} {}", step, status))
        .collect();
    assert_eq!(
        steps,
        vec![
            "PROCESSING STARTING",
            "PREPARING STARTING",
            "PREPARING FAILURE",
            "CLEANUP STARTING",
            "CLEANUP SUCCESS",
        ]
    );
    assert!(storage.downloads().is_empty());
    assert!(puller.acks().is_empty());
}
