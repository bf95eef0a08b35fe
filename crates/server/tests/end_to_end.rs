//! Full-stack flow: the real adapter against the real worker.

mod common;

use std::time::Duration;

use assert_matches::assert_matches;

use common::start_server;
use pixelforge_client::adapter::BackendClient;
use pixelforge_client::config::ClientConfig;
use pixelforge_core::job::JobStatus;
use pixelforge_core::params::GenerateParams;
use pixelforge_queue::config::QueueConfig;

fn params(steps: u32) -> GenerateParams {
    GenerateParams {
        prompt: "forest tileset, top down".into(),
        model: "sdxl-base".into(),
        lora: Some("pixelart".into()),
        size: (1024, 1024),
        steps,
        cfg_scale: 6.5,
    }
}

#[tokio::test]
async fn generate_streams_progress_to_completion() {
    let server = start_server(QueueConfig::default(), Duration::from_millis(2)).await;
    let config = ClientConfig {
        request_addr: server.request_addr.clone(),
        subscribe_addr: server.subscribe_addr.clone(),
        request_timeout: Duration::from_secs(5),
        ..ClientConfig::default()
    };
    let mut client = BackendClient::connect(config).await.unwrap();
    // Give the worker a beat to register the subscription.
    tokio::time::sleep(Duration::from_millis(100)).await;

    let job_id = client.generate(params(5)).await.unwrap();

    // Drain progress from the render-loop path until the terminal
    // event arrives.
    let mut saw_running = false;
    let mut terminal = None;
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while terminal.is_none() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "no terminal event within deadline"
        );
        for event in client.poll_progress() {
            assert_eq!(event.job_id, job_id);
            match &event.status {
                JobStatus::Running { percent, .. } => {
                    saw_running = true;
                    assert!((0.0..=100.0).contains(percent));
                }
                status if status.is_terminal() => terminal = Some(status.clone()),
                _ => {}
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    assert!(saw_running, "never observed a running progress event");
    assert_matches!(
        terminal,
        Some(JobStatus::Complete { ref artifact_path, .. }) if artifact_path.ends_with(".png")
    );

    // The synchronous resync path agrees with the broadcast.
    let status = client.status(job_id).await.unwrap();
    assert_matches!(status, Some(JobStatus::Complete { .. }));

    let stats = client.server_stats().await.unwrap();
    assert_eq!(stats.queued, 0);
    assert_eq!(stats.running, 0);
}

#[tokio::test]
async fn cancel_of_queued_job_via_adapter_is_exact() {
    let queue = QueueConfig {
        max_pending_jobs: 4,
        ..QueueConfig::default()
    };
    // Slow engine keeps the first job running while we cancel the second.
    let server = start_server(queue, Duration::from_millis(100)).await;
    let config = ClientConfig {
        request_addr: server.request_addr.clone(),
        subscribe_addr: server.subscribe_addr.clone(),
        ..ClientConfig::default()
    };
    let client = BackendClient::connect(config).await.unwrap();

    let first = client.generate(params(50)).await.unwrap();
    let second = client.generate(params(50)).await.unwrap();
    assert!(second > first);

    client.cancel(second).await.unwrap();
    let status = client.status(second).await.unwrap();
    assert_eq!(status, Some(JobStatus::Cancelled));
}
