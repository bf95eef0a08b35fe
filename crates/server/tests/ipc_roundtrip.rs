//! Frame-level tests of the worker's IPC surface.

mod common;

use std::time::Duration;

use assert_matches::assert_matches;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};

use common::{connect_frames, recv_event, roundtrip, start_server};
use pixelforge_core::job::JobStatus;
use pixelforge_core::params::GenerateParams;
use pixelforge_proto::codec::decode_response;
use pixelforge_proto::messages::{ErrorCode, Request, Response, PROTOCOL_VERSION};
use pixelforge_queue::config::QueueConfig;

fn params(steps: u32) -> GenerateParams {
    GenerateParams {
        prompt: "16-bit knight sprite".into(),
        model: "sdxl-base".into(),
        lora: None,
        size: (512, 512),
        steps,
        cfg_scale: 7.0,
    }
}

fn fast_queue() -> QueueConfig {
    QueueConfig {
        max_pending_jobs: 8,
        max_retained_jobs: 64,
        generation_timeout: Duration::from_secs(30),
        event_capacity: 256,
    }
}

#[tokio::test]
async fn ping_answers_pong() {
    let server = start_server(fast_queue(), Duration::from_millis(1)).await;
    let mut frames = connect_frames(&server.request_addr).await;
    assert_eq!(roundtrip(&mut frames, &Request::Ping).await, Response::Pong);
}

#[tokio::test]
async fn corrupted_frame_gets_protocol_error_and_service_continues() {
    let server = start_server(fast_queue(), Duration::from_millis(1)).await;
    let mut frames = connect_frames(&server.request_addr).await;

    // Not MessagePack at all.
    frames
        .send(Bytes::from_static(b"\xc1garbage"))
        .await
        .unwrap();
    let frame = tokio::time::timeout(Duration::from_secs(5), frames.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    let response = decode_response(&frame).unwrap();
    assert_matches!(
        response,
        Response::ProtocolError {
            code: ErrorCode::InvalidRequest,
            ..
        }
    );

    // The same connection still serves well-formed requests.
    assert_eq!(roundtrip(&mut frames, &Request::Ping).await, Response::Pong);
}

#[tokio::test]
async fn capacity_two_rejects_the_third_generate() {
    let queue = QueueConfig {
        max_pending_jobs: 2,
        ..fast_queue()
    };
    // Slow enough that nothing finishes during the test.
    let server = start_server(queue, Duration::from_millis(200)).await;
    let mut frames = connect_frames(&server.request_addr).await;

    assert_matches!(
        roundtrip(&mut frames, &Request::Generate { params: params(50) }).await,
        Response::Accepted { job_id: 1, .. }
    );
    assert_matches!(
        roundtrip(&mut frames, &Request::Generate { params: params(50) }).await,
        Response::Accepted { job_id: 2, .. }
    );
    assert_matches!(
        roundtrip(&mut frames, &Request::Generate { params: params(50) }).await,
        Response::Rejected {
            code: ErrorCode::QueueFull,
            ..
        }
    );
}

#[tokio::test]
async fn invalid_params_are_rejected_at_the_boundary() {
    let server = start_server(fast_queue(), Duration::from_millis(1)).await;
    let mut frames = connect_frames(&server.request_addr).await;

    let response = roundtrip(&mut frames, &Request::Generate { params: params(0) }).await;
    assert_matches!(
        response,
        Response::Rejected {
            code: ErrorCode::InvalidParams,
            ..
        }
    );

    // Nothing was queued.
    let stats = roundtrip(&mut frames, &Request::Stats).await;
    assert_matches!(
        stats,
        Response::Stats {
            queued: 0,
            running: 0,
            ..
        }
    );
}

#[tokio::test]
async fn completed_job_emits_exactly_one_terminal_event() {
    let server = start_server(fast_queue(), Duration::from_millis(2)).await;
    let mut sub = connect_frames(&server.subscribe_addr).await;
    // Let the server register the subscriber before work starts.
    tokio::time::sleep(Duration::from_millis(100)).await;

    let mut req = connect_frames(&server.request_addr).await;
    let Response::Accepted { job_id, .. } =
        roundtrip(&mut req, &Request::Generate { params: params(3) }).await
    else {
        panic!("generate not accepted");
    };

    let mut last_sequence = 0;
    let mut terminal = None;
    while terminal.is_none() {
        let event = recv_event(&mut sub, Duration::from_secs(5))
            .await
            .expect("event stream dried up before terminal event");
        assert_eq!(event.job_id, job_id);
        assert!(
            event.sequence > last_sequence,
            "sequence regressed: {} after {last_sequence}",
            event.sequence
        );
        last_sequence = event.sequence;
        if event.status.is_terminal() {
            terminal = Some(event.status);
        }
    }
    assert_matches!(terminal, Some(JobStatus::Complete { .. }));

    // Nothing follows the terminal event.
    assert!(recv_event(&mut sub, Duration::from_millis(300)).await.is_none());

    // Resync path agrees.
    let status = roundtrip(&mut req, &Request::Status { job_id }).await;
    assert_matches!(status, Response::Complete { .. });
}

#[tokio::test]
async fn cancelling_a_running_job_never_yields_an_artifact() {
    let server = start_server(fast_queue(), Duration::from_millis(50)).await;
    let mut sub = connect_frames(&server.subscribe_addr).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    let mut req = connect_frames(&server.request_addr).await;
    let Response::Accepted { job_id, .. } =
        roundtrip(&mut req, &Request::Generate { params: params(50) }).await
    else {
        panic!("generate not accepted");
    };

    // Wait until it is actually running.
    loop {
        let event = recv_event(&mut sub, Duration::from_secs(5)).await.unwrap();
        if matches!(event.status, JobStatus::Running { .. }) {
            break;
        }
    }

    assert_eq!(
        roundtrip(&mut req, &Request::Cancel { job_id }).await,
        Response::Cancelled { job_id }
    );

    // The terminal event is Cancelled, and no Complete ever shows up.
    let mut saw_cancelled = false;
    while let Some(event) = recv_event(&mut sub, Duration::from_millis(500)).await {
        assert!(
            !matches!(event.status, JobStatus::Complete { .. }),
            "cancelled job surfaced an artifact"
        );
        if event.status == JobStatus::Cancelled {
            saw_cancelled = true;
        }
    }
    assert!(saw_cancelled);

    let status = roundtrip(&mut req, &Request::Status { job_id }).await;
    assert_eq!(
        status,
        Response::Status {
            job_id,
            status: Some(JobStatus::Cancelled),
        }
    );
}

#[tokio::test]
async fn unknown_job_status_is_none() {
    let server = start_server(fast_queue(), Duration::from_millis(1)).await;
    let mut frames = connect_frames(&server.request_addr).await;

    let response = roundtrip(&mut frames, &Request::Status { job_id: 999 }).await;
    assert_eq!(
        response,
        Response::Status {
            job_id: 999,
            status: None,
        }
    );
}

#[tokio::test]
async fn stats_report_the_protocol_version() {
    let server = start_server(fast_queue(), Duration::from_millis(1)).await;
    let mut frames = connect_frames(&server.request_addr).await;

    let response = roundtrip(&mut frames, &Request::Stats).await;
    assert_matches!(
        response,
        Response::Stats { version, .. } if version == PROTOCOL_VERSION
    );
}

#[tokio::test]
async fn model_catalog_is_empty_without_model_directories() {
    let server = start_server(fast_queue(), Duration::from_millis(1)).await;
    let mut frames = connect_frames(&server.request_addr).await;

    let response = roundtrip(&mut frames, &Request::ListModels).await;
    assert_eq!(response, Response::ModelList { models: Vec::new() });
}
