//! Shared harness: an in-process worker on ephemeral ports plus a raw
//! frame-level client.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

use pixelforge_proto::codec::{
    decode_event, decode_response, encode_request, frame_stream, MessageFrames,
    DEFAULT_MAX_FRAME_BYTES,
};
use pixelforge_proto::messages::{ProgressEvent, Request, Response};
use pixelforge_queue::config::QueueConfig;
use pixelforge_queue::engine::SimulatedEngine;
use pixelforge_server::broadcast::run_broadcast_listener;
use pixelforge_server::config::ServerConfig;
use pixelforge_server::request::run_request_listener;

pub struct TestServer {
    pub request_addr: String,
    pub subscribe_addr: String,
    pub cancel: CancellationToken,
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Start a worker with a simulated engine on ephemeral ports.
pub async fn start_server(queue_config: QueueConfig, step_delay: Duration) -> TestServer {
    let cancel = CancellationToken::new();
    let model_dir = std::env::temp_dir().join(format!("pixelforge-test-{}", uuid::Uuid::new_v4()));

    let engine = Arc::new(SimulatedEngine::new(step_delay, "/tmp/pixelforge-outputs"));
    let queue = pixelforge_queue::manager::spawn(queue_config, engine, cancel.child_token());

    let request_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let subscribe_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let request_addr = request_listener.local_addr().unwrap().to_string();
    let subscribe_addr = subscribe_listener.local_addr().unwrap().to_string();

    let config = ServerConfig {
        request_bind: request_addr.clone(),
        subscribe_bind: subscribe_addr.clone(),
        model_dir: model_dir.display().to_string(),
        max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
    };

    tokio::spawn(run_request_listener(
        request_listener,
        queue.clone(),
        config.clone(),
        cancel.child_token(),
    ));
    tokio::spawn(run_broadcast_listener(
        subscribe_listener,
        queue,
        config,
        cancel.child_token(),
    ));

    TestServer {
        request_addr,
        subscribe_addr,
        cancel,
    }
}

/// Open a raw framed connection to an endpoint.
pub async fn connect_frames(addr: &str) -> MessageFrames {
    let stream = TcpStream::connect(addr).await.unwrap();
    frame_stream(stream, DEFAULT_MAX_FRAME_BYTES)
}

/// Send one request and await its response.
pub async fn roundtrip(frames: &mut MessageFrames, request: &Request) -> Response {
    let bytes = encode_request(request).unwrap();
    frames.send(Bytes::from(bytes)).await.unwrap();
    let frame = tokio::time::timeout(Duration::from_secs(5), frames.next())
        .await
        .expect("timed out waiting for response")
        .expect("connection closed")
        .expect("receive error");
    decode_response(&frame).unwrap()
}

/// Read the next progress event, or `None` if nothing arrives in time.
pub async fn recv_event(frames: &mut MessageFrames, timeout: Duration) -> Option<ProgressEvent> {
    match tokio::time::timeout(timeout, frames.next()).await {
        Ok(Some(Ok(frame))) => Some(decode_event(&frame).unwrap()),
        _ => None,
    }
}
