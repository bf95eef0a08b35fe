//! Progress broadcast listener.
//!
//! Every subscriber connection gets its own receiver on the queue's
//! broadcast channel and a task forwarding events onto the socket.
//! Fire-and-forget: a subscriber that lags past the channel buffer
//! skips the dropped events (logged, never re-ordered), a subscriber
//! whose socket fails is dropped, and late joiners receive no history.

use bytes::Bytes;
use futures::SinkExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;

use pixelforge_proto::codec::{encode_event, frame_stream};
use pixelforge_queue::manager::QueueHandle;

use crate::config::ServerConfig;

/// Accept subscriber connections until cancelled.
pub async fn run_broadcast_listener(
    listener: TcpListener,
    queue: QueueHandle,
    config: ServerConfig,
    cancel: CancellationToken,
) {
    tracing::info!(bind = %config.subscribe_bind, "Broadcast listener started");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Broadcast listener shutting down");
                return;
            }
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        let subscriber_id = uuid::Uuid::new_v4();
                        tracing::debug!(%peer, %subscriber_id, "Subscriber connected");
                        let queue = queue.clone();
                        let config = config.clone();
                        let cancel = cancel.child_token();
                        tokio::spawn(async move {
                            forward_events(stream, queue, config, cancel).await;
                            tracing::debug!(%subscriber_id, "Subscriber disconnected");
                        });
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Accept failed on broadcast listener");
                    }
                }
            }
        }
    }
}

async fn forward_events(
    stream: TcpStream,
    queue: QueueHandle,
    config: ServerConfig,
    cancel: CancellationToken,
) {
    let mut events = queue.subscribe_progress();
    let mut frames = frame_stream(stream, config.max_frame_bytes);

    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => return,
            event = events.recv() => event,
        };

        match event {
            Ok(event) => {
                let encoded = match encode_event(&event) {
                    Ok(encoded) => encoded,
                    Err(e) => {
                        tracing::error!(error = %e, "Event encode failed");
                        continue;
                    }
                };
                if frames.send(Bytes::from(encoded)).await.is_err() {
                    return;
                }
            }
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Subscriber lagged, events dropped");
            }
            Err(RecvError::Closed) => return,
        }
    }
}
