//! Task owning the request/response connection.
//!
//! Callers enqueue a request plus a oneshot reply slot; the task sends
//! one frame, awaits one frame, and answers. This serializes the
//! channel to one outstanding request at a time. A timed-out or broken
//! round trip tears the socket down for a clean reconnect: a late
//! reply on a reused socket could otherwise answer the wrong request.
//! While disconnected, queued callers are answered immediately with
//! `BackendUnavailable` instead of blocking behind the reconnect loop.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;

use pixelforge_proto::codec::{decode_response, encode_request, frame_stream, MessageFrames};
use pixelforge_proto::messages::{ErrorCode, Request, Response};

use crate::adapter::Availability;
use crate::config::ClientConfig;
use crate::error::AdapterError;
use crate::reconnect::connect_with_backoff;

/// One queued request awaiting its response.
pub(crate) struct PendingRequest {
    pub request: Request,
    pub reply: oneshot::Sender<Result<Response, AdapterError>>,
}

pub(crate) async fn run_requester(
    initial: TcpStream,
    config: ClientConfig,
    mut rx: mpsc::Receiver<PendingRequest>,
    availability: Arc<watch::Sender<Availability>>,
    cancel: CancellationToken,
) {
    let mut stream = Some(initial);

    loop {
        let tcp = match stream.take() {
            Some(tcp) => tcp,
            None => {
                let _ = availability.send(Availability::Unavailable);
                match reconnect_phase(&config, &mut rx, &cancel).await {
                    Some(tcp) => tcp,
                    None => return,
                }
            }
        };

        let _ = availability.send(Availability::Available);
        let mut frames = frame_stream(tcp, config.max_frame_bytes);

        'connected: loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                pending = rx.recv() => {
                    let Some(PendingRequest { request, reply }) = pending else {
                        return;
                    };
                    match round_trip(&mut frames, &request, config.request_timeout).await {
                        Ok(response) => {
                            let _ = reply.send(Ok(response));
                        }
                        Err(error) => {
                            // A decoded-but-bogus response leaves the
                            // socket synchronized; anything else does not.
                            let keep_socket = matches!(error, AdapterError::Protocol { .. });
                            let _ = reply.send(Err(error));
                            if !keep_socket {
                                tracing::warn!("Request channel desynchronized, reconnecting");
                                break 'connected;
                            }
                        }
                    }
                }
            }
        }
    }
}

/// Send one request and await exactly one response frame.
async fn round_trip(
    frames: &mut MessageFrames,
    request: &Request,
    timeout: Duration,
) -> Result<Response, AdapterError> {
    let bytes = encode_request(request).map_err(|e| AdapterError::Protocol {
        code: ErrorCode::InternalError,
        message: format!("encode failed: {e}"),
    })?;

    frames
        .send(Bytes::from(bytes))
        .await
        .map_err(|e| AdapterError::BackendUnavailable(format!("send failed: {e}")))?;

    match tokio::time::timeout(timeout, frames.next()).await {
        Err(_) => Err(AdapterError::Timeout(timeout)),
        Ok(None) => Err(AdapterError::BackendUnavailable(
            "connection closed by backend".into(),
        )),
        Ok(Some(Err(e))) => Err(AdapterError::BackendUnavailable(format!(
            "receive failed: {e}"
        ))),
        Ok(Some(Ok(frame))) => decode_response(&frame).map_err(|e| AdapterError::Protocol {
            code: e.code,
            message: e.message,
        }),
    }
}

/// Reconnect while failing queued requests fast.
async fn reconnect_phase(
    config: &ClientConfig,
    rx: &mut mpsc::Receiver<PendingRequest>,
    cancel: &CancellationToken,
) -> Option<TcpStream> {
    let connect = connect_with_backoff(&config.request_addr, &config.backoff, None, cancel);
    tokio::pin!(connect);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return None,
            stream = &mut connect => return stream,
            pending = rx.recv() => match pending {
                Some(PendingRequest { reply, .. }) => {
                    let _ = reply.send(Err(AdapterError::BackendUnavailable(
                        "backend unreachable, reconnecting".into(),
                    )));
                }
                None => return None,
            }
        }
    }
}
