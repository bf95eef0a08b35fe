//! Request/response listener.
//!
//! One task per connection: read a frame, decode, dispatch into the
//! queue manager, write exactly one response. An undecodable frame is
//! answered with a `protocol_error` response and the connection keeps
//! serving; corrupted input never takes the worker down.

use std::path::Path;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

use pixelforge_core::job::JobStatus;
use pixelforge_core::params::validate_params;
use pixelforge_proto::codec::{decode_request, encode_response, frame_stream};
use pixelforge_proto::messages::{ErrorCode, Request, Response, PROTOCOL_VERSION};
use pixelforge_queue::manager::{QueueError, QueueHandle};

use crate::config::ServerConfig;
use crate::models::scan_models;

/// Accept connections until cancelled.
pub async fn run_request_listener(
    listener: TcpListener,
    queue: QueueHandle,
    config: ServerConfig,
    cancel: CancellationToken,
) {
    tracing::info!(bind = %config.request_bind, "Request listener started");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Request listener shutting down");
                return;
            }
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        tracing::debug!(%peer, "Request connection accepted");
                        let queue = queue.clone();
                        let config = config.clone();
                        let cancel = cancel.child_token();
                        tokio::spawn(async move {
                            handle_connection(stream, queue, config, cancel).await;
                        });
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Accept failed on request listener");
                    }
                }
            }
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    queue: QueueHandle,
    config: ServerConfig,
    cancel: CancellationToken,
) {
    let mut frames = frame_stream(stream, config.max_frame_bytes);

    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => return,
            frame = frames.next() => frame,
        };

        let response = match frame {
            None => return,
            Some(Err(e)) => {
                tracing::warn!(error = %e, "Request receive error, closing connection");
                return;
            }
            Some(Ok(bytes)) => match decode_request(&bytes) {
                Ok(request) => dispatch(request, &queue, &config).await,
                Err(e) => {
                    tracing::warn!(code = %e.code, error = %e.message, "Undecodable request");
                    Response::ProtocolError {
                        code: e.code,
                        message: e.message,
                    }
                }
            },
        };

        let encoded = match encode_response(&response) {
            Ok(encoded) => encoded,
            Err(e) => {
                tracing::error!(error = %e, "Response encode failed");
                return;
            }
        };
        if let Err(e) = frames.send(Bytes::from(encoded)).await {
            tracing::debug!(error = %e, "Response send failed, closing connection");
            return;
        }
    }
}

/// Map one request onto the queue manager (or the model catalog) and
/// build its response.
async fn dispatch(request: Request, queue: &QueueHandle, config: &ServerConfig) -> Response {
    match request {
        Request::Generate { params } => {
            // Semantic validation happens here, at the boundary; the
            // queue only ever sees parameters that passed it.
            if let Err(e) = validate_params(&params) {
                return Response::Rejected {
                    code: ErrorCode::InvalidParams,
                    reason: e.to_string(),
                };
            }
            match queue.submit(params).await {
                Ok(submitted) => Response::Accepted {
                    job_id: submitted.job_id,
                    estimated_seconds: submitted.estimated_seconds,
                },
                Err(e @ QueueError::QueueFull { .. }) => Response::Rejected {
                    code: ErrorCode::QueueFull,
                    reason: e.to_string(),
                },
                Err(e) => internal_error(e),
            }
        }

        Request::Cancel { job_id } => match queue.cancel(job_id).await {
            Ok(()) => Response::Cancelled { job_id },
            Err(e @ QueueError::NotFound(_)) => Response::Rejected {
                code: ErrorCode::InvalidParams,
                reason: e.to_string(),
            },
            Err(e) => internal_error(e),
        },

        Request::Status { job_id } => match queue.status(job_id).await {
            Ok(Some(JobStatus::Complete {
                artifact_path,
                duration_seconds,
            })) => Response::Complete {
                job_id,
                artifact_path,
                duration_seconds,
            },
            Ok(Some(JobStatus::Failed { error })) => Response::Failed { job_id, error },
            Ok(status) => Response::Status { job_id, status },
            Err(e) => internal_error(e),
        },

        Request::ListModels => Response::ModelList {
            models: scan_models(Path::new(&config.model_dir)),
        },

        Request::Stats => match queue.stats().await {
            Ok(stats) => Response::Stats {
                version: PROTOCOL_VERSION.into(),
                queued: stats.queued,
                running: stats.running,
                uptime_seconds: stats.uptime_seconds,
            },
            Err(e) => internal_error(e),
        },

        Request::Ping => Response::Pong,
    }
}

fn internal_error(error: QueueError) -> Response {
    tracing::error!(error = %error, "Queue operation failed");
    Response::ProtocolError {
        code: ErrorCode::InternalError,
        message: error.to_string(),
    }
}
