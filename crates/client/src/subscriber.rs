//! Task owning the progress subscription connection.
//!
//! Reads event frames, filters duplicates and out-of-order deliveries
//! per job via the event sequence number, and pushes the survivors into
//! the bounded buffer drained by `poll_progress`. A full buffer drops
//! the newest event; delivery on this channel is at-most-once by
//! contract, and a client that missed events resynchronizes with a
//! `Status` request.

use std::collections::HashMap;

use futures::StreamExt;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;

use pixelforge_core::types::JobId;
use pixelforge_proto::codec::{decode_event, frame_stream};
use pixelforge_proto::messages::ProgressEvent;

use crate::config::ClientConfig;
use crate::reconnect::connect_with_backoff;

pub(crate) async fn run_subscriber(
    initial: TcpStream,
    config: ClientConfig,
    buffer_tx: mpsc::Sender<ProgressEvent>,
    cancel: CancellationToken,
) {
    let mut stream = Some(initial);
    let mut last_seen: HashMap<JobId, u64> = HashMap::new();

    loop {
        let tcp = match stream.take() {
            Some(tcp) => tcp,
            None => {
                match connect_with_backoff(&config.subscribe_addr, &config.backoff, None, &cancel)
                    .await
                {
                    Some(tcp) => {
                        // Sequences restart from the server's state, and
                        // anything missed while away is gone anyway.
                        last_seen.clear();
                        tcp
                    }
                    None => return,
                }
            }
        };

        let mut frames = frame_stream(tcp, config.max_frame_bytes);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                frame = frames.next() => match frame {
                    None => {
                        tracing::warn!("Subscription closed, reconnecting");
                        break;
                    }
                    Some(Err(e)) => {
                        tracing::warn!(error = %e, "Subscription receive error, reconnecting");
                        break;
                    }
                    Some(Ok(bytes)) => match decode_event(&bytes) {
                        Ok(event) => {
                            if is_stale(&mut last_seen, &event) {
                                tracing::debug!(
                                    job_id = event.job_id,
                                    sequence = event.sequence,
                                    "Dropping stale progress event",
                                );
                                continue;
                            }
                            match buffer_tx.try_send(event) {
                                Ok(()) => {}
                                Err(TrySendError::Full(event)) => {
                                    tracing::debug!(
                                        job_id = event.job_id,
                                        "Progress buffer full, dropping event",
                                    );
                                }
                                Err(TrySendError::Closed(_)) => return,
                            }
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "Undecodable progress event");
                        }
                    }
                }
            }
        }
    }
}

/// Duplicate/out-of-order filter. Terminal events release the per-job
/// entry; the server guarantees nothing follows them.
fn is_stale(last_seen: &mut HashMap<JobId, u64>, event: &ProgressEvent) -> bool {
    match last_seen.get(&event.job_id) {
        Some(&last) if event.sequence <= last => true,
        _ => {
            if event.status.is_terminal() {
                last_seen.remove(&event.job_id);
            } else {
                last_seen.insert(event.job_id, event.sequence);
            }
            false
        }
    }
}
