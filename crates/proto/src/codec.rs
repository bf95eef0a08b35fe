//! MessagePack envelope encoding, decoding, and transport framing.
//!
//! Every frame is one MessagePack map with a top-level `version` string
//! and a `type` discriminator. Decoding is total: any undecodable input
//! becomes a [`ProtocolError`] value, never a panic, so a corrupted
//! frame can be answered on the wire and the connection kept alive.
//!
//! Decode runs in two steps: a cheap probe reads only `type` and
//! `version` to classify the frame, then the full payload is decoded.
//! The split is what lets malformed-envelope, unknown-type, and
//! bad-payload failures map onto distinct error codes.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LengthDelimitedCodec};

use crate::messages::{
    ErrorCode, ProgressEvent, Request, Response, EVENT_KIND, PROTOCOL_VERSION,
};

/// Upper bound on a single frame unless configured otherwise.
pub const DEFAULT_MAX_FRAME_BYTES: usize = 1024 * 1024;

/// A length-prefixed message stream over TCP (4-byte big-endian prefix).
pub type MessageFrames = Framed<TcpStream, LengthDelimitedCodec>;

/// Wrap a TCP stream in the length-delimited frame codec.
pub fn frame_stream(stream: TcpStream, max_frame_bytes: usize) -> MessageFrames {
    let codec = LengthDelimitedCodec::builder()
        .max_frame_length(max_frame_bytes)
        .new_codec();
    Framed::new(stream, codec)
}

/// A frame that could not be decoded. Carries the closed-enum code the
/// peer reports plus a human-readable message.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{code}: {message}")]
pub struct ProtocolError {
    pub code: ErrorCode,
    pub message: String,
}

impl ProtocolError {
    fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Envelope adding the protocol version around a tagged message.
#[derive(Serialize, Deserialize)]
struct Frame<T> {
    version: String,
    #[serde(flatten)]
    body: T,
}

/// Envelope for [`ProgressEvent`] frames, which carry their `type`
/// explicitly because the event is a plain struct.
#[derive(Serialize, Deserialize)]
struct EventFrame {
    version: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(flatten)]
    event: ProgressEvent,
}

/// Minimal view used to classify a frame before the full decode.
#[derive(Deserialize)]
struct Probe {
    version: String,
    #[serde(rename = "type")]
    kind: String,
}

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

/// Encode a request with the protocol envelope.
pub fn encode_request(request: &Request) -> Result<Vec<u8>, rmp_serde::encode::Error> {
    encode_frame(request)
}

/// Encode a response with the protocol envelope.
pub fn encode_response(response: &Response) -> Result<Vec<u8>, rmp_serde::encode::Error> {
    encode_frame(response)
}

/// Encode a progress event with the protocol envelope.
pub fn encode_event(event: &ProgressEvent) -> Result<Vec<u8>, rmp_serde::encode::Error> {
    rmp_serde::to_vec_named(&EventFrame {
        version: PROTOCOL_VERSION.to_string(),
        kind: EVENT_KIND.to_string(),
        event: event.clone(),
    })
}

fn encode_frame<T: Serialize>(body: &T) -> Result<Vec<u8>, rmp_serde::encode::Error> {
    rmp_serde::to_vec_named(&Frame {
        version: PROTOCOL_VERSION.to_string(),
        body,
    })
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

/// Decode a request frame.
///
/// Failure classes:
/// - malformed MessagePack or missing envelope fields -> `InvalidRequest`
/// - incompatible protocol version -> `InvalidRequest`
/// - unrecognized `type` -> `MethodNotFound`
/// - recognized `type` with a bad payload -> `InvalidParams`
pub fn decode_request(bytes: &[u8]) -> Result<Request, ProtocolError> {
    let probe = probe(bytes)?;
    if !Request::KINDS.contains(&probe.kind.as_str()) {
        return Err(ProtocolError::new(
            ErrorCode::MethodNotFound,
            format!("unknown request type \"{}\"", probe.kind),
        ));
    }
    decode_body(bytes)
}

/// Decode a response frame. Unknown response types report
/// `InvalidRequest` (there is no method to look up on the client side).
pub fn decode_response(bytes: &[u8]) -> Result<Response, ProtocolError> {
    let probe = probe(bytes)?;
    if !Response::KINDS.contains(&probe.kind.as_str()) {
        return Err(ProtocolError::new(
            ErrorCode::InvalidRequest,
            format!("unknown response type \"{}\"", probe.kind),
        ));
    }
    decode_body(bytes)
}

/// Decode a progress-event frame.
pub fn decode_event(bytes: &[u8]) -> Result<ProgressEvent, ProtocolError> {
    let probe = probe(bytes)?;
    if probe.kind != EVENT_KIND {
        return Err(ProtocolError::new(
            ErrorCode::InvalidRequest,
            format!("unknown event type \"{}\"", probe.kind),
        ));
    }
    let frame: EventFrame = rmp_serde::from_slice(bytes).map_err(|e| {
        ProtocolError::new(ErrorCode::InvalidParams, format!("bad event payload: {e}"))
    })?;
    Ok(frame.event)
}

fn probe(bytes: &[u8]) -> Result<Probe, ProtocolError> {
    let probe: Probe = rmp_serde::from_slice(bytes).map_err(|e| {
        ProtocolError::new(ErrorCode::InvalidRequest, format!("malformed message: {e}"))
    })?;
    if !version_compatible(&probe.version) {
        return Err(ProtocolError::new(
            ErrorCode::InvalidRequest,
            format!(
                "unsupported protocol version \"{}\" (speaking {PROTOCOL_VERSION})",
                probe.version
            ),
        ));
    }
    Ok(probe)
}

fn decode_body<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, ProtocolError> {
    let frame: Frame<T> = rmp_serde::from_slice(bytes).map_err(|e| {
        ProtocolError::new(ErrorCode::InvalidParams, format!("bad payload: {e}"))
    })?;
    Ok(frame.body)
}

/// Versions are compatible when their major components match.
fn version_compatible(version: &str) -> bool {
    let major = |v: &str| v.split('.').next().map(str::to_owned);
    major(version) == major(PROTOCOL_VERSION)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
