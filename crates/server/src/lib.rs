//! Worker-side server: the two IPC listeners plus startup wiring.
//!
//! The request listener speaks the synchronous request/response channel
//! and dispatches into the queue manager; the broadcast listener fans
//! progress events out to every connected subscriber, fire-and-forget.

pub mod broadcast;
pub mod config;
pub mod models;
pub mod request;
