//! Wire protocol between the client adapter and the generation worker.
//!
//! Messages are MessagePack maps with a `type` discriminator and a
//! top-level protocol `version`, carried in length-prefixed frames over
//! two channels: a synchronous request/response channel and a
//! fire-and-forget progress broadcast channel.

pub mod codec;
pub mod messages;
