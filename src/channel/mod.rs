//! Realtime channel modules.
//!
//! - `client`: configuration, lifecycle types, and the websocket worker.
//! - `stomp`: STOMP frame codec and heart-beat negotiation.
//! - `session`: stateful channel handle and its event sequence.

/// Channel configuration, events, and the connection worker.
pub mod client;
/// Stateful channel handle exposing connect, disconnect, and send.
pub mod session;
/// STOMP frame codec.
pub mod stomp;

pub use client::{
    ChannelConfig, ChannelDefaults, ChannelError, ChannelEvent, ChannelFailure, ChannelState,
    InboundMessage, WireProtocol,
};
pub use session::{ChannelEvents, RealtimeChannel};
