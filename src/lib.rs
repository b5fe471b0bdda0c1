//! Client SDK for a session-cookie chat backend.
//!
//! The crate is organized by transport surface:
//! - `session_api`: HTTP client for form login, logout, and classified errors.
//! - `channel`: realtime websocket channel, raw or STOMP framed.
//! - `retry`: shared retry, reconnect, and timeout utilities.

/// Realtime channel client, STOMP codec, and lifecycle events.
pub mod channel;
/// Retry and timeout helpers used across the SDK.
pub mod retry;
/// Session client and error classification.
pub mod session_api;
