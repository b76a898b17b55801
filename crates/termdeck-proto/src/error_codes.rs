//! Protocol error codes carried by `error` events.
//!
//! Codes live in the 47xx range so they cannot collide with WebSocket close
//! codes or HTTP status codes a client may also be handling.

/// A frame could not be parsed as a known event.
pub const PARSE_ERROR: i32 = 4700;

/// The event referenced a session id this connection does not own
/// (stale client state, or the session was already closed).
pub const UNKNOWN_SESSION: i32 = 4704;

/// The per-connection session cap was reached.
pub const SESSION_LIMIT: i32 = 4709;

/// The daemon-wide connection cap was reached; sent as an HTTP 503 body
/// before the upgrade, never over an established socket.
pub const CONNECTION_LIMIT: i32 = 4710;

/// The shell process could not be started.
pub const SPAWN_FAILED: i32 = 4750;

/// An I/O operation against a live session failed.
pub const SESSION_IO: i32 = 4751;
