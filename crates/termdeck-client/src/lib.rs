//! Client for the termdeck terminal bridge.
//!
//! Connects over WebSocket, opens sessions, and demultiplexes the server's
//! event stream into one [`Tab`] per session. Used by integration tests
//! and by anything that wants to drive the daemon from Rust instead of a
//! browser.

mod client;
mod error;

pub use client::{Tab, TabEvent, WorkbenchClient};
pub use error::ClientError;
