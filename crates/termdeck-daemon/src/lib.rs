//! The termdeck terminal bridge daemon.
//!
//! One WebSocket connection per browser window, one [`SessionRegistry`] per
//! connection, one PTY-backed shell per session. Inbound events are handled
//! in arrival order on the connection's own task; each session's output is
//! pumped concurrently through a bounded channel, so a slow client only
//! stalls its own sessions.

mod bridge;
mod config;
mod error;
mod registry;
mod server;
mod session;
mod workdir;

pub use config::ServerConfig;
pub use error::{ServerError, SessionError};
pub use registry::SessionRegistry;
pub use server::{start, ServerHandle};
pub use session::{Session, SessionState};
pub use workdir::Workdir;
