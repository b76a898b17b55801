//! PTY process hosting for termdeck.
//!
//! This crate owns the OS-facing half of a terminal session: allocating a
//! pseudo-terminal, spawning a shell attached to it, and exposing byte-level
//! write, resize, and kill operations plus a blocking reader for the output
//! pump. Everything above it (session state, routing, transport) lives in
//! `termdeck-daemon`.

mod error;
mod pty;
mod shell;

pub use error::PtyError;
pub use pty::PtyProcess;
pub use shell::{default_shell, SHELL_OVERRIDE_VAR};
