//! Wire protocol spoken between the workbench client and the termdeck
//! terminal bridge.
//!
//! Every frame is a JSON text message with a `type` tag. Raw terminal bytes
//! (including the shell's own ANSI control sequences) travel base64-encoded
//! in the `data` field and are passed through unmodified end to end.

pub mod error_codes;
mod events;

pub use events::{
    decode_bytes, encode_bytes, ClientEvent, ProtoError, ServerEvent, SessionId, DEFAULT_COLS,
    DEFAULT_ROWS,
};
