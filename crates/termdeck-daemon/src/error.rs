use termdeck_proto::error_codes;
use termdeck_proto::SessionId;
use thiserror::Error;

use termdeck_pty::PtyError;

/// Errors raised while routing events to sessions. Each is local to one
/// session and never cascades to siblings on the same connection.
#[derive(Error, Debug)]
pub enum SessionError {
    /// The event referenced a session this connection does not own,
    /// typically stale client state after a close. Reported, never
    /// silently dropped.
    #[error("unknown session: {0}")]
    UnknownSession(SessionId),
    #[error("session limit reached ({0} per connection)")]
    LimitReached(usize),
    #[error(transparent)]
    Pty(#[from] PtyError),
}

impl SessionError {
    /// Protocol error code carried by the `error` event for this failure.
    pub fn code(&self) -> i32 {
        match self {
            SessionError::UnknownSession(_) => error_codes::UNKNOWN_SESSION,
            SessionError::LimitReached(_) => error_codes::SESSION_LIMIT,
            SessionError::Pty(e) if e.is_spawn_failure() => error_codes::SPAWN_FAILED,
            SessionError::Pty(_) => error_codes::SESSION_IO,
        }
    }

    pub fn session_id(&self) -> Option<&SessionId> {
        match self {
            SessionError::UnknownSession(id) => Some(id),
            _ => None,
        }
    }
}

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("invalid listen address: {0}")]
    InvalidListen(String),
    #[error("terminal bridge I/O error ({operation}): {source}")]
    Io {
        operation: &'static str,
        #[source]
        source: std::io::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let err = SessionError::UnknownSession(SessionId::new("ab12cd34"));
        assert_eq!(err.code(), error_codes::UNKNOWN_SESSION);
        assert_eq!(err.session_id().map(SessionId::as_str), Some("ab12cd34"));

        assert_eq!(
            SessionError::LimitReached(16).code(),
            error_codes::SESSION_LIMIT
        );
        assert_eq!(
            SessionError::Pty(PtyError::Spawn("no such file".into())).code(),
            error_codes::SPAWN_FAILED
        );
        assert_eq!(
            SessionError::Pty(PtyError::Write("broken pipe".into())).code(),
            error_codes::SESSION_IO
        );
    }
}
