use thiserror::Error;

/// PTY operation errors.
#[derive(Error, Debug)]
pub enum PtyError {
    #[error("failed to open PTY: {0}")]
    Open(String),
    #[error("failed to spawn process: {0}")]
    Spawn(String),
    #[error("failed to write to PTY: {0}")]
    Write(String),
    #[error("failed to resize PTY: {0}")]
    Resize(String),
    #[error("failed to kill process: {0}")]
    Kill(String),
    #[error("invalid PTY geometry {cols}x{rows}")]
    Geometry { cols: u16, rows: u16 },
}

impl PtyError {
    /// The failed operation, for structured log fields.
    pub fn operation(&self) -> &'static str {
        match self {
            PtyError::Open(_) => "open",
            PtyError::Spawn(_) => "spawn",
            PtyError::Write(_) => "write",
            PtyError::Resize(_) => "resize",
            PtyError::Kill(_) => "kill",
            PtyError::Geometry { .. } => "spawn",
        }
    }

    /// True for errors raised before a child process existed, i.e. the
    /// session never reached a usable state.
    pub fn is_spawn_failure(&self) -> bool {
        matches!(
            self,
            PtyError::Open(_) | PtyError::Spawn(_) | PtyError::Geometry { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_names() {
        assert_eq!(PtyError::Open("x".into()).operation(), "open");
        assert_eq!(PtyError::Spawn("x".into()).operation(), "spawn");
        assert_eq!(PtyError::Write("x".into()).operation(), "write");
        assert_eq!(PtyError::Resize("x".into()).operation(), "resize");
        assert_eq!(PtyError::Kill("x".into()).operation(), "kill");
    }

    #[test]
    fn test_spawn_failure_classification() {
        assert!(PtyError::Spawn("not found".into()).is_spawn_failure());
        assert!(PtyError::Geometry { cols: 0, rows: 24 }.is_spawn_failure());
        assert!(!PtyError::Write("broken pipe".into()).is_spawn_failure());
        assert!(!PtyError::Kill("no permission".into()).is_spawn_failure());
    }
}
