use std::sync::Arc;

use termdeck_proto::SessionId;

use termdeck_pty::PtyError;
use termdeck_pty::PtyProcess;

/// `Starting → Running → Terminated`, never backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Spawn requested but not confirmed.
    Starting,
    Running,
    /// Terminal state: entered via explicit close, process exit, or
    /// connection teardown. Input and resize become no-ops.
    Terminated,
}

/// One addressable terminal tab, owning exactly one shell process.
///
/// A session with no process is either `Starting` or `Terminated`, never
/// silently orphaned. Destroying the session always terminates the
/// process, never the reverse order.
pub struct Session {
    id: SessionId,
    state: SessionState,
    pty: Option<Arc<PtyProcess>>,
}

impl Session {
    pub(crate) fn starting(id: SessionId) -> Self {
        Self {
            id,
            state: SessionState::Starting,
            pty: None,
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn pid(&self) -> Option<u32> {
        self.pty.as_ref().and_then(|pty| pty.pid())
    }

    /// Current geometry, while a process is attached.
    pub fn geometry(&self) -> Option<(u16, u16)> {
        self.pty.as_ref().map(|pty| pty.size())
    }

    pub(crate) fn mark_running(&mut self, pty: Arc<PtyProcess>) {
        self.state = SessionState::Running;
        self.pty = Some(pty);
    }

    pub(crate) fn mark_terminated(&mut self) {
        self.state = SessionState::Terminated;
    }

    /// Forward raw bytes to the shell. Valid only while `Running`;
    /// otherwise a quiet no-op, the client will observe the exit through
    /// the output stream ending.
    pub fn forward_input(&self, bytes: &[u8]) -> Result<(), PtyError> {
        match (&self.state, &self.pty) {
            (SessionState::Running, Some(pty)) => pty.write(bytes),
            _ => Ok(()),
        }
    }

    /// Resize the terminal. Dimensions below 1 are ignored without error:
    /// a transient 0-sized layout during UI reflow is expected and must
    /// not kill the session.
    pub fn resize(&self, cols: u16, rows: u16) -> Result<(), PtyError> {
        if cols < 1 || rows < 1 {
            return Ok(());
        }
        match (&self.state, &self.pty) {
            (SessionState::Running, Some(pty)) => pty.resize(cols, rows),
            _ => Ok(()),
        }
    }

    /// Terminate the session and its process. Safe to call from both the
    /// "client requested closure" and "process exited naturally" paths:
    /// a second close is a no-op, and killing an already-dead process
    /// does not error.
    pub fn close(&mut self) -> Result<(), PtyError> {
        if self.state == SessionState::Terminated {
            return Ok(());
        }
        self.state = SessionState::Terminated;
        match &self.pty {
            Some(pty) => pty.kill(),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
#[cfg(unix)]
mod tests {
    use super::*;

    fn running_session() -> Session {
        let pty = PtyProcess::spawn("/bin/cat", 80, 24, None).expect("spawn cat");
        let mut session = Session::starting(SessionId::new("ab12cd34"));
        session.mark_running(Arc::new(pty));
        session
    }

    #[test]
    fn test_resize_updates_geometry() {
        let session = running_session();
        session.resize(100, 40).expect("resize");
        assert_eq!(session.geometry(), Some((100, 40)));
    }

    #[test]
    fn test_out_of_range_resize_is_ignored() {
        let session = running_session();
        session.resize(0, 40).expect("zero cols must be a no-op");
        session.resize(100, 0).expect("zero rows must be a no-op");
        assert_eq!(session.geometry(), Some((80, 24)));
        assert_eq!(session.state(), SessionState::Running);
    }

    #[test]
    fn test_close_is_idempotent() {
        let mut session = running_session();
        session.close().expect("first close");
        session.close().expect("second close is a no-op");
        assert_eq!(session.state(), SessionState::Terminated);
    }

    #[test]
    fn test_input_after_close_is_noop() {
        let mut session = running_session();
        session.close().expect("close");
        session.forward_input(b"ignored").expect("input after close");
        session.resize(120, 50).expect("resize after close");
        assert_eq!(session.geometry(), Some((80, 24)));
    }

    #[test]
    fn test_starting_session_has_no_process() {
        let session = Session::starting(SessionId::new("ab12cd34"));
        assert_eq!(session.state(), SessionState::Starting);
        assert!(session.pid().is_none());
        assert!(session.geometry().is_none());
        session.forward_input(b"too early").expect("input while starting");
    }
}
