use std::collections::HashMap;
use std::io::Read;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;

use tokio::sync::mpsc;
use tracing::debug;
use tracing::warn;
use uuid::Uuid;

use termdeck_proto::encode_bytes;
use termdeck_proto::ServerEvent;
use termdeck_proto::SessionId;
use termdeck_proto::DEFAULT_COLS;
use termdeck_proto::DEFAULT_ROWS;

use termdeck_pty::PtyProcess;

use crate::error::SessionError;
use crate::session::Session;
use crate::session::SessionState;
use crate::workdir::Workdir;

const READ_BUFFER_SIZE: usize = 8192;

/// Per-connection session table. Owns every session opened over one
/// WebSocket connection and nothing else; two browser windows never see
/// each other's sessions.
///
/// Registration is synchronous with id issuance: by the time
/// [`SessionRegistry::open_session`] returns the `session-opened` ack, the
/// id already routes. Methods that mutate the table return the events to
/// write to the socket (or a [`SessionError`] for the bridge to report);
/// only asynchronous output and exit notifications travel through the
/// bounded event channel.
#[derive(Clone)]
pub struct SessionRegistry {
    sessions: Arc<Mutex<HashMap<SessionId, Session>>>,
    events: mpsc::Sender<ServerEvent>,
    shell: String,
    workdir: Workdir,
    max_sessions: usize,
}

impl SessionRegistry {
    pub fn new(
        shell: impl Into<String>,
        workdir: Workdir,
        max_sessions: usize,
        events: mpsc::Sender<ServerEvent>,
    ) -> Self {
        Self {
            sessions: Arc::new(Mutex::new(HashMap::new())),
            events,
            shell: shell.into(),
            workdir,
            max_sessions,
        }
    }

    /// Open a new session: allocate an id, register it, spawn the shell,
    /// and start its output pump.
    ///
    /// Always acknowledges with `session-opened` first. A failed spawn is
    /// not a protocol error: the ack (without `pid`) is followed by the
    /// failure as readable terminal output and a `session-exit`, so the
    /// client renders it inside the tab like any other process death.
    pub fn open_session(&self, cols: u16, rows: u16) -> Vec<ServerEvent> {
        let cols = if cols < 1 { DEFAULT_COLS } else { cols };
        let rows = if rows < 1 { DEFAULT_ROWS } else { rows };

        let id = {
            let mut sessions = self.lock_sessions();
            if sessions.len() >= self.max_sessions {
                let err = SessionError::LimitReached(self.max_sessions);
                return vec![ServerEvent::Error {
                    code: err.code(),
                    message: err.to_string(),
                    session_id: None,
                }];
            }
            let id = generate_session_id();
            sessions.insert(id.clone(), Session::starting(id.clone()));
            id
        };

        let cwd = self.workdir.get();
        match PtyProcess::spawn(&self.shell, cols, rows, Some(&cwd)) {
            Ok(pty) => {
                let pty = Arc::new(pty);
                let pid = pty.pid();
                {
                    let mut sessions = self.lock_sessions();
                    if let Some(session) = sessions.get_mut(&id) {
                        session.mark_running(Arc::clone(&pty));
                    }
                }
                debug!(session_id = %id, pid, cols, rows, "session opened");
                self.start_output_pump(id.clone(), Arc::clone(&pty));
                vec![ServerEvent::SessionOpened {
                    session_id: id,
                    cols,
                    rows,
                    pid,
                }]
            }
            Err(e) => {
                warn!(session_id = %id, shell = %self.shell, error = %e, "shell spawn failed");
                {
                    let mut sessions = self.lock_sessions();
                    if let Some(session) = sessions.get_mut(&id) {
                        session.mark_terminated();
                    }
                }
                let diagnostic =
                    format!("termdeck: failed to start shell {}: {e}\r\n", self.shell);
                vec![
                    ServerEvent::SessionOpened {
                        session_id: id.clone(),
                        cols,
                        rows,
                        pid: None,
                    },
                    ServerEvent::Output {
                        session_id: id.clone(),
                        data: encode_bytes(diagnostic.as_bytes()),
                    },
                    ServerEvent::SessionExit {
                        session_id: id,
                        exit_code: None,
                    },
                ]
            }
        }
    }

    /// Forward raw input bytes to the session's process.
    pub fn forward_input(&self, id: &SessionId, bytes: &[u8]) -> Result<(), SessionError> {
        let sessions = self.lock_sessions();
        let session = sessions
            .get(id)
            .ok_or_else(|| SessionError::UnknownSession(id.clone()))?;
        session.forward_input(bytes)?;
        Ok(())
    }

    /// Resize the session's terminal.
    pub fn resize(&self, id: &SessionId, cols: u16, rows: u16) -> Result<(), SessionError> {
        let sessions = self.lock_sessions();
        let session = sessions
            .get(id)
            .ok_or_else(|| SessionError::UnknownSession(id.clone()))?;
        session.resize(cols, rows)?;
        Ok(())
    }

    /// Close one session and remove it from the table. Closing a session
    /// whose process already exited succeeds; closing an id that was never
    /// issued (or already closed) is an unknown-session error.
    pub fn close_session(&self, id: &SessionId) -> Result<(), SessionError> {
        let mut session = {
            let mut sessions = self.lock_sessions();
            sessions
                .remove(id)
                .ok_or_else(|| SessionError::UnknownSession(id.clone()))?
        };
        session.close()?;
        debug!(session_id = %id, "session closed");
        Ok(())
    }

    /// Record a natural process exit observed by the output pump. Returns
    /// the `session-exit` event to emit, or `None` when the session was
    /// already closed by the client and the exit needs no announcement.
    fn mark_exited(&self, id: &SessionId, exit_code: Option<u32>) -> Option<ServerEvent> {
        let mut sessions = self.lock_sessions();
        let session = sessions.get_mut(id)?;
        if session.state() == SessionState::Terminated {
            return None;
        }
        session.mark_terminated();
        Some(ServerEvent::SessionExit {
            session_id: id.clone(),
            exit_code,
        })
    }

    /// Tear down every session: kill all processes and empty the table.
    /// Safe against sessions that already terminated on their own, and
    /// safe to call more than once (the second call finds nothing).
    pub fn teardown_all(&self) {
        let sessions = {
            let mut sessions = self.lock_sessions();
            sessions.drain().collect::<Vec<_>>()
        };
        if sessions.is_empty() {
            return;
        }
        debug!(count = sessions.len(), "tearing down sessions");
        for (id, mut session) in sessions {
            if let Err(e) = session.close() {
                warn!(session_id = %id, error = %e, "teardown close failed");
            }
        }
    }

    pub fn session_count(&self) -> usize {
        self.lock_sessions().len()
    }

    pub fn session_pid(&self, id: &SessionId) -> Option<u32> {
        self.lock_sessions().get(id).and_then(Session::pid)
    }

    pub fn session_state(&self, id: &SessionId) -> Option<SessionState> {
        self.lock_sessions().get(id).map(Session::state)
    }

    fn lock_sessions(&self) -> MutexGuard<'_, HashMap<SessionId, Session>> {
        self.sessions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Pump the PTY's blocking reader into the connection's event channel.
    ///
    /// Runs on the blocking pool for the life of the process. The bounded
    /// `blocking_send` is the back-pressure seam: when the client cannot
    /// keep up, this thread stalls and the kernel's PTY buffer throttles
    /// the shell, instead of the daemon buffering unbounded output.
    fn start_output_pump(&self, id: SessionId, pty: Arc<PtyProcess>) {
        let registry = self.clone();
        tokio::task::spawn_blocking(move || {
            let mut reader = match pty.take_reader() {
                Some(reader) => reader,
                None => return,
            };
            let mut buf = [0u8; READ_BUFFER_SIZE];
            loop {
                match reader.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        let event = ServerEvent::Output {
                            session_id: id.clone(),
                            data: encode_bytes(&buf[..n]),
                        };
                        if registry.events.blocking_send(event).is_err() {
                            // Connection gone; the bridge tears us down.
                            return;
                        }
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                    // On Linux the master read fails with EIO once the
                    // child exits; either way the stream is over.
                    Err(_) => break,
                }
            }
            let exit_code = pty.reap();
            debug!(session_id = %id, exit_code, "session process exited");
            if let Some(event) = registry.mark_exited(&id, exit_code) {
                let _ = registry.events.blocking_send(event);
            }
        });
    }
}

/// Short random id, unique enough for one connection's lifetime and easy
/// to eyeball in logs.
fn generate_session_id() -> SessionId {
    let uuid = Uuid::new_v4().simple().to_string();
    SessionId::new(&uuid[..8])
}
