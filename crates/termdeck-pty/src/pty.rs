use std::io;
use std::io::Read;
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;
use std::thread;
use std::time::Duration;
use std::time::Instant;

use portable_pty::Child;
use portable_pty::CommandBuilder;
use portable_pty::MasterPty;
use portable_pty::PtySize;
use portable_pty::native_pty_system;

use crate::error::PtyError;

const REAP_POLL_INTERVAL: Duration = Duration::from_millis(10);
// After SIGKILL the child is reapable within milliseconds; the bound only
// caps how long a caller on the connection path can be stalled.
const REAP_TIMEOUT: Duration = Duration::from_millis(500);

/// One shell process attached to a freshly allocated pseudo-terminal.
///
/// The process is owned exclusively: dropping the handle kills a still
/// running child. Output is consumed through the reader obtained from
/// [`PtyProcess::take_reader`]; the reader reaching end-of-stream is the
/// canonical "process is gone" signal, which is why [`PtyProcess::write`]
/// degrades to a no-op once the child has exited instead of erroring.
pub struct PtyProcess {
    // MasterPty is Send but not Sync; the mutex makes the handle shareable
    // across the pump thread and the connection task.
    master: Mutex<Box<dyn MasterPty + Send>>,
    child: Mutex<Box<dyn Child + Send + Sync>>,
    writer: Mutex<Box<dyn Write + Send>>,
    reader: Mutex<Option<Box<dyn Read + Send>>>,
    size: Mutex<PtySize>,
    pid: Option<u32>,
}

impl PtyProcess {
    /// Spawn `shell` on a new PTY with the given geometry.
    ///
    /// The child inherits the daemon's environment wholesale (plus a
    /// sensible `TERM`) and starts in `cwd` when one is given.
    pub fn spawn(
        shell: &str,
        cols: u16,
        rows: u16,
        cwd: Option<&Path>,
    ) -> Result<Self, PtyError> {
        if cols < 1 || rows < 1 {
            return Err(PtyError::Geometry { cols, rows });
        }

        let size = PtySize {
            rows,
            cols,
            pixel_width: 0,
            pixel_height: 0,
        };

        let pty_system = native_pty_system();
        let pair = pty_system
            .openpty(size)
            .map_err(|e| PtyError::Open(e.to_string()))?;

        let mut cmd = CommandBuilder::new(shell);
        cmd.env("TERM", "xterm-256color");
        if let Some(dir) = cwd {
            cmd.cwd(dir);
        }

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| PtyError::Spawn(e.to_string()))?;
        let pid = child.process_id();

        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| PtyError::Open(e.to_string()))?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|e| PtyError::Open(e.to_string()))?;

        // pair.slave drops here; the child holds the only remaining slave
        // fd, so the reader sees end-of-stream when the child exits.
        Ok(Self {
            master: Mutex::new(pair.master),
            child: Mutex::new(child),
            writer: Mutex::new(writer),
            reader: Mutex::new(Some(reader)),
            size: Mutex::new(size),
            pid,
        })
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn is_running(&self) -> bool {
        let mut child = lock_or_recover(&self.child);
        child.try_wait().map(|status| status.is_none()).unwrap_or(false)
    }

    /// Forward raw bytes to the process's input stream. No newline or
    /// encoding transform is applied. Writing to a dead process is a no-op:
    /// the exit is observed through the output stream closing.
    pub fn write(&self, data: &[u8]) -> Result<(), PtyError> {
        if data.is_empty() {
            return Ok(());
        }

        let mut writer = lock_or_recover(&self.writer);
        let mut offset = 0;
        while offset < data.len() {
            match writer.write(&data[offset..]) {
                Ok(0) => {
                    // PTY closed underneath us; treat like a dead process.
                    return Ok(());
                }
                Ok(n) => offset += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    drop(writer);
                    if !self.is_running() {
                        return Ok(());
                    }
                    return Err(PtyError::Write(e.to_string()));
                }
            }
        }
        Ok(())
    }

    /// Update the PTY's reported dimensions; the child observes this as a
    /// window-change signal. Values below 1 are rejected by the caller
    /// (`Session::resize`), not here.
    pub fn resize(&self, cols: u16, rows: u16) -> Result<(), PtyError> {
        let new_size = PtySize {
            rows,
            cols,
            pixel_width: 0,
            pixel_height: 0,
        };
        lock_or_recover(&self.master)
            .resize(new_size)
            .map_err(|e| PtyError::Resize(e.to_string()))?;
        *lock_or_recover(&self.size) = new_size;
        Ok(())
    }

    /// Current geometry as `(cols, rows)`.
    pub fn size(&self) -> (u16, u16) {
        let size = lock_or_recover(&self.size);
        (size.cols, size.rows)
    }

    /// Take the blocking output reader. Yields `Some` exactly once; the
    /// output pump owns it for the life of the session.
    pub fn take_reader(&self) -> Option<Box<dyn Read + Send>> {
        lock_or_recover(&self.reader).take()
    }

    /// Request termination and reap the child. Idempotent: killing an
    /// already-dead process is a no-op.
    pub fn kill(&self) -> Result<(), PtyError> {
        {
            let mut child = lock_or_recover(&self.child);
            match child.try_wait() {
                Ok(Some(_)) => return Ok(()),
                Ok(None) => {
                    child
                        .kill()
                        .map_err(|e| PtyError::Kill(e.to_string()))?;
                }
                Err(e) => return Err(PtyError::Kill(e.to_string())),
            }
        }
        self.reap();
        Ok(())
    }

    /// Wait (bounded) for the child to be reaped and return its exit code.
    /// Returns `None` while the child is still running at the deadline.
    pub fn reap(&self) -> Option<u32> {
        let deadline = Instant::now() + REAP_TIMEOUT;
        loop {
            {
                let mut child = lock_or_recover(&self.child);
                if let Ok(Some(status)) = child.try_wait() {
                    return Some(status.exit_code());
                }
            }
            if Instant::now() >= deadline {
                return None;
            }
            thread::sleep(REAP_POLL_INTERVAL);
        }
    }
}

impl Drop for PtyProcess {
    fn drop(&mut self) {
        if self.is_running() {
            let _ = self.kill();
        }
    }
}

fn lock_or_recover<T>(lock: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
