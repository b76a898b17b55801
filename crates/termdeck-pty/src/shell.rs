//! Shell selection policy.
//!
//! An explicit `TERMDECK_SHELL` wins; otherwise fall back to the user's
//! login shell on Unix (`$SHELL`, then `/bin/sh`) or the native shell on
//! Windows. Selection happens once per spawn, so changing the environment
//! affects future tabs only.

use std::env;

/// Environment variable overriding the spawned shell.
pub const SHELL_OVERRIDE_VAR: &str = "TERMDECK_SHELL";

/// Resolve the shell executable to spawn for a new session.
pub fn default_shell() -> String {
    if let Some(shell) = non_empty_var(SHELL_OVERRIDE_VAR) {
        return shell;
    }

    #[cfg(unix)]
    {
        non_empty_var("SHELL").unwrap_or_else(|| "/bin/sh".to_string())
    }

    #[cfg(windows)]
    {
        non_empty_var("COMSPEC").unwrap_or_else(|| "cmd.exe".to_string())
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    let value = env::var(key).ok()?;
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
