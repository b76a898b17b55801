use std::env;

use termdeck_pty::default_shell;

const DEFAULT_LISTEN: &str = "127.0.0.1:9190";
const DEFAULT_MAX_CONNECTIONS: usize = 32;
const DEFAULT_MAX_SESSIONS: usize = 16;
const DEFAULT_QUEUE_CAPACITY: usize = 128;

/// Daemon configuration, read once at startup.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Listen address; non-loopback requires `allow_remote`.
    pub listen: String,
    pub allow_remote: bool,
    /// Shell executable spawned for every new session.
    pub shell: String,
    /// Concurrent WebSocket connections accepted before returning 503.
    pub max_connections: usize,
    /// Sessions per connection.
    pub max_sessions: usize,
    /// Outbound event queue depth per connection; full queues apply
    /// back-pressure to the PTY readers.
    pub queue_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

impl ServerConfig {
    pub fn from_env() -> Self {
        Self {
            listen: env::var("TERMDECK_LISTEN")
                .ok()
                .and_then(non_empty)
                .unwrap_or_else(|| DEFAULT_LISTEN.to_string()),
            allow_remote: env::var("TERMDECK_ALLOW_REMOTE")
                .ok()
                .and_then(|v| parse_bool(&v))
                .unwrap_or(false),
            shell: default_shell(),
            max_connections: env::var("TERMDECK_MAX_CONNECTIONS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_MAX_CONNECTIONS),
            max_sessions: env::var("TERMDECK_MAX_SESSIONS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_MAX_SESSIONS),
            queue_capacity: env::var("TERMDECK_WS_QUEUE")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|v| *v > 0)
                .unwrap_or(DEFAULT_QUEUE_CAPACITY),
        }
    }

    pub fn with_listen(mut self, listen: impl Into<String>) -> Self {
        self.listen = listen.into();
        self
    }

    pub fn with_allow_remote(mut self, allow: bool) -> Self {
        self.allow_remote = allow;
        self
    }

    pub fn with_shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = shell.into();
        self
    }

    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    pub fn with_max_sessions(mut self, max: usize) -> Self {
        self.max_sessions = max;
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn non_empty(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_pattern() {
        let config = ServerConfig::from_env()
            .with_listen("127.0.0.1:0")
            .with_allow_remote(true)
            .with_shell("/bin/cat")
            .with_max_connections(4)
            .with_max_sessions(2)
            .with_queue_capacity(8);

        assert_eq!(config.listen, "127.0.0.1:0");
        assert!(config.allow_remote);
        assert_eq!(config.shell, "/bin/cat");
        assert_eq!(config.max_connections, 4);
        assert_eq!(config.max_sessions, 2);
        assert_eq!(config.queue_capacity, 8);
    }

    #[test]
    fn test_parse_bool() {
        assert_eq!(parse_bool("1"), Some(true));
        assert_eq!(parse_bool("TRUE"), Some(true));
        assert_eq!(parse_bool("off"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }
}
