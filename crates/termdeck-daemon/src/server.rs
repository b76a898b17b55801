//! Terminal bridge HTTP/WebSocket server.

use std::net::SocketAddr;
use std::net::ToSocketAddrs;
use std::sync::Arc;
use std::time::Duration;

use axum::routing::get;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tracing::error;
use tracing::info;
use tracing::warn;

use crate::bridge::ws_handler;
use crate::bridge::BridgeState;
use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::workdir::Workdir;

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

/// Running server. Dropping the handle leaves the server running;
/// call [`ServerHandle::shutdown`] to stop it.
pub struct ServerHandle {
    shutdown_tx: watch::Sender<bool>,
    local_addr: SocketAddr,
    join: Option<JoinHandle<()>>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn ws_url(&self) -> String {
        format_ws_url(&self.local_addr)
    }

    /// Signal shutdown and wait (bounded) for the server to drain. Live
    /// connections observe the signal, close their sockets, and tear
    /// down their sessions before the server task finishes.
    pub async fn shutdown(mut self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(mut join) = self.join.take() {
            match tokio::time::timeout(SHUTDOWN_TIMEOUT, &mut join).await {
                Ok(Err(err)) => error!(error = %err, "server task failed"),
                Ok(Ok(())) => {}
                Err(_) => {
                    warn!(
                        timeout_ms = SHUTDOWN_TIMEOUT.as_millis(),
                        "server shutdown timed out; aborting"
                    );
                    join.abort();
                }
            }
        }
    }
}

/// Bind the configured address and start serving. Returns once the
/// listener is live; the accept loop runs on a background task.
pub async fn start(config: ServerConfig, workdir: Workdir) -> Result<ServerHandle, ServerError> {
    let (listener, local_addr) = bind_listener(&config)?;
    let listener = TcpListener::from_std(listener).map_err(|e| ServerError::Io {
        operation: "create async listener",
        source: e,
    })?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let state = Arc::new(BridgeState {
        shell: config.shell.clone(),
        workdir,
        max_sessions: config.max_sessions,
        queue_capacity: config.queue_capacity,
        limits: Arc::new(Semaphore::new(config.max_connections)),
        shutdown_rx: shutdown_rx.clone(),
    });

    let app = build_router(state);
    info!(ws = %format_ws_url(&local_addr), shell = %config.shell, "terminal bridge listening");

    let mut shutdown_rx_server = shutdown_rx;
    let join = tokio::spawn(async move {
        let server = axum::serve(listener, app).with_graceful_shutdown(async move {
            let _ = shutdown_rx_server.changed().await;
        });
        if let Err(err) = server.await {
            error!(error = %err, "terminal bridge server failed");
        }
    });

    Ok(ServerHandle {
        shutdown_tx,
        local_addr,
        join: Some(join),
    })
}

fn build_router(state: Arc<BridgeState>) -> axum::Router {
    axum::Router::new()
        .route("/ws", get(ws_handler))
        .route("/healthz", get(healthz))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

fn bind_listener(config: &ServerConfig) -> Result<(std::net::TcpListener, SocketAddr), ServerError> {
    let mut addrs = config
        .listen
        .to_socket_addrs()
        .map_err(|e| ServerError::InvalidListen(e.to_string()))?;
    let addr = addrs
        .next()
        .ok_or_else(|| ServerError::InvalidListen("no resolved address".to_string()))?;

    if !config.allow_remote && !addr.ip().is_loopback() {
        return Err(ServerError::InvalidListen(
            "refusing to bind non-loopback address without TERMDECK_ALLOW_REMOTE=1".to_string(),
        ));
    }

    let listener = std::net::TcpListener::bind(addr).map_err(|e| ServerError::Io {
        operation: "bind",
        source: e,
    })?;
    listener
        .set_nonblocking(true)
        .map_err(|e| ServerError::Io {
            operation: "set non-blocking",
            source: e,
        })?;
    let local_addr = listener.local_addr().map_err(|e| ServerError::Io {
        operation: "read local address",
        source: e,
    })?;
    Ok((listener, local_addr))
}

fn format_ws_url(addr: &SocketAddr) -> String {
    let host = match addr.ip() {
        std::net::IpAddr::V4(ip) => ip.to_string(),
        std::net::IpAddr::V6(ip) => format!("[{ip}]"),
    };
    format!("ws://{}:{}/ws", host, addr.port())
}
