//! One WebSocket connection, one session registry, one event loop.

use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::close_code;
use axum::extract::ws::CloseFrame;
use axum::extract::ws::Message;
use axum::extract::ws::WebSocket;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::State;
use axum::response::IntoResponse;
use axum::response::Response;
use tokio::sync::mpsc;
use tokio::sync::watch;
use tokio::sync::Semaphore;
use tracing::debug;
use tracing::warn;

use termdeck_proto::decode_bytes;
use termdeck_proto::error_codes;
use termdeck_proto::ClientEvent;
use termdeck_proto::ServerEvent;
use termdeck_proto::SessionId;

use crate::registry::SessionRegistry;
use crate::workdir::Workdir;

const WS_SEND_TIMEOUT: Duration = Duration::from_secs(15);
const WS_MAX_PARSE_ERRORS: u8 = 3;

static CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Shared state behind the `/ws` route.
#[derive(Clone)]
pub(crate) struct BridgeState {
    pub shell: String,
    pub workdir: Workdir,
    pub max_sessions: usize,
    pub queue_capacity: usize,
    pub limits: Arc<Semaphore>,
    pub shutdown_rx: watch::Receiver<bool>,
}

pub(crate) async fn ws_handler(
    State(state): State<Arc<BridgeState>>,
    ws: WebSocketUpgrade,
) -> Response {
    let permit = match state.limits.clone().try_acquire_owned() {
        Ok(permit) => permit,
        Err(_) => {
            let event = ServerEvent::Error {
                code: error_codes::CONNECTION_LIMIT,
                message: "too many websocket connections".to_string(),
                session_id: None,
            };
            return (
                axum::http::StatusCode::SERVICE_UNAVAILABLE,
                event
                    .to_json()
                    .unwrap_or_else(|_| "{\"type\":\"error\"}".to_string()),
            )
                .into_response();
        }
    };

    ws.on_upgrade(move |socket| async move {
        let _permit = permit;
        handle_ws(socket, state).await;
    })
    .into_response()
}

/// Tears the connection's sessions down when the connection future is
/// destroyed, whether the loop exited normally, panicked, or the task
/// was cancelled mid-await. A shell that outlives its socket is an
/// orphan, and its parked output pump would block runtime shutdown
/// until the process dies.
struct TeardownGuard {
    registry: SessionRegistry,
}

impl Drop for TeardownGuard {
    fn drop(&mut self) {
        self.registry.teardown_all();
    }
}

/// Drive one connection until it ends. Teardown is not a code path out
/// of the loop but a drop guard, so every way the connection can die
/// leaves zero orphaned shells.
async fn handle_ws(mut socket: WebSocket, state: Arc<BridgeState>) {
    let conn_id = CONNECTION_ID.fetch_add(1, Ordering::Relaxed);
    debug!(conn_id, "browser connected");

    let (events_tx, mut events_rx) = mpsc::channel::<ServerEvent>(state.queue_capacity);
    let registry = SessionRegistry::new(
        state.shell.clone(),
        state.workdir.clone(),
        state.max_sessions,
        events_tx,
    );
    let _teardown = TeardownGuard {
        registry: registry.clone(),
    };

    let mut shutdown_rx = state.shutdown_rx.clone();
    let mut parse_errors = 0u8;

    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() {
                    warn!("shutdown channel closed");
                }
                let _ = socket.send(Message::Close(None)).await;
                break;
            }
            event = events_rx.recv() => {
                // The registry holds the sender, so this stays open for
                // the life of the loop.
                let Some(event) = event else { break };
                if send_event(&mut socket, &event).await.is_err() {
                    break;
                }
            }
            msg = socket.recv() => {
                let Some(msg) = msg else { break };
                let msg = match msg {
                    Ok(msg) => msg,
                    Err(_) => break,
                };

                match msg {
                    Message::Text(text) => {
                        let event = match ClientEvent::from_json(&text) {
                            Ok(event) => event,
                            Err(err) => {
                                let report = ServerEvent::Error {
                                    code: error_codes::PARSE_ERROR,
                                    message: format!("parse error: {err}"),
                                    session_id: None,
                                };
                                if send_event(&mut socket, &report).await.is_err() {
                                    break;
                                }
                                parse_errors = parse_errors.saturating_add(1);
                                if parse_errors >= WS_MAX_PARSE_ERRORS {
                                    let _ = socket.send(Message::Close(Some(CloseFrame {
                                        code: close_code::POLICY,
                                        reason: "too many parse errors".into(),
                                    }))).await;
                                    break;
                                }
                                continue;
                            }
                        };
                        parse_errors = 0;

                        if handle_event(&registry, &mut socket, event).await.is_err() {
                            break;
                        }
                    }
                    Message::Binary(_) => {
                        let _ = socket.send(Message::Close(Some(CloseFrame {
                            code: close_code::PROTOCOL,
                            reason: "binary frames are not supported".into(),
                        }))).await;
                        break;
                    }
                    Message::Close(_) => break,
                    Message::Ping(payload) => {
                        if socket.send(Message::Pong(payload)).await.is_err() {
                            break;
                        }
                    }
                    Message::Pong(_) => {}
                }
            }
        }
    }

    debug!(conn_id, "browser disconnected");
}

/// Route one parsed event. Session-level failures are reported to the
/// client and keep the connection alive; only an unwritable socket ends
/// the loop.
async fn handle_event(
    registry: &SessionRegistry,
    socket: &mut WebSocket,
    event: ClientEvent,
) -> Result<(), ()> {
    match event {
        ClientEvent::OpenSession { cols, rows } => {
            for event in registry.open_session(cols, rows) {
                send_event(socket, &event).await?;
            }
            Ok(())
        }
        ClientEvent::Input { session_id, data } => {
            let bytes = match decode_bytes(&data) {
                Ok(bytes) => bytes,
                Err(err) => {
                    let report = ServerEvent::Error {
                        code: error_codes::PARSE_ERROR,
                        message: format!("invalid input payload: {err}"),
                        session_id: Some(session_id),
                    };
                    return send_event(socket, &report).await;
                }
            };
            match registry.forward_input(&session_id, &bytes) {
                Ok(()) => Ok(()),
                Err(err) => send_event(socket, &session_error(&session_id, &err)).await,
            }
        }
        ClientEvent::Resize {
            session_id,
            cols,
            rows,
        } => match registry.resize(&session_id, cols, rows) {
            Ok(()) => Ok(()),
            Err(err) => send_event(socket, &session_error(&session_id, &err)).await,
        },
        ClientEvent::CloseSession { session_id } => {
            match registry.close_session(&session_id) {
                Ok(()) => Ok(()),
                Err(err) => send_event(socket, &session_error(&session_id, &err)).await,
            }
        }
    }
}

fn session_error(id: &SessionId, err: &crate::error::SessionError) -> ServerEvent {
    ServerEvent::Error {
        code: err.code(),
        message: err.to_string(),
        session_id: Some(id.clone()),
    }
}

async fn send_event(socket: &mut WebSocket, event: &ServerEvent) -> Result<(), ()> {
    let payload = event.to_json().map_err(|_| ())?;
    let send = tokio::time::timeout(WS_SEND_TIMEOUT, socket.send(Message::Text(payload))).await;
    match send {
        Ok(result) => result.map_err(|_| ()),
        Err(_) => Err(()),
    }
}
