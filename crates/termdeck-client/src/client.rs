use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;

use futures_util::stream::SplitSink;
use futures_util::SinkExt;
use futures_util::StreamExt;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::MaybeTlsStream;
use tokio_tungstenite::WebSocketStream;
use tracing::debug;
use tracing::warn;
use url::Url;

use termdeck_proto::decode_bytes;
use termdeck_proto::encode_bytes;
use termdeck_proto::ClientEvent;
use termdeck_proto::ServerEvent;
use termdeck_proto::SessionId;

use crate::error::ClientError;

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type SharedSink = Arc<tokio::sync::Mutex<WsSink>>;

/// Something the server said about one session.
#[derive(Debug)]
pub enum TabEvent {
    /// Raw terminal output, already base64-decoded.
    Output(Vec<u8>),
    /// The session's process exited. The tab stays addressable on the
    /// server until closed.
    Exit(Option<u32>),
    /// A session-scoped error reported by the server.
    Error { code: i32, message: String },
}

struct Opened {
    session_id: SessionId,
    cols: u16,
    rows: u16,
    pid: Option<u32>,
    events: mpsc::UnboundedReceiver<TabEvent>,
}

/// Routes the single server event stream to the right consumer.
///
/// `session-opened` acks arrive in the order the opens were sent, so a
/// FIFO of pending opens is enough to pair them up. Errors that carry a
/// known session id go to that tab; everything else goes to the
/// connection-level error stream.
struct Router {
    pending_opens: VecDeque<oneshot::Sender<Opened>>,
    tabs: HashMap<SessionId, mpsc::UnboundedSender<TabEvent>>,
    errors: mpsc::UnboundedSender<ServerEvent>,
}

impl Router {
    fn new(errors: mpsc::UnboundedSender<ServerEvent>) -> Self {
        Self {
            pending_opens: VecDeque::new(),
            tabs: HashMap::new(),
            errors,
        }
    }

    fn route(&mut self, event: ServerEvent) {
        match event {
            ServerEvent::SessionOpened {
                session_id,
                cols,
                rows,
                pid,
            } => {
                let Some(waiter) = self.pending_opens.pop_front() else {
                    warn!(session_id = %session_id, "unsolicited session-opened ack");
                    return;
                };
                let (tx, rx) = mpsc::unbounded_channel();
                self.tabs.insert(session_id.clone(), tx);
                let _ = waiter.send(Opened {
                    session_id,
                    cols,
                    rows,
                    pid,
                    events: rx,
                });
            }
            ServerEvent::Output { session_id, data } => {
                let Ok(bytes) = decode_bytes(&data) else {
                    warn!(session_id = %session_id, "undecodable output payload");
                    return;
                };
                if let Some(tab) = self.tabs.get(&session_id) {
                    let _ = tab.send(TabEvent::Output(bytes));
                }
            }
            ServerEvent::SessionExit {
                session_id,
                exit_code,
            } => {
                // Exit is the last event for a session; drop the sender so
                // the tab's stream ends after it.
                if let Some(tab) = self.tabs.remove(&session_id) {
                    let _ = tab.send(TabEvent::Exit(exit_code));
                }
            }
            ServerEvent::Error {
                code,
                message,
                session_id,
            } => {
                if let Some(tab) = session_id.as_ref().and_then(|id| self.tabs.get(id)) {
                    let _ = tab.send(TabEvent::Error { code, message });
                } else {
                    let _ = self.errors.send(ServerEvent::Error {
                        code,
                        message,
                        session_id,
                    });
                }
            }
        }
    }
}

/// One connection to the daemon, multiplexing any number of tabs.
pub struct WorkbenchClient {
    sink: SharedSink,
    router: Arc<Mutex<Router>>,
    errors: mpsc::UnboundedReceiver<ServerEvent>,
}

impl WorkbenchClient {
    /// Connect to the daemon's `/ws` endpoint.
    pub async fn connect(url: &str) -> Result<Self, ClientError> {
        let url = Url::parse(url)?;
        let (socket, _) = tokio_tungstenite::connect_async(url.as_str()).await?;
        debug!("connected to terminal bridge");

        let (sink, mut stream) = socket.split();
        let (errors_tx, errors_rx) = mpsc::unbounded_channel();
        let router = Arc::new(Mutex::new(Router::new(errors_tx)));

        let router_for_reader = Arc::clone(&router);
        tokio::spawn(async move {
            while let Some(msg) = stream.next().await {
                let msg = match msg {
                    Ok(msg) => msg,
                    Err(_) => break,
                };
                match msg {
                    Message::Text(text) => match ServerEvent::from_json(&text) {
                        Ok(event) => lock_router(&router_for_reader).route(event),
                        Err(err) => warn!(error = %err, "unparseable server event"),
                    },
                    Message::Close(_) => break,
                    _ => {}
                }
            }
            // Dropping every tab sender and pending ack ends their
            // streams, which is how consumers observe the disconnect.
            let mut router = lock_router(&router_for_reader);
            router.tabs.clear();
            router.pending_opens.clear();
        });

        Ok(Self {
            sink: Arc::new(tokio::sync::Mutex::new(sink)),
            router,
            errors: errors_rx,
        })
    }

    /// Open a session and wait for the server's ack.
    pub async fn open_session(&self, cols: u16, rows: u16) -> Result<Tab, ClientError> {
        let (tx, rx) = oneshot::channel();
        {
            // The waiter must be enqueued and the frame sent as one unit;
            // holding the sink lock across both keeps the FIFO of pending
            // opens in the same order as the frames on the wire.
            let mut sink = self.sink.lock().await;
            lock_router(&self.router).pending_opens.push_back(tx);
            let payload = ClientEvent::OpenSession { cols, rows }.to_json()?;
            if let Err(err) = sink.send(Message::Text(payload)).await {
                lock_router(&self.router).pending_opens.pop_back();
                return Err(err.into());
            }
        }

        let opened = rx.await.map_err(|_| ClientError::ConnectionClosed)?;
        Ok(Tab {
            id: opened.session_id,
            cols: opened.cols,
            rows: opened.rows,
            pid: opened.pid,
            sink: Arc::clone(&self.sink),
            router: Arc::clone(&self.router),
            events: opened.events,
        })
    }

    /// Send a raw client event, bypassing tab bookkeeping. Lets a caller
    /// address ids the server never issued.
    pub async fn send(&self, event: &ClientEvent) -> Result<(), ClientError> {
        send_event(&self.sink, event).await
    }

    /// Send a frame that is not a well-formed event. Lets tests exercise
    /// the server's parse-error handling.
    pub async fn send_raw(&self, text: &str) -> Result<(), ClientError> {
        let mut sink = self.sink.lock().await;
        sink.send(Message::Text(text.to_string())).await?;
        Ok(())
    }

    /// Next connection-level error (one that no open tab claimed).
    pub async fn next_error(&mut self) -> Option<ServerEvent> {
        self.errors.recv().await
    }

    /// Close the connection. The server tears down every session opened
    /// on it.
    pub async fn close(self) -> Result<(), ClientError> {
        let mut sink = self.sink.lock().await;
        sink.send(Message::Close(None)).await?;
        Ok(())
    }
}

/// One session as seen from the client side.
pub struct Tab {
    id: SessionId,
    cols: u16,
    rows: u16,
    pid: Option<u32>,
    sink: SharedSink,
    router: Arc<Mutex<Router>>,
    events: mpsc::UnboundedReceiver<TabEvent>,
}

impl Tab {
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn geometry(&self) -> (u16, u16) {
        (self.cols, self.rows)
    }

    /// Send raw bytes as terminal input.
    pub async fn input(&self, bytes: &[u8]) -> Result<(), ClientError> {
        send_event(
            &self.sink,
            &ClientEvent::Input {
                session_id: self.id.clone(),
                data: encode_bytes(bytes),
            },
        )
        .await
    }

    pub async fn resize(&self, cols: u16, rows: u16) -> Result<(), ClientError> {
        send_event(
            &self.sink,
            &ClientEvent::Resize {
                session_id: self.id.clone(),
                cols,
                rows,
            },
        )
        .await
    }

    /// Close the session on the server and stop routing its events.
    pub async fn close(mut self) -> Result<(), ClientError> {
        lock_router(&self.router).tabs.remove(&self.id);
        self.events.close();
        send_event(
            &self.sink,
            &ClientEvent::CloseSession {
                session_id: self.id.clone(),
            },
        )
        .await
    }

    /// Next event for this tab; `None` once the session is over and the
    /// stream has drained.
    pub async fn next_event(&mut self) -> Option<TabEvent> {
        self.events.recv().await
    }
}

async fn send_event(sink: &SharedSink, event: &ClientEvent) -> Result<(), ClientError> {
    let payload = event.to_json()?;
    let mut sink = sink.lock().await;
    sink.send(Message::Text(payload)).await?;
    Ok(())
}

fn lock_router(router: &Arc<Mutex<Router>>) -> MutexGuard<'_, Router> {
    router.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
