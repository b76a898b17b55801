use thiserror::Error;

use termdeck_proto::ProtoError;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("invalid websocket url: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error(transparent)]
    Proto(#[from] ProtoError),
    /// The connection ended before the operation completed.
    #[error("connection closed")]
    ConnectionClosed,
}
