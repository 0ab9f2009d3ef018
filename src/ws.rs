//! Client-side WebSocket transport.
//!
//! Wraps `tokio-tungstenite` so the session only sees typed frames and a
//! split writer/reader pair it can drive from one `tokio::select!` loop.
//! Handshake rejections keep their HTTP status so callers can tell a bad
//! credential (401) from a network failure.

use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use tokio_tungstenite::tungstenite;

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Received WebSocket message.
#[derive(Debug, PartialEq, Eq)]
pub enum WsMessage {
    /// UTF-8 text frame.
    Text(String),
    /// Binary frame.
    Binary(Vec<u8>),
    /// Ping frame with payload.
    Ping(Vec<u8>),
    /// Pong frame.
    Pong,
    /// Close frame with status code and reason.
    Close {
        /// WebSocket close code (1005 when the peer sent none).
        code: u16,
        /// Human-readable close reason.
        reason: String,
    },
}

/// Why a connection attempt failed.
#[derive(Debug)]
pub enum ConnectError {
    /// The server answered the upgrade request with a non-101 status.
    Rejected {
        /// HTTP status of the rejection.
        status: u16,
    },
    /// URL, header, DNS, TCP or TLS failure.
    Failed(String),
}

impl ConnectError {
    /// Whether the server refused the presented credential.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Rejected { status: 401 | 403 })
    }
}

impl std::fmt::Display for ConnectError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Rejected { status } => write!(f, "handshake rejected with HTTP {status}"),
            Self::Failed(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for ConnectError {}

/// Write half of a WebSocket connection.
#[derive(Debug)]
pub struct WsWriter {
    sink: futures_util::stream::SplitSink<WsStream, tungstenite::Message>,
}

impl WsWriter {
    /// Serialize `frame` as JSON and send it as a text frame.
    pub async fn send_json<T: Serialize>(&mut self, frame: &T) -> anyhow::Result<()> {
        let text = serde_json::to_string(frame)?;
        self.sink
            .send(tungstenite::Message::Text(text))
            .await
            .map_err(|e| anyhow::anyhow!("WebSocket send failed: {e}"))
    }

    /// Answer a ping.
    pub async fn send_pong(&mut self, data: Vec<u8>) -> anyhow::Result<()> {
        self.sink
            .send(tungstenite::Message::Pong(data))
            .await
            .map_err(|e| anyhow::anyhow!("WebSocket pong failed: {e}"))
    }

    /// Send a normal close frame and flush the sink.
    pub async fn close(&mut self) -> anyhow::Result<()> {
        self.sink
            .send(tungstenite::Message::Close(None))
            .await
            .map_err(|e| anyhow::anyhow!("WebSocket close frame failed: {e}"))?;
        self.sink
            .close()
            .await
            .map_err(|e| anyhow::anyhow!("WebSocket close failed: {e}"))
    }
}

/// Read half of a WebSocket connection.
#[derive(Debug)]
pub struct WsReader {
    stream: futures_util::stream::SplitStream<WsStream>,
}

impl WsReader {
    /// Receive the next message, returning `None` when the stream ends.
    pub async fn recv(&mut self) -> Option<anyhow::Result<WsMessage>> {
        loop {
            let msg = match self.stream.next().await? {
                Ok(msg) => msg,
                Err(e) => return Some(Err(anyhow::anyhow!("WebSocket read error: {e}"))),
            };
            let mapped = match msg {
                tungstenite::Message::Text(text) => WsMessage::Text(text),
                tungstenite::Message::Binary(data) => WsMessage::Binary(data),
                tungstenite::Message::Ping(data) => WsMessage::Ping(data),
                tungstenite::Message::Pong(_) => WsMessage::Pong,
                tungstenite::Message::Close(frame) => {
                    let (code, reason) = frame
                        .map(|cf| (cf.code.into(), cf.reason.to_string()))
                        .unwrap_or((1005, String::new()));
                    WsMessage::Close { code, reason }
                }
                tungstenite::Message::Frame(_) => continue,
            };
            return Some(Ok(mapped));
        }
    }
}

/// Connect to `url`, presenting `bearer` as an `Authorization` header.
pub async fn connect(url: &str, bearer: &str) -> Result<(WsWriter, WsReader), ConnectError> {
    use tungstenite::client::IntoClientRequest;

    let mut request = url
        .into_client_request()
        .map_err(|e| ConnectError::Failed(format!("invalid WebSocket URL {url}: {e}")))?;
    let auth = tungstenite::http::HeaderValue::from_str(&format!("Bearer {bearer}"))
        .map_err(|e| ConnectError::Failed(format!("invalid bearer token: {e}")))?;
    request.headers_mut().insert("Authorization", auth);

    let (ws_stream, _response) = match tokio_tungstenite::connect_async(request).await {
        Ok(pair) => pair,
        Err(tungstenite::Error::Http(response)) => {
            return Err(ConnectError::Rejected {
                status: response.status().as_u16(),
            })
        }
        Err(e) => return Err(ConnectError::Failed(format!("WebSocket connect failed: {e}"))),
    };

    let (sink, stream) = ws_stream.split();
    Ok((WsWriter { sink }, WsReader { stream }))
}

/// Convert an HTTP(S) URL to WS(S) scheme.
///
/// Passes `ws://` and `wss://` through unchanged.
#[must_use]
pub fn http_to_ws_scheme(url: &str) -> String {
    if let Some(rest) = url.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = url.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        url.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_to_ws_scheme() {
        assert_eq!(http_to_ws_scheme("https://example.com"), "wss://example.com");
        assert_eq!(http_to_ws_scheme("http://localhost:3000/realtime"), "ws://localhost:3000/realtime");
        assert_eq!(http_to_ws_scheme("wss://example.com/realtime"), "wss://example.com/realtime");
        assert_eq!(http_to_ws_scheme("ws://localhost:3000"), "ws://localhost:3000");
    }

    #[test]
    fn test_unauthorized_classification() {
        assert!(ConnectError::Rejected { status: 401 }.is_unauthorized());
        assert!(ConnectError::Rejected { status: 403 }.is_unauthorized());
        assert!(!ConnectError::Rejected { status: 502 }.is_unauthorized());
        assert!(!ConnectError::Failed("boom".into()).is_unauthorized());
    }

    #[tokio::test]
    async fn test_connect_invalid_url_returns_error() {
        let result = connect("not-a-url", "token").await;
        assert!(matches!(result, Err(ConnectError::Failed(_))));
    }

    #[tokio::test]
    async fn test_connect_unreachable_host_returns_error() {
        let result = connect("ws://127.0.0.1:1/realtime", "token").await;
        assert!(matches!(result, Err(ConnectError::Failed(_))));
    }
}
