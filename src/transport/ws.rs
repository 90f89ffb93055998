//! Request/response over a WebSocket trading channel.
//!
//! Requests are framed as
//!
//! ```json
//! {"req_id": "17", "method": "order.place", "params": {...}, "auth": {...}}
//! ```
//!
//! and the reply carrying the same `req_id` completes the call. Other frames
//! (pushes, acks for earlier timed-out requests) are skipped. The socket is
//! opened lazily and discarded after any failure, so the next call reconnects.

use std::io;
use std::sync::atomic::{AtomicU64, Ordering};

use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::{self, Message as WsMessage};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use crate::error::{TransportError, TransportErrorKind};
use crate::transport::{Transport, TransportRequest, TransportResponse};

/// Production trading channel.
pub const DEFAULT_WS_URL: &str = "wss://ws-api.venue.example/ws/trade";

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Stream transport. One request is in flight per connection at a time.
pub struct WsTransport {
    url: String,
    connection: Mutex<Option<WsStream>>,
    next_req_id: AtomicU64,
}

impl WsTransport {
    /// A transport for the channel at `url`. Nothing connects until the first send.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            connection: Mutex::new(None),
            next_req_id: AtomicU64::new(1),
        }
    }

    /// The channel URL.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Whether a socket is currently open.
    pub async fn is_connected(&self) -> bool {
        self.connection.lock().await.is_some()
    }

    /// Close the socket, if open.
    pub async fn close(&self) {
        if let Some(mut stream) = self.connection.lock().await.take() {
            let _ = stream.close(None).await;
        }
    }

    fn frame(&self, req_id: u64, request: &TransportRequest) -> Result<String, TransportError> {
        let params = match request.body.as_deref() {
            Some(body) => serde_json::from_str::<Value>(body).map_err(|e| {
                TransportError::new(TransportErrorKind::Other, "request body is not JSON")
                    .with_source(e)
                    .unsent()
            })?,
            None => json!({}),
        };
        let mut frame = json!({
            "req_id": req_id.to_string(),
            "method": request.method(),
            "params": params,
        });
        if let Some(auth) = &request.auth {
            frame["auth"] = json!(auth);
        }
        Ok(frame.to_string())
    }
}

impl Default for WsTransport {
    fn default() -> Self {
        Self::new(DEFAULT_WS_URL)
    }
}

impl std::fmt::Debug for WsTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WsTransport").field("url", &self.url).finish()
    }
}

impl Transport for WsTransport {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, TransportError> {
        let req_id = self.next_req_id.fetch_add(1, Ordering::Relaxed);
        let frame = self.frame(req_id, &request)?;

        let mut connection = self.connection.lock().await;
        if connection.is_none() {
            tracing::debug!(url = %self.url, "Opening WebSocket connection");
            let (stream, _) = connect_async(self.url.as_str()).await.map_err(|e| {
                TransportError::new(TransportErrorKind::Connect, format!("failed to connect to {}", self.url))
                    .with_source(e)
                    .unsent()
            })?;
            *connection = Some(stream);
        }
        let Some(stream) = connection.as_mut() else {
            return Err(TransportError::new(TransportErrorKind::Connect, "no connection").unsent());
        };

        let result = exchange(stream, req_id, frame).await;
        if result.is_err() {
            tracing::debug!(url = %self.url, "Dropping WebSocket connection after failure");
            *connection = None;
        }
        result
    }
}

async fn exchange(
    stream: &mut WsStream,
    req_id: u64,
    frame: String,
) -> Result<TransportResponse, TransportError> {
    stream
        .send(WsMessage::Text(frame.into()))
        .await
        .map_err(from_tungstenite)?;

    loop {
        match stream.next().await {
            None => {
                return Err(TransportError::new(
                    TransportErrorKind::UnexpectedEof,
                    "stream ended before reply",
                ));
            }
            Some(Err(e)) => return Err(from_tungstenite(e)),
            Some(Ok(WsMessage::Text(text))) => {
                if reply_id(text.as_str()) == Some(req_id) {
                    return Ok(TransportResponse::ok(text.as_str()));
                }
                tracing::trace!("Skipping unrelated frame");
            }
            Some(Ok(WsMessage::Close(frame))) => {
                let reason = frame.map(|f| f.reason.to_string()).unwrap_or_default();
                return Err(TransportError::new(
                    TransportErrorKind::ConnectionReset,
                    format!("closed by peer before reply: {reason}"),
                ));
            }
            Some(Ok(_)) => {}
        }
    }
}

/// The `req_id` of a reply frame, as a string or number.
fn reply_id(text: &str) -> Option<u64> {
    let value: Value = serde_json::from_str(text).ok()?;
    match value.get("req_id")? {
        Value::String(id) => id.parse().ok(),
        Value::Number(id) => id.as_u64(),
        _ => None,
    }
}

fn from_tungstenite(err: tungstenite::Error) -> TransportError {
    let kind = match &err {
        tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
            TransportErrorKind::ConnectionReset
        }
        tungstenite::Error::Io(io_error) => match io_error.kind() {
            io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe => TransportErrorKind::ConnectionReset,
            io::ErrorKind::UnexpectedEof => TransportErrorKind::UnexpectedEof,
            io::ErrorKind::TimedOut => TransportErrorKind::Timeout,
            _ => TransportErrorKind::Other,
        },
        tungstenite::Error::Protocol(_) => TransportErrorKind::Protocol,
        _ => TransportErrorKind::Other,
    };
    TransportError::new(kind, err.to_string()).with_source(err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::SignedHeaders;
    use crate::rate_limit::RouteKey;

    #[test]
    fn test_reply_id() {
        assert_eq!(reply_id(r#"{"req_id":"7","code":"0"}"#), Some(7));
        assert_eq!(reply_id(r#"{"req_id":8}"#), Some(8));
        assert_eq!(reply_id(r#"{"topic":"ticker"}"#), None);
        assert_eq!(reply_id("not json"), None);
    }

    #[test]
    fn test_frame_layout() {
        let transport = WsTransport::new("ws://127.0.0.1:1");
        let mut request = TransportRequest::new(RouteKey::stream("order.place", "/ws/trade"), "/ws/trade");
        request.body = Some(r#"{"symbol":"BTC-USDT"}"#.to_string());
        request.auth = Some(SignedHeaders {
            key: "key".to_string(),
            timestamp: 5,
            sign: "sig".to_string(),
        });

        let frame: Value = serde_json::from_str(&transport.frame(3, &request).unwrap()).unwrap();
        assert_eq!(frame["req_id"], "3");
        assert_eq!(frame["method"], "order.place");
        assert_eq!(frame["params"]["symbol"], "BTC-USDT");
        assert_eq!(frame["auth"]["key"], "key");
        assert_eq!(frame["auth"]["timestamp"], 5);
    }

    #[tokio::test]
    async fn test_connect_failure_is_unsent() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let transport = WsTransport::new(format!("ws://127.0.0.1:{port}"));
        let request = TransportRequest::new(RouteKey::stream("order.place", "/ws/trade"), "/ws/trade");
        let err = transport.send(request).await.unwrap_err();
        assert_eq!(err.kind(), TransportErrorKind::Connect);
        assert!(!err.sent());
        assert!(!transport.is_connected().await);
    }
}
