//! Socket layer under the WebSocket transport.
//!
//! The transport only needs framed JSON messages in and out. [`WebsocketConn`]
//! is that seam; [`TungsteniteProvider`] is the default implementation.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use url::Url;

use super::config::WsConfig;
use super::message::OperationMessage;
use crate::{Error, ErrorContext, Result};

/// Why a read produced no message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadError {
    /// Nothing arrived within the read timeout. The caller polls again.
    Timeout,
    /// The server closed the socket with a normal closure code.
    NormalClosure,
    /// The connection is gone (EOF, abnormal close, I/O failure).
    Disconnected(String),
    /// A frame arrived but could not be decoded.
    Malformed(String),
}

impl std::fmt::Display for ReadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReadError::Timeout => f.write_str("read timeout"),
            ReadError::NormalClosure => f.write_str("normal closure"),
            ReadError::Disconnected(reason) => write!(f, "disconnected: {}", reason),
            ReadError::Malformed(reason) => write!(f, "malformed frame: {}", reason),
        }
    }
}

/// A connected, message-framed socket.
///
/// Reads and writes may run concurrently with each other.
#[async_trait]
pub trait WebsocketConn: Send + Sync {
    async fn read_message(&self) -> std::result::Result<OperationMessage, ReadError>;

    async fn write_message(&self, msg: &OperationMessage) -> Result<()>;

    async fn close(&self) -> Result<()>;
}

/// Opens sockets for the transport. Called again on every reconnect.
#[async_trait]
pub trait WebsocketConnProvider: Send + Sync {
    /// `lifetime` is cancelled when the connection is reset or the transport closed.
    async fn dial(&self, url: &Url, lifetime: CancellationToken) -> Result<Arc<dyn WebsocketConn>>;
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Default provider over `tokio-tungstenite`.
#[derive(Debug, Clone)]
pub struct TungsteniteProvider {
    subprotocol: String,
    headers: Vec<(String, String)>,
    read_timeout: Duration,
    write_timeout: Duration,
}

impl TungsteniteProvider {
    pub fn from_config(config: &WsConfig) -> Self {
        Self {
            subprotocol: config.subprotocol.clone(),
            headers: config.headers.clone(),
            read_timeout: config.read_timeout,
            write_timeout: config.write_timeout,
        }
    }

    fn handshake_request(
        &self,
        url: &Url,
    ) -> Result<tungstenite::http::Request<()>> {
        let mut request = url.as_str().into_client_request()?;
        let headers = request.headers_mut();

        let protocol = HeaderValue::from_str(&self.subprotocol).map_err(|e| {
            Error::configuration_with_context(
                format!("invalid subprotocol: {}", e),
                ErrorContext::new().with_field_path("ws.subprotocol"),
            )
        })?;
        headers.insert(SEC_WEBSOCKET_PROTOCOL, protocol);

        for (name, value) in &self.headers {
            let context = || ErrorContext::new().with_field_path(format!("ws.headers.{}", name));
            let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
                Error::configuration_with_context(format!("invalid header name: {}", e), context())
            })?;
            let value = HeaderValue::from_str(value).map_err(|e| {
                Error::configuration_with_context(format!("invalid header value: {}", e), context())
            })?;
            headers.append(name, value);
        }

        Ok(request)
    }
}

#[async_trait]
impl WebsocketConnProvider for TungsteniteProvider {
    async fn dial(&self, url: &Url, lifetime: CancellationToken) -> Result<Arc<dyn WebsocketConn>> {
        let request = self.handshake_request(url)?;

        let (stream, response) = tokio::select! {
            _ = lifetime.cancelled() => return Err(Error::Cancelled),
            res = tokio::time::timeout(self.write_timeout, tokio_tungstenite::connect_async(request)) => {
                res.map_err(|_| Error::WebSocket(format!("handshake with {} timed out", url)))??
            }
        };

        let negotiated = response
            .headers()
            .get(SEC_WEBSOCKET_PROTOCOL)
            .and_then(|v| v.to_str().ok());
        if negotiated != Some(self.subprotocol.as_str()) {
            return Err(Error::WebSocket(format!(
                "server did not accept subprotocol '{}' (got {:?})",
                self.subprotocol, negotiated
            )));
        }

        let (sink, stream) = stream.split();
        Ok(Arc::new(TungsteniteConn {
            sink: Mutex::new(sink),
            stream: Mutex::new(stream),
            read_timeout: self.read_timeout,
            write_timeout: self.write_timeout,
        }))
    }
}

struct TungsteniteConn {
    sink: Mutex<SplitSink<WsStream, Message>>,
    stream: Mutex<SplitStream<WsStream>>,
    read_timeout: Duration,
    write_timeout: Duration,
}

fn classify(err: tungstenite::Error) -> ReadError {
    ReadError::Disconnected(err.to_string())
}

#[async_trait]
impl WebsocketConn for TungsteniteConn {
    async fn read_message(&self) -> std::result::Result<OperationMessage, ReadError> {
        let mut stream = self.stream.lock().await;
        loop {
            let frame = match tokio::time::timeout(self.read_timeout, stream.next()).await {
                Err(_) => return Err(ReadError::Timeout),
                Ok(None) => return Err(ReadError::Disconnected("end of stream".into())),
                Ok(Some(Err(e))) => return Err(classify(e)),
                Ok(Some(Ok(frame))) => frame,
            };

            return match frame {
                Message::Text(text) => serde_json::from_str(text.as_str())
                    .map_err(|e| ReadError::Malformed(e.to_string())),
                Message::Binary(bytes) => {
                    serde_json::from_slice(&bytes).map_err(|e| ReadError::Malformed(e.to_string()))
                }
                Message::Close(Some(frame)) if frame.code == CloseCode::Normal => {
                    Err(ReadError::NormalClosure)
                }
                Message::Close(frame) => Err(ReadError::Disconnected(match frame {
                    Some(f) => format!("closed with {}: {}", u16::from(f.code), f.reason.as_str()),
                    None => "closed without status".into(),
                })),
                // Control frames are answered by tungstenite itself.
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => continue,
            };
        }
    }

    async fn write_message(&self, msg: &OperationMessage) -> Result<()> {
        let text = serde_json::to_string(msg)?;
        let mut sink = self.sink.lock().await;
        tokio::time::timeout(self.write_timeout, sink.send(Message::Text(text.into())))
            .await
            .map_err(|_| Error::WebSocket("write timed out".into()))??;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        let mut sink = self.sink.lock().await;
        let frame = CloseFrame {
            code: CloseCode::Normal,
            reason: "close websocket".into(),
        };
        let send = async {
            sink.send(Message::Close(Some(frame))).await?;
            sink.close().await?;
            Ok::<(), tungstenite::Error>(())
        };
        match tokio::time::timeout(self.write_timeout, send).await {
            Err(_) => Err(Error::WebSocket("close timed out".into())),
            Ok(Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed)) => Ok(()),
            Ok(res) => res.map_err(Error::from),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handshake_carries_subprotocol_and_headers() {
        let cfg = WsConfig::new("ws://localhost:4000/query").with_header("Authorization", "Bearer t");
        let provider = TungsteniteProvider::from_config(&cfg);
        let req = provider
            .handshake_request(&cfg.endpoint().unwrap())
            .unwrap();

        assert_eq!(req.headers()[SEC_WEBSOCKET_PROTOCOL], "graphql-ws");
        assert_eq!(req.headers()["authorization"], "Bearer t");
        assert!(req.headers().contains_key("sec-websocket-key"));
    }

    #[test]
    fn transport_failures_are_disconnects() {
        let err = classify(tungstenite::Error::ConnectionClosed);
        assert!(matches!(err, ReadError::Disconnected(_)));
    }
}
