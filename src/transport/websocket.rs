//! WebSocket transport for cross-process links
//!
//! Each transport message is one WebSocket frame: text when the bytes are
//! valid UTF-8 (the JSON envelope), binary otherwise. The sink and stream
//! halves sit behind separate locks so a pending receive never holds up a
//! send.

use std::time::Duration;

use super::{Transport, TransportError, TransportResult};
use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::{
    accept_async, connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream,
};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Default time allowed for the WebSocket opening handshake
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// WebSocket transport over any byte stream
pub struct WebSocketTransport<S> {
    sink: Mutex<SplitSink<WebSocketStream<S>, Message>>,
    stream: Mutex<SplitStream<WebSocketStream<S>>>,
    closed: CancellationToken,
}

impl WebSocketTransport<MaybeTlsStream<TcpStream>> {
    /// Connect to a WebSocket server (`ws://` or `wss://`)
    pub async fn connect(url: &str) -> TransportResult<Self> {
        Self::connect_with_timeout(url, DEFAULT_CONNECT_TIMEOUT).await
    }

    /// Connect, giving up after `timeout`
    pub async fn connect_with_timeout(url: &str, timeout: Duration) -> TransportResult<Self> {
        let (ws, _) = tokio::time::timeout(timeout, connect_async(url))
            .await
            .map_err(|_| TransportError::Timeout)?
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;

        debug!(url, "websocket connected");
        Ok(Self::from_stream(ws))
    }
}

impl<S> WebSocketTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    /// Complete the server side of the WebSocket opening handshake
    pub async fn accept(stream: S) -> TransportResult<Self> {
        let ws = accept_async(stream)
            .await
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;
        Ok(Self::from_stream(ws))
    }

    /// Wrap an already established WebSocket stream
    pub fn from_stream(ws: WebSocketStream<S>) -> Self {
        let (sink, stream) = ws.split();
        WebSocketTransport {
            sink: Mutex::new(sink),
            stream: Mutex::new(stream),
            closed: CancellationToken::new(),
        }
    }
}

#[async_trait]
impl<S> Transport for WebSocketTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn send(&self, data: &[u8], cancel: &CancellationToken) -> TransportResult<()> {
        if self.closed.is_cancelled() {
            return Err(TransportError::Disconnected);
        }

        let message = match std::str::from_utf8(data) {
            Ok(text) => Message::Text(text.to_string()),
            Err(_) => Message::Binary(data.to_vec()),
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(TransportError::Cancelled),
            _ = self.closed.cancelled() => Err(TransportError::Disconnected),
            sent = async { self.sink.lock().await.send(message).await } => {
                sent.map_err(|e| TransportError::SendFailed(e.to_string()))
            }
        }
    }

    async fn receive(&self, cancel: &CancellationToken) -> TransportResult<Vec<u8>> {
        if self.closed.is_cancelled() {
            return Err(TransportError::Disconnected);
        }

        let mut stream = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(TransportError::Cancelled),
            _ = self.closed.cancelled() => return Err(TransportError::Disconnected),
            stream = self.stream.lock() => stream,
        };

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(TransportError::Cancelled),
                _ = self.closed.cancelled() => return Err(TransportError::Disconnected),
                next = stream.next() => next,
            };

            match next {
                Some(Ok(Message::Text(text))) => return Ok(text.into_bytes()),
                Some(Ok(Message::Binary(data))) => return Ok(data),
                Some(Ok(Message::Ping(data))) => {
                    if let Err(e) = self.sink.lock().await.send(Message::Pong(data)).await {
                        debug!(error = %e, "pong failed");
                    }
                }
                Some(Ok(Message::Close(_))) | None => {
                    self.closed.cancel();
                    return Err(TransportError::Disconnected);
                }
                Some(Err(e)) => {
                    self.closed.cancel();
                    return Err(TransportError::ReceiveFailed(e.to_string()));
                }
                _ => continue,
            }
        }
    }

    fn is_connected(&self) -> bool {
        !self.closed.is_cancelled()
    }

    async fn close(&self) -> TransportResult<()> {
        if self.closed.is_cancelled() {
            return Ok(());
        }
        self.closed.cancel();

        self.sink
            .lock()
            .await
            .close()
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }
}
