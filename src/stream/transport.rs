use crate::error::TerminalError;
use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async_with_config, MaybeTlsStream, WebSocketStream};
use tracing::warn;

/// Standard close code for a clean, caller-initiated close.
pub const CLOSE_NORMAL: u16 = 1000;
/// Close code reported when the connection drops without a close frame.
pub const CLOSE_ABNORMAL: u16 = 1006;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketEvent {
    Message(String),
    Closed { code: u16 },
}

/// Seam between the connection channels and the actual socket runtime, so the
/// channel lifecycle can be driven by a scripted fake in tests.
#[async_trait]
pub trait SocketTransport: Send + Sync {
    async fn connect(&self, url: &str) -> Result<Box<dyn SocketStream>, TerminalError>;
}

#[async_trait]
pub trait SocketStream: Send {
    /// Resolves with the next event; a `Closed` event is terminal.
    async fn next_event(&mut self) -> SocketEvent;
    async fn close(&mut self);
}

pub struct TungsteniteTransport;

#[async_trait]
impl SocketTransport for TungsteniteTransport {
    async fn connect(&self, url: &str) -> Result<Box<dyn SocketStream>, TerminalError> {
        let ws_config = WebSocketConfig {
            max_message_size: Some(64 << 20),
            max_frame_size: Some(16 << 20),
            ..Default::default()
        };

        let (stream, _) = connect_async_with_config(url, Some(ws_config), true).await?;
        Ok(Box::new(TungsteniteStream { stream }))
    }
}

struct TungsteniteStream {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl SocketStream for TungsteniteStream {
    async fn next_event(&mut self) -> SocketEvent {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => return SocketEvent::Message(text),
                Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                    Ok(text) => return SocketEvent::Message(text),
                    Err(error) => {
                        warn!(%error, "dropping non-utf8 binary frame");
                    }
                },
                Some(Ok(Message::Close(frame))) => {
                    let code = frame
                        .map(|frame| u16::from(frame.code))
                        .unwrap_or(CLOSE_ABNORMAL);
                    return SocketEvent::Closed { code };
                }
                // ping/pong are handled by the protocol layer
                Some(Ok(_)) => {}
                Some(Err(error)) => {
                    warn!(%error, "websocket read error");
                    return SocketEvent::Closed {
                        code: CLOSE_ABNORMAL,
                    };
                }
                None => {
                    return SocketEvent::Closed {
                        code: CLOSE_ABNORMAL,
                    }
                }
            }
        }
    }

    async fn close(&mut self) {
        let _ = self.stream.close(None).await;
    }
}
