//! tokio-tungstenite transport behind the connection seams.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use super::connection::{CloseKind, DialError, Dialer, FrameStream, StreamError};

/// Close code used when the peer sent no close frame
const NO_STATUS_RECEIVED: u16 = 1005;

pub struct WsDialer {
    url: String,
}

impl WsDialer {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Dialer for WsDialer {
    type Stream = WsStream;

    async fn dial(&self) -> Result<WsStream, DialError> {
        match connect_async(self.url.as_str()).await {
            Ok((socket, response)) => {
                tracing::debug!(status = %response.status(), url = %self.url, "WebSocket upgraded");
                Ok(WsStream { socket })
            }
            Err(WsError::Http(response)) => Err(DialError::Handshake(format!(
                "server answered HTTP {}",
                response.status()
            ))),
            Err(err @ WsError::Protocol(_)) | Err(err @ WsError::HttpFormat(_)) => {
                Err(DialError::Handshake(err.to_string()))
            }
            Err(err) => Err(DialError::Other(err.to_string())),
        }
    }
}

pub struct WsStream {
    socket: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

fn close_kind(code: CloseCode) -> CloseKind {
    match code {
        CloseCode::Normal => CloseKind::Normal,
        CloseCode::Away => CloseKind::GoingAway,
        CloseCode::Abnormal => CloseKind::Abnormal,
        other => CloseKind::Other(u16::from(other)),
    }
}

fn stream_error(err: WsError) -> StreamError {
    match err {
        WsError::ConnectionClosed | WsError::AlreadyClosed => {
            StreamError::Closed(CloseKind::Abnormal)
        }
        WsError::Io(_) | WsError::Protocol(_) => StreamError::Closed(CloseKind::Abnormal),
        other => StreamError::Other(other.to_string()),
    }
}

#[async_trait]
impl FrameStream for WsStream {
    async fn read_frame(&mut self) -> Result<Vec<u8>, StreamError> {
        loop {
            let message = match self.socket.next().await {
                Some(Ok(message)) => message,
                Some(Err(err)) => return Err(stream_error(err)),
                None => return Err(StreamError::Closed(CloseKind::Abnormal)),
            };

            match message {
                Message::Text(text) => return Ok(text.into_bytes()),
                Message::Binary(data) => return Ok(data),
                Message::Ping(data) => {
                    self.socket
                        .send(Message::Pong(data))
                        .await
                        .map_err(stream_error)?;
                }
                Message::Pong(_) | Message::Frame(_) => {}
                Message::Close(frame) => {
                    let kind = frame
                        .map(|f| close_kind(f.code))
                        .unwrap_or(CloseKind::Other(NO_STATUS_RECEIVED));
                    return Err(StreamError::Closed(kind));
                }
            }
        }
    }

    async fn send_text(&mut self, payload: String) -> Result<(), StreamError> {
        self.socket
            .send(Message::Text(payload))
            .await
            .map_err(stream_error)
    }

    async fn close(&mut self) -> Result<(), StreamError> {
        match self.socket.close(None).await {
            Ok(()) | Err(WsError::ConnectionClosed) | Err(WsError::AlreadyClosed) => Ok(()),
            Err(err) => Err(stream_error(err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_close_codes_map_to_kinds() {
        assert_eq!(close_kind(CloseCode::Normal), CloseKind::Normal);
        assert_eq!(close_kind(CloseCode::Away), CloseKind::GoingAway);
        assert_eq!(close_kind(CloseCode::Abnormal), CloseKind::Abnormal);
        assert_eq!(close_kind(CloseCode::Policy), CloseKind::Other(1008));
    }

    #[test]
    fn test_dropped_connection_is_recoverable() {
        assert!(stream_error(WsError::ConnectionClosed).is_recoverable());
        assert!(!stream_error(WsError::Utf8).is_recoverable());
    }

    #[tokio::test]
    async fn test_dial_refused_is_not_handshake() {
        // Nothing listens on port 9 locally
        let dialer = WsDialer::new("ws://127.0.0.1:9");
        let err = dialer.dial().await.err().unwrap();
        assert!(matches!(err, DialError::Other(_)));
    }
}
