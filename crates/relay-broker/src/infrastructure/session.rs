//! Per-connection session: the receive loop for one upgraded WebSocket.
//!
//! The WebSocket is split.  The write half becomes the connection's
//! [`FrameSink`] ([`WsSink`]); the read half stays in this task, which feeds
//! frames to the state machine one at a time, in arrival order.
//!
//! The loop ends when the peer closes the link, the link fails, or the
//! broker closes the connection.  After a broker-initiated close the task
//! keeps reading for up to `close_timeout` so the peer's close acknowledgement
//! can arrive, then runs the teardown cascade and leaves the space.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream::{SplitSink, StreamExt};
use futures_util::SinkExt;
use relay_core::{CloseReason, CodecError, Message};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, info, warn};

use crate::application::{FrameSink, Space, TransportError};

// ── Outbound ──────────────────────────────────────────────────────────────────

/// [`FrameSink`] over the write half of a WebSocket.
pub struct WsSink<S> {
    inner: SplitSink<WebSocketStream<S>, WsMessage>,
}

impl<S> WsSink<S> {
    pub fn new(inner: SplitSink<WebSocketStream<S>, WsMessage>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<S> FrameSink for WsSink<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        self.inner
            .send(WsMessage::Text(text))
            .await
            .map_err(|e| TransportError::Link(e.to_string()))
    }

    async fn send_close(&mut self, reason: CloseReason) -> Result<(), TransportError> {
        let frame = CloseFrame {
            code: CloseCode::from(reason.code()),
            reason: reason.as_str().to_owned().into(),
        };
        self.inner
            .send(WsMessage::Close(Some(frame)))
            .await
            .map_err(|e| TransportError::Link(e.to_string()))
    }
}

// ── Inbound ───────────────────────────────────────────────────────────────────

/// Runs one upgraded WebSocket inside `space` until the link ends.
///
/// Never returns an error: every failure ends the session and is logged.
pub async fn run_connection<S>(space: Arc<Space>, ws: WebSocketStream<S>, peer: SocketAddr)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (sink, mut stream) = ws.split();
    let conn = match space.admit(Box::new(WsSink::new(sink)), peer).await {
        Ok(conn) => conn,
        Err(e) => {
            info!(%peer, "connection refused: {e}");
            return;
        }
    };
    info!(space = space.name(), connection = %conn.id(), %peer, "session started");

    let mut closed = conn.closed_signal();
    loop {
        let frame = tokio::select! {
            biased;
            _ = closed.wait_for(|closed| *closed) => break,
            frame = stream.next() => frame,
        };

        match frame {
            Some(Ok(WsMessage::Text(text))) => match Message::decode(text) {
                Ok(msg) => conn.handle_message(&space, msg).await,
                Err(e) => conn.reject_frame(e).await,
            },
            Some(Ok(WsMessage::Binary(_))) => {
                conn.reject_frame(CodecError::UnsupportedFrame("binary")).await;
            }
            Some(Ok(WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Frame(_))) => {}
            Some(Ok(WsMessage::Close(frame))) => {
                debug!(connection = %conn.id(), ?frame, "peer closed the link");
                break;
            }
            Some(Err(e)) => {
                debug!(connection = %conn.id(), "link error: {e}");
                break;
            }
            None => {
                debug!(connection = %conn.id(), "stream ended");
                break;
            }
        }
    }

    // Let the close handshake finish (ours or the peer's) without waiting
    // forever on a silent peer.
    let close_timeout = space.settings().close_timeout;
    let drain = async {
        while let Some(Ok(frame)) = stream.next().await {
            if frame.is_close() {
                debug!(connection = %conn.id(), "close acknowledged");
            }
        }
    };
    if timeout(close_timeout, drain).await.is_err() {
        warn!(connection = %conn.id(), "no close acknowledgement within {close_timeout:?}");
    }

    conn.teardown().await;
    space.remove(conn.id()).await;
    info!(space = space.name(), connection = %conn.id(), %peer, "session ended");
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::domain::{ConnectionSettings, SpaceConfig};
    use tokio::io::DuplexStream;
    use tokio_tungstenite::tungstenite::protocol::Role;

    fn space() -> Arc<Space> {
        let settings = ConnectionSettings {
            login_delay: Duration::ZERO,
            setup_grace_period: Duration::from_secs(10),
            close_timeout: Duration::from_millis(200),
        };
        Arc::new(Space::new(&SpaceConfig::new("s", "pw"), settings))
    }

    /// An in-memory WebSocket pair: (broker side, peer side).
    async fn ws_pair() -> (WebSocketStream<DuplexStream>, WebSocketStream<DuplexStream>) {
        let (a, b) = tokio::io::duplex(64 * 1024);
        let server = WebSocketStream::from_raw_socket(a, Role::Server, None).await;
        let client = WebSocketStream::from_raw_socket(b, Role::Client, None).await;
        (server, client)
    }

    async fn next_close(peer: &mut WebSocketStream<DuplexStream>) -> Option<CloseFrame<'static>> {
        loop {
            match peer.next().await {
                Some(Ok(WsMessage::Close(frame))) => return frame,
                Some(Ok(_)) => continue,
                _ => return None,
            }
        }
    }

    #[tokio::test]
    async fn test_setup_over_websocket_is_acknowledged() {
        let space = space();
        let (broker_side, mut peer) = ws_pair().await;
        let session = tokio::spawn(run_connection(Arc::clone(&space), broker_side, "127.0.0.1:1".parse().unwrap()));

        peer.send(WsMessage::Text(
            r#"{"action":"setup","setup":{"type":"client","password":"pw","name":"phone"}}"#.to_string(),
        ))
        .await
        .unwrap();

        let reply = peer.next().await.unwrap().unwrap();
        assert_eq!(reply, WsMessage::Text(r#"{"action":"ok"}"#.to_string()));

        peer.close(None).await.unwrap();
        session.await.unwrap();
        assert_eq!(space.connection_count().await, 0);
    }

    #[tokio::test]
    async fn test_binary_frame_closes_with_protocol_error() {
        let space = space();
        let (broker_side, mut peer) = ws_pair().await;
        let session = tokio::spawn(run_connection(Arc::clone(&space), broker_side, "127.0.0.1:1".parse().unwrap()));

        peer.send(WsMessage::Binary(vec![1, 2, 3])).await.unwrap();

        let frame = next_close(&mut peer).await.unwrap();
        assert_eq!(u16::from(frame.code), 1008);
        assert_eq!(frame.reason, "protocol error");
        session.await.unwrap();
    }

    #[tokio::test]
    async fn test_session_leaves_space_when_peer_vanishes() {
        let space = space();
        let (broker_side, peer) = ws_pair().await;
        let session = tokio::spawn(run_connection(Arc::clone(&space), broker_side, "127.0.0.1:1".parse().unwrap()));

        tokio::task::yield_now().await;
        drop(peer);
        session.await.unwrap();

        assert_eq!(space.connection_count().await, 0);
    }
}
