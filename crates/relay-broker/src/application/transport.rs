//! The outbound side of a link, as seen by the protocol.
//!
//! The state machine never touches a socket.  Each [`Connection`] owns one
//! boxed [`FrameSink`] and serializes every write through its own lock; the
//! infrastructure layer supplies the WebSocket-backed implementation.
//!
//! [`Connection`]: crate::application::Connection

use async_trait::async_trait;
use relay_core::CloseReason;
use thiserror::Error;

/// Errors writing to a link.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The connection was already closed by the broker.
    #[error("connection already closed")]
    Closed,

    /// The underlying link failed (peer gone, network error).
    #[error("link failure: {0}")]
    Link(String),

    /// The outbound frame could not be encoded.
    #[error("encode failure: {0}")]
    Encode(#[from] relay_core::CodecError),
}

/// Writes frames to one peer.
///
/// Implementations are not required to be safe for concurrent use; the
/// owning connection holds a lock around every call.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FrameSink: Send {
    /// Sends one text frame.
    async fn send_text(&mut self, text: String) -> Result<(), TransportError>;

    /// Sends a close frame carrying `reason`'s code and text.
    async fn send_close(&mut self, reason: CloseReason) -> Result<(), TransportError>;
}

#[cfg(test)]
pub(crate) mod testing {
    //! An in-memory sink that records every frame, for state-machine tests.

    use std::sync::{Arc, Mutex};

    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub(crate) enum Frame {
        Text(String),
        Close(CloseReason),
    }

    /// Records frames into a shared log; the test keeps a [`SinkLog`] handle.
    pub(crate) struct RecordingSink {
        log: SinkLog,
    }

    #[derive(Clone, Default)]
    pub(crate) struct SinkLog(Arc<Mutex<Vec<Frame>>>);

    impl SinkLog {
        pub(crate) fn frames(&self) -> Vec<Frame> {
            self.0.lock().unwrap().clone()
        }

        pub(crate) fn texts(&self) -> Vec<String> {
            self.frames()
                .into_iter()
                .filter_map(|f| match f {
                    Frame::Text(t) => Some(t),
                    Frame::Close(_) => None,
                })
                .collect()
        }

        pub(crate) fn close_reasons(&self) -> Vec<CloseReason> {
            self.frames()
                .into_iter()
                .filter_map(|f| match f {
                    Frame::Close(r) => Some(r),
                    Frame::Text(_) => None,
                })
                .collect()
        }

        pub(crate) fn clear(&self) {
            self.0.lock().unwrap().clear();
        }
    }

    pub(crate) fn recording_sink() -> (Box<dyn FrameSink>, SinkLog) {
        let log = SinkLog::default();
        (Box::new(RecordingSink { log: log.clone() }), log)
    }

    #[async_trait]
    impl FrameSink for RecordingSink {
        async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
            self.log.0.lock().unwrap().push(Frame::Text(text));
            Ok(())
        }

        async fn send_close(&mut self, reason: CloseReason) -> Result<(), TransportError> {
            self.log.0.lock().unwrap().push(Frame::Close(reason));
            Ok(())
        }
    }
}
