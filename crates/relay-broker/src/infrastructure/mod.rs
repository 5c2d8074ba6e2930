//! Infrastructure layer for relay-broker.
//!
//! - [`ws_server`]: binds the listener, routes each upgrade path to a space,
//!   and exposes the start/stop lifecycle.
//! - [`session`]: the per-connection receive loop and the WebSocket-backed
//!   [`FrameSink`](crate::application::FrameSink).

pub mod session;
pub mod ws_server;

pub use session::{run_connection, WsSink};
pub use ws_server::{start, BrokerHandle, LIVENESS_PATH, SHUTDOWN_MESSAGE};
