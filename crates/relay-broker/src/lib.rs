//! relay-broker library crate.
//!
//! A rendezvous broker: headless *servers* and remote *clients* both dial
//! out to the broker, authenticate against a shared space password, and the
//! broker pairs them and relays their messages.
//!
//! # Architecture
//!
//! ```text
//! Server endpoint ─┐                      ┌─ Client endpoint
//!   (JSON over WS) │                      │  (JSON over WS)
//!                  ▼                      ▼
//! [relay-broker]
//!   ├── domain/           Pure types: BrokerConfig, SpaceConfig, ConnectionSettings
//!   ├── application/
//!   │     ├── auth        Delayed digest comparison
//!   │     ├── connection  Per-link protocol state machine and routing
//!   │     ├── space       Live-connection registry, lookup, shutdown
//!   │     ├── broker      Space registry
//!   │     ├── hooks       Action-name → subsystem hook registry
//!   │     └── transport   Outbound frame sink trait
//!   └── infrastructure/
//!         ├── ws_server/  Accept loop, path → space routing, start/stop
//!         └── session/    Per-connection receive loop (tokio-tungstenite)
//! ```
//!
//! # Layer rules
//!
//! - `domain` has no I/O and no async.
//! - `application` uses tokio synchronisation and timers but never touches a
//!   socket; it talks to peers only through [`application::FrameSink`].
//! - `infrastructure` owns sockets, WebSocket framing, and task spawning.

/// Domain layer: configuration types (no I/O).
pub mod domain;

/// Application layer: authentication, connection state machine, registries.
pub mod application;

/// Infrastructure layer: WebSocket listener and per-connection sessions.
pub mod infrastructure;

pub use application::{Broker, Connection, Space};
pub use domain::BrokerConfig;
pub use infrastructure::{start, BrokerHandle};
