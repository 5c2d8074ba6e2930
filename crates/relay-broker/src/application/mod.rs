//! Application layer for relay-broker.
//!
//! The application layer holds the protocol: who may join a space, how a
//! connection becomes a server or a client, how clients attach to servers,
//! and where every frame goes afterwards.
//!
//! # Responsibilities
//!
//! - Delayed, digest-only password checks ([`auth`])
//! - The per-connection state machine and routing ([`connection`])
//! - The live-connection registry of one space ([`space`])
//! - The fixed set of spaces ([`broker`])
//! - Action-name dispatch to external subsystems ([`hooks`])
//!
//! # What does NOT belong here?
//!
//! - Opening sockets or accepting connections (infrastructure)
//! - WebSocket framing (handled by tokio-tungstenite behind [`FrameSink`])

pub mod auth;
pub mod broker;
pub mod connection;
pub mod hooks;
pub mod space;
pub mod transport;

pub use auth::{AuthError, Authenticator};
pub use broker::{Broker, BrokerError};
pub use connection::{AttachError, Connection, ConnectionId, RoleKind};
pub use hooks::{HookError, HookRegistry, SubsystemHook};
pub use space::{Space, SpaceError};
pub use transport::{FrameSink, TransportError};
