//! # relay-core
//!
//! Shared library for the relay broker containing the wire envelope, the
//! close-reason vocabulary, and the password digest used for every
//! authentication check.
//!
//! This crate has zero dependencies on sockets, async runtimes, or the
//! transport library.  It is used by the broker and by anything that wants to
//! speak the broker's protocol (test clients, benchmarks).
//!
//! # Architecture overview
//!
//! The broker lets a headless *server* endpoint and any number of *client*
//! endpoints exchange application messages through a shared rendezvous
//! point.  Every frame on the wire is one JSON document:
//!
//! ```json
//! {"action":"setup","setup":{"type":"client","password":"...","name":"phone"}}
//! ```
//!
//! - **`protocol`** – The envelope (`Message`), its payload variants, the
//!   codec that decodes text frames while keeping the original text for
//!   verbatim relay, and the reasons attached to broker-initiated closes.
//!
//! - **`domain`** – Pure value types with no I/O.  Currently the one-way
//!   `PasswordDigest` that stands in for every clear-text password.

pub mod domain;
pub mod protocol;

// Re-export the most-used types at the crate root so callers can write
// `relay_core::Message` instead of `relay_core::protocol::codec::Message`.
pub use domain::password::PasswordDigest;
pub use protocol::close::CloseReason;
pub use protocol::codec::{CodecError, Message};
pub use protocol::messages::{
    Action, ClientConnect, Connect, ConnectionStatus, ConnectionType, Payload, Setup, Status,
};
