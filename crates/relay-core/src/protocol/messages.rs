//! Envelope vocabulary: actions, payload variants, and status codes.
//!
//! Every frame is a JSON object with an `"action"` field.  Some actions carry
//! a payload object stored under a key named after the action:
//!
//! ```json
//! {"action":"setup","setup":{"type":"server","password":"p","server_password":"s","name":"cam1"}}
//! {"action":"connect","connect":{"server":"cam1","password":"s"}}
//! {"action":"client_connect","client_connect":{"name":"phone","connect":true}}
//! {"action":"connection_status","connection_status":{"status":"server_not_found"}}
//! ```
//!
//! Actions the broker does not model are kept as [`Action::Other`] so that
//! paired endpoints can invent their own vocabulary without touching the
//! broker.

use std::fmt;

use serde::{Deserialize, Serialize};

// ── Action ────────────────────────────────────────────────────────────────────

/// The `"action"` discriminator of an envelope.
///
/// Serialized as a plain JSON string.  Unknown strings round-trip through
/// [`Action::Other`] unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Action {
    /// First frame on every connection: password and role selection.
    Setup,
    /// Broker acknowledgement of a successful setup.
    Ok,
    /// Client asks to be paired with a named server.
    Connect,
    /// Broker tells a server that a client attached or detached.
    ClientConnect,
    /// Broker tells a client about its pairing state.
    ConnectionStatus,
    /// Any action the broker does not interpret.
    Other(String),
}

impl Action {
    /// Returns the wire spelling of this action.
    pub fn as_str(&self) -> &str {
        match self {
            Action::Setup => "setup",
            Action::Ok => "ok",
            Action::Connect => "connect",
            Action::ClientConnect => "client_connect",
            Action::ConnectionStatus => "connection_status",
            Action::Other(other) => other,
        }
    }
}

impl From<String> for Action {
    fn from(value: String) -> Self {
        match value.as_str() {
            "setup" => Action::Setup,
            "ok" => Action::Ok,
            "connect" => Action::Connect,
            "client_connect" => Action::ClientConnect,
            "connection_status" => Action::ConnectionStatus,
            _ => Action::Other(value),
        }
    }
}

impl From<&str> for Action {
    fn from(value: &str) -> Self {
        Action::from(value.to_owned())
    }
}

impl From<Action> for String {
    fn from(value: Action) -> Self {
        match value {
            Action::Other(other) => other,
            known => known.as_str().to_owned(),
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Setup ─────────────────────────────────────────────────────────────────────

/// The role a connection asks for during setup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionType {
    /// Headless endpoint that clients attach to.
    Server,
    /// Viewer that pairs with one server at a time.
    Client,
    /// Any other value.  The broker closes such connections with "invalid type".
    #[serde(other)]
    Unknown,
}

/// Payload of the `setup` action.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Setup {
    /// Requested role.
    #[serde(rename = "type")]
    pub kind: ConnectionType,
    /// Space password in clear text.  Digested on arrival.
    #[serde(default)]
    pub password: String,
    /// Password clients must present to attach.  Only used by servers.
    #[serde(default)]
    pub server_password: String,
    /// Display name.  Required for servers; clients need one to connect.
    #[serde(default)]
    pub name: String,
}

// Hand-written so that passwords never reach a log line.
impl fmt::Debug for Setup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Setup")
            .field("kind", &self.kind)
            .field("password", &"<redacted>")
            .field("server_password", &"<redacted>")
            .field("name", &self.name)
            .finish()
    }
}

// ── Connect ───────────────────────────────────────────────────────────────────

/// Payload of the `connect` action.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connect {
    /// Display name of the server to attach to.
    pub server: String,
    /// The server's attachment password in clear text.
    #[serde(default)]
    pub password: String,
}

impl fmt::Debug for Connect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connect")
            .field("server", &self.server)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Payload of the `client_connect` action sent to servers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConnect {
    /// Display name of the client.
    pub name: String,
    /// `true` when the client attached, `false` when it left.
    pub connect: bool,
}

// ── Connection status ─────────────────────────────────────────────────────────

/// Status codes carried by `connection_status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    /// The client is now paired with the requested server.
    Connected,
    /// No server with the requested name exists in the space.
    ServerNotFound,
    /// The client sent an application message without being paired.
    NotConnected,
    /// Another client with the same name is already attached to the server.
    NameConflict,
    /// The paired server's link closed.
    ServerDisappeared,
    /// A status this version does not know.
    #[serde(other)]
    Unknown,
}

/// Payload of the `connection_status` action sent to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionStatus {
    pub status: Status,
}

// ── Payload ───────────────────────────────────────────────────────────────────

/// The mutually exclusive payload variants, keyed by action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Setup(Setup),
    Connect(Connect),
    ClientConnect(ClientConnect),
    ConnectionStatus(ConnectionStatus),
}

// ── Tests ─────────────────────────────────────────────────────────────────────
