//! Connection: the per-link protocol state machine.
//!
//! Every accepted link becomes one [`Connection`].  It starts without a role
//! and moves through these states:
//!
//! ```text
//!                  setup{type:server}
//!   Unassigned ───────────────────────►  Server ──┐
//!       │                                         │ link ends / close
//!       │          setup{type:client}             ▼
//!       ├─────────────────────────────►  Client ─► Closed
//!       │                                         ▲
//!       └── no setup within grace period ─────────┘  ("invalid type")
//! ```
//!
//! # Routing once a role is fixed
//!
//! - **Server**: a frame with a `destination` goes verbatim to the attached
//!   client of that name.  Unknown destinations are dropped.
//! - **Client**: `connect` asks to attach to a named server.  Anything else
//!   goes verbatim to the attached server, or earns a `not_connected` reply
//!   when there is none.
//!
//! # Pairing ownership
//!
//! The server's `clients` map is the authority on who is attached.  A client
//! only keeps a `Weak` back-reference for lookups, and it is always updated
//! *after* the server's map, never before.
//!
//! # Locks
//!
//! Each connection has two locks: `sink` serializes outbound frames, `role`
//! guards role and pairing state.  Acquisition order is
//! sink → space registry → role, and no role lock is held across an await on
//! another connection.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use relay_core::{
    Action, CloseReason, CodecError, Connect, ConnectionType, Message, PasswordDigest, Payload,
    Setup, Status,
};
use thiserror::Error;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::application::auth::Authenticator;
use crate::application::space::Space;
use crate::application::transport::{FrameSink, TransportError};

/// Identity of one accepted link.
pub type ConnectionId = Uuid;

/// The role a connection currently has.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoleKind {
    Unassigned,
    Server,
    Client,
}

/// Role and pairing state.  Assigned once, never replaced.
pub(crate) enum Role {
    Unassigned,
    Server(ServerRole),
    Client(ClientRole),
}

pub(crate) struct ServerRole {
    name: String,
    password: PasswordDigest,
    clients: HashMap<String, Arc<Connection>>,
    /// Set at teardown so late attachment attempts fail.
    gone: bool,
}

impl ServerRole {
    pub(crate) fn name(&self) -> &str {
        &self.name
    }
}

pub(crate) struct ClientRole {
    name: String,
    server: Option<Weak<Connection>>,
}

impl Role {
    pub(crate) fn server(name: String, password: PasswordDigest) -> Self {
        Role::Server(ServerRole {
            name,
            password,
            clients: HashMap::new(),
            gone: false,
        })
    }

    pub(crate) fn client(name: String) -> Self {
        Role::Client(ClientRole { name, server: None })
    }

    fn kind(&self) -> RoleKind {
        match self {
            Role::Unassigned => RoleKind::Unassigned,
            Role::Server(_) => RoleKind::Server,
            Role::Client(_) => RoleKind::Client,
        }
    }

    fn name(&self) -> Option<&str> {
        match self {
            Role::Unassigned => None,
            Role::Server(s) => Some(&s.name),
            Role::Client(c) => Some(&c.name),
        }
    }
}

/// Why attaching a client to a server failed.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AttachError {
    #[error("server password mismatch")]
    PasswordMismatch,
    #[error("a client named '{0}' is already attached")]
    NameConflict(String),
    #[error("server connection is gone")]
    ServerGone,
    #[error("target connection is not a server")]
    NotAServer,
}

/// A failure while handling one inbound frame.
///
/// Every variant except [`ConnectionError::Transport`] ends the connection
/// with the close reason returned by [`ConnectionError::close_reason`].
#[derive(Debug, Error)]
pub(crate) enum ConnectionError {
    #[error("protocol violation: {0}")]
    Protocol(String),
    #[error("malformed frame: {0}")]
    Malformed(#[from] CodecError),
    #[error("password mismatch")]
    Password,
    #[error("invalid connection type")]
    InvalidType,
    #[error("server connections need a name")]
    MissingServerName,
    #[error("server name '{0}' already in use")]
    DuplicateServerName(String),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl ConnectionError {
    fn close_reason(&self) -> Option<CloseReason> {
        match self {
            ConnectionError::Protocol(_) | ConnectionError::Malformed(_) => {
                Some(CloseReason::ProtocolError)
            }
            ConnectionError::Password => Some(CloseReason::PasswordError),
            ConnectionError::InvalidType => Some(CloseReason::InvalidType),
            ConnectionError::MissingServerName => Some(CloseReason::MissingServerName),
            ConnectionError::DuplicateServerName(_) => Some(CloseReason::DuplicateServerName),
            ConnectionError::Transport(_) => None,
        }
    }
}

/// One accepted link plus its protocol role and state.
pub struct Connection {
    id: ConnectionId,
    peer: SocketAddr,
    created_at: Instant,
    role: Mutex<Role>,
    sink: Mutex<Box<dyn FrameSink>>,
    closed: watch::Sender<bool>,
    torn_down: AtomicBool,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl Connection {
    /// Creates an unassigned connection writing through `sink`.
    pub fn new(peer: SocketAddr, sink: Box<dyn FrameSink>) -> Arc<Self> {
        let (closed, _) = watch::channel(false);
        Arc::new(Self {
            id: Uuid::new_v4(),
            peer,
            created_at: Instant::now(),
            role: Mutex::new(Role::Unassigned),
            sink: Mutex::new(sink),
            closed,
            torn_down: AtomicBool::new(false),
        })
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Time since the link was accepted.
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// A receiver that flips to `true` once the connection is closed.
    pub fn closed_signal(&self) -> watch::Receiver<bool> {
        self.closed.subscribe()
    }

    pub async fn role_kind(&self) -> RoleKind {
        self.role.lock().await.kind()
    }

    /// The display name given at setup, if a role is assigned.
    pub async fn display_name(&self) -> Option<String> {
        self.role.lock().await.name().map(str::to_owned)
    }

    /// The display name, but only if the connection has role `kind`.
    pub(crate) async fn name_if(&self, kind: RoleKind) -> Option<String> {
        let role = self.role.lock().await;
        if role.kind() == kind {
            role.name().map(str::to_owned)
        } else {
            None
        }
    }

    /// Names of the clients attached to this server, sorted.
    pub async fn client_names(&self) -> Vec<String> {
        let role = self.role.lock().await;
        let mut names: Vec<String> = match &*role {
            Role::Server(s) => s.clients.keys().cloned().collect(),
            _ => Vec::new(),
        };
        names.sort();
        names
    }

    /// The server this client is attached to, if it is still alive.
    pub async fn paired_server(&self) -> Option<Arc<Connection>> {
        let mut role = self.role.lock().await;
        match &mut *role {
            Role::Client(client) => {
                let server = client.server.as_ref().and_then(Weak::upgrade);
                if server.is_none() {
                    client.server = None;
                }
                server
            }
            _ => None,
        }
    }

    // ── Outbound ──────────────────────────────────────────────────────────────

    /// Sends one message.  Decoded messages go out as their original text.
    ///
    /// # Errors
    ///
    /// [`TransportError::Closed`] once the connection is closed, or the
    /// sink's error if the write fails.
    pub async fn send(&self, msg: &Message) -> Result<(), TransportError> {
        let text = msg.encode()?.into_owned();
        self.send_text(text).await
    }

    async fn send_text(&self, text: String) -> Result<(), TransportError> {
        let mut sink = self.sink.lock().await;
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        sink.send_text(text).await
    }

    /// Sends a close frame with `reason` and signals the session to end.
    ///
    /// Idempotent: only the first call sends a frame.
    ///
    /// # Errors
    ///
    /// The sink's error if the close frame could not be written.  The
    /// connection counts as closed either way.
    pub async fn close(&self, reason: CloseReason) -> Result<(), TransportError> {
        let mut sink = self.sink.lock().await;
        if self.closed.send_replace(true) {
            return Ok(());
        }
        info!(connection = %self.id, peer = %self.peer, %reason, "closing connection");
        sink.send_close(reason).await
    }

    /// Arms the setup grace timer.
    ///
    /// If the connection is still unassigned and open when `grace` elapses,
    /// it is closed with "invalid type".  The timer ends early once the
    /// connection closes.
    pub fn arm_setup_timer(self: &Arc<Self>, grace: Duration) -> JoinHandle<()> {
        let weak = Arc::downgrade(self);
        let mut closed = self.closed_signal();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(grace) => {}
                _ = closed.wait_for(|closed| *closed) => return,
            }
            let Some(conn) = weak.upgrade() else {
                return;
            };
            if conn.is_closed() || conn.role_kind().await != RoleKind::Unassigned {
                return;
            }
            info!(connection = %conn.id, "no setup within {grace:?}");
            if let Err(e) = conn.close(CloseReason::InvalidType).await {
                debug!(connection = %conn.id, "close after grace period failed: {e}");
            }
        })
    }

    // ── Inbound ───────────────────────────────────────────────────────────────

    /// Handles one decoded frame according to the current role.
    ///
    /// Protocol violations and authentication failures close the connection;
    /// nothing is returned to the caller.
    pub async fn handle_message(self: &Arc<Self>, space: &Space, msg: Message) {
        if self.is_closed() {
            return;
        }
        debug!(connection = %self.id, action = %msg.action(), "frame received");

        let result = match self.role_kind().await {
            RoleKind::Unassigned => self.handle_unassigned(space, &msg).await,
            RoleKind::Server => self.handle_server(&msg).await,
            RoleKind::Client => self.handle_client(space, &msg).await,
        };
        if let Err(err) = result {
            self.fail(err).await;
        }
    }

    /// Closes the connection because a frame could not be decoded.
    pub async fn reject_frame(&self, err: CodecError) {
        self.fail(ConnectionError::Malformed(err)).await;
    }

    async fn fail(&self, err: ConnectionError) {
        match err.close_reason() {
            Some(reason) => {
                warn!(connection = %self.id, peer = %self.peer, "{err}");
                if let Err(e) = self.close(reason).await {
                    debug!(connection = %self.id, "close frame not delivered: {e}");
                }
            }
            None => {
                debug!(connection = %self.id, "link failure: {err}");
                self.closed.send_replace(true);
            }
        }
    }

    async fn handle_unassigned(
        self: &Arc<Self>,
        space: &Space,
        msg: &Message,
    ) -> Result<(), ConnectionError> {
        match msg.payload() {
            Some(Payload::Setup(setup)) if *msg.action() == Action::Setup => {
                self.handle_setup(space, setup).await
            }
            _ => Err(ConnectionError::Protocol(format!(
                "expected setup, got '{}'",
                msg.action()
            ))),
        }
    }

    async fn handle_setup(self: &Arc<Self>, space: &Space, setup: &Setup) -> Result<(), ConnectionError> {
        if setup.kind == ConnectionType::Unknown {
            return Err(ConnectionError::InvalidType);
        }

        space
            .authenticator()
            .verify(&setup.password, space.password())
            .await
            .map_err(|_| ConnectionError::Password)?;

        let role = match setup.kind {
            ConnectionType::Server if setup.name.is_empty() => {
                return Err(ConnectionError::MissingServerName)
            }
            ConnectionType::Server => Role::server(
                setup.name.clone(),
                PasswordDigest::of(&setup.server_password),
            ),
            ConnectionType::Client => Role::client(setup.name.clone()),
            ConnectionType::Unknown => return Err(ConnectionError::InvalidType),
        };

        // The acknowledgement goes out under the write lock, so no frame
        // routed to this connection by another task can overtake it.
        let mut sink = self.sink.lock().await;
        if self.is_closed() {
            return Ok(());
        }
        space.assign_role(self, role).await?;
        info!(
            connection = %self.id,
            space = space.name(),
            role = ?setup.kind,
            name = %setup.name,
            "setup complete"
        );
        let ok = Message::ok().encode()?.into_owned();
        sink.send_text(ok).await?;
        Ok(())
    }

    /// Installs `role` if none is assigned yet.
    pub(crate) async fn install_role(&self, role: Role) -> Result<(), ConnectionError> {
        let mut current = self.role.lock().await;
        match *current {
            Role::Unassigned => {
                *current = role;
                Ok(())
            }
            _ => Err(ConnectionError::Protocol("role already assigned".to_string())),
        }
    }

    async fn handle_server(&self, msg: &Message) -> Result<(), ConnectionError> {
        if *msg.action() == Action::Setup {
            return Err(ConnectionError::Protocol(
                "setup on a server connection".to_string(),
            ));
        }

        let Some(destination) = msg.destination() else {
            debug!(connection = %self.id, action = %msg.action(), "server frame without destination ignored");
            return Ok(());
        };

        let target = {
            let role = self.role.lock().await;
            match &*role {
                Role::Server(server) => server.clients.get(destination).cloned(),
                _ => None,
            }
        };

        match target {
            Some(client) => {
                if let Err(e) = client.send(msg).await {
                    debug!(connection = %self.id, destination, "relay to client failed: {e}");
                }
            }
            None => {
                debug!(connection = %self.id, destination, "no client with that name; frame dropped");
            }
        }
        Ok(())
    }

    async fn handle_client(
        self: &Arc<Self>,
        space: &Space,
        msg: &Message,
    ) -> Result<(), ConnectionError> {
        match msg.action() {
            Action::Setup => Err(ConnectionError::Protocol(
                "setup on a client connection".to_string(),
            )),
            Action::Connect => match msg.payload() {
                Some(Payload::Connect(connect)) => self.handle_connect(space, connect).await,
                _ => Err(ConnectionError::Protocol("connect without payload".to_string())),
            },
            _ => self.forward_to_server(msg).await,
        }
    }

    async fn handle_connect(
        self: &Arc<Self>,
        space: &Space,
        connect: &Connect,
    ) -> Result<(), ConnectionError> {
        if self.paired_server().await.is_some() {
            return Err(ConnectionError::Protocol(
                "client is already paired".to_string(),
            ));
        }
        let name = self.display_name().await.unwrap_or_default();
        if name.is_empty() {
            return Err(ConnectionError::Protocol(
                "clients need a name to connect".to_string(),
            ));
        }

        let Some(server) = space.find_connection(RoleKind::Server, &connect.server).await else {
            info!(connection = %self.id, server = %connect.server, "connect to unknown server");
            self.send(&Message::status(Status::ServerNotFound)).await?;
            return Ok(());
        };

        match server
            .attach_client(space.authenticator(), &name, &connect.password, Arc::clone(self))
            .await
        {
            Ok(()) => {}
            Err(AttachError::PasswordMismatch) => return Err(ConnectionError::Password),
            Err(AttachError::NameConflict(_)) => {
                info!(connection = %self.id, server = %connect.server, name, "client name already attached");
                self.send(&Message::status(Status::NameConflict)).await?;
                return Ok(());
            }
            Err(e @ (AttachError::ServerGone | AttachError::NotAServer)) => {
                return Err(ConnectionError::Protocol(format!("attachment failed: {e}")));
            }
        }

        // Server-side map is updated; now the back-reference.
        self.set_paired_server(&server).await;
        if !server.has_client(&name, self.id).await {
            self.clear_pairing(server.id).await;
            return Err(ConnectionError::Protocol(
                "server went away during attachment".to_string(),
            ));
        }

        info!(connection = %self.id, server = %connect.server, name, "client paired");
        if let Err(e) = server.send(&Message::client_connect(name.as_str(), true)).await {
            debug!(connection = %server.id, "client_connect notice not delivered: {e}");
        }
        self.send(&Message::status(Status::Connected)).await?;
        Ok(())
    }

    async fn forward_to_server(&self, msg: &Message) -> Result<(), ConnectionError> {
        let Some(server) = self.paired_server().await else {
            self.send(&Message::status(Status::NotConnected)).await?;
            return Ok(());
        };
        if let Err(e) = server.send(msg).await {
            debug!(connection = %self.id, "relay to server failed: {e}");
            self.clear_pairing(server.id).await;
            self.send(&Message::status(Status::NotConnected)).await?;
        }
        Ok(())
    }

    // ── Pairing (server side is the authority) ────────────────────────────────

    /// Registers `client` under `name`, after checking `password` against
    /// this server's digest with the login delay.
    ///
    /// # Errors
    ///
    /// See [`AttachError`].  On error nothing is changed.
    pub async fn attach_client(
        &self,
        auth: &Authenticator,
        name: &str,
        password: &str,
        client: Arc<Connection>,
    ) -> Result<(), AttachError> {
        let digest = {
            let role = self.role.lock().await;
            match &*role {
                Role::Server(server) if !server.gone => server.password,
                Role::Server(_) => return Err(AttachError::ServerGone),
                _ => return Err(AttachError::NotAServer),
            }
        };

        auth.verify(password, &digest)
            .await
            .map_err(|_| AttachError::PasswordMismatch)?;

        let mut role = self.role.lock().await;
        let Role::Server(server) = &mut *role else {
            return Err(AttachError::NotAServer);
        };
        if server.gone || self.is_closed() {
            return Err(AttachError::ServerGone);
        }
        match server.clients.entry(name.to_owned()) {
            Entry::Occupied(_) => Err(AttachError::NameConflict(name.to_owned())),
            Entry::Vacant(slot) => {
                slot.insert(client);
                Ok(())
            }
        }
    }

    /// Removes `name` if it still maps to the connection `client_id`.
    pub async fn detach_client(&self, name: &str, client_id: ConnectionId) -> bool {
        let mut role = self.role.lock().await;
        let Role::Server(server) = &mut *role else {
            return false;
        };
        match server.clients.get(name) {
            Some(existing) if existing.id == client_id => {
                server.clients.remove(name);
                true
            }
            _ => false,
        }
    }

    async fn has_client(&self, name: &str, client_id: ConnectionId) -> bool {
        let role = self.role.lock().await;
        match &*role {
            Role::Server(server) => server
                .clients
                .get(name)
                .is_some_and(|c| c.id == client_id),
            _ => false,
        }
    }

    async fn set_paired_server(&self, server: &Arc<Connection>) {
        if let Role::Client(client) = &mut *self.role.lock().await {
            client.server = Some(Arc::downgrade(server));
        }
    }

    /// Clears the back-reference if it points at `server_id` or at nothing.
    async fn clear_pairing(&self, server_id: ConnectionId) {
        if let Role::Client(client) = &mut *self.role.lock().await {
            let points_at_server = client
                .server
                .as_ref()
                .map(|w| w.upgrade().map_or(true, |s| s.id == server_id))
                .unwrap_or(false);
            if points_at_server {
                client.server = None;
            }
        }
    }

    // ── Teardown ──────────────────────────────────────────────────────────────

    /// Runs the cascade after the link ended.  Only the first call acts.
    ///
    /// - Server: every attached client is told `server_disappeared` and
    ///   unpaired.
    /// - Client: the attached server drops the entry and is told
    ///   `client_connect{connect:false}`.
    ///
    /// Notices are best effort; failures are logged.
    pub async fn teardown(self: &Arc<Self>) {
        if self.torn_down.swap(true, Ordering::SeqCst) {
            return;
        }
        self.closed.send_replace(true);

        enum Cascade {
            Nothing,
            Server(Vec<(String, Arc<Connection>)>),
            Client(String, Option<Arc<Connection>>),
        }

        let cascade = {
            let mut role = self.role.lock().await;
            match &mut *role {
                Role::Unassigned => Cascade::Nothing,
                Role::Server(server) => {
                    server.gone = true;
                    Cascade::Server(server.clients.drain().collect())
                }
                Role::Client(client) => Cascade::Client(
                    client.name.clone(),
                    client.server.take().and_then(|w| w.upgrade()),
                ),
            }
        };

        match cascade {
            Cascade::Nothing | Cascade::Client(_, None) => {}
            Cascade::Server(clients) => {
                for (name, client) in clients {
                    client.clear_pairing(self.id).await;
                    if let Err(e) = client.send(&Message::status(Status::ServerDisappeared)).await {
                        debug!(connection = %self.id, client = %name, "server_disappeared not delivered: {e}");
                    }
                }
            }
            Cascade::Client(name, Some(server)) => {
                if server.detach_client(&name, self.id).await {
                    if let Err(e) = server.send(&Message::client_connect(name.as_str(), false)).await {
                        debug!(connection = %self.id, server = %server.id, "detach notice not delivered: {e}");
                    }
                }
            }
        }
        debug!(connection = %self.id, age = ?self.age(), "teardown complete");
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
