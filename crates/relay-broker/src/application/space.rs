//! Space: one tenant's registry of live connections.
//!
//! A space owns its name, the digest of its shared password, and the set of
//! connections currently attached to it.  Connections are admitted by the
//! session layer after the WebSocket handshake and removed once their link
//! ends.  Server names are unique within a space; the first registrant
//! keeps the name.
//!
//! # Shutdown
//!
//! [`Space::shutdown`] stops admission, snapshots the live set under the
//! lock, then closes every connection concurrently *outside* the lock with
//! close code 1001.  It then waits, bounded, for the sessions to drain.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::future::join_all;
use relay_core::{CloseReason, PasswordDigest};
use thiserror::Error;
use tokio::sync::{Mutex, Notify};
use tracing::{debug, info, warn};

use crate::application::auth::Authenticator;
use crate::application::connection::{Connection, ConnectionError, ConnectionId, Role, RoleKind};
use crate::application::transport::{FrameSink, TransportError};
use crate::domain::{ConnectionSettings, SpaceConfig};

/// Errors from space lifecycle operations.
#[derive(Debug, Error)]
pub enum SpaceError {
    /// The space no longer admits connections.
    #[error("space '{0}' is shutting down")]
    ShuttingDown(String),

    /// One or more close frames could not be delivered during shutdown.
    #[error("{failed} connection(s) failed to close cleanly: {first}")]
    Close {
        failed: usize,
        first: TransportError,
    },
}

#[derive(Default)]
struct SpaceState {
    live: HashMap<ConnectionId, Arc<Connection>>,
    shutting_down: bool,
}

/// A named, password-protected registry of live connections.
pub struct Space {
    name: String,
    password: PasswordDigest,
    authenticator: Authenticator,
    settings: ConnectionSettings,
    state: Mutex<SpaceState>,
    drained: Notify,
}

impl std::fmt::Debug for Space {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Space")
            .field("name", &self.name)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl Space {
    /// Creates an empty space.  The clear-text password is digested here and
    /// not kept.
    pub fn new(config: &SpaceConfig, settings: ConnectionSettings) -> Self {
        Self {
            name: config.name.clone(),
            password: PasswordDigest::of(&config.password),
            authenticator: Authenticator::new(settings.login_delay),
            settings,
            state: Mutex::new(SpaceState::default()),
            drained: Notify::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn password(&self) -> &PasswordDigest {
        &self.password
    }

    pub fn authenticator(&self) -> &Authenticator {
        &self.authenticator
    }

    pub fn settings(&self) -> &ConnectionSettings {
        &self.settings
    }

    /// Registers a new unassigned connection and arms its setup timer.
    ///
    /// # Errors
    ///
    /// [`SpaceError::ShuttingDown`] once [`Space::shutdown`] has begun.
    pub async fn admit(
        &self,
        sink: Box<dyn FrameSink>,
        peer: SocketAddr,
    ) -> Result<Arc<Connection>, SpaceError> {
        let conn = {
            let mut state = self.state.lock().await;
            if state.shutting_down {
                return Err(SpaceError::ShuttingDown(self.name.clone()));
            }
            let conn = Connection::new(peer, sink);
            state.live.insert(conn.id(), Arc::clone(&conn));
            conn
        };
        conn.arm_setup_timer(self.settings.setup_grace_period);
        debug!(space = %self.name, connection = %conn.id(), %peer, "connection admitted");
        Ok(conn)
    }

    /// Drops a connection from the live set.  Removing an unknown id is a
    /// no-op.
    pub async fn remove(&self, id: ConnectionId) {
        let mut state = self.state.lock().await;
        if state.live.remove(&id).is_some() {
            debug!(space = %self.name, connection = %id, remaining = state.live.len(), "connection removed");
        }
        if state.live.is_empty() {
            self.drained.notify_waiters();
        }
    }

    /// Finds the live connection with role `kind` and display name `name`.
    ///
    /// Empty names never match.
    pub async fn find_connection(&self, kind: RoleKind, name: &str) -> Option<Arc<Connection>> {
        if name.is_empty() {
            return None;
        }
        let candidates: Vec<Arc<Connection>> = {
            let state = self.state.lock().await;
            state.live.values().cloned().collect()
        };
        for conn in candidates {
            if conn.is_closed() {
                continue;
            }
            if conn.name_if(kind).await.as_deref() == Some(name) {
                return Some(conn);
            }
        }
        None
    }

    /// Number of connections currently registered.
    pub async fn connection_count(&self) -> usize {
        self.state.lock().await.live.len()
    }

    /// Assigns `role` to `conn`, enforcing unique server names.
    ///
    /// The check and the assignment happen under the registry lock, so two
    /// concurrent registrations of one name cannot both succeed.
    pub(crate) async fn assign_role(
        &self,
        conn: &Arc<Connection>,
        role: Role,
    ) -> Result<(), ConnectionError> {
        let state = self.state.lock().await;
        if let Role::Server(server) = &role {
            let name = server.name();
            for other in state.live.values() {
                if other.id() == conn.id() || other.is_closed() {
                    continue;
                }
                if other.name_if(RoleKind::Server).await.as_deref() == Some(name) {
                    return Err(ConnectionError::DuplicateServerName(name.to_owned()));
                }
            }
        }
        conn.install_role(role).await
    }

    /// Closes every live connection with `message` and code 1001.
    ///
    /// New admissions are refused from the moment this is called.  Close
    /// failures are logged; the first one is returned after all closes have
    /// been attempted.
    ///
    /// # Errors
    ///
    /// [`SpaceError::Close`] if any close frame could not be delivered.
    pub async fn shutdown(&self, message: &str) -> Result<(), SpaceError> {
        let snapshot: Vec<Arc<Connection>> = {
            let mut state = self.state.lock().await;
            state.shutting_down = true;
            state.live.values().cloned().collect()
        };
        info!(space = %self.name, connections = snapshot.len(), "shutting down space");

        let reason = CloseReason::GoingAway(message.to_owned());
        let results = join_all(snapshot.iter().map(|conn| conn.close(reason.clone()))).await;

        let mut failed = 0;
        let mut first = None;
        for (conn, result) in snapshot.iter().zip(results) {
            if let Err(e) = result {
                warn!(space = %self.name, connection = %conn.id(), "close failed: {e}");
                failed += 1;
                first.get_or_insert(e);
            }
        }

        self.wait_drained().await;

        match first {
            None => Ok(()),
            Some(first) => Err(SpaceError::Close { failed, first }),
        }
    }

    async fn wait_drained(&self) {
        let bound = self.settings.close_timeout * 2;
        let drained = async {
            loop {
                let notified = self.drained.notified();
                if self.state.lock().await.live.is_empty() {
                    return;
                }
                notified.await;
            }
        };
        if tokio::time::timeout(bound, drained).await.is_err() {
            let remaining = self.connection_count().await;
            warn!(
                space = %self.name,
                remaining,
                "connections still open after {bound:?}"
            );
        }
    }
}
