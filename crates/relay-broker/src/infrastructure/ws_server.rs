//! WebSocket server: accept loop, space routing and broker lifecycle.
//!
//! This module is responsible for:
//!
//! 1. Binding a TCP listener on the configured address.
//! 2. Accepting incoming TCP connections.
//! 3. Upgrading each one to a WebSocket, choosing the space from the request
//!    path (`ws://host:port/<space>`).  Unknown paths get HTTP 404 and never
//!    become connections.  [`LIVENESS_PATH`] gets a plain HTTP 200.
//! 4. Handing the upgraded stream to [`run_connection`] in its own task.
//! 5. Stopping: the accept loop exits once the `running` flag is cleared, and
//!    every space is shut down.
//!
//! Each connection runs in its own Tokio task, so one slow peer (or one
//! peer sitting out its login delay) never blocks the accept loop or any
//! other connection.

use std::net::SocketAddr;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use anyhow::Context;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::timeout;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::Error as WsError;
use tracing::{debug, error, info, warn};

use crate::application::{Broker, BrokerError, Space};
use crate::infrastructure::session::run_connection;

/// Reason text sent to every connection when the broker stops.
pub const SHUTDOWN_MESSAGE: &str = "server is shutting down";

/// Request path answered with a plain `200` instead of an upgrade.
pub const LIVENESS_PATH: &str = "/test";
const LIVENESS_BODY: &str = "hello world";

/// How often the accept loop wakes up to check the `running` flag.
const ACCEPT_POLL: Duration = Duration::from_millis(200);

// ── Public API ────────────────────────────────────────────────────────────────

/// A running broker.  Dropping the handle does not stop it; call
/// [`BrokerHandle::stop`].
#[derive(Debug)]
pub struct BrokerHandle {
    local_addr: SocketAddr,
    running: Arc<AtomicBool>,
    accept_task: JoinHandle<()>,
    broker: Arc<Broker>,
}

impl BrokerHandle {
    /// The address the listener is bound to.  Useful with port `0`.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn broker(&self) -> &Arc<Broker> {
        &self.broker
    }

    /// Stops accepting, then shuts down every space with
    /// [`SHUTDOWN_MESSAGE`].
    ///
    /// # Errors
    ///
    /// The first space shutdown failure, after all spaces were attempted.
    pub async fn stop(self) -> Result<(), BrokerError> {
        self.running.store(false, Ordering::Relaxed);
        let joined = self.accept_task.await;
        if let Err(e) = joined {
            log_accept_failure(e);
        }
        self.broker.shutdown(SHUTDOWN_MESSAGE).await
    }
}

// `JoinError` is not `Sync`; formatting it in a plain fn keeps `stop` `Send`.
fn log_accept_failure(e: JoinError) {
    error!("accept loop ended abnormally: {e}");
}

/// Binds the configured address and starts accepting in the background.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot be bound (e.g., the port is
/// already in use or the process lacks permission to bind).
pub async fn start(broker: Broker) -> anyhow::Result<BrokerHandle> {
    let bind_addr = broker.config().bind_addr;
    let listener = TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("failed to bind WebSocket listener on {bind_addr}"))?;
    let local_addr = listener
        .local_addr()
        .context("failed to read bound listener address")?;

    info!("relay broker listening on {local_addr}");

    let broker = Arc::new(broker);
    let running = Arc::new(AtomicBool::new(true));
    let accept_task = tokio::spawn(run_server(
        listener,
        Arc::clone(&broker),
        Arc::clone(&running),
    ));

    Ok(BrokerHandle {
        local_addr,
        running,
        accept_task,
        broker,
    })
}

// ── Accept loop ───────────────────────────────────────────────────────────────

/// Accepts connections until `running` is cleared.
async fn run_server(listener: TcpListener, broker: Arc<Broker>, running: Arc<AtomicBool>) {
    loop {
        if !running.load(Ordering::Relaxed) {
            info!("shutdown flag set; stopping accept loop");
            break;
        }

        // A short timeout lets the loop notice the flag while idle.
        match timeout(ACCEPT_POLL, listener.accept()).await {
            Ok(Ok((stream, peer))) => {
                debug!("new connection from {peer}");
                let broker = Arc::clone(&broker);
                tokio::spawn(async move {
                    handle_connection(stream, peer, broker).await;
                });
            }
            Ok(Err(e)) => {
                // Transient (e.g. too many open files); keep serving.
                error!("accept error: {e}");
            }
            Err(_) => {}
        }
    }
}

/// Upgrades one TCP stream and runs it inside the space its path names.
async fn handle_connection(stream: TcpStream, peer: SocketAddr, broker: Arc<Broker>) {
    let mut selected: Option<Arc<Space>> = None;
    let route = |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
        let path = request.uri().path();
        if path == LIVENESS_PATH {
            return Err(liveness_response());
        }
        let name = space_name(path);
        match broker.space(name) {
            Some(space) => {
                selected = Some(space);
                Ok(response)
            }
            None => {
                let mut rejection = ErrorResponse::new(Some(format!("unknown space '{name}'")));
                *rejection.status_mut() = StatusCode::NOT_FOUND;
                Err(rejection)
            }
        }
    };

    let ws = match accept_hdr_async(stream, route).await {
        Ok(ws) => ws,
        Err(WsError::Http(answer)) if answer.status() == StatusCode::OK => {
            debug!("answered liveness check from {peer}");
            return;
        }
        Err(e) => {
            warn!("handshake with {peer} failed: {e}");
            return;
        }
    };

    match selected {
        Some(space) => run_connection(space, ws, peer).await,
        None => error!("handshake with {peer} succeeded without selecting a space"),
    }
}

/// Plain HTTP 200 answer for health checks; the upgrade is declined.
fn liveness_response() -> ErrorResponse {
    let mut answer = ErrorResponse::new(Some(LIVENESS_BODY.to_string()));
    *answer.status_mut() = StatusCode::OK;
    answer
}

/// `/nursery` → `nursery`.  The whole path after the leading slash names the
/// space; a single trailing slash is tolerated.  Nested paths keep their
/// inner slashes and so never match a configured space.
fn space_name(path: &str) -> &str {
    let name = path.strip_prefix('/').unwrap_or(path);
    name.strip_suffix('/').unwrap_or(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_space_name_strips_leading_slash() {
        assert_eq!(space_name("/nursery"), "nursery");
    }

    #[test]
    fn test_space_name_tolerates_trailing_slash() {
        assert_eq!(space_name("/nursery/"), "nursery");
    }

    #[test]
    fn test_root_path_names_no_space() {
        assert_eq!(space_name("/"), "");
    }

    #[test]
    fn test_liveness_answer_is_plain_ok_with_body() {
        let answer = liveness_response();
        assert_eq!(answer.status(), StatusCode::OK);
        assert_eq!(answer.body().as_deref(), Some("hello world"));
    }

    #[test]
    fn test_nested_path_is_kept_whole_and_never_matches() {
        // Space names cannot contain '/', so this can never resolve.
        assert_eq!(space_name("/a/b"), "a/b");
    }
}
