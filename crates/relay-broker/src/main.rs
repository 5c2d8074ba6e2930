//! Relay broker: entry point.
//!
//! Headless servers and remote clients both dial out to this process over
//! WebSocket, authenticate against a per-space password, and get paired so
//! that their JSON messages are relayed between them.
//!
//! # Usage
//!
//! ```text
//! relay-broker [OPTIONS]
//!
//! Options:
//!   --config <FILE>             TOML config file
//!   --bind <ADDR>               Listen address [default: 0.0.0.0:8080]
//!   --space <NAME:PASSWORD>     Add a space (repeatable)
//!   --login-delay-ms <MS>       Delay before every password check
//!   --setup-grace-secs <SECS>   Time allowed before a valid setup
//!   --close-timeout-ms <MS>     Wait for a peer's close acknowledgement
//! ```
//!
//! # Environment variable overrides
//!
//! | Variable                  | Flag                 |
//! |---------------------------|----------------------|
//! | `RELAY_CONFIG`            | `--config`           |
//! | `RELAY_BIND`              | `--bind`             |
//! | `RELAY_SPACES`            | `--space` (comma-separated) |
//! | `RELAY_LOGIN_DELAY_MS`    | `--login-delay-ms`   |
//! | `RELAY_SETUP_GRACE_SECS`  | `--setup-grace-secs` |
//! | `RELAY_CLOSE_TIMEOUT_MS`  | `--close-timeout-ms` |
//!
//! Flags override values from the config file; spaces from both sources are
//! combined.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use relay_broker::domain::{BrokerConfig, SpaceConfig};
use relay_broker::{start, Broker};

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Rendezvous broker pairing headless servers with remote clients.
#[derive(Debug, Parser)]
#[command(
    name = "relay-broker",
    about = "Rendezvous broker pairing headless servers with remote clients over WebSocket",
    version
)]
struct Cli {
    /// TOML configuration file.  Flags override its values.
    #[arg(long, env = "RELAY_CONFIG")]
    config: Option<PathBuf>,

    /// Address to listen on, as `ip:port`.
    #[arg(long, env = "RELAY_BIND")]
    bind: Option<SocketAddr>,

    /// A space to serve, as `name:password`.  May be repeated.
    #[arg(long = "space", env = "RELAY_SPACES", value_delimiter = ',')]
    spaces: Vec<SpaceConfig>,

    /// Delay in milliseconds before every password comparison.
    #[arg(long, env = "RELAY_LOGIN_DELAY_MS")]
    login_delay_ms: Option<u64>,

    /// Seconds a new connection may go without a valid setup.
    #[arg(long, env = "RELAY_SETUP_GRACE_SECS")]
    setup_grace_secs: Option<u64>,

    /// Milliseconds to wait for a peer's close acknowledgement.
    #[arg(long, env = "RELAY_CLOSE_TIMEOUT_MS")]
    close_timeout_ms: Option<u64>,
}

impl Cli {
    /// Builds the broker configuration: file first, then flag overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file cannot be read or parsed, or if
    /// the combined space list is invalid.
    fn into_broker_config(self) -> anyhow::Result<BrokerConfig> {
        let mut config = match &self.config {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("failed to read config file {}", path.display()))?;
                BrokerConfig::from_toml_str(&text)
                    .with_context(|| format!("invalid config file {}", path.display()))?
            }
            None => BrokerConfig::default(),
        };

        if let Some(bind) = self.bind {
            config.bind_addr = bind;
        }
        config.spaces.extend(self.spaces);
        if let Some(ms) = self.login_delay_ms {
            config.connection.login_delay = Duration::from_millis(ms);
        }
        if let Some(secs) = self.setup_grace_secs {
            config.connection.setup_grace_period = Duration::from_secs(secs);
        }
        if let Some(ms) = self.close_timeout_ms {
            config.connection.close_timeout = Duration::from_millis(ms);
        }

        config.validate().context("invalid space configuration")?;
        Ok(config)
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // RUST_LOG wins; otherwise `info`.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Cli::parse().into_broker_config()?;
    if config.spaces.is_empty() {
        warn!("no spaces configured; every connection will be rejected");
    }
    info!(
        "relay broker starting: bind={}, spaces={}",
        config.bind_addr,
        config.spaces.len()
    );

    let broker = Broker::new(config)?;
    let handle = start(broker).await?;

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl+C")?;
    info!("received Ctrl+C; initiating graceful shutdown");

    handle.stop().await?;
    info!("relay broker stopped");
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
