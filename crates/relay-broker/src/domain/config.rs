//! Broker configuration types.
//!
//! [`BrokerConfig`] is the single source of truth for all runtime settings.
//! It is built from an optional TOML file, then overridden by command-line
//! flags (see `main.rs`), or constructed directly in tests.
//!
//! # TOML schema
//!
//! ```toml
//! bind_address = "0.0.0.0:8080"
//! login_delay_ms = 2000
//! setup_grace_secs = 10
//! close_timeout_ms = 1000
//!
//! [[spaces]]
//! name = "nursery"
//! password = "change-me"
//! ```
//!
//! Every field is optional.  Missing fields take the defaults listed on
//! [`BrokerConfig::default`] and [`ConnectionSettings::default`].

use std::collections::HashSet;
use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

/// Error type for configuration parsing and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// The bind address is not a valid `ip:port` pair.
    #[error("invalid bind address: '{0}'")]
    InvalidAddress(String),

    /// A space name is empty or contains characters that cannot appear in a
    /// single URL path segment.
    #[error("invalid space name: '{0}'")]
    InvalidSpaceName(String),

    /// Two spaces share a name.
    #[error("duplicate space name: '{0}'")]
    DuplicateSpace(String),

    /// A `--space` flag was not in `name:password` form.
    #[error("space must be given as name:password, got '{0}'")]
    InvalidSpaceSpec(String),
}

// ── Space ─────────────────────────────────────────────────────────────────────

/// One tenant: a name (which is also its URL path) and its shared password.
#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct SpaceConfig {
    pub name: String,
    pub password: String,
}

impl SpaceConfig {
    pub fn new(name: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for SpaceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpaceConfig")
            .field("name", &self.name)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl FromStr for SpaceConfig {
    type Err = ConfigError;

    /// Parses `name:password`.  The password may itself contain colons.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            Some((name, password)) if !name.is_empty() => Ok(Self::new(name, password)),
            _ => Err(ConfigError::InvalidSpaceSpec(s.to_string())),
        }
    }
}

// ── Per-connection timing ─────────────────────────────────────────────────────

/// Timing knobs shared by every connection in every space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionSettings {
    /// Fixed delay before every password comparison.
    ///
    /// Bounds the rate at which a single connection can guess passwords,
    /// independent of how fast the comparison itself is.
    pub login_delay: Duration,

    /// How long a fresh connection may stay without a valid setup before it
    /// is closed with "invalid type".
    pub setup_grace_period: Duration,

    /// How long to wait for the peer's close acknowledgement after the
    /// broker sent a close frame, and the bound on shutdown draining.
    pub close_timeout: Duration,
}

impl Default for ConnectionSettings {
    /// | Field              | Default  |
    /// |--------------------|----------|
    /// | login_delay        | 2 s      |
    /// | setup_grace_period | 10 s     |
    /// | close_timeout      | 1 s      |
    fn default() -> Self {
        Self {
            login_delay: Duration::from_secs(2),
            setup_grace_period: Duration::from_secs(10),
            close_timeout: Duration::from_secs(1),
        }
    }
}

// ── Broker ────────────────────────────────────────────────────────────────────

/// All runtime configuration for the broker.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Address the WebSocket listener binds to.  Port `0` picks a free port.
    pub bind_addr: SocketAddr,

    /// The spaces this broker serves.  Fixed after startup.
    pub spaces: Vec<SpaceConfig>,

    /// Timing knobs applied to every connection.
    pub connection: ConnectionSettings,
}

impl Default for BrokerConfig {
    /// Binds `0.0.0.0:8080` with no spaces and default connection settings.
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            spaces: Vec::new(),
            connection: ConnectionSettings::default(),
        }
    }
}

/// Serde shape of the TOML file.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    bind_address: Option<String>,
    login_delay_ms: Option<u64>,
    setup_grace_secs: Option<u64>,
    close_timeout_ms: Option<u64>,
    #[serde(default)]
    spaces: Vec<SpaceConfig>,
}

impl BrokerConfig {
    /// Parses a TOML document, filling missing fields with defaults.
    ///
    /// The result is validated with [`BrokerConfig::validate`].
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] for unparseable TOML, an invalid bind address,
    /// or invalid/duplicate space names.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let file: FileConfig = toml::from_str(text)?;
        let defaults = BrokerConfig::default();

        let bind_addr = match file.bind_address {
            Some(addr) => addr
                .parse::<SocketAddr>()
                .map_err(|_| ConfigError::InvalidAddress(addr.clone()))?,
            None => defaults.bind_addr,
        };

        let mut connection = defaults.connection;
        if let Some(ms) = file.login_delay_ms {
            connection.login_delay = Duration::from_millis(ms);
        }
        if let Some(secs) = file.setup_grace_secs {
            connection.setup_grace_period = Duration::from_secs(secs);
        }
        if let Some(ms) = file.close_timeout_ms {
            connection.close_timeout = Duration::from_millis(ms);
        }

        let config = Self {
            bind_addr,
            spaces: file.spaces,
            connection,
        };
        config.validate()?;
        Ok(config)
    }

    /// Checks that every space name is a usable, unique URL path segment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidSpaceName`] or
    /// [`ConfigError::DuplicateSpace`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for space in &self.spaces {
            if space.name.is_empty()
                || space
                    .name
                    .chars()
                    .any(|c| c == '/' || c == '?' || c == '#' || c.is_whitespace())
            {
                return Err(ConfigError::InvalidSpaceName(space.name.clone()));
            }
            if !seen.insert(space.name.as_str()) {
                return Err(ConfigError::DuplicateSpace(space.name.clone()));
            }
        }
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
