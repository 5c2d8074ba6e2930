//! Domain layer for relay-broker.
//!
//! Pure configuration types.  Reading files and parsing command-line flags
//! happens at the edges; everything here can be built by hand in a test.

pub mod config;

pub use config::{BrokerConfig, ConfigError, ConnectionSettings, SpaceConfig};
