//! Broker: the fixed set of spaces served by one process.

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::future::join_all;
use thiserror::Error;
use tracing::{info, warn};

use crate::application::space::{Space, SpaceError};
use crate::domain::{BrokerConfig, ConfigError};

/// Errors from broker construction and shutdown.
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// One or more spaces did not shut down cleanly.
    #[error("{failed} space(s) failed to shut down cleanly: {first}")]
    Shutdown { failed: usize, first: SpaceError },
}

/// Owns every [`Space`].  Spaces are created at construction and never
/// added or removed afterwards.
#[derive(Debug)]
pub struct Broker {
    spaces: HashMap<String, Arc<Space>>,
    config: BrokerConfig,
}

impl Broker {
    /// Validates `config` and creates one empty space per entry.
    ///
    /// # Errors
    ///
    /// [`BrokerError::Config`] for invalid or duplicate space names.
    pub fn new(config: BrokerConfig) -> Result<Self, BrokerError> {
        config.validate()?;
        let spaces = config
            .spaces
            .iter()
            .map(|space| {
                (
                    space.name.clone(),
                    Arc::new(Space::new(space, config.connection)),
                )
            })
            .collect();
        Ok(Self { spaces, config })
    }

    /// Looks up a space by name.
    pub fn space(&self, name: &str) -> Option<Arc<Space>> {
        self.spaces.get(name).cloned()
    }

    /// All spaces, in no particular order.
    pub fn spaces(&self) -> impl Iterator<Item = &Arc<Space>> {
        self.spaces.values()
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    /// Shuts down every space concurrently with `message`.
    ///
    /// # Errors
    ///
    /// [`BrokerError::Shutdown`] carrying the first space failure, after all
    /// spaces have been shut down.
    pub async fn shutdown(&self, message: &str) -> Result<(), BrokerError> {
        info!(spaces = self.spaces.len(), "shutting down broker");
        let results = join_all(self.spaces.values().map(|space| space.shutdown(message))).await;

        let mut failed = 0;
        let mut first = None;
        for result in results {
            if let Err(e) = result {
                warn!("space shutdown failed: {e}");
                failed += 1;
                first.get_or_insert(e);
            }
        }
        match first {
            None => Ok(()),
            Some(first) => Err(BrokerError::Shutdown { failed, first }),
        }
    }
}
