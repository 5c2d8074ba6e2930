//! Action-name dispatch to external subsystems.
//!
//! Embedders register one [`SubsystemHook`] per action name (for example
//! `shutdown`, `get-state` or `activate-state`).  [`HookRegistry::dispatch`]
//! looks up the hook for a decoded message's action and activates it.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use relay_core::Message;
use thiserror::Error;
use tracing::debug;

/// Errors registering a hook.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum HookError {
    #[error("a hook is already registered for action '{0}'")]
    Duplicate(String),
}

/// A subsystem that reacts to one action name.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SubsystemHook: Send + Sync {
    /// Activates the subsystem for `action`.
    async fn activate(&self, action: &str) -> anyhow::Result<()>;
}

/// Maps action names to hooks.  At most one hook per action.
#[derive(Default)]
pub struct HookRegistry {
    hooks: HashMap<String, Arc<dyn SubsystemHook>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `hook` for `action`.
    ///
    /// # Errors
    ///
    /// [`HookError::Duplicate`] if `action` already has a hook.  The existing
    /// registration is kept.
    pub fn register(
        &mut self,
        action: impl Into<String>,
        hook: Arc<dyn SubsystemHook>,
    ) -> Result<(), HookError> {
        let action = action.into();
        if self.hooks.contains_key(&action) {
            return Err(HookError::Duplicate(action));
        }
        self.hooks.insert(action, hook);
        Ok(())
    }

    pub fn is_registered(&self, action: &str) -> bool {
        self.hooks.contains_key(action)
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    /// Activates the hook registered for `msg`'s action.
    ///
    /// Returns `Ok(false)` when no hook is registered for the action.
    ///
    /// # Errors
    ///
    /// Whatever the hook returns.
    pub async fn dispatch(&self, msg: &Message) -> anyhow::Result<bool> {
        let action = msg.action().as_str();
        let Some(hook) = self.hooks.get(action) else {
            debug!(action, "no hook registered");
            return Ok(false);
        };
        hook.activate(action).await?;
        Ok(true)
    }
}

impl std::fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut actions: Vec<&str> = self.hooks.keys().map(String::as_str).collect();
        actions.sort_unstable();
        f.debug_struct("HookRegistry").field("actions", &actions).finish()
    }
}
