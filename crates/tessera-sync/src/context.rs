//! The sync context: configuration plus the shared handles built from it.
//!
//! A context owns the hub registry, so everything started from it shares one
//! socket per address. Tests build a fresh context each and call
//! [`SyncContext::reset`] to release their sockets.

use std::path::Path;
use std::sync::Arc;

use tessera_hub::{EventHub, HubRegistry};
use tessera_store::{ComponentRegistry, WorldStore};

use crate::config::SyncConfig;
use crate::engine::SyncEngine;
use crate::error::SyncError;

/// Configuration and shared resources for one synchronization setup.
#[derive(Debug)]
pub struct SyncContext {
    config: SyncConfig,
    components: Arc<ComponentRegistry>,
    hubs: HubRegistry,
}

impl SyncContext {
    /// Create a context with the standard component mapping.
    pub fn new(config: SyncConfig) -> Self {
        Self::with_components(config, ComponentRegistry::standard())
    }

    /// Create a context with a custom component mapping.
    pub fn with_components(config: SyncConfig, components: ComponentRegistry) -> Self {
        Self {
            config,
            components: Arc::new(components),
            hubs: HubRegistry::new(),
        }
    }

    /// Load configuration from `path` (defaults if missing).
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Config`] if the file exists but is invalid.
    pub fn from_file(path: &Path) -> Result<Self, SyncError> {
        Ok(Self::new(SyncConfig::load_or_default(path)?))
    }

    /// The configuration.
    pub const fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// The hub for the configured address, bound on first use.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Hub`] if the socket cannot be bound.
    pub fn hub(&self) -> Result<Arc<EventHub>, SyncError> {
        Ok(self.hubs.get_or_bind(&self.config.hub.to_hub_config())?)
    }

    /// Open the configured store.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Store`] if the connection or migrations fail.
    pub async fn connect_store(&self) -> Result<WorldStore, SyncError> {
        let store = WorldStore::connect(
            &self.config.store.to_store_config(),
            Arc::clone(&self.components),
        )
        .await?;
        Ok(store)
    }

    /// Start an ingestion engine over `store`.
    pub fn start_engine(&self, store: WorldStore) -> SyncEngine {
        SyncEngine::start(&self.config, store)
    }

    /// Stop and forget every hub bound through this context.
    pub fn reset(&self) {
        self.hubs.reset();
        tracing::debug!("Sync context reset");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn ephemeral() -> SyncConfig {
        let mut config = SyncConfig::parse_raw("").unwrap();
        config.hub.bind_addr = "127.0.0.1:0".to_owned();
        config
    }

    #[test]
    fn hub_is_shared_until_reset() {
        let ctx = SyncContext::new(ephemeral());
        let a = ctx.hub().unwrap();
        let b = ctx.hub().unwrap();
        assert!(Arc::ptr_eq(&a, &b));

        ctx.reset();
        let c = ctx.hub().unwrap();
        assert!(!Arc::ptr_eq(&a, &c));
        ctx.reset();
    }

    #[tokio::test]
    async fn connects_default_store() {
        let ctx = SyncContext::new(ephemeral());
        let store = ctx.connect_store().await.unwrap();
        assert_eq!(store.entity_count().await.unwrap(), 0);
        store.close().await;
    }
}
