//! Process-wide hub lookup, keyed by bind address.
//!
//! Every component that needs the hub for an address shares one socket and
//! one listener thread. The registry is owned by the sync context rather
//! than being a global, so tests get a fresh one and can [`reset`] it.
//!
//! [`reset`]: HubRegistry::reset

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use crate::error::HubError;
use crate::hub::{EventHub, HubConfig};

/// Bound hubs by configured address.
#[derive(Debug, Default)]
pub struct HubRegistry {
    hubs: Mutex<HashMap<String, Arc<EventHub>>>,
}

impl HubRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the hub bound to `config.bind_addr`, binding it on first use.
    ///
    /// Later calls for the same address return the existing hub and ignore
    /// the rest of `config`.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Transport`] if the first bind fails.
    pub fn get_or_bind(&self, config: &HubConfig) -> Result<Arc<EventHub>, HubError> {
        let mut hubs = self.hubs.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(hub) = hubs.get(&config.bind_addr) {
            return Ok(Arc::clone(hub));
        }
        let hub = Arc::new(EventHub::bind(config.clone())?);
        hubs.insert(config.bind_addr.clone(), Arc::clone(&hub));
        Ok(hub)
    }

    /// The hub registered for `bind_addr`, if any.
    pub fn get(&self, bind_addr: &str) -> Option<Arc<EventHub>> {
        self.hubs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(bind_addr)
            .map(Arc::clone)
    }

    /// Number of registered hubs.
    pub fn len(&self) -> usize {
        self.hubs.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Whether no hub is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stop and forget every hub.
    pub fn reset(&self) {
        let drained: Vec<_> = self
            .hubs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .collect();
        for (addr, hub) in drained {
            hub.stop();
            tracing::debug!(%addr, "Hub released");
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn first_call_binds_later_calls_share() {
        let registry = HubRegistry::new();
        let config = HubConfig::new("127.0.0.1:0");

        let a = registry.get_or_bind(&config).unwrap();
        let b = registry.get_or_bind(&config).unwrap();

        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.len(), 1);
        assert!(registry.get("127.0.0.1:0").is_some());
    }

    #[test]
    fn reset_stops_and_forgets_hubs() {
        let registry = HubRegistry::new();
        let hub = registry.get_or_bind(&HubConfig::new("127.0.0.1:0")).unwrap();
        hub.run().unwrap();

        registry.reset();

        assert!(registry.is_empty());
        assert!(!hub.is_running());
    }

    #[test]
    fn bind_failure_is_not_cached() {
        let registry = HubRegistry::new();
        let bad = HubConfig::new("256.0.0.1:1");
        assert!(matches!(
            registry.get_or_bind(&bad),
            Err(HubError::Transport { .. })
        ));
        assert!(registry.is_empty());
    }
}
