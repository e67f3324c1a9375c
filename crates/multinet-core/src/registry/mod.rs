//! Plugin-based record store registry
//!
//! DNS providers register a factory under their type name, and the daemon
//! builds the configured one from `dns.provider.type` without branching on
//! provider names.
//!
//! ## Registration
//!
//! ```rust,ignore
//! // In multinet-provider-cloudflare
//! pub fn register(registry: &ProviderRegistry) {
//!     registry.register_record_store("cloudflare", Box::new(CloudflareFactory));
//! }
//! ```

use crate::config::ProviderConfig;
use crate::error::{Error, Result};
use crate::traits::{RecordStore, RecordStoreFactory};
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

/// Registry of record store factories keyed by provider type name
///
/// Uses interior mutability so registration works through a shared
/// reference.
#[derive(Default)]
pub struct ProviderRegistry {
    record_stores: RwLock<HashMap<String, Box<dyn RecordStoreFactory>>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a record store factory under `name` (e.g. "cloudflare")
    ///
    /// A later registration under the same name replaces the earlier one.
    pub fn register_record_store(
        &self,
        name: impl Into<String>,
        factory: Box<dyn RecordStoreFactory>,
    ) {
        let mut stores = self
            .record_stores
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        stores.insert(name.into(), factory);
    }

    /// Create the record store described by `config`
    ///
    /// # Returns
    ///
    /// - `Ok(Box<dyn RecordStore>)`: Created record store
    /// - `Err(Error::Config)`: No factory registered for the provider type
    /// - `Err(Error)`: The factory rejected the configuration
    pub fn create_record_store(&self, config: &ProviderConfig) -> Result<Box<dyn RecordStore>> {
        let provider_type = config.type_name();
        let stores = self
            .record_stores
            .read()
            .unwrap_or_else(PoisonError::into_inner);

        let factory = stores.get(provider_type).ok_or_else(|| {
            Error::config(format!("Unknown DNS provider type: {}", provider_type))
        })?;

        factory.create(config)
    }

    /// Registered provider type names, sorted
    pub fn list_record_stores(&self) -> Vec<String> {
        let stores = self
            .record_stores
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<String> = stores.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn has_record_store(&self, name: &str) -> bool {
        self.record_stores
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }
}
