// # Record Store Trait
//
// Defines the interface for replacing DNS record sets via provider APIs.
//
// ## Implementations
//
// - Cloudflare: `multinet-provider-cloudflare` crate
//
// ## Usage
//
// ```rust,ignore
// use multinet_core::traits::{RecordStore, RecordSetUpdate};
// use multinet_core::IpVersion;
//
// let store = /* RecordStore implementation */;
// store.replace_record_set(&RecordSetUpdate {
//     operator: "cu".to_string(),
//     ip_version: IpVersion::V4,
//     record_set_id: "cu.fast.example.com".to_string(),
//     addresses: vec!["1.1.1.1".to_string(), "1.0.0.1".to_string()],
//     ttl: 300,
// }).await?;
// ```

use async_trait::async_trait;

use crate::model::IpVersion;

/// One full-replace request for a record set
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordSetUpdate {
    /// Carrier the record set serves
    pub operator: String,
    /// Decides the record type (A or AAAA)
    pub ip_version: IpVersion,
    /// Provider-specific record set identifier
    pub record_set_id: String,
    /// Desired addresses, in rank order
    pub addresses: Vec<String>,
    /// TTL in seconds
    pub ttl: u32,
}

impl RecordSetUpdate {
    /// DNS record type of this record set
    pub fn record_type(&self) -> &'static str {
        self.ip_version.record_type()
    }
}

/// Result of a record set replacement
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplaceOutcome {
    /// The record set content changed
    Replaced {
        /// Addresses held before the replacement, when the provider reports them
        previous: Option<Vec<String>>,
    },
    /// The record set already held exactly the desired addresses
    Unchanged,
}

/// Trait for record store implementations
///
/// # Full replace
///
/// After a successful call the record set holds exactly
/// `update.addresses`: no merge with previous content. Replacing a record set
/// with identical content must be harmless, which makes repeated
/// reconciliation idempotent.
///
/// # Atomicity
///
/// From the caller's point of view a call either succeeds or fails. There is
/// no partial success to report.
///
/// # Retries
///
/// Record stores do not retry. A failure aborts the reconciliation run.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Replace the content of a record set
    ///
    /// # Returns
    ///
    /// - `Ok(ReplaceOutcome)`: The record set now equals `update.addresses`
    /// - `Err(Error)`: The update failed
    async fn replace_record_set(
        &self,
        update: &RecordSetUpdate,
    ) -> Result<ReplaceOutcome, crate::Error>;

    /// Get the provider name (for logging/debugging)
    fn provider_name(&self) -> &'static str;
}

/// Helper trait for constructing record stores from configuration
pub trait RecordStoreFactory: Send + Sync {
    /// Create a RecordStore instance from configuration
    fn create(
        &self,
        config: &crate::config::ProviderConfig,
    ) -> Result<Box<dyn RecordStore>, crate::Error>;
}
