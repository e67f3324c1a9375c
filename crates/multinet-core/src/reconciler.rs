//! Record-store reconciliation
//!
//! Writes the active set of every configured line to its record set. Lines
//! are processed in configuration order, IPv4 before IPv6, one call at a
//! time. The first failed update aborts the pass.

use std::collections::BTreeMap;
use tracing::{debug, info, warn};

use crate::config::LineConfig;
use crate::error::{Error, Result};
use crate::model::{IpVersion, LineKey, LineResult};
use crate::traits::{RecordSetUpdate, RecordStore, ReplaceOutcome};

pub struct Reconciler {
    store: Box<dyn RecordStore>,
    ttl: u32,
}

impl Reconciler {
    pub fn new(store: Box<dyn RecordStore>, ttl: u32) -> Self {
        Self { store, ttl }
    }

    pub fn provider_name(&self) -> &'static str {
        self.store.provider_name()
    }

    /// Replace the record set of every selected line with its active set
    ///
    /// # Returns
    ///
    /// - `Ok(n)`: `n` record sets were replaced or already up to date
    /// - `Err(Error::Reconcile { updated, .. })`: an update failed after
    ///   `updated` successful ones; later lines were not attempted
    pub async fn reconcile(
        &self,
        selected: &BTreeMap<LineKey, LineResult>,
        lines: &[LineConfig],
    ) -> Result<usize> {
        let mut updated = 0;

        for line in lines {
            for version in IpVersion::ALL {
                let key = LineKey::new(line.operator.clone(), version);

                let Some(result) = selected.get(&key) else {
                    continue;
                };
                if result.active.is_empty() {
                    debug!("{}: no active addresses, leaving record set untouched", key);
                    continue;
                }

                let Some(record_set_id) = line.record_set_id(version) else {
                    warn!(
                        "{}: no {} record set configured, skipping",
                        key,
                        version.record_type()
                    );
                    continue;
                };

                let update = RecordSetUpdate {
                    operator: line.operator.clone(),
                    ip_version: version,
                    record_set_id: record_set_id.to_string(),
                    addresses: result.active_addresses(),
                    ttl: self.ttl,
                };

                match self.store.replace_record_set(&update).await {
                    Ok(ReplaceOutcome::Replaced { previous }) => {
                        info!(
                            "{}: {} {} -> {:?} (previous: {:?})",
                            key,
                            update.record_type(),
                            update.record_set_id,
                            update.addresses,
                            previous
                        );
                    }
                    Ok(ReplaceOutcome::Unchanged) => {
                        debug!("{}: record set already up to date", key);
                    }
                    Err(e) => {
                        return Err(Error::Reconcile {
                            updated,
                            key: key.to_string(),
                            source: Box::new(e),
                        });
                    }
                }

                updated += 1;
            }
        }

        Ok(updated)
    }
}
