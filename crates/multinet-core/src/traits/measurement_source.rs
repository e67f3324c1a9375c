// # Measurement Source Trait
//
// Defines the interface for fetching device measurements.
//
// ## Implementations
//
// - GitHub Gist: `multinet-source-gist` crate
//
// ## Usage
//
// ```rust,ignore
// use multinet_core::MeasurementSource;
//
// let source = /* MeasurementSource implementation */;
// let measurements = source.fetch("4f1c0ad9e2").await?;
// ```

use async_trait::async_trait;

use crate::model::Measurement;

/// Trait for measurement source implementations
///
/// A source is addressed by opaque source IDs (one per device upload
/// location). Implementations must be thread-safe.
///
/// # Partial availability
///
/// A stale or empty source is not an error: return `Ok(Vec::new())`.
/// Return `Err` only when the source could not be read at all; the
/// controller logs it and carries on with the remaining sources.
///
/// # Retries
///
/// Transient transport failures are the source's own business. The
/// controller never retries a failed `fetch`.
#[async_trait]
pub trait MeasurementSource: Send + Sync {
    /// Fetch every measurement currently published under `source_id`
    ///
    /// Each returned measurement must carry its operator and IP version.
    async fn fetch(&self, source_id: &str) -> Result<Vec<Measurement>, crate::Error>;

    /// Get the source name (for logging/debugging)
    fn source_name(&self) -> &'static str;
}
