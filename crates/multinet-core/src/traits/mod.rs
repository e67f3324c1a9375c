//! Core traits for the multinet pipeline
//!
//! This module defines the abstract interfaces of the pipeline's collaborators.
//!
//! - [`MeasurementSource`]: Fetch device measurements
//! - [`RecordStore`]: Replace DNS record sets
//! - [`ArtifactStore`]: Publish the selection result
//! - [`StateStore`]: Persist cross-run state

pub mod measurement_source;
pub mod record_store;
pub mod artifact_store;
pub mod state_store;

pub use measurement_source::MeasurementSource;
pub use record_store::{RecordStore, RecordSetUpdate, ReplaceOutcome, RecordStoreFactory};
pub use artifact_store::ArtifactStore;
pub use state_store::{StateStore, PriorRunState};
