// # multinet-core
//
// Core library for multi-line address selection and DNS reconciliation.
//
// ## Architecture Overview
//
// A run turns per-device probe measurements into per-carrier DNS record sets
// and a published summary:
// - **MeasurementSource**: Trait for fetching raw measurements
// - **aggregate / Selector**: Pure grouping, gating, scoring and ranking
// - **Reconciler**: Writes active sets through a **RecordStore**
// - **ArtifactStore**: Trait for publishing the selection
// - **StateStore**: Trait for the memory carried between runs
// - **Controller**: Orchestrates one batch end to end
// - **ProviderRegistry**: Plugin-based registry for record stores
//
// ## Design Principles
//
// 1. **Pure core**: Selection and result shaping have no I/O
// 2. **Plugin-Based**: Providers are registered dynamically, no hard-coded if-else
// 3. **Library-First**: All core functionality can be used as a library
// 4. **Fail-fast writes**: The first failed record set update aborts the run

pub mod aggregator;
pub mod config;
pub mod controller;
pub mod error;
pub mod gate;
pub mod model;
pub mod publish;
pub mod reconciler;
pub mod registry;
pub mod selector;
pub mod state;
pub mod traits;

// Re-export core types for convenience
pub use aggregator::aggregate;
pub use config::{LineConfig, MultinetConfig, ProviderConfig};
pub use controller::{Controller, ControllerEvent, RunReport};
pub use error::{Error, Result};
pub use gate::{GateDecision, UpdateGate};
pub use model::{IpVersion, LineKey, LineResult, Measurement, SelectedItem};
pub use publish::{PublishableArtifact, build_publishable};
pub use reconciler::Reconciler;
pub use registry::ProviderRegistry;
pub use selector::{Selector, select_top};
pub use state::{FileStateStore, MemoryStateStore};
pub use traits::{ArtifactStore, MeasurementSource, RecordStore, StateStore};
