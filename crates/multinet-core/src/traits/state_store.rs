// # State Store Trait
//
// Defines the interface for persisting cross-run state.
//
// ## Purpose
//
// Every run recomputes its selection from scratch. The only memory carried
// from one run to the next is an explicit `PriorRunState` value:
// - When record sets were last written, and with which addresses
//   (cooldown and unchanged-selection gating)
// - The ID of the published result artifact
//
// ## Implementations
//
// - File-based: JSON file with atomic replace (`FileStateStore`)
// - In-memory: tests and one-shot runs (`MemoryStateStore`)

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

use crate::model::LineResult;
use crate::model::LineKey;

/// State handed from one run to the next
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct PriorRunState {
    /// Time of the last run that replaced at least one record set
    #[serde(default)]
    pub last_write: Option<DateTime<Utc>>,

    /// Active addresses per line key as of `last_write`
    #[serde(default)]
    pub last_active: BTreeMap<String, Vec<String>>,

    /// ID of the published result artifact
    #[serde(default)]
    pub artifact_id: Option<String>,
}

impl PriorRunState {
    /// Time elapsed since the last write, if there was one
    pub fn since_last_write(&self, now: DateTime<Utc>) -> Option<chrono::Duration> {
        self.last_write
            .map(|last| now.signed_duration_since(last))
    }

    /// Active address lists of a selection, keyed like `last_active`
    pub fn active_snapshot(selected: &BTreeMap<LineKey, LineResult>) -> BTreeMap<String, Vec<String>> {
        selected
            .iter()
            .filter(|(_, result)| !result.active.is_empty())
            .map(|(key, result)| (key.to_string(), result.active_addresses()))
            .collect()
    }

    /// Remember a successful write of `selected` at `now`
    pub fn record_write(&mut self, now: DateTime<Utc>, selected: &BTreeMap<LineKey, LineResult>) {
        self.last_write = Some(now);
        self.last_active = Self::active_snapshot(selected);
    }
}

/// Trait for state store implementations
///
/// # Trust Level: Trusted (Core Component)
///
/// State stores may perform I/O for persistence but hold no business logic:
/// deciding whether to update belongs to the update gate.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Load the state left by the previous run
    ///
    /// A store that has never been written returns `PriorRunState::default()`.
    async fn load(&self) -> Result<PriorRunState, crate::Error>;

    /// Persist the state for the next run
    async fn save(&self, state: &PriorRunState) -> Result<(), crate::Error>;
}
