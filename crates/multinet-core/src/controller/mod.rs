//! Run orchestration
//!
//! The Controller drives one batch from raw measurements to DNS and the
//! published artifact:
//!
//! ```text
//! ┌───────────────────┐
//! │ MeasurementSource │── Vec<Measurement> ──┐
//! └───────────────────┘                      │
//!                                            ▼
//!                          aggregate → select_top → UpdateGate
//!                                            │
//!         ┌──────────────────────────────────┼─────────────────────┐
//!         ▼                                  ▼                     ▼
//! ┌──────────────┐                  ┌───────────────┐      ┌─────────────┐
//! │ Reconciler   │                  │ ArtifactStore │      │ StateStore  │
//! │ (DNS write)  │                  │ (publish)     │      │ (next run)  │
//! └──────────────┘                  └───────────────┘      └─────────────┘
//! ```
//!
//! ## Run Flow
//!
//! 1. Fetch every source; a failing source is logged and skipped
//! 2. Aggregate and select; an empty selection ends the run
//! 3. Load the prior run state and evaluate the update gate
//! 4. Reconcile the record store (fail-fast, aborts the run)
//! 5. Publish the artifact (held back while the cooldown blocks DNS writes)
//! 6. Save the run state
//!
//! Adapters are called one at a time; nothing is spawned.

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::aggregator::aggregate;
use crate::config::{LineConfig, MultinetConfig};
use crate::error::{Error, Result};
use crate::gate::{GateDecision, UpdateGate};
use crate::publish::{PublishOptions, build_publishable};
use crate::reconciler::Reconciler;
use crate::selector::Selector;
use crate::traits::{ArtifactStore, MeasurementSource, RecordStore, StateStore};

/// Capacity of the controller event channel
pub const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Events emitted by the Controller
#[derive(Debug, Clone, PartialEq)]
pub enum ControllerEvent {
    /// Run started
    Started { sources: usize },

    /// A source failed and was skipped
    SourceFailed { source_id: String, error: String },

    /// Selection finished
    Selected { lines: usize, active: usize },

    /// Record store left untouched
    UpdateSkipped { decision: GateDecision },

    /// DNS updates are switched off in the configuration
    UpdatesDisabled,

    /// Reconciliation finished
    Reconciled { updated: usize },

    /// Reconciliation aborted
    ReconcileFailed {
        key: String,
        updated: usize,
        error: String,
    },

    /// Artifact published
    Published { artifact_id: String, created: bool },

    /// Run finished
    Finished { nothing_selected: bool },
}

/// Summary of one run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunReport {
    /// Measurements fetched across all sources
    pub measurements: usize,

    /// Sources that failed and were skipped
    pub failed_sources: usize,

    /// Line keys with a non-empty selection
    pub lines_selected: usize,

    /// No line had a qualifying address; nothing was written or published
    pub nothing_selected: bool,

    /// Gate decision, when DNS updates are enabled and a selection exists
    pub gate: Option<GateDecision>,

    /// Record sets replaced or confirmed up to date
    pub updated: usize,

    /// ID of the published artifact, `None` when nothing was published
    pub artifact_id: Option<String>,

    /// The artifact was created during this run
    pub artifact_created: bool,
}

/// Batch orchestrator
///
/// ## Lifecycle
///
/// 1. Create with [`Controller::new()`]
/// 2. Call [`Controller::run_once()`]
/// 3. Drain the event receiver if interested
pub struct Controller {
    /// Measurement source
    source: Box<dyn MeasurementSource>,

    /// Source IDs fetched on every run
    source_ids: Vec<String>,

    /// Record store writer, absent when DNS updates are disabled
    reconciler: Option<Reconciler>,

    /// Destination of the published artifact
    artifact_store: Box<dyn ArtifactStore>,

    /// Cross-run memory
    state_store: Box<dyn StateStore>,

    /// Configured lines, in reconciliation order
    lines: Vec<LineConfig>,

    selector: Selector,
    gate: UpdateGate,
    publish: PublishOptions,

    /// Artifact ID pinned in the configuration
    configured_artifact_id: Option<String>,

    /// Event sender for external monitoring
    event_tx: mpsc::Sender<ControllerEvent>,
}

impl Controller {
    /// Create a new controller
    ///
    /// `record_store` is required when `config.dns.enabled` is set and
    /// ignored otherwise.
    ///
    /// # Returns
    ///
    /// A tuple of (controller, event_receiver)
    pub fn new(
        source: Box<dyn MeasurementSource>,
        record_store: Option<Box<dyn RecordStore>>,
        artifact_store: Box<dyn ArtifactStore>,
        state_store: Box<dyn StateStore>,
        config: &MultinetConfig,
    ) -> Result<(Self, mpsc::Receiver<ControllerEvent>)> {
        config.validate()?;

        let reconciler = if config.dns.enabled {
            let store = record_store.ok_or_else(|| {
                Error::config("DNS updates are enabled but no record store was provided")
            })?;
            Some(Reconciler::new(store, config.dns.ttl))
        } else {
            None
        };

        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        let controller = Self {
            source,
            source_ids: config.gist.device_gists.clone(),
            reconciler,
            artifact_store,
            state_store,
            lines: config.dns.lines.clone(),
            selector: Selector::new(config.scoring, config.thresholds)
                .with_policy(config.selection.candidate_policy),
            gate: UpdateGate::new(config.gate.clone()),
            publish: PublishOptions::from_config(config),
            configured_artifact_id: config.gist.result_gist_id().map(str::to_string),
            event_tx: tx,
        };

        Ok((controller, rx))
    }

    /// Run one batch
    ///
    /// # Returns
    ///
    /// - `Ok(RunReport)`: The run completed, possibly with nothing selected or
    ///   with DNS writes and publication held back by the cooldown
    /// - `Err(Error::NoMeasurements)`: No source produced any measurement
    /// - `Err(Error::Reconcile { .. })`: A record set update failed; nothing
    ///   was published
    /// - `Err(Error)`: Publication or state persistence failed
    pub async fn run_once(&self, now: DateTime<Utc>) -> Result<RunReport> {
        let mut report = RunReport::default();

        self.emit_event(ControllerEvent::Started {
            sources: self.source_ids.len(),
        });

        // Step 1: fetch
        let mut measurements = Vec::new();
        for source_id in &self.source_ids {
            match self.source.fetch(source_id).await {
                Ok(batch) => {
                    debug!(
                        "{} {}: {} measurements",
                        self.source.source_name(),
                        source_id,
                        batch.len()
                    );
                    measurements.extend(batch);
                }
                Err(e) => {
                    warn!("Skipping source {}: {}", source_id, e);
                    report.failed_sources += 1;
                    self.emit_event(ControllerEvent::SourceFailed {
                        source_id: source_id.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }

        report.measurements = measurements.len();
        info!(
            "Fetched {} measurements from {} source(s) ({} failed)",
            report.measurements,
            self.source_ids.len(),
            report.failed_sources
        );
        if measurements.is_empty() {
            return Err(Error::NoMeasurements);
        }

        // Step 2: aggregate and select
        let aggregated = aggregate(measurements);
        let selected = self.selector.select_top(&aggregated, &self.lines);

        report.lines_selected = selected.len();
        let active: usize = selected.values().map(|r| r.active.len()).sum();
        self.emit_event(ControllerEvent::Selected {
            lines: selected.len(),
            active,
        });

        if selected.is_empty() {
            warn!("No line has a qualifying address, nothing to update or publish");
            report.nothing_selected = true;
            self.emit_event(ControllerEvent::Finished {
                nothing_selected: true,
            });
            return Ok(report);
        }
        info!("Selected {} active address(es) over {} line(s)", active, selected.len());

        // Step 3: prior state and gate
        let mut state = self.state_store.load().await?;

        // Step 4: reconcile
        match &self.reconciler {
            None => {
                info!("DNS updates disabled, skipping reconciliation");
                self.emit_event(ControllerEvent::UpdatesDisabled);
            }
            Some(reconciler) => {
                let decision = self.gate.evaluate(&state, &selected, now);
                report.gate = Some(decision);

                match decision {
                    GateDecision::Proceed => {
                        match reconciler.reconcile(&selected, &self.lines).await {
                            Ok(updated) => {
                                info!(
                                    "Reconciled {} record set(s) via {}",
                                    updated,
                                    reconciler.provider_name()
                                );
                                report.updated = updated;
                                self.emit_event(ControllerEvent::Reconciled { updated });
                            }
                            Err(e) => {
                                error!("Reconciliation failed, not publishing: {}", e);
                                if let Error::Reconcile { key, updated, .. } = &e {
                                    self.emit_event(ControllerEvent::ReconcileFailed {
                                        key: key.clone(),
                                        updated: *updated,
                                        error: e.to_string(),
                                    });
                                }
                                return Err(e);
                            }
                        }
                    }
                    GateDecision::Cooldown { remaining_secs } => {
                        info!(
                            "Last DNS write too recent, skipping reconciliation ({}s remaining)",
                            remaining_secs
                        );
                        self.emit_event(ControllerEvent::UpdateSkipped { decision });

                        // Published active sets must match what DNS holds
                        info!("Publication deferred until the cooldown ends");
                        self.emit_event(ControllerEvent::Finished {
                            nothing_selected: false,
                        });
                        return Ok(report);
                    }
                    GateDecision::Unchanged => {
                        info!("Active sets unchanged since last write, skipping reconciliation");
                        self.emit_event(ControllerEvent::UpdateSkipped { decision });
                    }
                }
            }
        }

        // Step 5: publish
        let artifact = build_publishable(&selected, &self.publish, now);
        let existing_id = self
            .configured_artifact_id
            .as_deref()
            .or(state.artifact_id.as_deref());

        let artifact_id = self
            .artifact_store
            .create_or_update(existing_id, &artifact)
            .await?;
        let created = existing_id != Some(artifact_id.as_str());
        if created {
            warn!(
                "ACTION REQUIRED: created result artifact {}; set gist.result_gist_id to pin it",
                artifact_id
            );
        } else {
            info!("Updated result artifact {}", artifact_id);
        }
        self.emit_event(ControllerEvent::Published {
            artifact_id: artifact_id.clone(),
            created,
        });

        // Step 6: remember this run
        if report.updated > 0 {
            state.record_write(now, &selected);
        }
        state.artifact_id = Some(artifact_id.clone());
        if let Err(e) = self.state_store.save(&state).await {
            error!("Failed to save run state: {}", e);
            return Err(e);
        }

        report.artifact_id = Some(artifact_id);
        report.artifact_created = created;

        self.emit_event(ControllerEvent::Finished {
            nothing_selected: false,
        });
        Ok(report)
    }

    /// Emit a controller event, dropping it when the channel is full
    fn emit_event(&self, event: ControllerEvent) {
        match self.event_tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("Event channel full, dropping event");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("Event receiver dropped, discarding event");
            }
        }
    }
}
