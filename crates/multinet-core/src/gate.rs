//! Cross-run update gate
//!
//! Decides whether this run may write record sets, based on what the
//! previous run left in [`PriorRunState`]. During a cooldown the controller
//! also holds back publication, since DNS still serves the previous active
//! sets. An unchanged selection is still published.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

use crate::config::GateConfig;
use crate::model::{LineKey, LineResult};
use crate::traits::PriorRunState;

/// Outcome of [`UpdateGate::evaluate`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    /// Reconcile the record store
    Proceed,

    /// The last write is more recent than the minimum interval
    Cooldown { remaining_secs: u64 },

    /// Every active set equals the one written last time
    Unchanged,
}

impl GateDecision {
    pub fn allows_update(&self) -> bool {
        matches!(self, GateDecision::Proceed)
    }
}

#[derive(Debug, Clone, Default)]
pub struct UpdateGate {
    config: GateConfig,
}

impl UpdateGate {
    pub fn new(config: GateConfig) -> Self {
        Self { config }
    }

    pub fn evaluate(
        &self,
        prior: &PriorRunState,
        selected: &BTreeMap<LineKey, LineResult>,
        now: DateTime<Utc>,
    ) -> GateDecision {
        if self.config.min_update_interval_secs > 0
            && let Some(elapsed) = prior.since_last_write(now)
        {
            let interval = self.config.min_update_interval_secs as i64;
            let elapsed = elapsed.num_seconds();
            if elapsed < interval {
                // A clock that went backwards still waits out a full interval
                let remaining = (interval - elapsed.max(0)) as u64;
                return GateDecision::Cooldown {
                    remaining_secs: remaining,
                };
            }
        }

        if self.config.skip_unchanged
            && prior.last_write.is_some()
            && PriorRunState::active_snapshot(selected) == prior.last_active
        {
            return GateDecision::Unchanged;
        }

        GateDecision::Proceed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{IpVersion, SelectedItem};
    use chrono::Duration;

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2025-03-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn selection(ips: &[&str]) -> BTreeMap<LineKey, LineResult> {
        let active: Vec<SelectedItem> = ips
            .iter()
            .map(|ip| SelectedItem {
                ip: ip.to_string(),
                source_device: "r1".to_string(),
                score: 1.0,
                latency_ms: 1.0,
                download_mbps: 1.0,
                region: String::new(),
            })
            .collect();
        let mut selected = BTreeMap::new();
        selected.insert(
            LineKey::new("cu", IpVersion::V4),
            LineResult {
                operator: "cu".to_string(),
                ip_version: IpVersion::V4,
                candidates: active.clone(),
                active,
            },
        );
        selected
    }

    fn written(minutes_ago: i64, ips: &[&str]) -> PriorRunState {
        let mut prior = PriorRunState::default();
        prior.record_write(now() - Duration::minutes(minutes_ago), &selection(ips));
        prior
    }

    #[test]
    fn first_run_always_proceeds() {
        let gate = UpdateGate::new(GateConfig {
            min_update_interval_secs: 3600,
            skip_unchanged: true,
        });
        let decision = gate.evaluate(&PriorRunState::default(), &selection(&["1.1.1.1"]), now());
        assert_eq!(decision, GateDecision::Proceed);
    }

    #[test]
    fn cooldown_reports_remaining_time() {
        let gate = UpdateGate::new(GateConfig {
            min_update_interval_secs: 600,
            skip_unchanged: false,
        });

        let decision = gate.evaluate(&written(4, &["1.1.1.1"]), &selection(&["2.2.2.2"]), now());
        assert_eq!(decision, GateDecision::Cooldown { remaining_secs: 360 });
        assert!(!decision.allows_update());

        let decision = gate.evaluate(&written(10, &["1.1.1.1"]), &selection(&["2.2.2.2"]), now());
        assert_eq!(decision, GateDecision::Proceed);
    }

    #[test]
    fn zero_interval_disables_cooldown() {
        let gate = UpdateGate::default();
        let decision = gate.evaluate(&written(0, &["1.1.1.1"]), &selection(&["2.2.2.2"]), now());
        assert_eq!(decision, GateDecision::Proceed);
    }

    #[test]
    fn unchanged_only_on_exact_match() {
        let gate = UpdateGate::new(GateConfig {
            min_update_interval_secs: 0,
            skip_unchanged: true,
        });
        let prior = written(60, &["1.1.1.1", "1.0.0.1"]);

        assert_eq!(
            gate.evaluate(&prior, &selection(&["1.1.1.1", "1.0.0.1"]), now()),
            GateDecision::Unchanged
        );
        // Rank order is part of the record content
        assert_eq!(
            gate.evaluate(&prior, &selection(&["1.0.0.1", "1.1.1.1"]), now()),
            GateDecision::Proceed
        );
    }
}
