//! Threshold gating, scoring, deduplication and ranking of measurements
//!
//! For every configured line and each IP version the selector:
//!
//! 1. drops measurements failing a threshold (boundaries qualify),
//! 2. scores the rest with the configured linear weights, rounded to 2 decimals,
//! 3. keeps the best-scoring measurement per canonical address (first seen
//!    wins a tie), dropping addresses that do not parse,
//! 4. ranks by score, highest first,
//! 5. splits the ranking into the capped active set and the candidate set.
//!
//! Line keys without qualifying measurements are left out of the result.

use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::{debug, warn};

use crate::config::{CandidatePolicy, LineConfig, ScoringConfig, ThresholdConfig};
use crate::model::{IpVersion, LineKey, LineResult, Measurement, SelectedItem};

/// Selection policy for one run
#[derive(Debug, Clone, Copy)]
pub struct Selector {
    scoring: ScoringConfig,
    thresholds: ThresholdConfig,
    policy: CandidatePolicy,
}

impl Selector {
    pub fn new(scoring: ScoringConfig, thresholds: ThresholdConfig) -> Self {
        Self {
            scoring,
            thresholds,
            policy: CandidatePolicy::default(),
        }
    }

    /// Set which addresses end up in the candidate set
    pub fn with_policy(mut self, policy: CandidatePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Whether a measurement passes every threshold
    ///
    /// Written as "within bounds" so that NaN metrics never qualify.
    pub fn qualifies(&self, m: &Measurement) -> bool {
        m.latency_ms <= self.thresholds.max_latency_ms
            && m.download_mbps >= self.thresholds.min_download_mbps
            && m.loss_pct <= self.thresholds.max_loss_pct
    }

    /// Weighted score of a measurement, rounded to 2 decimal places
    pub fn score(&self, m: &Measurement) -> f64 {
        let raw = self.scoring.latency_weight * m.latency_ms
            + self.scoring.speed_weight * m.download_mbps
            + self.scoring.loss_weight * m.loss_pct;
        round2(raw)
    }

    /// Select active and candidate addresses for every configured line
    pub fn select_top(
        &self,
        aggregated: &BTreeMap<LineKey, Vec<Measurement>>,
        lines: &[LineConfig],
    ) -> BTreeMap<LineKey, LineResult> {
        let configured: HashSet<&str> = lines.iter().map(|l| l.operator.as_str()).collect();
        for key in aggregated.keys() {
            if !configured.contains(key.operator.as_str()) {
                warn!("No line configured for operator '{}', ignoring {}", key.operator, key);
            }
        }

        let mut selected = BTreeMap::new();

        for line in lines {
            for version in IpVersion::ALL {
                let key = LineKey::new(line.operator.clone(), version);
                let Some(bucket) = aggregated.get(&key) else {
                    debug!("No measurements for {}", key);
                    continue;
                };

                let result = self.select_line(line, version, bucket);
                if result.is_empty() {
                    debug!("No qualifying addresses for {} ({} measurements)", key, bucket.len());
                    continue;
                }

                debug!(
                    "{}: {} active, {} candidates",
                    key,
                    result.active.len(),
                    result.candidates.len()
                );
                selected.insert(key, result);
            }
        }

        selected
    }

    fn select_line(&self, line: &LineConfig, version: IpVersion, bucket: &[Measurement]) -> LineResult {
        let mut ranked = self.best_per_address(bucket);
        ranked.sort_by(|a, b| b.score.total_cmp(&a.score));

        let cap = line.cap.min(ranked.len());
        let active = ranked[..cap].to_vec();
        let candidates = match self.policy {
            CandidatePolicy::All => ranked,
            CandidatePolicy::Overflow => ranked.split_off(cap),
        };

        LineResult {
            operator: line.operator.clone(),
            ip_version: version,
            active,
            candidates,
        }
    }

    /// Qualifying measurements reduced to the best one per address, in
    /// first-seen address order
    ///
    /// Addresses are compared and reported in canonical form. Measurements
    /// whose address does not parse as one of the line's version are dropped.
    fn best_per_address(&self, bucket: &[Measurement]) -> Vec<SelectedItem> {
        let mut best: Vec<SelectedItem> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();

        for m in bucket.iter().filter(|m| self.qualifies(m)) {
            let Some(ip) = m.canonical_ip() else {
                warn!(
                    "Dropping {} measurement from {}: '{}' is not an {} address",
                    m.line_key(),
                    m.device,
                    m.ip,
                    m.ip_version
                );
                continue;
            };

            let item = SelectedItem {
                ip: ip.clone(),
                source_device: m.device.clone(),
                score: self.score(m),
                latency_ms: m.latency_ms,
                download_mbps: m.download_mbps,
                region: m.region.clone(),
            };

            match index.get(&ip) {
                Some(&i) => {
                    if item.score > best[i].score {
                        best[i] = item;
                    }
                }
                None => {
                    index.insert(ip, best.len());
                    best.push(item);
                }
            }
        }

        best
    }
}

/// Select with an explicit configuration, see [`Selector::select_top`]
pub fn select_top(
    aggregated: &BTreeMap<LineKey, Vec<Measurement>>,
    lines: &[LineConfig],
    scoring: &ScoringConfig,
    thresholds: &ThresholdConfig,
    policy: CandidatePolicy,
) -> BTreeMap<LineKey, LineResult> {
    Selector::new(*scoring, *thresholds)
        .with_policy(policy)
        .select_top(aggregated, lines)
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
