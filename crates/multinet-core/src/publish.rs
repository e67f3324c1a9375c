//! Shaping of the selection into the externally published artifact
//!
//! The published form drops internal provenance (`source_device`), may cap
//! the candidates per line and orders lines by operator then IP version, so
//! two runs over the same input differ only in `generated_at`.

use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::config::{MultinetConfig, ThresholdConfig};
use crate::model::{IpVersion, LineKey, LineResult, SelectedItem};

/// Options controlling the published shape
#[derive(Debug, Clone, Default)]
pub struct PublishOptions {
    /// Zone apex, for readers of the artifact
    pub domain: String,
    /// Managed label, for readers of the artifact
    pub subdomain: String,
    /// Cap on published candidates per line
    pub max_candidates: Option<usize>,
    /// Thresholds echoed into `explain`
    pub thresholds: Option<ThresholdConfig>,
}

impl PublishOptions {
    pub fn from_config(config: &MultinetConfig) -> Self {
        Self {
            domain: config.dns.domain.clone(),
            subdomain: config.dns.subdomain.clone(),
            max_candidates: config.selection.max_published_candidates,
            thresholds: Some(config.thresholds),
        }
    }
}

/// Published form of one selected address
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishedItem {
    pub ip: String,
    pub score: f64,
    pub latency_ms: f64,
    pub dl_mbps: f64,
    pub region: String,
}

impl From<&SelectedItem> for PublishedItem {
    fn from(item: &SelectedItem) -> Self {
        Self {
            ip: item.ip.clone(),
            score: item.score,
            latency_ms: item.latency_ms,
            dl_mbps: item.download_mbps,
            region: item.region.clone(),
        }
    }
}

/// Published form of one line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishedLine {
    pub key: LineKey,
    pub operator: String,
    pub ip_version: IpVersion,
    pub active: Vec<PublishedItem>,
    pub candidates: Vec<PublishedItem>,
}

/// Document written to the artifact store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishableArtifact {
    #[serde(rename = "timestamp")]
    pub generated_at: DateTime<Utc>,
    pub domain: String,
    pub subdomain: String,
    pub lines: Vec<PublishedLine>,
    pub explain: BTreeMap<String, String>,
}

impl PublishableArtifact {
    /// Pretty JSON rendering used as the artifact content
    pub fn to_json_pretty(&self) -> Result<String, crate::Error> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Total number of active addresses across lines
    pub fn active_count(&self) -> usize {
        self.lines.iter().map(|line| line.active.len()).sum()
    }
}

/// Build the published artifact from a selection
pub fn build_publishable(
    selected: &BTreeMap<LineKey, LineResult>,
    options: &PublishOptions,
    generated_at: DateTime<Utc>,
) -> PublishableArtifact {
    // BTreeMap iteration already follows (operator, version) order
    let lines = selected
        .iter()
        .map(|(key, result)| {
            let candidates = result
                .candidates
                .iter()
                .take(options.max_candidates.unwrap_or(usize::MAX))
                .map(PublishedItem::from)
                .collect();

            PublishedLine {
                key: key.clone(),
                operator: result.operator.clone(),
                ip_version: result.ip_version,
                active: result.active.iter().map(PublishedItem::from).collect(),
                candidates,
            }
        })
        .collect();

    let mut explain = BTreeMap::new();
    if let Some(th) = &options.thresholds {
        explain.insert("max_latency_ms".to_string(), format!("{}", th.max_latency_ms));
        explain.insert(
            "min_download_mbps".to_string(),
            format!("{:.2}", th.min_download_mbps),
        );
        explain.insert("max_loss_pct".to_string(), format!("{:.2}", th.max_loss_pct));
    }

    PublishableArtifact {
        // Second precision keeps the rendered timestamp stable in width
        generated_at: generated_at.with_nanosecond(0).unwrap_or(generated_at),
        domain: options.domain.clone(),
        subdomain: options.subdomain.clone(),
        lines,
        explain,
    }
}
