//! Test doubles and common utilities for contract tests
//!
//! These doubles record what the core asks of its adapters so the tests
//! can assert ordering, call counts and persisted state.

#![allow(dead_code)]

use multinet_core::config::{
    DnsConfig, GateConfig, GistConfig, LineConfig, MultinetConfig, ProviderConfig,
    ScoringConfig, SelectionConfig, StateStoreConfig, ThresholdConfig,
};
use multinet_core::error::{Error, Result};
use multinet_core::model::{IpVersion, Measurement};
use multinet_core::publish::PublishableArtifact;
use multinet_core::traits::{
    ArtifactStore, MeasurementSource, RecordSetUpdate, RecordStore, ReplaceOutcome,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Build a measurement with the fields the selector looks at
pub fn measurement(
    device: &str,
    operator: &str,
    version: IpVersion,
    ip: &str,
    latency_ms: f64,
    download_mbps: f64,
    loss_pct: f64,
) -> Measurement {
    Measurement {
        device: device.to_string(),
        operator: operator.to_string(),
        ip_version: version,
        ip: ip.to_string(),
        latency_ms,
        download_mbps,
        loss_pct,
        region: "HKG".to_string(),
    }
}

/// A source serving fixed batches per source id
///
/// Unknown ids and ids registered with [`StaticSource::failing`] return an
/// error.
#[derive(Default)]
pub struct StaticSource {
    batches: HashMap<String, Vec<Measurement>>,
    failing: Vec<String>,
    fetch_call_count: Arc<AtomicUsize>,
}

impl StaticSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_batch(mut self, source_id: &str, batch: Vec<Measurement>) -> Self {
        self.batches.insert(source_id.to_string(), batch);
        self
    }

    pub fn failing(mut self, source_id: &str) -> Self {
        self.failing.push(source_id.to_string());
        self
    }

    pub fn fetch_call_count(&self) -> usize {
        self.fetch_call_count.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl MeasurementSource for StaticSource {
    async fn fetch(&self, source_id: &str) -> Result<Vec<Measurement>> {
        self.fetch_call_count.fetch_add(1, Ordering::SeqCst);
        if self.failing.iter().any(|id| id == source_id) {
            return Err(Error::http(format!("GET {} returned 502", source_id)));
        }
        self.batches
            .get(source_id)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("source {}", source_id)))
    }

    fn source_name(&self) -> &'static str {
        "static"
    }
}

/// A record store keeping record sets in memory
///
/// Counters and contents are shared between instances created with
/// [`MockRecordStore::sharing_state_with`], so a test can keep a handle
/// after boxing one into the core.
pub struct MockRecordStore {
    /// Call counter for replace_record_set()
    call_count: Arc<AtomicUsize>,
    /// Every update received, in call order
    calls: Arc<Mutex<Vec<RecordSetUpdate>>>,
    /// Current content per record set id
    records: Arc<Mutex<HashMap<String, Vec<String>>>>,
    /// 1-based call number that fails, if any
    fail_on_call: Option<usize>,
}

impl MockRecordStore {
    pub fn new() -> Self {
        Self {
            call_count: Arc::new(AtomicUsize::new(0)),
            calls: Arc::new(Mutex::new(Vec::new())),
            records: Arc::new(Mutex::new(HashMap::new())),
            fail_on_call: None,
        }
    }

    /// Fail the `n`-th call (1-based)
    pub fn failing_on_call(mut self, n: usize) -> Self {
        self.fail_on_call = Some(n);
        self
    }

    pub fn sharing_state_with(other: &Self) -> Self {
        Self {
            call_count: Arc::clone(&other.call_count),
            calls: Arc::clone(&other.calls),
            records: Arc::clone(&other.records),
            fail_on_call: other.fail_on_call,
        }
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> Vec<RecordSetUpdate> {
        self.calls.lock().unwrap().clone()
    }

    pub fn records(&self) -> HashMap<String, Vec<String>> {
        self.records.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl RecordStore for MockRecordStore {
    async fn replace_record_set(&self, update: &RecordSetUpdate) -> Result<ReplaceOutcome> {
        let call = self.call_count.fetch_add(1, Ordering::SeqCst) + 1;
        self.calls.lock().unwrap().push(update.clone());

        if self.fail_on_call == Some(call) {
            return Err(Error::provider("mock", "injected failure"));
        }

        let mut records = self.records.lock().unwrap();
        let previous = records.insert(update.record_set_id.clone(), update.addresses.clone());
        if previous.as_ref() == Some(&update.addresses) {
            Ok(ReplaceOutcome::Unchanged)
        } else {
            Ok(ReplaceOutcome::Replaced { previous })
        }
    }

    fn provider_name(&self) -> &'static str {
        "mock"
    }
}

/// An artifact store keeping published artifacts in memory
pub struct MockArtifactStore {
    /// Published artifacts per id
    artifacts: Arc<Mutex<HashMap<String, PublishableArtifact>>>,
    /// Every (existing_id, artifact) call, in order
    calls: Arc<Mutex<Vec<(Option<String>, PublishableArtifact)>>>,
    /// Return an error instead of storing
    fail: bool,
}

impl MockArtifactStore {
    pub fn new() -> Self {
        Self {
            artifacts: Arc::new(Mutex::new(HashMap::new())),
            calls: Arc::new(Mutex::new(Vec::new())),
            fail: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new()
        }
    }

    pub fn sharing_state_with(other: &Self) -> Self {
        Self {
            artifacts: Arc::clone(&other.artifacts),
            calls: Arc::clone(&other.calls),
            fail: other.fail,
        }
    }

    pub fn publish_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn calls(&self) -> Vec<(Option<String>, PublishableArtifact)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn artifact(&self, id: &str) -> Option<PublishableArtifact> {
        self.artifacts.lock().unwrap().get(id).cloned()
    }
}

#[async_trait::async_trait]
impl ArtifactStore for MockArtifactStore {
    async fn create_or_update(
        &self,
        existing_id: Option<&str>,
        artifact: &PublishableArtifact,
    ) -> Result<String> {
        self.calls
            .lock()
            .unwrap()
            .push((existing_id.map(str::to_string), artifact.clone()));

        if self.fail {
            return Err(Error::artifact_store("injected failure"));
        }

        let mut artifacts = self.artifacts.lock().unwrap();
        let id = match existing_id {
            Some(id) => id.to_string(),
            None => format!("artifact-{}", artifacts.len() + 1),
        };
        artifacts.insert(id.clone(), artifact.clone());
        Ok(id)
    }
}

/// Line with both record sets configured, named after the operator
pub fn line(operator: &str, cap: usize) -> LineConfig {
    LineConfig::new(operator, cap)
        .with_a_record_set(format!("{}.example.com", operator))
        .with_aaaa_record_set(format!("{}6.example.com", operator))
}

/// Minimal valid configuration for the given lines and device gists
pub fn minimal_config(lines: Vec<LineConfig>, device_gists: &[&str]) -> MultinetConfig {
    MultinetConfig {
        gist: GistConfig {
            token: String::new(),
            proxy_prefix: String::new(),
            device_gists: device_gists.iter().map(|id| id.to_string()).collect(),
            result_gist_id: String::new(),
            max_age_hours: 0,
        },
        dns: DnsConfig {
            enabled: true,
            domain: "example.com".to_string(),
            subdomain: "edge".to_string(),
            ttl: 300,
            provider: ProviderConfig::Cloudflare {
                api_token: "test-token".to_string(),
                zone_id: None,
                dry_run: true,
            },
            lines,
        },
        scoring: ScoringConfig {
            latency_weight: -1.0,
            speed_weight: 1.0,
            loss_weight: -10.0,
        },
        thresholds: ThresholdConfig {
            max_latency_ms: 100.0,
            min_download_mbps: 10.0,
            max_loss_pct: 5.0,
        },
        selection: SelectionConfig::default(),
        gate: GateConfig::default(),
        state_store: StateStoreConfig::Memory,
    }
}
