//! Configuration types for the multinet pipeline
//!
//! The whole configuration is one typed record loaded from YAML and validated
//! once. Secret-bearing fields accept `${ENV_VAR}` references which are
//! expanded at load time.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::model::IpVersion;

/// Main multinet configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MultinetConfig {
    /// Measurement source and result artifact settings
    pub gist: GistConfig,

    /// DNS record store settings and configured lines
    pub dns: DnsConfig,

    /// Score weights
    #[serde(default)]
    pub scoring: ScoringConfig,

    /// Hard qualification gates
    pub thresholds: ThresholdConfig,

    /// Selection and publication policy
    #[serde(default)]
    pub selection: SelectionConfig,

    /// Cross-run update gate
    #[serde(default)]
    pub gate: GateConfig,

    /// Run state persistence
    #[serde(default)]
    pub state_store: StateStoreConfig,
}

impl MultinetConfig {
    /// Parse, expand and validate a YAML configuration document
    pub fn from_yaml_str(content: &str) -> Result<Self, crate::Error> {
        let mut config: MultinetConfig = serde_yaml::from_str(content)?;
        config.expand_env();
        config.validate()?;
        Ok(config)
    }

    /// Load the configuration from a YAML file
    pub async fn load<P: AsRef<Path>>(path: P) -> Result<Self, crate::Error> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            crate::Error::config(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_yaml_str(&content)
    }

    /// Replace `${VAR}` references in secret fields with environment values
    fn expand_env(&mut self) {
        self.gist.token = expand_env_vars(&self.gist.token);
        if let ProviderConfig::Cloudflare {
            api_token, zone_id, ..
        } = &mut self.dns.provider
        {
            *api_token = expand_env_vars(api_token);
            if let Some(zone) = zone_id.as_mut() {
                *zone = expand_env_vars(zone);
            }
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        self.gist.validate()?;
        self.dns.validate()?;
        self.scoring.validate()?;
        self.thresholds.validate()?;
        self.state_store.validate()?;
        Ok(())
    }
}

/// GitHub Gist settings for device results and the published result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GistConfig {
    /// GitHub API token (supports `${ENV_VAR}`)
    #[serde(default)]
    pub token: String,

    /// Optional prefix prepended to every request URL (reverse proxy)
    #[serde(default)]
    pub proxy_prefix: String,

    /// Gist IDs holding device measurement files
    pub device_gists: Vec<String>,

    /// ID of the result gist; empty means "create on first publication"
    #[serde(default)]
    pub result_gist_id: String,

    /// Skip device gists not updated within this many hours (0 disables)
    #[serde(default)]
    pub max_age_hours: u64,
}

impl GistConfig {
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.device_gists.is_empty() {
            return Err(crate::Error::config("No device gists configured"));
        }
        if self.device_gists.iter().any(|id| id.trim().is_empty()) {
            return Err(crate::Error::config("Device gist IDs cannot be empty"));
        }
        Ok(())
    }

    /// Configured result gist ID, if any
    pub fn result_gist_id(&self) -> Option<&str> {
        non_empty(&self.result_gist_id)
    }
}

/// DNS settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DnsConfig {
    /// Whether record sets are updated at all
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Zone apex, published for information
    #[serde(default)]
    pub domain: String,

    /// Managed label under the zone, published for information
    #[serde(default)]
    pub subdomain: String,

    /// TTL applied to every replaced record set (seconds)
    #[serde(default = "default_ttl")]
    pub ttl: u32,

    /// Record store provider
    pub provider: ProviderConfig,

    /// Configured lines, in reconciliation order
    pub lines: Vec<LineConfig>,
}

impl DnsConfig {
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.lines.is_empty() {
            return Err(crate::Error::config("No lines configured"));
        }

        let mut seen = std::collections::HashSet::new();
        for line in &self.lines {
            line.validate()?;
            if !seen.insert(line.operator.as_str()) {
                return Err(crate::Error::config(format!(
                    "Duplicate line operator: {}",
                    line.operator
                )));
            }
        }

        if self.enabled {
            if self.ttl == 0 {
                return Err(crate::Error::config("DNS TTL must be > 0"));
            }
            self.provider.validate()?;
        }

        Ok(())
    }

    /// Operators of every configured line, in configuration order
    pub fn operators(&self) -> Vec<String> {
        self.lines.iter().map(|line| line.operator.clone()).collect()
    }
}

/// Record store provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProviderConfig {
    /// Cloudflare provider
    Cloudflare {
        /// Cloudflare API token (supports `${ENV_VAR}`)
        api_token: String,
        /// Zone ID (optional, can be auto-detected from record names)
        #[serde(default)]
        zone_id: Option<String>,
        /// Log the planned changes without applying them
        #[serde(default)]
        dry_run: bool,
    },

    /// Custom provider
    Custom {
        /// Factory name to use
        factory: String,
        /// Custom configuration data
        config: serde_json::Value,
    },
}

impl ProviderConfig {
    /// Validate the provider configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        match self {
            ProviderConfig::Cloudflare { api_token, .. } => {
                if api_token.is_empty() {
                    return Err(crate::Error::config("Cloudflare API token cannot be empty"));
                }
                Ok(())
            }
            ProviderConfig::Custom { factory, config } => {
                if factory.is_empty() {
                    return Err(crate::Error::config(
                        "Custom provider factory cannot be empty",
                    ));
                }
                if config.is_null() {
                    return Err(crate::Error::config(
                        "Custom provider config cannot be null",
                    ));
                }
                Ok(())
            }
        }
    }

    /// Get the provider type name
    pub fn type_name(&self) -> &str {
        match self {
            ProviderConfig::Cloudflare { .. } => "cloudflare",
            ProviderConfig::Custom { factory, .. } => factory,
        }
    }
}

/// One configured carrier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineConfig {
    /// Carrier code, e.g. "cu"
    pub operator: String,

    /// Maximum size of the active set per IP version
    pub cap: usize,

    /// Record set receiving the v4 active set (A records)
    #[serde(default)]
    pub a_record_set_id: Option<String>,

    /// Record set receiving the v6 active set (AAAA records)
    #[serde(default)]
    pub aaaa_record_set_id: Option<String>,
}

impl LineConfig {
    /// Create a line with no record sets configured
    pub fn new(operator: impl Into<String>, cap: usize) -> Self {
        Self {
            operator: operator.into(),
            cap,
            a_record_set_id: None,
            aaaa_record_set_id: None,
        }
    }

    /// Set the A record set identifier
    pub fn with_a_record_set(mut self, id: impl Into<String>) -> Self {
        self.a_record_set_id = Some(id.into());
        self
    }

    /// Set the AAAA record set identifier
    pub fn with_aaaa_record_set(mut self, id: impl Into<String>) -> Self {
        self.aaaa_record_set_id = Some(id.into());
        self
    }

    /// Record set identifier for the given version; blank counts as absent
    pub fn record_set_id(&self, version: IpVersion) -> Option<&str> {
        let id = match version {
            IpVersion::V4 => self.a_record_set_id.as_deref(),
            IpVersion::V6 => self.aaaa_record_set_id.as_deref(),
        };
        id.and_then(non_empty)
    }

    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.operator.is_empty() {
            return Err(crate::Error::config("Line operator cannot be empty"));
        }
        if !self
            .operator
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(crate::Error::config(format!(
                "Line operator '{}' may only contain ASCII letters, digits and '_'",
                self.operator
            )));
        }
        Ok(())
    }
}

/// Linear score weights; the sign encodes whether a metric is desirable
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoringConfig {
    #[serde(default)]
    pub latency_weight: f64,
    #[serde(default)]
    pub speed_weight: f64,
    #[serde(default)]
    pub loss_weight: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            latency_weight: -1.0,
            speed_weight: 1.0,
            loss_weight: -10.0,
        }
    }
}

impl ScoringConfig {
    pub fn validate(&self) -> Result<(), crate::Error> {
        if !(self.latency_weight.is_finite()
            && self.speed_weight.is_finite()
            && self.loss_weight.is_finite())
        {
            return Err(crate::Error::config("Scoring weights must be finite numbers"));
        }
        Ok(())
    }
}

/// Hard gates applied before scoring; boundaries qualify
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThresholdConfig {
    pub max_latency_ms: f64,
    #[serde(default)]
    pub min_download_mbps: f64,
    #[serde(default = "default_max_loss_pct")]
    pub max_loss_pct: f64,
}

impl ThresholdConfig {
    /// Thresholds that let every well-formed measurement through
    pub fn permissive() -> Self {
        Self {
            max_latency_ms: f64::MAX,
            min_download_mbps: 0.0,
            max_loss_pct: 100.0,
        }
    }

    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.max_latency_ms.is_nan() || self.max_latency_ms < 0.0 {
            return Err(crate::Error::config("max_latency_ms must be >= 0"));
        }
        if self.min_download_mbps.is_nan() || self.min_download_mbps < 0.0 {
            return Err(crate::Error::config("min_download_mbps must be >= 0"));
        }
        if !(0.0..=100.0).contains(&self.max_loss_pct) {
            return Err(crate::Error::config(
                "max_loss_pct must be between 0 and 100",
            ));
        }
        Ok(())
    }
}

/// Which qualifying addresses go into the candidate set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CandidatePolicy {
    /// Every qualifying address, active ones included
    #[default]
    All,
    /// Only the qualifying addresses ranked beyond the cap
    Overflow,
}

/// Selection and publication policy
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SelectionConfig {
    #[serde(default)]
    pub candidate_policy: CandidatePolicy,

    /// Cap on candidates published per line (unbounded when absent)
    #[serde(default)]
    pub max_published_candidates: Option<usize>,
}

/// Cross-run update gate
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GateConfig {
    /// Minimum interval between two reconciliations that changed records
    ///
    /// Set to 0 to disable the cooldown.
    #[serde(default)]
    pub min_update_interval_secs: u64,

    /// Skip reconciliation when every active set equals the last written one
    #[serde(default)]
    pub skip_unchanged: bool,
}

/// Run state store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StateStoreConfig {
    /// File-based state store
    File {
        /// Path to the state file
        path: String,
    },

    /// In-memory state store (nothing survives the process)
    Memory,
}

impl Default for StateStoreConfig {
    fn default() -> Self {
        StateStoreConfig::File {
            path: default_state_path(),
        }
    }
}

impl StateStoreConfig {
    pub fn validate(&self) -> Result<(), crate::Error> {
        match self {
            StateStoreConfig::File { path } if path.is_empty() => {
                Err(crate::Error::config("State store path cannot be empty"))
            }
            _ => Ok(()),
        }
    }
}

/// Expand `${NAME}` references; unset variables expand to an empty string
pub fn expand_env_vars(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                let name = &after[..end];
                out.push_str(&std::env::var(name).unwrap_or_default());
                rest = &after[end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }

    out.push_str(rest);
    out
}

fn non_empty(value: &str) -> Option<&str> {
    let trimmed = value.trim();
    if trimmed.is_empty() { None } else { Some(trimmed) }
}

fn default_enabled() -> bool {
    true
}

fn default_ttl() -> u32 {
    300
}

fn default_max_loss_pct() -> f64 {
    100.0
}

fn default_state_path() -> String {
    "config/state.json".to_string()
}
