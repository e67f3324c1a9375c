//! Data model shared by the aggregation, selection and reconciliation stages
//!
//! Measurements are immutable once produced. Scores are never stored on a
//! [`Measurement`]; the selector attaches them to the [`SelectedItem`] it
//! builds from the winning measurement.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

/// IP version of a line (v4 or v6)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IpVersion {
    V4,
    V6,
}

impl IpVersion {
    /// Every version, in the order lines are processed
    pub const ALL: [IpVersion; 2] = [IpVersion::V4, IpVersion::V6];

    /// Short tag used in line keys and file names
    pub fn as_str(&self) -> &'static str {
        match self {
            IpVersion::V4 => "v4",
            IpVersion::V6 => "v6",
        }
    }

    /// Version of a parsed address
    pub fn of(addr: &IpAddr) -> Self {
        match addr {
            IpAddr::V4(_) => IpVersion::V4,
            IpAddr::V6(_) => IpVersion::V6,
        }
    }

    /// DNS record type carrying addresses of this version
    pub fn record_type(&self) -> &'static str {
        match self {
            IpVersion::V4 => "A",
            IpVersion::V6 => "AAAA",
        }
    }
}

impl fmt::Display for IpVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IpVersion {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "v4" => Ok(IpVersion::V4),
            "v6" => Ok(IpVersion::V6),
            other => Err(crate::Error::invalid_input(format!(
                "Unknown IP version: {}",
                other
            ))),
        }
    }
}

/// Grouping key of a line: operator plus IP version
///
/// Renders as `operator-version`, e.g. `cu-v4`. Ordering is by operator, then
/// version, so maps keyed by `LineKey` iterate deterministically.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LineKey {
    pub operator: String,
    pub version: IpVersion,
}

impl LineKey {
    pub fn new(operator: impl Into<String>, version: IpVersion) -> Self {
        Self {
            operator: operator.into(),
            version,
        }
    }
}

impl fmt::Display for LineKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.operator, self.version)
    }
}

impl FromStr for LineKey {
    type Err = crate::Error;

    /// Parse `operator-version`; the version is taken after the last dash
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (operator, version) = s
            .rsplit_once('-')
            .ok_or_else(|| crate::Error::invalid_input(format!("Invalid line key: {}", s)))?;
        if operator.is_empty() {
            return Err(crate::Error::invalid_input(format!(
                "Invalid line key: {}",
                s
            )));
        }
        Ok(LineKey::new(operator, version.parse()?))
    }
}

impl Serialize for LineKey {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for LineKey {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// One probe result from one device for one address
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    /// Reporting device (provenance only)
    pub device: String,
    /// Carrier code, e.g. "cu"
    pub operator: String,
    pub ip_version: IpVersion,
    /// Address under test
    pub ip: String,
    pub latency_ms: f64,
    pub download_mbps: f64,
    /// Packet loss, 0-100
    pub loss_pct: f64,
    /// Display-only label
    #[serde(default)]
    pub region: String,
}

impl Measurement {
    /// Key of the line this measurement belongs to
    pub fn line_key(&self) -> LineKey {
        LineKey::new(self.operator.clone(), self.ip_version)
    }

    /// The address in canonical text form
    ///
    /// `None` when `ip` is not an address of this measurement's version.
    pub fn canonical_ip(&self) -> Option<String> {
        let addr: IpAddr = self.ip.trim().parse().ok()?;
        (IpVersion::of(&addr) == self.ip_version).then(|| addr.to_string())
    }
}

/// An address that passed the threshold gate, with its winning score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectedItem {
    pub ip: String,
    /// Device whose measurement won; internal provenance, not published
    pub source_device: String,
    pub score: f64,
    pub latency_ms: f64,
    pub download_mbps: f64,
    pub region: String,
}

/// Selection output for one line key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineResult {
    pub operator: String,
    pub ip_version: IpVersion,
    /// Capped, ranked set intended for the record store
    pub active: Vec<SelectedItem>,
    /// Ranked pool intended for publication
    pub candidates: Vec<SelectedItem>,
}

impl LineResult {
    /// Ordered addresses of the active set
    pub fn active_addresses(&self) -> Vec<String> {
        self.active.iter().map(|item| item.ip.clone()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty() && self.candidates.is_empty()
    }
}
