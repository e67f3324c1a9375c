// # GitHub Gist Source and Artifact Store
//
// This crate reads per-device probe results from GitHub Gists and publishes
// the selection back into a result Gist.
//
// ## Device Gists
//
// Every device pushes one JSON file per (operator, IP version):
//
// ```text
// results-<operator>-<anything>-<v4|v6>.json
// results6-<operator>-<anything>-<v4|v6>.json
// ```
//
// with content `{"results": [{device, ip, latency_ms, loss_pct, dl_mbps, region}]}`.
// Operator and IP version are taken from the file name, which is matched
// case-insensitively. Files of operators without a configured line are
// ignored.
//
// ## Failure Handling
//
// - Transport errors and 5xx responses are retried (3 attempts, 0/2/4 s)
// - A file that cannot be downloaded or parsed is skipped with a warning
// - A record missing a required field is skipped, the rest of its file is kept
// - A Gist older than `max_age_hours` contributes nothing
//
// ## Security
//
// The token never appears in logs or Debug output.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use multinet_core::config::{DnsConfig, GistConfig};
use multinet_core::model::{IpVersion, Measurement};
use multinet_core::publish::PublishableArtifact;
use multinet_core::traits::{ArtifactStore, MeasurementSource};
use multinet_core::{Error, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info, warn};

/// GitHub REST API base URL
const GITHUB_API_BASE: &str = "https://api.github.com";

/// Default HTTP timeout for API requests (30 seconds)
const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Attempts per request, including the first one
const MAX_ATTEMPTS: u32 = 3;

/// Retry `n` (1-based) waits `n * RETRY_DELAY_UNIT` before sending
const RETRY_DELAY_UNIT: Duration = Duration::from_secs(2);

/// File holding the published selection inside the result Gist
pub const RESULT_FILE_NAME: &str = "selected.json";

/// Description of a newly created result Gist
const RESULT_GIST_DESCRIPTION: &str = "Multi-Net selected IP results";

const USER_AGENT: &str = concat!("multinet/", env!("CARGO_PKG_VERSION"));

/// One probe record as pushed by a device
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceRecord {
    pub device: String,
    pub ip: String,
    pub latency_ms: f64,
    #[serde(default)]
    pub loss_pct: f64,
    pub dl_mbps: f64,
    #[serde(default)]
    pub region: String,
}

impl DeviceRecord {
    fn into_measurement(self, operator: &str, version: IpVersion) -> Measurement {
        Measurement {
            device: self.device,
            operator: operator.to_string(),
            ip_version: version,
            ip: self.ip,
            latency_ms: self.latency_ms,
            download_mbps: self.dl_mbps,
            loss_pct: self.loss_pct,
            region: self.region,
        }
    }
}

/// Records are kept raw so one malformed entry does not discard the file
#[derive(Debug, Deserialize)]
struct DeviceFile {
    #[serde(default)]
    results: Vec<serde_json::Value>,
}

/// Subset of the Gist API object we read
#[derive(Debug, Deserialize)]
struct GistMeta {
    #[serde(default)]
    id: String,
    updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    files: BTreeMap<String, GistFile>,
}

#[derive(Debug, Deserialize)]
struct GistFile {
    filename: String,
    raw_url: Option<String>,
}

/// GitHub Gist client
///
/// Implements [`MeasurementSource`] for device Gists and [`ArtifactStore`]
/// for the result Gist. Requests are issued one at a time.
pub struct GistClient {
    /// GitHub token
    /// ⚠️ NEVER log this value
    token: String,

    /// Prefix prepended to every URL (e.g. a reverse proxy)
    proxy_prefix: String,

    /// Operators with a configured line, spelled as configured
    operators: Vec<String>,

    /// Gists not updated within this many hours are skipped (0 disables)
    max_age_hours: u64,

    /// Unit of the retry backoff
    retry_delay: Duration,

    /// HTTP client for API requests
    client: reqwest::Client,
}

// Custom Debug implementation that hides the token
impl std::fmt::Debug for GistClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GistClient")
            .field("token", &"<REDACTED>")
            .field("proxy_prefix", &self.proxy_prefix)
            .field("operators", &self.operators)
            .field("max_age_hours", &self.max_age_hours)
            .finish()
    }
}

impl GistClient {
    /// Create a new Gist client
    ///
    /// An empty `token` sends unauthenticated requests, which is enough to
    /// read public Gists but not to publish.
    pub fn new(
        token: impl Into<String>,
        proxy_prefix: impl Into<String>,
        operators: &[String],
        max_age_hours: u64,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(DEFAULT_HTTP_TIMEOUT)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| Error::http(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            token: token.into(),
            proxy_prefix: proxy_prefix.into(),
            operators: operators.to_vec(),
            max_age_hours,
            retry_delay: RETRY_DELAY_UNIT,
            client,
        })
    }

    /// Create a client from the configuration sections it depends on
    pub fn from_config(gist: &GistConfig, dns: &DnsConfig) -> Result<Self> {
        Self::new(
            gist.token.clone(),
            gist.proxy_prefix.clone(),
            &dns.operators(),
            gist.max_age_hours,
        )
    }

    /// Override the retry backoff unit
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Apply the proxy prefix to `url`
    pub fn build_url(&self, url: &str) -> String {
        format!("{}{}", self.proxy_prefix, url)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let request = request.header("Accept", "application/vnd.github+json");
        if self.token.is_empty() {
            request
        } else {
            request.header("Authorization", format!("token {}", self.token))
        }
    }

    /// Send a request, retrying transport errors and 5xx responses
    ///
    /// `build` is called once per attempt. Responses below 500 are returned
    /// as-is, including 4xx.
    async fn send_with_retry<F>(&self, what: &str, build: F) -> Result<reqwest::Response>
    where
        F: Fn() -> reqwest::RequestBuilder,
    {
        let mut last_error = None;

        for attempt in 0..MAX_ATTEMPTS {
            if attempt > 0 {
                tokio::time::sleep(self.retry_delay * attempt).await;
            }

            match build().send().await {
                Ok(response) if !response.status().is_server_error() => return Ok(response),
                Ok(response) => {
                    let status = response.status();
                    warn!(
                        "{} failed (attempt {}/{}): status {}",
                        what,
                        attempt + 1,
                        MAX_ATTEMPTS,
                        status
                    );
                    last_error = Some(Error::http(format!("{} returned {}", what, status)));
                }
                Err(e) => {
                    warn!(
                        "{} failed (attempt {}/{}): {}",
                        what,
                        attempt + 1,
                        MAX_ATTEMPTS,
                        e
                    );
                    last_error = Some(Error::http(format!("{} failed: {}", what, e)));
                }
            }
        }

        Err(last_error.unwrap_or_else(|| Error::http(format!("{} was not attempted", what))))
    }

    /// Fetch a URL and return the body of a successful response
    async fn get_text(&self, url: &str, what: &str) -> Result<String> {
        let response = self
            .send_with_retry(what, || self.authorize(self.client.get(url)))
            .await?;
        read_success_body(response, what).await
    }

    async fn fetch_file(
        &self,
        file: &GistFile,
        operator: &str,
        version: IpVersion,
    ) -> Result<Vec<Measurement>> {
        let raw_url = file
            .raw_url
            .as_deref()
            .ok_or_else(|| Error::measurement_source(format!("{} has no raw_url", file.filename)))?;

        let body = self
            .get_text(&self.build_url(raw_url), &format!("GET {}", file.filename))
            .await?;

        parse_device_file(&body, operator, version)
    }
}

#[async_trait]
impl MeasurementSource for GistClient {
    async fn fetch(&self, source_id: &str) -> Result<Vec<Measurement>> {
        info!("Fetching device Gist {}", source_id);

        let url = self.build_url(&format!("{}/gists/{}", GITHUB_API_BASE, source_id));
        let body = self
            .get_text(&url, &format!("GET gist {}", source_id))
            .await?;
        let gist: GistMeta = serde_json::from_str(&body).map_err(|e| {
            Error::measurement_source(format!("Invalid Gist metadata for {}: {}", source_id, e))
        })?;

        if let Some(updated_at) = gist.updated_at
            && is_stale(updated_at, Utc::now(), self.max_age_hours)
        {
            info!(
                "Gist {} last updated {}, older than {}h, skipping",
                source_id, updated_at, self.max_age_hours
            );
            return Ok(Vec::new());
        }

        let mut measurements = Vec::new();

        // BTreeMap keeps file order stable across runs
        for file in gist.files.values() {
            let Some((operator, version)) = parse_result_filename(&file.filename, &self.operators)
            else {
                debug!("Ignoring file {} in Gist {}", file.filename, source_id);
                continue;
            };

            match self.fetch_file(file, &operator, version).await {
                Ok(batch) => {
                    debug!(
                        "{}: {} record(s) for {}-{}",
                        file.filename,
                        batch.len(),
                        operator,
                        version
                    );
                    measurements.extend(batch);
                }
                Err(e) => {
                    warn!("Skipping {} in Gist {}: {}", file.filename, source_id, e);
                }
            }
        }

        info!(
            "Gist {}: {} measurement(s) collected",
            source_id,
            measurements.len()
        );
        Ok(measurements)
    }

    fn source_name(&self) -> &'static str {
        "gist"
    }
}

#[async_trait]
impl ArtifactStore for GistClient {
    async fn create_or_update(
        &self,
        existing_id: Option<&str>,
        artifact: &PublishableArtifact,
    ) -> Result<String> {
        let body = result_gist_body(artifact)?;

        let (what, response) = match existing_id {
            Some(id) => {
                info!("Updating result Gist {}", id);
                let url = self.build_url(&format!("{}/gists/{}", GITHUB_API_BASE, id));
                let what = format!("PATCH gist {}", id);
                let response = self
                    .send_with_retry(&what, || self.authorize(self.client.patch(&url)).json(&body))
                    .await
                    .map_err(|e| Error::artifact_store(e.to_string()))?;
                (what, response)
            }
            None => {
                info!("Creating result Gist");
                let url = self.build_url(&format!("{}/gists", GITHUB_API_BASE));
                let what = "POST gist".to_string();
                let response = self
                    .send_with_retry(&what, || self.authorize(self.client.post(&url)).json(&body))
                    .await
                    .map_err(|e| Error::artifact_store(e.to_string()))?;
                (what, response)
            }
        };

        let text = read_success_body(response, &what).await?;
        let gist: GistMeta = serde_json::from_str(&text)
            .map_err(|e| Error::artifact_store(format!("Invalid Gist response: {}", e)))?;

        if gist.id.is_empty() {
            return Err(Error::artifact_store("Gist response carries no id"));
        }

        info!("Result Gist {} written", gist.id);
        Ok(gist.id)
    }
}

/// Read the body of a response, mapping unsuccessful statuses to errors
async fn read_success_body(response: reqwest::Response, what: &str) -> Result<String> {
    let status = response.status();
    let text = response
        .text()
        .await
        .map_err(|e| Error::http(format!("{}: failed to read response: {}", what, e)))?;

    if status.is_success() {
        Ok(text)
    } else {
        Err(status_error(status.as_u16(), what, &text))
    }
}

/// Map an unsuccessful HTTP status to an error
pub fn status_error(status: u16, what: &str, body: &str) -> Error {
    match status {
        401 | 403 => Error::auth(format!(
            "{}: invalid token or insufficient permissions (status {})",
            what, status
        )),
        404 => Error::not_found(format!("{}: not found", what)),
        429 => Error::rate_limited(format!("{}: rate limit exceeded", what)),
        _ => Error::http(format!("{}: status {} - {}", what, status, body.trim())),
    }
}

/// Parse a device result file name into (operator, IP version)
///
/// Accepts `results[6]-<operator>-<anything>-<v4|v6>.json`, case-insensitive,
/// where the operator is one of `operators`. The operator is returned as
/// spelled in `operators` so it matches the configured line.
pub fn parse_result_filename(name: &str, operators: &[String]) -> Option<(String, IpVersion)> {
    let name = name.to_ascii_lowercase();

    let rest = name.strip_prefix("results")?;
    let rest = rest.strip_prefix('6').unwrap_or(rest);
    let rest = rest.strip_prefix('-')?;
    let stem = rest.strip_suffix(".json")?;

    let (operator, tail) = stem.split_once('-')?;
    let (_, version) = tail.rsplit_once('-')?;
    let version: IpVersion = version.parse().ok()?;

    operators
        .iter()
        .find(|op| op.eq_ignore_ascii_case(operator))
        .map(|op| (op.clone(), version))
}

/// Parse the content of one device result file
pub fn parse_device_file(
    content: &str,
    operator: &str,
    version: IpVersion,
) -> Result<Vec<Measurement>> {
    let file: DeviceFile = serde_json::from_str(content)
        .map_err(|e| Error::measurement_source(format!("Invalid device results: {}", e)))?;

    let mut measurements = Vec::with_capacity(file.results.len());
    for (i, raw) in file.results.into_iter().enumerate() {
        match serde_json::from_value::<DeviceRecord>(raw) {
            Ok(record) => measurements.push(record.into_measurement(operator, version)),
            Err(e) => warn!("Skipping {}-{} record #{}: {}", operator, version, i, e),
        }
    }
    Ok(measurements)
}

/// Whether a Gist last updated at `updated_at` is too old to use
pub fn is_stale(updated_at: DateTime<Utc>, now: DateTime<Utc>, max_age_hours: u64) -> bool {
    if max_age_hours == 0 {
        return false;
    }
    let age_secs = now.signed_duration_since(updated_at).num_seconds();
    age_secs > 0 && age_secs as u64 > max_age_hours.saturating_mul(3600)
}

/// Request body creating or updating the result Gist
pub fn result_gist_body(artifact: &PublishableArtifact) -> Result<serde_json::Value> {
    let mut files = serde_json::Map::new();
    files.insert(
        RESULT_FILE_NAME.to_string(),
        serde_json::json!({ "content": artifact.to_json_pretty()? }),
    );

    Ok(serde_json::json!({
        "description": RESULT_GIST_DESCRIPTION,
        "public": false,
        "files": files,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn operators() -> Vec<String> {
        vec!["ct".to_string(), "cu".to_string(), "cm".to_string()]
    }

    #[test]
    fn test_parse_result_filename() {
        let ops = operators();

        assert_eq!(
            parse_result_filename("results-cu-hkg-router1-v4.json", &ops),
            Some(("cu".to_string(), IpVersion::V4))
        );
        assert_eq!(
            parse_result_filename("Results6-CM-sha-V6.JSON", &ops),
            Some(("cm".to_string(), IpVersion::V6))
        );
        // Empty middle segment is still a match
        assert_eq!(
            parse_result_filename("results-ct--v4.json", &ops),
            Some(("ct".to_string(), IpVersion::V4))
        );
    }

    #[test]
    fn test_parse_result_filename_keeps_configured_spelling() {
        let client = GistClient::new("", "", &["CU".to_string(), "Cm".to_string()], 0).unwrap();

        assert_eq!(
            parse_result_filename("results-cu-hkg-v4.json", &client.operators),
            Some(("CU".to_string(), IpVersion::V4))
        );
        assert_eq!(
            parse_result_filename("RESULTS6-CM-sha-v6.json", &client.operators),
            Some(("Cm".to_string(), IpVersion::V6))
        );
    }

    #[test]
    fn test_parse_result_filename_rejects() {
        let ops = operators();

        // Unconfigured operator
        assert_eq!(parse_result_filename("results-cx-hkg-v4.json", &ops), None);
        // Missing middle segment
        assert_eq!(parse_result_filename("results-cu-v4.json", &ops), None);
        // Bad version
        assert_eq!(parse_result_filename("results-cu-hkg-v5.json", &ops), None);
        // Not a results file
        assert_eq!(parse_result_filename("notes-cu-hkg-v4.json", &ops), None);
        assert_eq!(parse_result_filename("results-cu-hkg-v4.json.bak", &ops), None);
        assert_eq!(parse_result_filename("results7-cu-hkg-v4.json", &ops), None);
    }

    #[test]
    fn test_parse_device_file() {
        let content = r#"{
            "results": [
                {"device": "r1", "ip": "1.1.1.1", "latency_ms": 20, "loss_pct": 0.5, "dl_mbps": 88.2, "region": "HKG"},
                {"device": "r1", "ip": "1.0.0.1", "latency_ms": 35.5, "dl_mbps": 40}
            ]
        }"#;

        let measurements = parse_device_file(content, "cu", IpVersion::V4).unwrap();
        assert_eq!(measurements.len(), 2);
        assert_eq!(measurements[0].operator, "cu");
        assert_eq!(measurements[0].ip_version, IpVersion::V4);
        assert_eq!(measurements[0].latency_ms, 20.0);
        assert_eq!(measurements[0].download_mbps, 88.2);
        assert_eq!(measurements[1].loss_pct, 0.0);
        assert_eq!(measurements[1].region, "");

        assert!(parse_device_file("{not json", "cu", IpVersion::V4).is_err());
        assert!(parse_device_file("{}", "cu", IpVersion::V4).unwrap().is_empty());
    }

    #[test]
    fn test_parse_device_file_skips_incomplete_records() {
        let content = r#"{
            "results": [
                {"device": "r1", "ip": "1.1.1.1", "dl_mbps": 88.2},
                {"device": "r1", "ip": "1.0.0.1", "latency_ms": 35.5, "dl_mbps": 40},
                "not a record"
            ]
        }"#;

        let measurements = parse_device_file(content, "cu", IpVersion::V4).unwrap();
        assert_eq!(measurements.len(), 1);
        assert_eq!(measurements[0].ip, "1.0.0.1");
    }

    #[test]
    fn test_is_stale() {
        let now = DateTime::parse_from_rfc3339("2025-03-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc);

        let two_hours_ago = now - chrono::Duration::hours(2);
        assert!(is_stale(two_hours_ago, now, 1));
        assert!(!is_stale(two_hours_ago, now, 3));
        // Exactly at the limit is still fresh
        assert!(!is_stale(two_hours_ago, now, 2));
        // 0 disables the check
        assert!(!is_stale(now - chrono::Duration::days(365), now, 0));
    }

    #[test]
    fn test_gist_meta_deserialization() {
        let json = r#"{
            "id": "abc123",
            "updated_at": "2025-03-01T10:00:00Z",
            "files": {
                "results-cu-hkg-v4.json": {
                    "filename": "results-cu-hkg-v4.json",
                    "raw_url": "https://gist.githubusercontent.com/u/abc123/raw/results-cu-hkg-v4.json",
                    "size": 120
                }
            },
            "public": false
        }"#;

        let meta: GistMeta = serde_json::from_str(json).unwrap();
        assert_eq!(meta.id, "abc123");
        assert!(meta.updated_at.is_some());
        assert_eq!(meta.files.len(), 1);
    }

    #[test]
    fn test_build_url_with_proxy() {
        let plain = GistClient::new("", "", &operators(), 0).unwrap();
        assert_eq!(
            plain.build_url("https://api.github.com/gists/x"),
            "https://api.github.com/gists/x"
        );

        let proxied = GistClient::new("", "https://proxy.example/", &operators(), 0).unwrap();
        assert_eq!(
            proxied.build_url("https://api.github.com/gists/x"),
            "https://proxy.example/https://api.github.com/gists/x"
        );
    }

    #[test]
    fn test_result_gist_body() {
        let artifact = PublishableArtifact {
            generated_at: DateTime::parse_from_rfc3339("2025-03-01T12:00:00Z")
                .unwrap()
                .with_timezone(&Utc),
            domain: "example.com".to_string(),
            subdomain: "edge".to_string(),
            lines: Vec::new(),
            explain: BTreeMap::new(),
        };

        let body = result_gist_body(&artifact).unwrap();
        assert_eq!(body["public"], false);
        let content = body["files"][RESULT_FILE_NAME]["content"].as_str().unwrap();
        assert!(content.contains("\"domain\": \"example.com\""));
    }

    #[test]
    fn test_status_error_mapping() {
        assert!(matches!(status_error(401, "GET", ""), Error::Authentication(_)));
        assert!(matches!(status_error(403, "GET", ""), Error::Authentication(_)));
        assert!(matches!(status_error(404, "GET", ""), Error::NotFound(_)));
        assert!(matches!(status_error(429, "GET", ""), Error::RateLimited(_)));
        assert!(matches!(status_error(422, "GET", "bad"), Error::Http(_)));
    }

    /// Serve one canned status per connection and count the requests
    async fn serve_statuses(statuses: Vec<u16>) -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();

        tokio::spawn(async move {
            for status in statuses {
                let Ok((mut stream, _)) = listener.accept().await else {
                    return;
                };
                counter.fetch_add(1, Ordering::SeqCst);

                let mut request = Vec::new();
                let mut chunk = [0u8; 1024];
                while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                    match stream.read(&mut chunk).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => request.extend_from_slice(&chunk[..n]),
                    }
                }

                let body = format!("status {}", status);
                let response = format!(
                    "HTTP/1.1 {} Canned\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                    status,
                    body.len(),
                    body
                );
                let _ = stream.write_all(response.as_bytes()).await;
                let _ = stream.shutdown().await;
            }
        });

        (format!("http://{}/gists/abc", addr), hits)
    }

    fn fast_retry_client() -> GistClient {
        GistClient::new("", "", &operators(), 0)
            .unwrap()
            .with_retry_delay(Duration::ZERO)
    }

    #[tokio::test]
    async fn test_server_errors_are_retried() {
        let (url, hits) = serve_statuses(vec![503, 503, 200]).await;

        let body = fast_retry_client().get_text(&url, "GET gist abc").await.unwrap();
        assert_eq!(body, "status 200");
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retries_stop_after_three_attempts() {
        let (url, hits) = serve_statuses(vec![502, 503, 500, 200]).await;

        let err = fast_retry_client().get_text(&url, "GET gist abc").await.unwrap_err();
        assert!(matches!(err, Error::Http(_)));
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_client_errors_are_not_retried() {
        let (url, hits) = serve_statuses(vec![404, 200]).await;

        let err = fast_retry_client().get_text(&url, "GET gist abc").await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_token_not_exposed_in_debug() {
        let client = GistClient::new("ghp_secret_token", "", &operators(), 0).unwrap();
        let debug_str = format!("{:?}", client);
        assert!(!debug_str.contains("ghp_secret_token"));
        assert!(debug_str.contains("GistClient"));
    }
}
