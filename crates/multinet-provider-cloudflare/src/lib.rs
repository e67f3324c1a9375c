// # Cloudflare Record Store
//
// This crate provides a Cloudflare implementation of `RecordStore` for
// multinet.
//
// ## Record Sets
//
// Cloudflare has no record-set object: a "record set" is every record with
// the same name and type. The record set ID configured for a line is the
// fully-qualified record name, e.g. `cu.edge.example.com`.
//
// Replacing a record set:
//
// 1. List the `name` + `type` records
// 2. Plan deletes for records whose address is not desired (and duplicates),
//    TTL patches for kept records and creates for missing addresses
// 3. Send the whole plan as one batch request
//
// Cloudflare applies a batch as a single transaction, so a failed
// replacement leaves the record set as it was. When nothing has to change
// the call returns `ReplaceOutcome::Unchanged`.
//
// ## Behaviour
//
// - HTTP timeout configured (30 seconds)
// - Specific error handling for HTTP status codes (401/403, 404, 409, 429, 5xx)
// - Dry-run mode: lookups are performed, changes are only logged
// - No retries: a failed call fails the line, and the run stops there
//
// ## Security
//
// - API token NEVER appears in logs or Debug output
// - An empty token is rejected at construction
//
// ## API Reference
//
// - Cloudflare API v4: https://developers.cloudflare.com/api/
// - List Zones: GET `/zones?name=...`
// - List DNS Records: GET `/zones/:zone_id/dns_records?name=...&type=...`
// - Batch DNS Records: POST `/zones/:zone_id/dns_records/batch`

use async_trait::async_trait;
use multinet_core::config::ProviderConfig;
use multinet_core::traits::{RecordSetUpdate, RecordStore, RecordStoreFactory, ReplaceOutcome};
use multinet_core::{Error, ProviderRegistry, Result};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashSet;
use std::net::IpAddr;
use std::time::Duration;

/// Cloudflare API base URL
const CLOUDFLARE_API_BASE: &str = "https://api.cloudflare.com/client/v4";

/// Default HTTP timeout for API requests (30 seconds)
const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Records fetched per list call; a record set is far smaller than this
const LIST_PAGE_SIZE: &str = "100";

/// Environment variable forcing dry-run mode when set to `dry-run`
pub const MODE_ENV_VAR: &str = "MULTINET_MODE";

/// An existing DNS record of a record set
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ExistingRecord {
    pub id: String,
    pub content: String,
    /// 1 means automatic
    #[serde(default)]
    pub ttl: u32,
}

/// Changes turning a record set into the desired address list
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplacementPlan {
    /// Addresses to create, in desired order
    pub create: Vec<String>,
    /// Kept records whose TTL differs from the desired one
    pub retime: Vec<ExistingRecord>,
    /// Records to delete
    pub delete: Vec<ExistingRecord>,
}

impl ReplacementPlan {
    pub fn is_empty(&self) -> bool {
        self.create.is_empty() && self.retime.is_empty() && self.delete.is_empty()
    }

    /// Body of the batch request applying this plan to `update`
    ///
    /// Cloudflare runs deletes, then patches, then posts, all in one
    /// transaction.
    pub fn batch_body(&self, update: &RecordSetUpdate) -> Value {
        let deletes: Vec<Value> = self
            .delete
            .iter()
            .map(|record| serde_json::json!({ "id": record.id }))
            .collect();
        let patches: Vec<Value> = self
            .retime
            .iter()
            .map(|record| serde_json::json!({ "id": record.id, "ttl": update.ttl }))
            .collect();
        let posts: Vec<Value> = self
            .create
            .iter()
            .map(|address| {
                serde_json::json!({
                    "type": update.record_type(),
                    "name": update.record_set_id,
                    "content": address,
                    "ttl": update.ttl,
                    "proxied": false,
                })
            })
            .collect();

        serde_json::json!({
            "deletes": deletes,
            "patches": patches,
            "posts": posts,
        })
    }
}

/// Plan the changes turning `existing` into exactly `desired` at `ttl`
///
/// Addresses are compared in canonical form, so `2001:DB8::1` matches
/// `2001:db8:0:0:0:0:0:1`. Of several records holding the same desired
/// address, the first is kept.
pub fn plan_replacement(existing: &[ExistingRecord], desired: &[String], ttl: u32) -> ReplacementPlan {
    let wanted: HashSet<String> = desired.iter().map(|a| canonical(a)).collect();
    let mut kept: HashSet<String> = HashSet::new();
    let mut plan = ReplacementPlan::default();

    for record in existing {
        let content = canonical(&record.content);
        if wanted.contains(&content) && kept.insert(content) {
            if record.ttl != ttl {
                plan.retime.push(record.clone());
            }
            continue;
        }
        plan.delete.push(record.clone());
    }

    let mut planned: HashSet<String> = HashSet::new();
    for address in desired {
        let address_key = canonical(address);
        if !kept.contains(&address_key) && planned.insert(address_key) {
            plan.create.push(address.clone());
        }
    }

    plan
}

fn canonical(address: &str) -> String {
    address
        .trim()
        .parse::<IpAddr>()
        .map(|ip| ip.to_string())
        .unwrap_or_else(|_| address.trim().to_ascii_lowercase())
}

/// Guess the zone name of a record name
///
/// Uses the last two labels, or the last three when the second-level label
/// is short (`example.co.uk`).
pub fn zone_name_for(record_name: &str) -> Result<String> {
    let parts: Vec<&str> = record_name.trim_end_matches('.').split('.').collect();
    if parts.len() < 2 || parts.iter().any(|p| p.is_empty()) {
        return Err(Error::config(format!("Invalid record name: {}", record_name)));
    }

    let n = parts.len();
    let zone = if n >= 3 && parts[n - 2].len() <= 3 {
        format!("{}.{}.{}", parts[n - 3], parts[n - 2], parts[n - 1])
    } else {
        format!("{}.{}", parts[n - 2], parts[n - 1])
    };
    Ok(zone)
}

/// Map an unsuccessful HTTP status to an error
pub fn status_error(status: u16, context: &str, body: &str) -> Error {
    match status {
        401 | 403 => Error::auth(format!(
            "{}: invalid API token or insufficient permissions (status {})",
            context, status
        )),
        404 => Error::not_found(format!("{}: not found", context)),
        409 => Error::provider(
            "cloudflare",
            format!("{}: conflict, record changed concurrently (status {})", context, status),
        ),
        429 => Error::rate_limited(format!("{}: rate limit exceeded", context)),
        500..=599 => Error::provider(
            "cloudflare",
            format!("{}: server error (transient): {} - {}", context, status, body.trim()),
        ),
        _ => Error::provider(
            "cloudflare",
            format!("{}: {} - {}", context, status, body.trim()),
        ),
    }
}

/// Error for a call that produced no usable API response
pub fn transport_error(context: &str, detail: impl std::fmt::Display) -> Error {
    Error::record_store(format!("cloudflare {}: {}", context, detail))
}

/// Cloudflare record store
///
/// # Dry-Run Mode
///
/// When `dry_run` is true the store performs the zone and record lookups,
/// logs the create/delete plan and changes nothing.
///
/// # Security
///
/// The Debug implementation does NOT expose the API token.
pub struct CloudflareRecordStore {
    /// Cloudflare API token
    /// ⚠️ NEVER log this value
    api_token: String,

    /// Zone ID (optional, looked up from the record name otherwise)
    zone_id: Option<String>,

    /// HTTP client for API requests
    client: reqwest::Client,

    /// Log planned changes instead of applying them
    dry_run: bool,
}

// Custom Debug implementation that hides the API token
impl std::fmt::Debug for CloudflareRecordStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudflareRecordStore")
            .field("api_token", &"<REDACTED>")
            .field("zone_id", &self.zone_id)
            .field("dry_run", &self.dry_run)
            .finish()
    }
}

impl CloudflareRecordStore {
    /// Create a new Cloudflare record store
    ///
    /// # Parameters
    ///
    /// - `api_token`: Cloudflare API token with Zone:DNS:Edit permissions
    /// - `zone_id`: Optional zone ID (looked up per record name otherwise)
    /// - `dry_run`: If true, perform lookups but skip changes
    pub fn new(api_token: impl Into<String>, zone_id: Option<String>, dry_run: bool) -> Result<Self> {
        let api_token = api_token.into();
        if api_token.is_empty() {
            return Err(Error::config("Cloudflare API token cannot be empty"));
        }

        let client = reqwest::Client::builder()
            .timeout(DEFAULT_HTTP_TIMEOUT)
            .build()
            .map_err(|e| Error::http(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            api_token,
            zone_id: zone_id.filter(|z| !z.is_empty()),
            client,
            dry_run,
        })
    }

    pub fn new_live(api_token: impl Into<String>, zone_id: Option<String>) -> Result<Self> {
        Self::new(api_token, zone_id, false)
    }

    pub fn new_dry_run(api_token: impl Into<String>, zone_id: Option<String>) -> Result<Self> {
        Self::new(api_token, zone_id, true)
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// Send a request and return the `result` of a successful envelope
    async fn call(&self, request: reqwest::RequestBuilder, context: &str) -> Result<Value> {
        let response = request
            .bearer_auth(&self.api_token)
            .header("Content-Type", "application/json")
            .send()
            .await
            .map_err(|e| transport_error(context, format!("HTTP request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read error response".to_string());
            return Err(status_error(status.as_u16(), context, &error_text));
        }

        let json: Value = response.json().await.map_err(|e| {
            transport_error(context, format!("failed to parse response: {}", e))
        })?;

        if json["success"].as_bool() == Some(false) {
            return Err(Error::provider(
                "cloudflare",
                format!("{}: API reported failure: {}", context, json["errors"]),
            ));
        }

        Ok(json["result"].clone())
    }

    /// Get the zone ID for a record name
    ///
    /// ```http
    /// GET /zones?name=example.com
    /// ```
    async fn get_zone_id(&self, record_name: &str) -> Result<String> {
        if let Some(zone_id) = &self.zone_id {
            tracing::debug!("Using pre-configured zone ID");
            return Ok(zone_id.clone());
        }

        let zone_name = zone_name_for(record_name)?;
        tracing::debug!("Looking up zone ID for {}", zone_name);

        let url = format!("{}/zones", CLOUDFLARE_API_BASE);
        let result = self
            .call(
                self.client.get(&url).query(&[("name", zone_name.as_str())]),
                &format!("zone lookup {}", zone_name),
            )
            .await?;

        let zone_id = result
            .as_array()
            .and_then(|zones| zones.first())
            .and_then(|zone| zone["id"].as_str())
            .ok_or_else(|| Error::not_found(format!("Zone not found: {}", zone_name)))?;

        tracing::debug!("Found zone ID: {}", zone_id);
        Ok(zone_id.to_string())
    }

    /// List the records of one record set
    ///
    /// ```http
    /// GET /zones/:zone_id/dns_records?name=cu.example.com&type=A
    /// ```
    async fn list_records(
        &self,
        zone_id: &str,
        record_name: &str,
        record_type: &str,
    ) -> Result<Vec<ExistingRecord>> {
        let url = format!("{}/zones/{}/dns_records", CLOUDFLARE_API_BASE, zone_id);
        let result = self
            .call(
                self.client.get(&url).query(&[
                    ("name", record_name),
                    ("type", record_type),
                    ("per_page", LIST_PAGE_SIZE),
                ]),
                &format!("list {} {}", record_type, record_name),
            )
            .await?;

        serde_json::from_value(result).map_err(|e| {
            Error::provider(
                "cloudflare",
                format!("Invalid record list for {}: {}", record_name, e),
            )
        })
    }

    /// Apply a plan in one transactional batch
    ///
    /// ```http
    /// POST /zones/:zone_id/dns_records/batch
    /// ```
    async fn apply_plan(
        &self,
        zone_id: &str,
        update: &RecordSetUpdate,
        plan: &ReplacementPlan,
    ) -> Result<()> {
        let url = format!("{}/zones/{}/dns_records/batch", CLOUDFLARE_API_BASE, zone_id);
        self.call(
            self.client.post(&url).json(&plan.batch_body(update)),
            &format!("batch {} {}", update.record_type(), update.record_set_id),
        )
        .await?;
        Ok(())
    }
}

#[async_trait]
impl RecordStore for CloudflareRecordStore {
    async fn replace_record_set(&self, update: &RecordSetUpdate) -> Result<ReplaceOutcome> {
        let record_name = update.record_set_id.as_str();
        let record_type = update.record_type();

        tracing::info!(
            "Replacing Cloudflare {} {} with {:?} [mode: {}]",
            record_type,
            record_name,
            update.addresses,
            if self.dry_run { "DRY-RUN" } else { "LIVE" }
        );

        let zone_id = self.get_zone_id(record_name).await?;
        let existing = self.list_records(&zone_id, record_name, record_type).await?;
        let plan = plan_replacement(&existing, &update.addresses, update.ttl);

        if plan.is_empty() {
            tracing::info!("{} {} already up to date", record_type, record_name);
            return Ok(ReplaceOutcome::Unchanged);
        }

        let previous: Vec<String> = existing.iter().map(|r| r.content.clone()).collect();

        if self.dry_run {
            for record in &plan.delete {
                tracing::info!(
                    "[DRY-RUN] Would delete {} {} -> {} (id {})",
                    record_type,
                    record_name,
                    record.content,
                    record.id
                );
            }
            for record in &plan.retime {
                tracing::info!(
                    "[DRY-RUN] Would set TTL of {} {} -> {} from {} to {}",
                    record_type,
                    record_name,
                    record.content,
                    record.ttl,
                    update.ttl
                );
            }
            for address in &plan.create {
                tracing::info!("[DRY-RUN] Would create {} {} -> {}", record_type, record_name, address);
            }
            return Ok(ReplaceOutcome::Replaced {
                previous: Some(previous),
            });
        }

        self.apply_plan(&zone_id, update, &plan).await?;

        tracing::info!(
            "{} {} replaced: {} created, {} retimed, {} deleted",
            record_type,
            record_name,
            plan.create.len(),
            plan.retime.len(),
            plan.delete.len()
        );
        Ok(ReplaceOutcome::Replaced {
            previous: Some(previous),
        })
    }

    fn provider_name(&self) -> &'static str {
        "cloudflare"
    }
}

/// Factory for creating Cloudflare record stores
pub struct CloudflareFactory;

impl RecordStoreFactory for CloudflareFactory {
    fn create(&self, config: &ProviderConfig) -> Result<Box<dyn RecordStore>> {
        match config {
            ProviderConfig::Cloudflare {
                api_token,
                zone_id,
                dry_run,
            } => {
                let forced = std::env::var(MODE_ENV_VAR)
                    .map(|mode| mode.eq_ignore_ascii_case("dry-run"))
                    .unwrap_or(false);
                let dry_run = *dry_run || forced;

                if dry_run {
                    tracing::warn!("Cloudflare record store running in DRY-RUN mode - no changes will be made");
                }

                Ok(Box::new(CloudflareRecordStore::new(
                    api_token.clone(),
                    zone_id.clone(),
                    dry_run,
                )?))
            }
            _ => Err(Error::config("Invalid config for Cloudflare provider")),
        }
    }
}

/// Register the Cloudflare record store with a registry
///
/// # Example
///
/// ```rust
/// use multinet_core::ProviderRegistry;
///
/// let registry = ProviderRegistry::new();
/// multinet_provider_cloudflare::register(&registry);
/// assert!(registry.has_record_store("cloudflare"));
/// ```
pub fn register(registry: &ProviderRegistry) {
    registry.register_record_store("cloudflare", Box::new(CloudflareFactory));
}
