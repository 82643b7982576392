// # Cloudflare DNS Provider
//
// DnsProvider adapter for the Cloudflare API v4.
//
// ## Behavior
//
// - Zone ids and record ids are memoized per instance after the first
//   successful read. The write path requires those memos, so a record must
//   be resolved through this instance before it can be written; the
//   engine's cache seeding guarantees that ordering.
// - One instance serves every target bound to the same credentials, which
//   is what keeps the memos coherent.
// - No retry, no backoff, no record caching here; the engine owns
//   scheduling and the record cache.
//
// ## Security
//
// - The API token never appears in logs or Debug output.
//
// ## API Reference
//
// - Cloudflare API v4: https://developers.cloudflare.com/api/
// - List zones: GET `/zones?name=...`
// - List records: GET `/zones/:zone_id/dns_records?type=...&name=...`
// - Update record: PATCH `/zones/:zone_id/dns_records/:record_id`

use std::collections::HashMap;
use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::time::Duration;

use async_trait::async_trait;
use pve_ddns_core::domain::split_domain;
use pve_ddns_core::error::{Error, Result};
use pve_ddns_core::traits::DnsProvider;
use reqwest::StatusCode;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Cloudflare API base URL
const CLOUDFLARE_API_BASE: &str = "https://api.cloudflare.com/client/v4";

/// Cloudflare DNS provider adapter
///
/// Resolution memoizes the zone id per zone root and the record id per
/// (record name, record type) pair; writes are PATCHes against those ids.
pub struct CloudflareDns {
    /// Cloudflare API token; never log this value
    api_token: String,

    /// HTTP client for API requests
    client: reqwest::Client,

    /// Zone root -> zone id, filled on first successful zone lookup
    zones: Mutex<HashMap<String, String>>,

    /// (record name, record type) -> record id, filled on first read
    records: Mutex<HashMap<(String, &'static str), String>>,
}

// Custom Debug implementation that hides the API token
impl fmt::Debug for CloudflareDns {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CloudflareDns")
            .field("api_token", &"<REDACTED>")
            .finish()
    }
}

impl CloudflareDns {
    /// Create a new Cloudflare adapter
    ///
    /// # Parameters
    ///
    /// - `api_token`: API token with Zone:DNS:Edit permissions
    /// - `timeout`: per-request HTTP timeout
    pub fn new(api_token: impl Into<String>, timeout: Duration) -> Result<Self> {
        let api_token = api_token.into();
        if api_token.is_empty() {
            return Err(Error::config("cloudflare: API token cannot be empty"));
        }
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::http(format!("cloudflare: failed to build HTTP client: {e}")))?;

        Ok(Self {
            api_token,
            client,
            zones: Mutex::new(HashMap::new()),
            records: Mutex::new(HashMap::new()),
        })
    }

    /// Verify the token against the API; used once at startup
    ///
    /// # API Call
    ///
    /// ```http
    /// GET /user/tokens/verify
    /// Authorization: Bearer <token>
    /// ```
    pub async fn verify(&self) -> Result<()> {
        let url = format!("{CLOUDFLARE_API_BASE}/user/tokens/verify");
        let json = self.get_json(&url, "token verification").await?;
        if !json["success"].as_bool().unwrap_or(false) {
            return Err(Error::auth(format!(
                "cloudflare token rejected: {}",
                json["errors"]
            )));
        }
        debug!("cloudflare token verified");
        Ok(())
    }

    /// Zone id for the zone root of `domain`, memoized across calls
    ///
    /// # API Call
    ///
    /// ```http
    /// GET /zones?name=example.com
    /// Authorization: Bearer <token>
    /// ```
    async fn zone_id(&self, domain: &str) -> Result<String> {
        let root = split_domain(domain).root;
        if let Some(id) = self.zones.lock().await.get(&root) {
            return Ok(id.clone());
        }

        debug!("looking up cloudflare zone for {root}");
        let url = format!("{CLOUDFLARE_API_BASE}/zones?name={root}");
        let json = self.get_json(&url, "zone lookup").await?;

        let zone_id = first_result(&json)
            .and_then(|zone| zone["id"].as_str())
            .ok_or_else(|| Error::provider("cloudflare", format!("no zone found for {root}")))?
            .to_string();

        debug!("cloudflare zone {root} -> {zone_id}");
        self.zones.lock().await.insert(root, zone_id.clone());
        Ok(zone_id)
    }

    /// Current record content, memoizing the record id on the way
    ///
    /// Returns `Ok(None)` when the record does not exist; records are never
    /// created by this adapter.
    ///
    /// # API Call
    ///
    /// ```http
    /// GET /zones/:zone_id/dns_records?type=A&name=sub.example.com
    /// Authorization: Bearer <token>
    /// ```
    async fn fetch_record(&self, domain: &str, record_type: &'static str) -> Result<Option<String>> {
        let zone_id = self.zone_id(domain).await?;
        let url = format!(
            "{CLOUDFLARE_API_BASE}/zones/{zone_id}/dns_records?type={record_type}&name={domain}"
        );
        let json = self.get_json(&url, "record lookup").await?;

        let Some(record) = first_result(&json) else {
            return Ok(None);
        };
        let (Some(record_id), Some(content)) = (record["id"].as_str(), record["content"].as_str())
        else {
            return Err(Error::provider(
                "cloudflare",
                format!("malformed record in response for {domain}"),
            ));
        };

        self.records
            .lock()
            .await
            .insert((domain.to_string(), record_type), record_id.to_string());
        Ok(Some(content.to_string()))
    }

    /// PATCH the record to `value` using the memoized ids
    ///
    /// # API Call
    ///
    /// ```http
    /// PATCH /zones/:zone_id/dns_records/:record_id
    /// { "type": "A", "name": "sub.example.com", "content": "192.0.2.1" }
    /// ```
    async fn write_record(&self, domain: &str, record_type: &'static str, value: &str) -> Result<()> {
        let root = split_domain(domain).root;
        let Some(zone_id) = self.zones.lock().await.get(&root).cloned() else {
            return Err(Error::provider(
                "cloudflare",
                format!("no zone id on hand for {domain}; resolve the record before writing"),
            ));
        };
        let Some(record_id) = self
            .records
            .lock()
            .await
            .get(&(domain.to_string(), record_type))
            .cloned()
        else {
            return Err(Error::provider(
                "cloudflare",
                format!("no record id on hand for {domain} ({record_type}); resolve the record before writing"),
            ));
        };

        let url = format!("{CLOUDFLARE_API_BASE}/zones/{zone_id}/dns_records/{record_id}");
        let body = serde_json::json!({
            "type": record_type,
            "name": domain,
            "content": value,
        });

        let response = self
            .client
            .patch(&url)
            .bearer_auth(&self.api_token)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::http(format!("cloudflare record update request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(api_error("record update", status, &text));
        }

        let json: Value = response
            .json()
            .await
            .map_err(|e| Error::provider("cloudflare", format!("record update: invalid JSON: {e}")))?;
        if !json["success"].as_bool().unwrap_or(false) {
            return Err(Error::provider(
                "cloudflare",
                format!("record update rejected: {}", json["errors"]),
            ));
        }

        info!("cloudflare {record_type} record {domain} set to {value}");
        Ok(())
    }

    async fn get_json(&self, url: &str, context: &str) -> Result<Value> {
        let response = self
            .client
            .get(url)
            .bearer_auth(&self.api_token)
            .send()
            .await
            .map_err(|e| Error::http(format!("cloudflare {context} request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(api_error(context, status, &text));
        }
        response
            .json()
            .await
            .map_err(|e| Error::provider("cloudflare", format!("{context}: invalid JSON: {e}")))
    }
}

#[async_trait]
impl DnsProvider for CloudflareDns {
    fn provider_name(&self) -> &'static str {
        "cloudflare"
    }

    async fn ipv4(&self, domain: &str) -> Result<Option<Ipv4Addr>> {
        match self.fetch_record(domain, "A").await? {
            Some(content) => {
                let ip = content.parse().map_err(|_| {
                    Error::provider(
                        "cloudflare",
                        format!("A record for {domain} holds '{content}', not an IPv4 address"),
                    )
                })?;
                Ok(Some(ip))
            }
            None => Ok(None),
        }
    }

    async fn ipv6(&self, domain: &str) -> Result<Option<Ipv6Addr>> {
        match self.fetch_record(domain, "AAAA").await? {
            Some(content) => {
                let ip = content.parse().map_err(|_| {
                    Error::provider(
                        "cloudflare",
                        format!("AAAA record for {domain} holds '{content}', not an IPv6 address"),
                    )
                })?;
                Ok(Some(ip))
            }
            None => Ok(None),
        }
    }

    async fn set_ipv4(&self, domain: &str, ip: Ipv4Addr) -> Result<()> {
        self.write_record(domain, "A", &ip.to_string()).await
    }

    async fn set_ipv6(&self, domain: &str, ip: Ipv6Addr) -> Result<()> {
        self.write_record(domain, "AAAA", &ip.to_string()).await
    }
}

/// First element of the response `result` array
fn first_result(json: &Value) -> Option<&Value> {
    json["result"].as_array().and_then(|results| results.first())
}

/// Map an HTTP error status to a crate error
fn api_error(context: &str, status: StatusCode, body: &str) -> Error {
    match status.as_u16() {
        401 | 403 => Error::auth(format!(
            "cloudflare {context}: token rejected or lacks permissions ({status})"
        )),
        429 => Error::provider("cloudflare", format!("{context}: rate limited ({status})")),
        500..=599 => Error::provider(
            "cloudflare",
            format!("{context}: server error {status}: {body}"),
        ),
        _ => Error::provider(
            "cloudflare",
            format!("{context}: unexpected status {status}: {body}"),
        ),
    }
}
