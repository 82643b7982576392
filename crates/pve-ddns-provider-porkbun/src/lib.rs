// # Porkbun DNS Provider
//
// DnsProvider and PublicIpResolver adapters for the Porkbun API v3.
//
// ## Behavior
//
// - Credentials are the string `"API_KEY,API_SECRET"`, split at the first
//   comma; both halves go into every request body.
// - Records are addressed by name and type, so writes need no memoized
//   provider-side ids. Reads and writes still share one instance per
//   credential pair like every other provider.
// - `/ping` echoes the caller's source address and doubles as both the
//   credential check and the public-IP lookup. Which family it reports
//   depends on how the connection was routed; the resolver answers `None`
//   for the family the echoed address does not belong to.
//
// ## Security
//
// - Neither credential half appears in logs or Debug output.
//
// ## API Reference
//
// - https://porkbun.com/api/json/v3/documentation
// - Read:  POST `/dns/retrieveByNameType/{root}/{A|AAAA}[/{sub}]`
// - Write: POST `/dns/editByNameType/{root}/{A|AAAA}[/{sub}]` `{content}`
// - Ping:  POST `/ping` -> `{"status":"SUCCESS","yourIp":"..."}`

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::time::Duration;

use async_trait::async_trait;
use pve_ddns_core::domain::split_domain;
use pve_ddns_core::error::{Error, Result};
use pve_ddns_core::traits::{DnsProvider, PublicIpResolver};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Porkbun API base URL
const PORKBUN_API_BASE: &str = "https://porkbun.com/api/json/v3";

/// "API_KEY,API_SECRET" split into its halves
#[derive(Clone)]
struct ApiKeys {
    key: String,
    secret: String,
}

impl ApiKeys {
    fn parse(credentials: &str, context: &str) -> Result<Self> {
        if credentials.is_empty() {
            return Err(Error::config(format!("{context}: credentials cannot be empty")));
        }
        let Some((key, secret)) = credentials.split_once(',') else {
            return Err(Error::config(format!(
                "{context}: credentials must be in the form 'API_KEY,API_SECRET'"
            )));
        };
        Ok(Self {
            key: key.to_string(),
            secret: secret.to_string(),
        })
    }

    /// The request body every endpoint expects
    fn auth_body(&self) -> Value {
        serde_json::json!({
            "apikey": self.key,
            "secretapikey": self.secret,
        })
    }
}

/// Porkbun DNS provider adapter
pub struct PorkbunDns {
    keys: ApiKeys,
    client: reqwest::Client,
    /// (record name, record type) pairs seen by a successful read; writes
    /// are name-addressed but still honor the resolve-before-write order
    resolved: Mutex<std::collections::HashSet<(String, &'static str)>>,
}

// Custom Debug implementation that hides both credential halves
impl fmt::Debug for PorkbunDns {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PorkbunDns")
            .field("api_key", &"<REDACTED>")
            .field("api_secret", &"<REDACTED>")
            .finish()
    }
}

impl PorkbunDns {
    /// Create a new Porkbun adapter
    ///
    /// # Parameters
    ///
    /// - `credentials`: the `"API_KEY,API_SECRET"` pair from the config
    /// - `timeout`: per-request HTTP timeout
    pub fn new(credentials: impl Into<String>, timeout: Duration) -> Result<Self> {
        let keys = ApiKeys::parse(&credentials.into(), "porkbun")?;
        let client = build_client(timeout, "porkbun")?;
        Ok(Self {
            keys,
            client,
            resolved: Mutex::new(std::collections::HashSet::new()),
        })
    }

    /// Verify the credentials against the API; used once at startup
    pub async fn verify(&self) -> Result<()> {
        let json = post_json(&self.client, "/ping", self.keys.auth_body(), "porkbun").await?;
        check_status(&json).map_err(|e| Error::auth(format!("porkbun keys rejected: {e}")))?;
        Ok(())
    }

    /// Current record content for (domain, type)
    ///
    /// Returns `Ok(None)` when no record of the type exists; records are
    /// never created by this adapter.
    async fn fetch_record(&self, domain: &str, record_type: &'static str) -> Result<Option<String>> {
        let json = post_json(
            &self.client,
            &record_endpoint("retrieveByNameType", domain, record_type),
            self.keys.auth_body(),
            "porkbun",
        )
        .await?;
        check_status(&json)
            .map_err(|e| Error::provider("porkbun", format!("record lookup for {domain}: {e}")))?;

        let Some(content) = first_record_content(&json) else {
            return Ok(None);
        };
        self.resolved
            .lock()
            .await
            .insert((domain.to_string(), record_type));
        Ok(Some(content.to_string()))
    }

    /// Rewrite the record content by name and type
    async fn write_record(&self, domain: &str, record_type: &'static str, value: &str) -> Result<()> {
        if !self
            .resolved
            .lock()
            .await
            .contains(&(domain.to_string(), record_type))
        {
            return Err(Error::provider(
                "porkbun",
                format!("{domain} ({record_type}) was never resolved by this instance; resolve the record before writing"),
            ));
        }

        let mut body = self.keys.auth_body();
        body["content"] = Value::String(value.to_string());
        let json = post_json(
            &self.client,
            &record_endpoint("editByNameType", domain, record_type),
            body,
            "porkbun",
        )
        .await?;
        check_status(&json)
            .map_err(|e| Error::provider("porkbun", format!("record update for {domain}: {e}")))?;

        info!("porkbun {record_type} record {domain} set to {value}");
        Ok(())
    }
}

#[async_trait]
impl DnsProvider for PorkbunDns {
    fn provider_name(&self) -> &'static str {
        "porkbun"
    }

    async fn ipv4(&self, domain: &str) -> Result<Option<Ipv4Addr>> {
        match self.fetch_record(domain, "A").await? {
            Some(content) => {
                let ip = content.parse().map_err(|_| {
                    Error::provider(
                        "porkbun",
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
                        "porkbun",
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

/// Public-IP resolver backed by the Porkbun `/ping` endpoint
pub struct PorkbunPublicIp {
    keys: ApiKeys,
    client: reqwest::Client,
}

impl fmt::Debug for PorkbunPublicIp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PorkbunPublicIp")
            .field("api_key", &"<REDACTED>")
            .field("api_secret", &"<REDACTED>")
            .finish()
    }
}

impl PorkbunPublicIp {
    /// Create a new ping-based resolver with the same credential format as
    /// the DNS adapter
    pub fn new(credentials: impl Into<String>, timeout: Duration) -> Result<Self> {
        let keys = ApiKeys::parse(&credentials.into(), "porkbun public-ip")?;
        let client = build_client(timeout, "porkbun public-ip")?;
        Ok(Self { keys, client })
    }

    /// The address `/ping` echoes back, whatever its family
    async fn ping(&self) -> Result<IpAddr> {
        let json = post_json(&self.client, "/ping", self.keys.auth_body(), "porkbun").await?;
        check_status(&json)
            .map_err(|e| Error::public_ip(format!("porkbun ping failed: {e}")))?;
        let Some(text) = json["yourIp"].as_str() else {
            return Err(Error::public_ip("porkbun ping answered without a yourIp field"));
        };
        text.parse().map_err(|_| {
            Error::public_ip(format!("porkbun ping answered '{text}', not an IP address"))
        })
    }
}

#[async_trait]
impl PublicIpResolver for PorkbunPublicIp {
    fn service_name(&self) -> &'static str {
        "porkbun"
    }

    async fn public_v4(&self) -> Result<Option<Ipv4Addr>> {
        match self.ping().await? {
            IpAddr::V4(ip) => {
                debug!("porkbun ping reports public IPv4 {ip}");
                Ok(Some(ip))
            }
            IpAddr::V6(ip) => {
                // the connection went out over v6; nothing to learn about v4
                warn!("porkbun ping answered over IPv6 ({ip}); public IPv4 unknown");
                Ok(None)
            }
        }
    }

    async fn public_v6(&self) -> Result<Option<Ipv6Addr>> {
        match self.ping().await? {
            IpAddr::V6(ip) => {
                debug!("porkbun ping reports public IPv6 {ip}");
                Ok(Some(ip))
            }
            IpAddr::V4(ip) => {
                warn!("porkbun ping answered over IPv4 ({ip}); public IPv6 unknown");
                Ok(None)
            }
        }
    }
}

fn build_client(timeout: Duration, context: &str) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| Error::http(format!("{context}: failed to build HTTP client: {e}")))
}

/// Record endpoint path; the subdomain segment is omitted for apex names
fn record_endpoint(action: &str, domain: &str, record_type: &str) -> String {
    let parts = split_domain(domain);
    if parts.is_apex() {
        format!("/dns/{action}/{}/{record_type}", parts.root)
    } else {
        format!("/dns/{action}/{}/{record_type}/{}", parts.root, parts.sub)
    }
}

async fn post_json(
    client: &reqwest::Client,
    endpoint: &str,
    body: Value,
    context: &str,
) -> Result<Value> {
    let url = format!("{PORKBUN_API_BASE}{endpoint}");
    let response = client
        .post(&url)
        .json(&body)
        .send()
        .await
        .map_err(|e| Error::http(format!("{context} request to {endpoint} failed: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        let text = response.text().await.unwrap_or_default();
        return Err(Error::provider(
            "porkbun",
            format!("{endpoint}: unexpected status {status}: {text}"),
        ));
    }
    response
        .json()
        .await
        .map_err(|e| Error::provider("porkbun", format!("{endpoint}: invalid JSON: {e}")))
}

/// Check the `status == "SUCCESS"` convention
fn check_status(json: &Value) -> std::result::Result<(), String> {
    match json["status"].as_str() {
        Some("SUCCESS") => Ok(()),
        Some(other) => Err(format!(
            "status {other}: {}",
            json["message"].as_str().unwrap_or("<no message>")
        )),
        None => Err("response carries no status field".to_string()),
    }
}

/// Content of the first record in a retrieve answer
fn first_record_content(json: &Value) -> Option<&str> {
    json["records"]
        .as_array()
        .and_then(|records| records.first())
        .and_then(|record| record["content"].as_str())
}
