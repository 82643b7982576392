// # DNSPod DNS Provider
//
// DnsProvider adapter for the DNSPod API (dnsapi.cn).
//
// ## Behavior
//
// - Credentials are the string `"TOKEN_ID,TOKEN"`, passed whole as the
//   `login_token` form field.
// - Record.List answers carry the record id and line id that Record.Ddns
//   requires; both are memoized per (domain, family) on the read path, so a
//   write without a prior read through this instance fails. The engine's
//   cache seeding satisfies that ordering.
// - Every call is a form-encoded POST; `status.code == "1"` means success.
//
// ## Security
//
// - The login token never appears in logs or Debug output.
//
// ## API Reference
//
// - https://docs.dnspod.cn/api/
// - Verify: POST `Info.Version`
// - Read:   POST `Record.List`  (domain, sub_domain, record_type)
// - Write:  POST `Record.Ddns`  (record_id, record_line_id, value)

use std::collections::HashMap;
use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::time::Duration;

use async_trait::async_trait;
use pve_ddns_core::domain::split_domain;
use pve_ddns_core::error::{Error, Result};
use pve_ddns_core::traits::DnsProvider;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// DNSPod API base URL
const DNSPOD_API_BASE: &str = "https://dnsapi.cn";

/// Provider-side identifiers needed by the DDNS write call
#[derive(Debug, Clone)]
struct RecordMemo {
    record_id: String,
    line_id: String,
}

/// DNSPod DNS provider adapter
pub struct DnspodDns {
    /// "TOKEN_ID,TOKEN" credential pair; never log this value
    login_token: String,

    /// HTTP client for API requests
    client: reqwest::Client,

    /// (record name, record type) -> ids, filled on first read
    records: Mutex<HashMap<(String, &'static str), RecordMemo>>,
}

// Custom Debug implementation that hides the login token
impl fmt::Debug for DnspodDns {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DnspodDns")
            .field("login_token", &"<REDACTED>")
            .finish()
    }
}

impl DnspodDns {
    /// Create a new DNSPod adapter
    ///
    /// # Parameters
    ///
    /// - `credentials`: the `"TOKEN_ID,TOKEN"` pair from the config
    /// - `timeout`: per-request HTTP timeout
    pub fn new(credentials: impl Into<String>, timeout: Duration) -> Result<Self> {
        let login_token = credentials.into();
        if login_token.is_empty() {
            return Err(Error::config("dnspod: credentials cannot be empty"));
        }
        if !login_token.contains(',') {
            return Err(Error::config(
                "dnspod: credentials must be in the form 'TOKEN_ID,TOKEN'",
            ));
        }
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::http(format!("dnspod: failed to build HTTP client: {e}")))?;

        Ok(Self {
            login_token,
            client,
            records: Mutex::new(HashMap::new()),
        })
    }

    /// Verify the token against the API; used once at startup
    ///
    /// # API Call
    ///
    /// ```http
    /// POST /Info.Version
    /// login_token=...&format=json
    /// ```
    pub async fn verify(&self) -> Result<()> {
        let json = self
            .post_form("Info.Version", &[("format", "json")])
            .await?;
        check_status(&json).map_err(|e| Error::auth(format!("dnspod token rejected: {e}")))?;
        if let Some(version) = json["status"]["message"].as_str() {
            debug!("dnspod API version {version}");
        }
        Ok(())
    }

    /// Current record content, memoizing record and line ids on the way
    ///
    /// Returns `Ok(None)` when no record of the type exists; records are
    /// never created by this adapter.
    async fn fetch_record(&self, domain: &str, record_type: &'static str) -> Result<Option<String>> {
        let parts = split_domain(domain);
        let sub = sub_domain_field(&parts.sub);
        let json = self
            .post_form(
                "Record.List",
                &[
                    ("domain", parts.root.as_str()),
                    ("sub_domain", sub),
                    ("record_type", record_type),
                    ("format", "json"),
                    ("lang", "en"),
                ],
            )
            .await?;

        // code "10" is "no records of this kind", not a failure
        if json["status"]["code"].as_str() == Some("10") {
            return Ok(None);
        }
        check_status(&json)
            .map_err(|e| Error::provider("dnspod", format!("record lookup for {domain}: {e}")))?;

        let Some(record) = first_record(&json) else {
            return Ok(None);
        };
        let (Some(record_id), Some(line_id), Some(value)) = (
            record["id"].as_str(),
            record["line_id"].as_str(),
            record["value"].as_str(),
        ) else {
            return Err(Error::provider(
                "dnspod",
                format!("malformed record in response for {domain}"),
            ));
        };

        self.records.lock().await.insert(
            (domain.to_string(), record_type),
            RecordMemo {
                record_id: record_id.to_string(),
                line_id: line_id.to_string(),
            },
        );
        Ok(Some(value.to_string()))
    }

    /// Point the record at `value` via Record.Ddns using the memoized ids
    async fn write_record(&self, domain: &str, record_type: &'static str, value: &str) -> Result<()> {
        let Some(memo) = self
            .records
            .lock()
            .await
            .get(&(domain.to_string(), record_type))
            .cloned()
        else {
            return Err(Error::provider(
                "dnspod",
                format!("no record id on hand for {domain} ({record_type}); resolve the record before writing"),
            ));
        };

        let parts = split_domain(domain);
        let sub = sub_domain_field(&parts.sub);
        let json = self
            .post_form(
                "Record.Ddns",
                &[
                    ("domain", parts.root.as_str()),
                    ("sub_domain", sub),
                    ("record_id", memo.record_id.as_str()),
                    ("record_line_id", memo.line_id.as_str()),
                    ("value", value),
                    ("format", "json"),
                    ("lang", "en"),
                ],
            )
            .await?;
        check_status(&json)
            .map_err(|e| Error::provider("dnspod", format!("record update for {domain}: {e}")))?;

        info!("dnspod {record_type} record {domain} set to {value}");
        Ok(())
    }

    /// Form-encoded POST with the login token merged into `fields`
    async fn post_form(&self, action: &str, fields: &[(&str, &str)]) -> Result<Value> {
        let url = format!("{DNSPOD_API_BASE}/{action}");
        let mut form: Vec<(&str, &str)> = vec![("login_token", self.login_token.as_str())];
        form.extend_from_slice(fields);

        let response = self
            .client
            .post(&url)
            .form(&form)
            .send()
            .await
            .map_err(|e| Error::http(format!("dnspod {action} request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(Error::provider(
                "dnspod",
                format!("{action}: unexpected status {status}: {text}"),
            ));
        }
        response
            .json()
            .await
            .map_err(|e| Error::provider("dnspod", format!("{action}: invalid JSON: {e}")))
    }
}

#[async_trait]
impl DnsProvider for DnspodDns {
    fn provider_name(&self) -> &'static str {
        "dnspod"
    }

    async fn ipv4(&self, domain: &str) -> Result<Option<Ipv4Addr>> {
        match self.fetch_record(domain, "A").await? {
            Some(content) => {
                let ip = content.parse().map_err(|_| {
                    Error::provider(
                        "dnspod",
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
                        "dnspod",
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

/// DNSPod spells the zone apex as subdomain "@"
fn sub_domain_field(sub: &str) -> &str {
    if sub.is_empty() { "@" } else { sub }
}

/// Check the `status.code == "1"` success convention
fn check_status(json: &Value) -> std::result::Result<(), String> {
    let code = json["status"]["code"].as_str().unwrap_or("<missing>");
    if code == "1" {
        return Ok(());
    }
    let message = json["status"]["message"].as_str().unwrap_or("<no message>");
    Err(format!("status code {code}: {message}"))
}

/// First element of the response `records` array
fn first_record(json: &Value) -> Option<&Value> {
    json["records"].as_array().and_then(|records| records.first())
}
