// # ipify Public-IP Resolver
//
// PublicIpResolver adapter backed by the ipify HTTP API.
//
// ## Behavior
//
// - One GET per lookup, no credentials, no state beyond the HTTP client.
// - The v4 and v6 endpoints are separate hosts; api6.ipify.org answers with
//   an IPv4 address on hosts without IPv6 connectivity, so the v6 path
//   re-validates the family and reports `None` on a mismatch instead of
//   publishing an A-typed value into AAAA records.
//
// ## API Reference
//
// - GET `https://api.ipify.org/?format=json`  -> `{"ip": "..."}`
// - GET `https://api6.ipify.org/?format=json` -> `{"ip": "..."}`

use std::net::{Ipv4Addr, Ipv6Addr};
use std::time::Duration;

use async_trait::async_trait;
use pve_ddns_core::error::{Error, Result};
use pve_ddns_core::traits::PublicIpResolver;
use serde_json::Value;
use tracing::{debug, warn};

/// v4-only endpoint
const IPIFY_V4_URL: &str = "https://api.ipify.org/?format=json";
/// v6-preferring endpoint (falls back to v4 on v4-only uplinks)
const IPIFY_V6_URL: &str = "https://api6.ipify.org/?format=json";

/// Public-IP resolver backed by ipify
#[derive(Debug)]
pub struct IpifyResolver {
    client: reqwest::Client,
}

impl IpifyResolver {
    /// Create a new ipify resolver with a per-request timeout
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::http(format!("ipify: failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }

    /// Fetch one endpoint and return the textual address it reports
    async fn fetch_ip(&self, url: &str) -> Result<String> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| Error::public_ip(format!("request to {url} failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::public_ip(format!(
                "{url} answered with status {status}"
            )));
        }

        let json: Value = response
            .json()
            .await
            .map_err(|e| Error::public_ip(format!("{url}: invalid JSON: {e}")))?;
        parse_ip_field(&json)
            .map(str::to_string)
            .ok_or_else(|| Error::public_ip(format!("{url}: response carries no 'ip' field")))
    }
}

#[async_trait]
impl PublicIpResolver for IpifyResolver {
    fn service_name(&self) -> &'static str {
        "ipify"
    }

    async fn public_v4(&self) -> Result<Option<Ipv4Addr>> {
        let text = self.fetch_ip(IPIFY_V4_URL).await?;
        match text.parse::<Ipv4Addr>() {
            Ok(ip) => {
                debug!("ipify reports public IPv4 {ip}");
                Ok(Some(ip))
            }
            Err(_) => Err(Error::public_ip(format!(
                "ipify v4 endpoint answered '{text}', not an IPv4 address"
            ))),
        }
    }

    async fn public_v6(&self) -> Result<Option<Ipv6Addr>> {
        let text = self.fetch_ip(IPIFY_V6_URL).await?;
        match text.parse::<Ipv6Addr>() {
            Ok(ip) => {
                debug!("ipify reports public IPv6 {ip}");
                Ok(Some(ip))
            }
            Err(_) => {
                // api6 falls back to the v4 address when the uplink has no v6
                warn!("ipify v6 endpoint answered '{text}', which is not an IPv6 address; treating as no IPv6 connectivity");
                Ok(None)
            }
        }
    }
}

/// The `ip` field of an ipify response
fn parse_ip_field(json: &Value) -> Option<&str> {
    json["ip"].as_str()
}
