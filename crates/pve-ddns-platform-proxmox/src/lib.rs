// # Proxmox VE Platform Adapter
//
// PlatformResolver adapter for the Proxmox VE HTTP API, plus the `pct`
// container runtime adapter (see [`pct`]).
//
// ## Behavior
//
// - Authentication is an API token header on every request:
//   `Authorization: PVEAPIToken=USER@REALM!TOKENID=SECRET`.
// - Host addresses come from the node network endpoint; guest addresses
//   from the QEMU guest agent, filtered to global-scope addresses on the
//   requested interface.
// - Host network changes follow the PVE staging model: a PUT on the
//   interface only rewrites the pending interfaces file; a PUT on the
//   node's network commits it, a DELETE discards it. The staged body is
//   rebuilt from the interface's current configuration so gateway, bridge
//   and MTU settings survive the rewrite.
//
// ## Security
//
// - The token secret never appears in logs or Debug output.
//
// ## API Reference
//
// - https://pve.proxmox.com/pve-docs/api-viewer/
// - Verify:  GET `/api2/json/version`
// - Host:    GET `/api2/json/nodes/{node}/network/{iface}`
// - Guest:   GET `/api2/json/nodes/{node}/qemu/{vmid}/agent/network-get-interfaces`
// - Stage:   PUT `/api2/json/nodes/{node}/network/{iface}`
// - Apply:   PUT `/api2/json/nodes/{node}/network`
// - Revert:  DELETE `/api2/json/nodes/{node}/network`

pub mod pct;

pub use pct::PctRuntime;

use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::time::Duration;

use async_trait::async_trait;
use pve_ddns_core::error::{Error, Result};
use pve_ddns_core::traits::{IpPair, PlatformResolver};
use reqwest::{Method, StatusCode};
use serde_json::Value;
use tracing::{debug, info};

/// Interface-config keys restated verbatim when staging a change
///
/// Everything else on the read answer is either runtime state (`active`,
/// `exists`, `families`) or replaced by the staged addresses.
const PASSTHROUGH_KEYS: &[&str] = &[
    "type",
    "autostart",
    "bridge_ports",
    "bridge_stp",
    "bridge_fd",
    "bridge_vlan_aware",
    "comments",
    "gateway",
    "gateway6",
    "mtu",
];

/// Proxmox VE API client
pub struct ProxmoxApi {
    /// API base URL, e.g. "https://pve.example.net:8006"
    base_url: String,

    /// Full `PVEAPIToken=...` header value; never log this
    auth_header: String,

    /// HTTP client for API requests
    client: reqwest::Client,
}

// Custom Debug implementation that hides the token header
impl fmt::Debug for ProxmoxApi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxmoxApi")
            .field("base_url", &self.base_url)
            .field("auth_header", &"<REDACTED>")
            .finish()
    }
}

impl ProxmoxApi {
    /// Create a new PVE API client
    ///
    /// # Parameters
    ///
    /// - `base_url`: scheme, host and port of the API, no trailing slash
    /// - `user`/`realm`/`token_id`/`token_secret`: the API token identity
    /// - `timeout`: per-request HTTP timeout
    pub fn new(
        base_url: impl Into<String>,
        user: &str,
        realm: &str,
        token_id: &str,
        token_secret: &str,
        timeout: Duration,
    ) -> Result<Self> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(Error::config("pve-api: host cannot be empty"));
        }
        if user.is_empty() || realm.is_empty() || token_id.is_empty() || token_secret.is_empty() {
            return Err(Error::config(
                "pve-api: user, realm, token-id and token-secret are all required",
            ));
        }
        // PVE self-signed certs are the norm on home-lab nodes
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .danger_accept_invalid_certs(true)
            .build()
            .map_err(|e| Error::http(format!("pve-api: failed to build HTTP client: {e}")))?;

        Ok(Self {
            base_url,
            auth_header: format!("PVEAPIToken={user}@{realm}!{token_id}={token_secret}"),
            client,
        })
    }

    /// Verify the token and API reachability; used once at startup
    pub async fn verify(&self) -> Result<()> {
        let json = self.request(Method::GET, "/api2/json/version", None).await?;
        match json["data"]["version"].as_str() {
            Some(version) => {
                info!("connected to Proxmox VE {version} at {}", self.base_url);
                Ok(())
            }
            None => Err(Error::platform(
                "version endpoint answered without a version field; is this a PVE API?",
            )),
        }
    }

    async fn request(&self, method: Method, path: &str, body: Option<Value>) -> Result<Value> {
        let url = format!("{}{path}", self.base_url);
        let mut request = self
            .client
            .request(method.clone(), &url)
            .header("Authorization", &self.auth_header);
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::http(format!("pve-api {method} {path} failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(status_error(&method, path, status, &text));
        }
        response
            .json()
            .await
            .map_err(|e| Error::platform(format!("{method} {path}: invalid JSON: {e}")))
    }
}

#[async_trait]
impl PlatformResolver for ProxmoxApi {
    async fn host_ip(&self, node: &str, iface: &str) -> Result<IpPair> {
        let json = self
            .request(
                Method::GET,
                &format!("/api2/json/nodes/{node}/network/{iface}"),
                None,
            )
            .await?;
        let pair = parse_host_network(&json["data"]);
        debug!("pve host {node}/{iface} network config resolves to {pair}");
        Ok(pair)
    }

    async fn guest_ip(&self, node: &str, vmid: u32, iface: &str) -> Result<IpPair> {
        let json = self
            .request(
                Method::GET,
                &format!("/api2/json/nodes/{node}/qemu/{vmid}/agent/network-get-interfaces"),
                None,
            )
            .await?;
        let pair = parse_agent_interfaces(&json["data"], iface);
        debug!("pve guest {vmid} iface {iface} agent reports {pair}");
        Ok(pair)
    }

    async fn stage_host_address(
        &self,
        node: &str,
        iface: &str,
        v4: Option<Ipv4Addr>,
        v6: Ipv6Addr,
    ) -> Result<()> {
        // re-read the stanza so everything except the addresses survives
        let current = self
            .request(
                Method::GET,
                &format!("/api2/json/nodes/{node}/network/{iface}"),
                None,
            )
            .await?;
        let body = staged_interface_body(&current["data"], v4, v6)?;

        self.request(
            Method::PUT,
            &format!("/api2/json/nodes/{node}/network/{iface}"),
            Some(body),
        )
        .await?;
        info!("staged {v6} on pve {node}/{iface}");
        Ok(())
    }

    async fn apply_host_network(&self, node: &str) -> Result<()> {
        self.request(Method::PUT, &format!("/api2/json/nodes/{node}/network"), None)
            .await?;
        info!("applied staged network configuration on pve node {node}");
        Ok(())
    }

    async fn revert_host_network(&self, node: &str) -> Result<()> {
        self.request(
            Method::DELETE,
            &format!("/api2/json/nodes/{node}/network"),
            None,
        )
        .await?;
        debug!("discarded staged network configuration on pve node {node}");
        Ok(())
    }
}

/// Map an HTTP error status to a crate error
fn status_error(method: &Method, path: &str, status: StatusCode, body: &str) -> Error {
    match status.as_u16() {
        401 | 403 => Error::auth(format!(
            "pve-api {method} {path}: token rejected or lacks permissions ({status})"
        )),
        _ => Error::platform(format!(
            "{method} {path}: unexpected status {status}: {body}"
        )),
    }
}

/// Addresses from a node network-interface answer
///
/// PVE reports plain `address`/`address6` fields alongside `cidr`/`cidr6`;
/// either spelling is accepted here.
fn parse_host_network(data: &Value) -> IpPair {
    IpPair {
        v4: address_field(data, "address", "cidr").and_then(|s| s.parse().ok()),
        v6: address_field(data, "address6", "cidr6").and_then(|s| s.parse().ok()),
    }
}

fn address_field(data: &Value, plain: &str, cidr: &str) -> Option<String> {
    if let Some(address) = data[plain].as_str() {
        return Some(address.to_string());
    }
    data[cidr]
        .as_str()
        .map(|c| c.split('/').next().unwrap_or(c).to_string())
}

/// Prefix length of a `cidr` field, or `fallback` when absent
fn prefix_len(data: &Value, cidr: &str, fallback: u8) -> u8 {
    data[cidr]
        .as_str()
        .and_then(|c| c.split('/').nth(1))
        .and_then(|len| len.parse().ok())
        .unwrap_or(fallback)
}

/// Global-scope addresses of one interface in a guest-agent answer
///
/// Loopback and link-local addresses never belong in public DNS records and
/// are skipped; the first remaining address per family wins.
fn parse_agent_interfaces(data: &Value, iface: &str) -> IpPair {
    let mut pair = IpPair::default();
    let Some(interfaces) = data["result"].as_array() else {
        return pair;
    };

    for interface in interfaces {
        if interface["name"].as_str() != Some(iface) {
            continue;
        }
        let Some(addresses) = interface["ip-addresses"].as_array() else {
            continue;
        };
        for address in addresses {
            let Some(text) = address["ip-address"].as_str() else {
                continue;
            };
            match address["ip-address-type"].as_str() {
                Some("ipv4") => {
                    if pair.v4.is_none()
                        && let Ok(ip) = text.parse::<Ipv4Addr>()
                        && !ip.is_loopback()
                        && !ip.is_link_local()
                    {
                        pair.v4 = Some(ip);
                    }
                }
                Some("ipv6") => {
                    if pair.v6.is_none()
                        && let Ok(ip) = text.parse::<Ipv6Addr>()
                        && !ip.is_loopback()
                        && !is_link_local_v6(&ip)
                    {
                        pair.v6 = Some(ip);
                    }
                }
                _ => {}
            }
        }
    }
    pair
}

/// fe80::/10
fn is_link_local_v6(ip: &Ipv6Addr) -> bool {
    (ip.segments()[0] & 0xffc0) == 0xfe80
}

/// PUT body for staging new addresses on an interface
///
/// Built from the interface's current configuration: settings like gateway,
/// bridge membership and MTU are restated, the address fields are replaced.
/// Prefix lengths carry over from the current `cidr`/`cidr6` values.
fn staged_interface_body(current: &Value, v4: Option<Ipv4Addr>, v6: Ipv6Addr) -> Result<Value> {
    if current["type"].as_str().is_none() {
        return Err(Error::platform(
            "interface config carries no type field; cannot stage a change",
        ));
    }

    let mut body = serde_json::Map::new();
    for key in PASSTHROUGH_KEYS {
        if let Some(value) = current.get(*key)
            && !value.is_null()
        {
            body.insert((*key).to_string(), value.clone());
        }
    }

    body.insert(
        "cidr6".to_string(),
        Value::String(format!("{v6}/{}", prefix_len(current, "cidr6", 64))),
    );
    match v4 {
        Some(v4) => {
            body.insert(
                "cidr".to_string(),
                Value::String(format!("{v4}/{}", prefix_len(current, "cidr", 24))),
            );
        }
        None => {
            // no v4 this tick; keep whatever the stanza already has
            if let Some(cidr) = current["cidr"].as_str() {
                body.insert("cidr".to_string(), Value::String(cidr.to_string()));
            }
        }
    }

    Ok(Value::Object(body))
}
