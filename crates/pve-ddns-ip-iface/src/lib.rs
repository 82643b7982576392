//! Local-interface public IP resolver
//!
//! For machines whose uplink interface carries the public address directly
//! (no NAT in front), asking an external lookup service is a detour: the
//! address can be read off the interface itself. This resolver shells out
//! to `ip addr` and takes the first global-scope address per family on the
//! configured interface.
//!
//! The interface name travels in the `credentials` field of the public-ip
//! config section; there is no secret involved.

use std::net::{Ipv4Addr, Ipv6Addr};
use std::time::Duration;

use async_trait::async_trait;
use pve_ddns_core::error::{Error, Result};
use pve_ddns_core::traits::{IpPair, PublicIpResolver};
use tokio::process::Command;
use tracing::warn;

const IP_BIN: &str = "ip";

/// Public-IP resolver reading addresses off a local interface
#[derive(Debug)]
pub struct IfaceResolver {
    iface: String,
    /// Per-invocation timeout for the CLI
    timeout: Duration,
}

impl IfaceResolver {
    /// Create a resolver for the named interface
    pub fn new(iface: impl Into<String>, timeout: Duration) -> Result<Self> {
        let iface = iface.into();
        if iface.is_empty() {
            return Err(Error::config(
                "iface public-ip service: credentials must name the interface to read",
            ));
        }
        Ok(Self { iface, timeout })
    }

    /// Run `ip addr` and parse this interface's section
    async fn read_iface(&self) -> Result<IpPair> {
        let run = Command::new(IP_BIN).arg("addr").output();
        let output = match tokio::time::timeout(self.timeout, run).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Err(Error::public_ip(format!("failed to run ip addr: {e}"))),
            Err(_) => {
                return Err(Error::public_ip(format!(
                    "ip addr timed out after {:?}",
                    self.timeout
                )));
            }
        };
        if !output.status.success() {
            return Err(Error::public_ip(format!(
                "ip addr exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let pair = parse_ip_addr_output(&String::from_utf8_lossy(&output.stdout), &self.iface);
        if pair.is_empty() {
            warn!("interface {} carries no global-scope address", self.iface);
        }
        Ok(pair)
    }
}

#[async_trait]
impl PublicIpResolver for IfaceResolver {
    fn service_name(&self) -> &'static str {
        "iface"
    }

    async fn public_v4(&self) -> Result<Option<Ipv4Addr>> {
        Ok(self.read_iface().await?.v4)
    }

    async fn public_v6(&self) -> Result<Option<Ipv6Addr>> {
        Ok(self.read_iface().await?.v6)
    }
}

/// Global-scope addresses of one interface in `ip addr` output
///
/// Sections start with `N: <name>: <flags>`; `@peer` suffixes on the name
/// are ignored when matching. Within the section, `inet` and `inet6` lines
/// count only with `scope global`; the first hit per family wins.
pub fn parse_ip_addr_output(output: &str, iface: &str) -> IpPair {
    let mut pair = IpPair::default();
    let mut in_section = false;

    for line in output.lines() {
        if let Some(name) = section_name(line) {
            in_section = name == iface;
            continue;
        }
        if !in_section {
            continue;
        }

        let mut tokens = line.split_whitespace();
        match tokens.next() {
            Some("inet") => {
                if pair.v4.is_none()
                    && let Some(cidr) = tokens.next()
                    && line.contains("scope global")
                {
                    pair.v4 = strip_prefix_len(cidr).parse::<Ipv4Addr>().ok();
                }
            }
            Some("inet6") => {
                if pair.v6.is_none()
                    && let Some(cidr) = tokens.next()
                    && line.contains("scope global")
                {
                    pair.v6 = strip_prefix_len(cidr).parse::<Ipv6Addr>().ok();
                }
            }
            _ => {}
        }
    }
    pair
}

/// Interface name of a section header line, if this is one
fn section_name(line: &str) -> Option<&str> {
    // "2: enp1s0: <BROADCAST,...> mtu 1500 ..."
    let (index, rest) = line.split_once(':')?;
    let index = index.trim();
    if index.is_empty() || !index.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let name = rest.split(':').next()?.trim();
    Some(name.split('@').next().unwrap_or(name))
}

fn strip_prefix_len(cidr: &str) -> &str {
    cidr.split('/').next().unwrap_or(cidr)
}
