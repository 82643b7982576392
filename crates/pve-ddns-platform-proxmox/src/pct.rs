//! `pct` container runtime adapter
//!
//! LXC containers do not run the QEMU guest agent, so their addresses come
//! from the node-local `pct` CLI instead of the HTTP API: `pct list` for
//! the id set, `pct exec <vmid> -- ip addr` for the addresses.
//!
//! A node without `pct` (or a daemon running off the hypervisor) reports an
//! empty id set rather than an error, which routes every guest through the
//! platform API.

use std::collections::HashSet;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::process::Output;
use std::time::Duration;

use async_trait::async_trait;
use pve_ddns_core::error::{Error, Result};
use pve_ddns_core::traits::{ContainerRuntime, IpPair};
use tokio::process::Command;
use tracing::{debug, warn};

const PCT_BIN: &str = "pct";

/// Container runtime adapter shelling out to `pct`
#[derive(Debug)]
pub struct PctRuntime {
    /// Per-invocation timeout for the CLI
    timeout: Duration,
}

impl PctRuntime {
    /// Create a new `pct` adapter with a per-invocation timeout
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Run `pct` with `args`, enforcing the timeout
    async fn run(&self, args: &[String]) -> Result<Option<Output>> {
        let child = match Command::new(PCT_BIN).args(args).output().await {
            Ok(output) => output,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("pct binary not found; container runtime unavailable on this machine");
                return Ok(None);
            }
            Err(e) => return Err(Error::container(format!("failed to run pct: {e}"))),
        };
        Ok(Some(child))
    }

    async fn run_with_timeout(&self, args: &[String]) -> Result<Option<Output>> {
        match tokio::time::timeout(self.timeout, self.run(args)).await {
            Ok(result) => result,
            Err(_) => Err(Error::container(format!(
                "pct {} timed out after {:?}",
                args.join(" "),
                self.timeout
            ))),
        }
    }
}

#[async_trait]
impl ContainerRuntime for PctRuntime {
    async fn container_ids(&self) -> Result<HashSet<u32>> {
        let Some(output) = self.run_with_timeout(&["list".to_string()]).await? else {
            return Ok(HashSet::new());
        };
        if !output.status.success() {
            return Err(Error::container(format!(
                "pct list exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let ids = parse_pct_list(&String::from_utf8_lossy(&output.stdout));
        debug!("pct reports {} container(s) on this node", ids.len());
        Ok(ids)
    }

    async fn container_ip(&self, vmid: u32, iface: &str) -> Result<IpPair> {
        let args: Vec<String> = ["exec", &vmid.to_string(), "--", "ip", "addr"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let Some(output) = self.run_with_timeout(&args).await? else {
            return Err(Error::container(
                "pct binary disappeared between listing and exec",
            ));
        };
        if !output.status.success() {
            return Err(Error::container(format!(
                "pct exec {vmid} exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let pair = parse_ip_addr_output(&String::from_utf8_lossy(&output.stdout), iface);
        if pair.is_empty() {
            warn!("container {vmid} reports no global address on {iface}");
        }
        Ok(pair)
    }
}

/// Container ids from `pct list` output
///
/// The first token of each line is the vmid; the header line and anything
/// else that does not start with an integer is skipped.
pub fn parse_pct_list(output: &str) -> HashSet<u32> {
    output
        .lines()
        .filter_map(|line| line.split_whitespace().next())
        .filter_map(|token| token.parse().ok())
        .collect()
}

/// Global-scope addresses of one interface in `ip addr` output
///
/// Sections start with `N: <name>: <flags>`; `@peer` suffixes on the name
/// (veth pairs) are ignored when matching. Within the section, `inet` and
/// `inet6` lines count only with `scope global`; the first hit per family
/// wins.
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
    // "2: eth0@if21: <BROADCAST,...> mtu 1500 ..."
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
