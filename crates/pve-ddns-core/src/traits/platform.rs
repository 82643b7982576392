// # Platform Resolver Trait
//
// Defines the interface to the virtualization platform API: reading host
// and guest interface addresses, and the three-step host network change
// used by IPv6 prefix sync (stage, apply, revert).
//
// ## Implementations
//
// - Proxmox VE: `pve-ddns-platform-proxmox` crate

use async_trait::async_trait;
use std::net::{Ipv4Addr, Ipv6Addr};

use crate::error::Result;

/// Addresses of one interface, either family possibly absent
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IpPair {
    /// Global IPv4 address, if present
    pub v4: Option<Ipv4Addr>,
    /// Global IPv6 address, if present
    pub v6: Option<Ipv6Addr>,
}

impl IpPair {
    /// Pair with both families present
    pub fn new(v4: Ipv4Addr, v6: Ipv6Addr) -> Self {
        Self {
            v4: Some(v4),
            v6: Some(v6),
        }
    }

    /// True when neither family resolved
    pub fn is_empty(&self) -> bool {
        self.v4.is_none() && self.v6.is_none()
    }
}

impl std::fmt::Display for IpPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.v4, &self.v6) {
            (Some(v4), Some(v6)) => write!(f, "{v4} / {v6}"),
            (Some(v4), None) => write!(f, "{v4} / -"),
            (None, Some(v6)) => write!(f, "- / {v6}"),
            (None, None) => f.write_str("- / -"),
        }
    }
}

/// Trait for virtualization platform implementations
///
/// # Staged network changes
///
/// `stage_host_address` only rewrites the platform's pending network
/// configuration; nothing changes on the wire until `apply_host_network`
/// commits it. `revert_host_network` discards whatever is staged. The
/// prefix-sync machine drives these three in a bounded retry loop and is
/// the only caller.
#[async_trait]
pub trait PlatformResolver: Send + Sync + std::fmt::Debug {
    /// Current global addresses of a host interface
    async fn host_ip(&self, node: &str, iface: &str) -> Result<IpPair>;

    /// Current global addresses of an interface inside a VM guest
    async fn guest_ip(&self, node: &str, vmid: u32, iface: &str) -> Result<IpPair>;

    /// Stage a new static address pair for a host interface
    ///
    /// `v4` is the unchanged current IPv4 (the platform rewrites the whole
    /// interface stanza, so it must be restated); `v6` is the new address.
    async fn stage_host_address(
        &self,
        node: &str,
        iface: &str,
        v4: Option<Ipv4Addr>,
        v6: Ipv6Addr,
    ) -> Result<()>;

    /// Commit the staged network configuration of a node
    async fn apply_host_network(&self, node: &str) -> Result<()>;

    /// Discard the staged network configuration of a node
    async fn revert_host_network(&self, node: &str) -> Result<()>;
}
