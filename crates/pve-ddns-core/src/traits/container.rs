// # Container Runtime Trait
//
// Defines the interface to the platform's container runtime CLI. Container
// guests do not answer the VM guest-agent API, so the engine consults the
// id list once per tick and routes listed guests here instead of through
// [`PlatformResolver`](crate::traits::PlatformResolver).
//
// ## Implementations
//
// - Proxmox `pct`: `pve-ddns-platform-proxmox` crate

use async_trait::async_trait;
use std::collections::HashSet;

use crate::error::Result;
use crate::traits::IpPair;

/// Trait for container runtime implementations
#[async_trait]
pub trait ContainerRuntime: Send + Sync + std::fmt::Debug {
    /// Ids of all containers known to the runtime on this node
    ///
    /// An unavailable runtime (CLI not installed, not a hypervisor node)
    /// returns an empty set rather than an error so that VM guests still
    /// resolve through the platform API.
    async fn container_ids(&self) -> Result<HashSet<u32>>;

    /// Current global addresses of an interface inside a container
    async fn container_ip(&self, vmid: u32, iface: &str) -> Result<IpPair>;
}
