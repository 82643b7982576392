// # Public IP Resolver Trait
//
// Defines the interface for discovering the public addresses of the machine
// the daemon runs on (the "client" target). Host and guest targets never go
// through this trait; their addresses come from the platform.
//
// ## Implementations
//
// - ipify: `pve-ddns-ip-http` crate
// - local interface: `pve-ddns-ip-iface` crate
// - Porkbun ping: `pve-ddns-provider-porkbun` crate

use async_trait::async_trait;
use std::net::{Ipv4Addr, Ipv6Addr};

use crate::error::Result;

/// Trait for public IP lookup services
///
/// Each call is a fresh lookup; resolvers hold no state beyond their HTTP
/// client and credentials. `Ok(None)` means the service answered but could
/// not name an address of the requested family (e.g. an IPv4-only uplink
/// asked for IPv6).
#[async_trait]
pub trait PublicIpResolver: Send + Sync + std::fmt::Debug {
    /// Service name for logging (e.g. "ipify")
    fn service_name(&self) -> &'static str;

    /// The caller's public IPv4 address, if one can be determined
    async fn public_v4(&self) -> Result<Option<Ipv4Addr>>;

    /// The caller's public IPv6 address, if one can be determined
    async fn public_v6(&self) -> Result<Option<Ipv6Addr>>;
}
