// # DNS Provider Trait
//
// Defines the interface for reading and writing DNS records via provider
// APIs.
//
// ## Implementations
//
// - Cloudflare: `pve-ddns-provider-cloudflare` crate
// - DNSPod: `pve-ddns-provider-dnspod` crate
// - Porkbun: `pve-ddns-provider-porkbun` crate
//
// ## Get-before-set contract
//
// Adapters memoize provider-side identifiers (zone ids, record ids, line
// ids) while answering a get. A set for a (domain, family) pair that this
// instance never resolved may therefore fail. The engine honors this by
// seeding its record cache with a get before the first write of every
// domain, and by sharing one adapter instance across all targets bound to
// the same provider type + credentials.

use async_trait::async_trait;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use crate::cache::RecordFamily;
use crate::error::Result;

/// Trait for DNS provider implementations
///
/// One instance serves every target bound to the same credentials; methods
/// take `&self` and implementations guard their memo maps internally.
///
/// # Thread Safety
///
/// Implementations must be thread-safe and usable across async tasks.
///
/// # Error semantics
///
/// - `Ok(Some(ip))`: the record exists and holds `ip`
/// - `Ok(None)`: the provider answered but no record exists for the name
/// - `Err(_)`: transport failure, authentication failure or a malformed
///   response; the engine logs and retries on a later tick
///
/// Implementations never retry internally; retry pacing belongs to the
/// engine.
#[async_trait]
pub trait DnsProvider: Send + Sync + std::fmt::Debug {
    /// Provider name for logging (e.g. "cloudflare")
    fn provider_name(&self) -> &'static str;

    /// Read the current A record content for a domain
    async fn ipv4(&self, domain: &str) -> Result<Option<Ipv4Addr>>;

    /// Read the current AAAA record content for a domain
    async fn ipv6(&self, domain: &str) -> Result<Option<Ipv6Addr>>;

    /// Point the A record of a domain at a new address
    async fn set_ipv4(&self, domain: &str, ip: Ipv4Addr) -> Result<()>;

    /// Point the AAAA record of a domain at a new address
    async fn set_ipv6(&self, domain: &str, ip: Ipv6Addr) -> Result<()>;

    /// Family-dispatched read; see [`ipv4`](Self::ipv4) / [`ipv6`](Self::ipv6)
    async fn record(&self, domain: &str, family: RecordFamily) -> Result<Option<IpAddr>> {
        match family {
            RecordFamily::V4 => Ok(self.ipv4(domain).await?.map(IpAddr::V4)),
            RecordFamily::V6 => Ok(self.ipv6(domain).await?.map(IpAddr::V6)),
        }
    }

    /// Family-dispatched write; see [`set_ipv4`](Self::set_ipv4) /
    /// [`set_ipv6`](Self::set_ipv6)
    async fn set_record(&self, domain: &str, ip: IpAddr) -> Result<()> {
        match ip {
            IpAddr::V4(v4) => self.set_ipv4(domain, v4).await,
            IpAddr::V6(v6) => self.set_ipv6(domain, v6).await,
        }
    }
}
