//! Host IPv6 prefix sync
//!
//! Tracks the delegated IPv6 prefix observed on a guest and rewrites the
//! host's static IPv6 address to match: the guest supplies the routing
//! prefix (the first four 16-bit groups), the host keeps its interface
//! suffix (the last four). The combined address is staged on the platform,
//! applied, given time to settle, then pushed to the host's AAAA records.
//!
//! Applying is transactional per attempt: a failed stage or apply reverts
//! the staged change before the retry wait. A failed DNS write after a
//! successful apply does not revert; the network change is already live
//! and only the records are retried.

use std::net::{IpAddr, Ipv6Addr};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::cache::RecordCache;
use crate::error::{Error, Result};
use crate::registry::TargetId;
use crate::shutdown::ShutdownToken;
use crate::traits::{DnsProvider, PlatformResolver};

/// Stage/apply cycles per sync before giving up until the next tick
const MAX_ATTEMPTS: u32 = 5;

/// Everything one sync run needs, captured from the surrounding tick
pub(crate) struct SyncRequest {
    pub node: String,
    pub iface: String,
    /// Kept alongside the new IPv6 address when staging, so the platform
    /// does not drop the interface's IPv4 configuration
    pub host_v4: Option<std::net::Ipv4Addr>,
    pub host_v6: Option<Ipv6Addr>,
    pub guest_v6: Option<Ipv6Addr>,
    pub domains: Vec<String>,
    pub backoff: Duration,
    pub settle: Duration,
}

/// How a prefix-sync run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrefixSyncOutcome {
    /// Prefixes already match, or an input address was missing
    InSync,
    /// Host address rewritten and records updated
    Updated { address: Ipv6Addr, attempts: u32 },
    /// An input address did not split into prefix and suffix; retrying
    /// would re-fail on the same input
    Rejected { reason: String },
    /// All attempts failed; the next tick starts a fresh run
    GaveUp { attempts: u32 },
    /// Shutdown was requested during a wait
    Cancelled,
}

enum Phase {
    Comparing { attempt: u32 },
    Applying { address: Ipv6Addr, attempt: u32 },
    Verifying { address: Ipv6Addr, attempt: u32 },
    RollingBack { attempt: u32 },
    RetryWait { attempt: u32 },
}

/// Drive one prefix-sync run to completion
pub(crate) async fn sync_host_prefix(
    platform: &dyn PlatformResolver,
    provider: &dyn DnsProvider,
    cache: &mut RecordCache,
    shutdown: &ShutdownToken,
    request: &SyncRequest,
) -> PrefixSyncOutcome {
    let (Some(host_v6), Some(guest_v6)) = (request.host_v6, request.guest_v6) else {
        // nothing to compare until both sides have an address
        return PrefixSyncOutcome::InSync;
    };

    let mut phase = Phase::Comparing { attempt: 1 };
    loop {
        phase = match phase {
            Phase::Comparing { attempt } => {
                let host_prefix = routing_prefix(host_v6);
                let guest_prefix = routing_prefix(guest_v6);
                if let Err(e) = check_prefix(guest_prefix, "guest", guest_v6)
                    .and_then(|()| check_prefix(host_prefix, "host", host_v6))
                {
                    return PrefixSyncOutcome::Rejected { reason: e.to_string() };
                }
                if host_prefix == guest_prefix {
                    return PrefixSyncOutcome::InSync;
                }

                let address = combine_prefix(guest_v6, host_v6);
                info!(
                    "host IPv6 prefix {} differs from guest prefix {}, moving host to {address} (attempt {attempt}/{MAX_ATTEMPTS})",
                    fmt_prefix(host_prefix),
                    fmt_prefix(guest_prefix)
                );
                Phase::Applying { address, attempt }
            }

            Phase::Applying { address, attempt } => {
                if let Err(e) = platform
                    .stage_host_address(&request.node, &request.iface, request.host_v4, address)
                    .await
                {
                    warn!(
                        "staging {address} on {}/{} failed (attempt {attempt}/{MAX_ATTEMPTS}): {e}",
                        request.node, request.iface
                    );
                    Phase::RollingBack { attempt }
                } else if let Err(e) = platform.apply_host_network(&request.node).await {
                    warn!(
                        "applying network change on {} failed (attempt {attempt}/{MAX_ATTEMPTS}): {e}",
                        request.node
                    );
                    Phase::RollingBack { attempt }
                } else {
                    Phase::Verifying { address, attempt }
                }
            }

            Phase::Verifying { address, attempt } => {
                // give the reconfigured interface time to come up
                if !shutdown.sleep(request.settle).await {
                    return PrefixSyncOutcome::Cancelled;
                }
                let outcome = super::reconcile_domains(
                    cache,
                    provider,
                    TargetId::Host,
                    &request.domains,
                    IpAddr::V6(address),
                )
                .await;
                if outcome.failed == 0 {
                    return PrefixSyncOutcome::Updated { address, attempts: attempt };
                }
                // the address change is live; only the records are retried
                warn!(
                    "{} AAAA record(s) still stale after host address change (attempt {attempt}/{MAX_ATTEMPTS})",
                    outcome.failed
                );
                Phase::RetryWait { attempt }
            }

            Phase::RollingBack { attempt } => {
                if let Err(e) = platform.revert_host_network(&request.node).await {
                    warn!(
                        "reverting staged network change on {} failed: {e}",
                        request.node
                    );
                }
                Phase::RetryWait { attempt }
            }

            Phase::RetryWait { attempt } => {
                if attempt >= MAX_ATTEMPTS {
                    return PrefixSyncOutcome::GaveUp { attempts: attempt };
                }
                debug!(
                    "waiting {:?} before prefix-sync attempt {}/{MAX_ATTEMPTS}",
                    request.backoff,
                    attempt + 1
                );
                if !shutdown.sleep(request.backoff).await {
                    return PrefixSyncOutcome::Cancelled;
                }
                Phase::Comparing { attempt: attempt + 1 }
            }
        };
    }
}

/// The routing prefix of an address: its first four 16-bit groups
///
/// Splitting the numeric groups, not the rendered text, keeps the rule
/// stable across representations; `2001::1:2:3:4` and
/// `2001:0:0:0:1:2:3:4` are the same address and get the same prefix.
fn routing_prefix(addr: Ipv6Addr) -> [u16; 4] {
    let s = addr.segments();
    [s[0], s[1], s[2], s[3]]
}

/// Guest routing prefix combined with the host's interface suffix
fn combine_prefix(guest: Ipv6Addr, host: Ipv6Addr) -> Ipv6Addr {
    let g = guest.segments();
    let h = host.segments();
    Ipv6Addr::new(g[0], g[1], g[2], g[3], h[4], h[5], h[6], h[7])
}

/// An all-zeros prefix carries no routing information to synchronize
fn check_prefix(prefix: [u16; 4], side: &str, addr: Ipv6Addr) -> Result<()> {
    if prefix == [0u16; 4] {
        return Err(Error::invalid_address(format!(
            "{side} address '{addr}' has an all-zeros routing prefix, cannot derive a host prefix"
        )));
    }
    Ok(())
}

fn fmt_prefix(prefix: [u16; 4]) -> String {
    format!("{:x}:{:x}:{:x}:{:x}", prefix[0], prefix[1], prefix[2], prefix[3])
}
