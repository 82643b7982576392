//! In-memory DNS record cache
//!
//! The cache remembers, per fully-qualified domain name and address family,
//! the last address known to be stored at the DNS provider and when it was
//! resolved or written. A and AAAA entries live in disjoint maps, so the
//! same name can track both families independently.
//!
//! Lifecycle contract (enforced by the engine, relied on by tests):
//! - an entry is created exactly once, lazily, on the first successful
//!   provider-side resolve of that (domain, family);
//! - it is overwritten only after a successful provider write;
//! - it is never evicted for the lifetime of the process.
//!
//! The cache is deliberately not shared: the reconciliation loop is the only
//! reader and writer, so it is a plain owned value without interior locking.
//! It does not persist across restarts; the first tick after a restart
//! re-resolves every domain.

use std::collections::HashMap;
use std::net::IpAddr;

use chrono::{DateTime, Utc};

/// Address family of a DNS record (A vs AAAA)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordFamily {
    /// IPv4 / A records
    V4,
    /// IPv6 / AAAA records
    V6,
}

impl RecordFamily {
    /// DNS record type string for this family ("A" or "AAAA")
    pub fn record_type(&self) -> &'static str {
        match self {
            RecordFamily::V4 => "A",
            RecordFamily::V6 => "AAAA",
        }
    }

    /// The family of a concrete address
    pub fn of(ip: &IpAddr) -> Self {
        match ip {
            IpAddr::V4(_) => RecordFamily::V4,
            IpAddr::V6(_) => RecordFamily::V6,
        }
    }
}

impl std::fmt::Display for RecordFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.record_type())
    }
}

/// A cached record value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordEntry {
    /// Last address known to be stored at the provider
    pub last_ip: IpAddr,
    /// When that address was resolved or written
    pub last_resolved_at: DateTime<Utc>,
}

/// FQDN-keyed record cache with disjoint per-family maps
#[derive(Debug, Default)]
pub struct RecordCache {
    v4: HashMap<String, RecordEntry>,
    v6: HashMap<String, RecordEntry>,
}

impl RecordCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    fn map(&self, family: RecordFamily) -> &HashMap<String, RecordEntry> {
        match family {
            RecordFamily::V4 => &self.v4,
            RecordFamily::V6 => &self.v6,
        }
    }

    /// Look up the cached entry for a domain in one family
    pub fn get(&self, domain: &str, family: RecordFamily) -> Option<&RecordEntry> {
        self.map(family).get(domain)
    }

    /// Insert or overwrite the entry for a domain in one family
    pub fn upsert(&mut self, domain: &str, family: RecordFamily, ip: IpAddr, at: DateTime<Utc>) {
        let map = match family {
            RecordFamily::V4 => &mut self.v4,
            RecordFamily::V6 => &mut self.v6,
        };
        map.insert(
            domain.to_string(),
            RecordEntry {
                last_ip: ip,
                last_resolved_at: at,
            },
        );
    }

    /// Number of entries across both families
    pub fn len(&self) -> usize {
        self.v4.len() + self.v6.len()
    }

    /// True when no entry has been created yet
    pub fn is_empty(&self) -> bool {
        self.v4.is_empty() && self.v6.is_empty()
    }
}
