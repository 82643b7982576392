//! Target registry and provider bindings
//!
//! The registry is the immutable, validated picture of what the daemon
//! manages: at most one client target, at most one host target and any
//! number of guest targets, always iterated in that order (guests keep
//! their config order). Sections that define no domains are inert and are
//! not registered at all.
//!
//! Every target carries a [`BindingKey`] derived from its provider type and
//! credentials. Targets with identical keys must share one live adapter
//! instance: adapters memoize provider-side record ids on the read path and
//! the write path depends on those memos, so splitting a binding across two
//! instances would break writes, not just waste connections.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::cache::RecordFamily;
use crate::config::{TargetSpec, TargetsSpec};
use crate::traits::DnsProvider;

/// Identity of a target within the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetId {
    /// The machine running the daemon
    Client,
    /// The hypervisor host
    Host,
    /// A guest VM or container with its platform id
    Guest(u32),
}

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetId::Client => f.write_str("client"),
            TargetId::Host => f.write_str("host"),
            TargetId::Guest(vmid) => write!(f, "guest {vmid}"),
        }
    }
}

/// Where a host/guest target lives on the platform
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placement {
    /// Platform node name
    pub node: String,
    /// Interface name on the node or inside the guest
    pub iface: String,
}

/// Key identifying one provider adapter instance
///
/// Derived from the provider type and the opaque credentials, so two targets
/// with the same provider but different accounts get distinct adapters. The
/// `Debug` impl redacts the credentials part; the full key never appears in
/// logs.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BindingKey {
    dns_type: String,
    credentials: String,
}

impl BindingKey {
    /// Derive the key for a provider type + credentials pair
    pub fn new(dns_type: impl Into<String>, credentials: impl Into<String>) -> Self {
        Self {
            dns_type: dns_type.into(),
            credentials: credentials.into(),
        }
    }

    /// The provider type name this key binds to
    pub fn dns_type(&self) -> &str {
        &self.dns_type
    }

    /// The opaque credentials; handle with care, never log
    pub fn credentials(&self) -> &str {
        &self.credentials
    }
}

impl fmt::Debug for BindingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BindingKey({}:<redacted>)", self.dns_type)
    }
}

/// One registered target
#[derive(Debug, Clone)]
pub struct Target {
    /// Identity within the registry
    pub id: TargetId,
    /// Which provider adapter serves this target
    pub binding: BindingKey,
    /// Domains whose A records follow this target
    pub ipv4_domains: Vec<String>,
    /// Domains whose AAAA records follow this target
    pub ipv6_domains: Vec<String>,
    /// Node + interface; `None` for the client target
    pub placement: Option<Placement>,
}

impl Target {
    fn from_spec(id: TargetId, spec: &TargetSpec, placement: Option<Placement>) -> Self {
        Self {
            id,
            binding: BindingKey::new(&spec.dns, &spec.credentials),
            ipv4_domains: spec.ipv4.clone(),
            ipv6_domains: spec.ipv6.clone(),
            placement,
        }
    }

    /// Domain list for one family
    pub fn domains(&self, family: RecordFamily) -> &[String] {
        match family {
            RecordFamily::V4 => &self.ipv4_domains,
            RecordFamily::V6 => &self.ipv6_domains,
        }
    }

    /// True when either family has at least one domain
    pub fn has_domains(&self) -> bool {
        !self.ipv4_domains.is_empty() || !self.ipv6_domains.is_empty()
    }
}

/// Immutable set of targets built from validated config
#[derive(Debug, Default)]
pub struct TargetRegistry {
    client: Option<Target>,
    host: Option<Target>,
    guests: Vec<Target>,
}

impl TargetRegistry {
    /// Build the registry from a validated spec
    ///
    /// Sections without domains are dropped here, so everything the engine
    /// iterates is actionable.
    pub fn from_spec(spec: &TargetsSpec) -> Self {
        let client = spec
            .client
            .as_ref()
            .filter(|c| c.has_domains())
            .map(|c| Target::from_spec(TargetId::Client, c, None));

        let host = spec
            .host
            .as_ref()
            .filter(|h| h.target.has_domains())
            .map(|h| {
                Target::from_spec(
                    TargetId::Host,
                    &h.target,
                    Some(Placement {
                        node: h.node.clone(),
                        iface: h.iface.clone(),
                    }),
                )
            });

        let guests = spec
            .guests
            .iter()
            .filter(|g| g.target.has_domains())
            .map(|g| {
                Target::from_spec(
                    TargetId::Guest(g.vmid),
                    &g.target,
                    Some(Placement {
                        node: g.node.clone(),
                        iface: g.iface.clone(),
                    }),
                )
            })
            .collect();

        Self {
            client,
            host,
            guests,
        }
    }

    /// The client target, if registered
    pub fn client(&self) -> Option<&Target> {
        self.client.as_ref()
    }

    /// The host target, if registered
    pub fn host(&self) -> Option<&Target> {
        self.host.as_ref()
    }

    /// Guest targets in config order
    pub fn guests(&self) -> &[Target] {
        &self.guests
    }

    /// All targets in reconciliation order: client, host, guests
    pub fn targets(&self) -> impl Iterator<Item = &Target> {
        self.client
            .iter()
            .chain(self.host.iter())
            .chain(self.guests.iter())
    }

    /// Number of registered targets
    pub fn len(&self) -> usize {
        self.targets().count()
    }

    /// True when nothing is registered
    pub fn is_empty(&self) -> bool {
        self.client.is_none() && self.host.is_none() && self.guests.is_empty()
    }

    /// Distinct binding keys in first-seen reconciliation order
    ///
    /// The daemon walks this to construct exactly one adapter per binding.
    pub fn binding_keys(&self) -> Vec<BindingKey> {
        let mut keys = Vec::new();
        for target in self.targets() {
            if !keys.contains(&target.binding) {
                keys.push(target.binding.clone());
            }
        }
        keys
    }

    /// True when any registered target needs the platform API
    pub fn needs_platform(&self) -> bool {
        self.host.is_some() || !self.guests.is_empty()
    }
}

/// Live adapter instances keyed by [`BindingKey`]
///
/// Filled by the daemon's factory before the engine starts; the engine only
/// reads it.
#[derive(Default)]
pub struct ProviderBindings {
    map: HashMap<BindingKey, Arc<dyn DnsProvider>>,
}

impl ProviderBindings {
    /// Empty binding map
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the adapter instance for a key
    pub fn insert(&mut self, key: BindingKey, provider: Arc<dyn DnsProvider>) {
        self.map.insert(key, provider);
    }

    /// Adapter instance for a key
    pub fn get(&self, key: &BindingKey) -> Option<Arc<dyn DnsProvider>> {
        self.map.get(key).cloned()
    }

    /// True when the key has an adapter
    pub fn contains(&self, key: &BindingKey) -> bool {
        self.map.contains_key(key)
    }

    /// Number of live adapters
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// True when no adapter is registered
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

impl fmt::Debug for ProviderBindings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderBindings")
            .field("bindings", &self.map.keys().collect::<Vec<_>>())
            .finish()
    }
}
