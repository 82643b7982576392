//! Configuration types for the pve-ddns core
//!
//! These are plain immutable values: the daemon deserializes them from its
//! config file, validates them, and hands them by ownership to the target
//! registry and the engine. Nothing in the core reads configuration from a
//! global or reloads it at runtime; changing the config means restarting the
//! process.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Engine pacing and feature settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct EngineSettings {
    /// Interval between reconciliation ticks, in milliseconds
    ///
    /// A tick that runs longer than the interval delays the next tick; ticks
    /// are never skipped in bursts to catch up.
    #[serde(default = "default_update_interval_ms")]
    pub update_interval_ms: u64,

    /// Rewrite the host's static IPv6 address when the delegated prefix
    /// observed on a guest differs from the host's
    #[serde(default)]
    pub sync_host_static_v6_address: bool,

    /// Backoff between prefix-sync retry attempts, in seconds
    #[serde(default = "default_prefix_sync_backoff_secs")]
    pub prefix_sync_backoff_secs: u64,

    /// Settle delay after applying a host network change, in seconds
    ///
    /// Gives the reconfigured interface time to come up before DNS records
    /// are pointed at the new address.
    #[serde(default = "default_prefix_sync_settle_secs")]
    pub prefix_sync_settle_secs: u64,
}

impl EngineSettings {
    /// Tick interval as a [`Duration`]
    pub fn update_interval(&self) -> Duration {
        Duration::from_millis(self.update_interval_ms)
    }

    /// Prefix-sync retry backoff as a [`Duration`]
    pub fn prefix_sync_backoff(&self) -> Duration {
        Duration::from_secs(self.prefix_sync_backoff_secs)
    }

    /// Prefix-sync settle delay as a [`Duration`]
    pub fn prefix_sync_settle(&self) -> Duration {
        Duration::from_secs(self.prefix_sync_settle_secs)
    }

    /// Validate the settings
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.update_interval_ms == 0 {
            return Err(crate::Error::config("update-interval-ms must be > 0"));
        }
        Ok(())
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            update_interval_ms: default_update_interval_ms(),
            sync_host_static_v6_address: false,
            prefix_sync_backoff_secs: default_prefix_sync_backoff_secs(),
            prefix_sync_settle_secs: default_prefix_sync_settle_secs(),
        }
    }
}

fn default_update_interval_ms() -> u64 {
    300_000
}

fn default_prefix_sync_backoff_secs() -> u64 {
    60
}

fn default_prefix_sync_settle_secs() -> u64 {
    10
}

/// DNS update settings shared by every target class
///
/// `credentials` is opaque to the core; each provider adapter defines its own
/// format (a bare API token, or comma-separated key pairs).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TargetSpec {
    /// DNS provider type name (e.g. "cloudflare", "dnspod", "porkbun")
    pub dns: String,

    /// Opaque provider credentials
    pub credentials: String,

    /// Domains whose A records follow this target's IPv4 address
    #[serde(default)]
    pub ipv4: Vec<String>,

    /// Domains whose AAAA records follow this target's IPv6 address
    #[serde(default)]
    pub ipv6: Vec<String>,
}

impl TargetSpec {
    /// True when at least one domain is configured in either family
    pub fn has_domains(&self) -> bool {
        !self.ipv4.is_empty() || !self.ipv6.is_empty()
    }

    /// Validate the spec; `section` names the config section for messages
    pub fn validate(&self, section: &str) -> Result<(), crate::Error> {
        if !self.has_domains() {
            return Ok(());
        }
        if self.dns.is_empty() {
            return Err(crate::Error::config(format!(
                "{section}: dns provider type cannot be empty"
            )));
        }
        if self.credentials.is_empty() {
            return Err(crate::Error::config(format!(
                "{section}: credentials cannot be empty"
            )));
        }
        Ok(())
    }
}

/// Host target configuration: the hypervisor node itself
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct HostSpec {
    /// Platform node name the interface lives on
    pub node: String,

    /// Interface whose addresses are published
    pub iface: String,

    /// DNS update settings
    #[serde(flatten)]
    pub target: TargetSpec,
}

impl HostSpec {
    /// Validate the spec
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.node.is_empty() {
            return Err(crate::Error::config("host: node cannot be empty"));
        }
        if self.iface.is_empty() {
            return Err(crate::Error::config("host: iface cannot be empty"));
        }
        self.target.validate("host")
    }
}

/// Guest target configuration: a VM or container on the platform
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct GuestSpec {
    /// Guest VM/container id
    pub vmid: u32,

    /// Platform node name the guest runs on
    pub node: String,

    /// Interface inside the guest whose addresses are published
    pub iface: String,

    /// DNS update settings
    #[serde(flatten)]
    pub target: TargetSpec,
}

impl GuestSpec {
    /// Validate the spec
    pub fn validate(&self) -> Result<(), crate::Error> {
        let section = format!("guest {}", self.vmid);
        if self.node.is_empty() {
            return Err(crate::Error::config(format!(
                "{section}: node cannot be empty"
            )));
        }
        if self.iface.is_empty() {
            return Err(crate::Error::config(format!(
                "{section}: iface cannot be empty"
            )));
        }
        self.target.validate(&section)
    }
}

/// Every target the daemon manages
///
/// The client and host sections are optional; guests may be empty. The
/// registry preserves the guest order given here.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TargetsSpec {
    /// The machine running the daemon, resolved via public-IP services
    #[serde(default)]
    pub client: Option<TargetSpec>,

    /// The hypervisor host, resolved via the platform API
    #[serde(default)]
    pub host: Option<HostSpec>,

    /// Guests, resolved via the container runtime or the platform API
    #[serde(default)]
    pub guests: Vec<GuestSpec>,
}

impl TargetsSpec {
    /// Validate every present section
    pub fn validate(&self) -> Result<(), crate::Error> {
        if let Some(client) = &self.client {
            client.validate("client")?;
        }
        if let Some(host) = &self.host {
            host.validate()?;
        }
        let mut seen = std::collections::HashSet::new();
        for guest in &self.guests {
            guest.validate()?;
            if !seen.insert(guest.vmid) {
                return Err(crate::Error::config(format!(
                    "guest {} is configured twice",
                    guest.vmid
                )));
            }
        }
        Ok(())
    }

    /// True when no section defines any domain to manage
    pub fn is_empty(&self) -> bool {
        let client = self.client.as_ref().is_none_or(|c| !c.has_domains());
        let host = self.host.as_ref().is_none_or(|h| !h.target.has_domains());
        let guests = self.guests.iter().all(|g| !g.target.has_domains());
        client && host && guests
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(ipv4: &[&str], ipv6: &[&str]) -> TargetSpec {
        TargetSpec {
            dns: "cloudflare".to_string(),
            credentials: "token".to_string(),
            ipv4: ipv4.iter().map(|s| s.to_string()).collect(),
            ipv6: ipv6.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn defaults_match_documented_values() {
        let settings = EngineSettings::default();
        assert_eq!(settings.update_interval(), Duration::from_secs(300));
        assert_eq!(settings.prefix_sync_backoff(), Duration::from_secs(60));
        assert_eq!(settings.prefix_sync_settle(), Duration::from_secs(10));
        assert!(!settings.sync_host_static_v6_address);
    }

    #[test]
    fn target_without_domains_needs_no_credentials() {
        let mut s = spec(&[], &[]);
        s.credentials.clear();
        assert!(s.validate("client").is_ok());
    }

    #[test]
    fn target_with_domains_requires_credentials() {
        let mut s = spec(&["a.example.com"], &[]);
        s.credentials.clear();
        assert!(s.validate("client").is_err());
    }

    #[test]
    fn duplicate_guest_vmids_are_rejected() {
        let guest = GuestSpec {
            vmid: 100,
            node: "pve".to_string(),
            iface: "eth0".to_string(),
            target: spec(&[], &["vm.example.com"]),
        };
        let targets = TargetsSpec {
            client: None,
            host: None,
            guests: vec![guest.clone(), guest],
        };
        assert!(targets.validate().is_err());
    }

    #[test]
    fn empty_targets_detected() {
        let targets = TargetsSpec::default();
        assert!(targets.is_empty());

        let targets = TargetsSpec {
            client: Some(spec(&["a.example.com"], &[])),
            ..Default::default()
        };
        assert!(!targets.is_empty());
    }
}
