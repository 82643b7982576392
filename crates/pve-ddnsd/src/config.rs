//! Daemon configuration file
//!
//! One YAML file, kebab-case keys, four top-level sections: `general` for
//! pacing/logging/API access, then `client`, `host` and `guests` target
//! sections. The target sections deserialize straight into the core's spec
//! types; everything here is validated once and handed to the engine as
//! immutable values.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use pve_ddns_core::{EngineSettings, GuestSpec, HostSpec, TargetSpec, TargetsSpec};
use serde::Deserialize;

/// Default per-request HTTP timeout, in milliseconds
fn default_http_timeout_ms() -> u64 {
    30_000
}

/// Service mode runs the loop forever; off means one tick and exit
fn default_service_mode() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_public_ip_service() -> String {
    "ipify".to_string()
}

/// Whole config file
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct FileConfig {
    /// Pacing, logging and API access
    #[serde(default)]
    pub general: GeneralConfig,

    /// The machine running the daemon
    #[serde(default)]
    pub client: Option<TargetSpec>,

    /// The hypervisor host
    #[serde(default)]
    pub host: Option<HostSpec>,

    /// Guest VMs and containers
    #[serde(default)]
    pub guests: Vec<GuestSpec>,
}

/// The `general` section
///
/// No `deny_unknown_fields` here: the engine settings are flattened in and
/// serde cannot combine the two. `load` runs a manual key check over the
/// raw YAML instead, so typos in this section fail like everywhere else.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct GeneralConfig {
    /// Engine pacing and prefix-sync settings (flattened into this section)
    #[serde(flatten)]
    pub engine: EngineSettings,

    /// Per-request HTTP timeout for every adapter, in milliseconds
    #[serde(default = "default_http_timeout_ms")]
    pub http_timeout_ms: u64,

    /// Run the reconciliation loop forever; `false` means one tick and exit
    #[serde(default = "default_service_mode")]
    pub service_mode: bool,

    /// Log output settings
    #[serde(default)]
    pub log: LogConfig,

    /// Public-IP lookup service for the client target
    #[serde(default)]
    pub public_ip: Option<PublicIpConfig>,

    /// Proxmox VE API access for host/guest targets
    #[serde(default)]
    pub pve_api: Option<PveApiConfig>,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            engine: EngineSettings::default(),
            http_timeout_ms: default_http_timeout_ms(),
            service_mode: default_service_mode(),
            log: LogConfig::default(),
            public_ip: None,
            pve_api: None,
        }
    }
}

/// The `general.log` section
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct LogConfig {
    /// Directory for daily-rotated log files; stderr only when unset
    #[serde(default)]
    pub dir: Option<PathBuf>,

    /// Log level: trace, debug, info, warn or error
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            dir: None,
            level: default_log_level(),
        }
    }
}

/// The `general.public-ip` section
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct PublicIpConfig {
    /// Service name: "ipify", "iface" or "porkbun"
    #[serde(default = "default_public_ip_service")]
    pub service: String,

    /// Service credentials; ipify needs none, iface takes the interface
    /// name here
    #[serde(default)]
    pub credentials: String,
}

/// The `general.pve-api` section
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct PveApiConfig {
    /// API base URL, e.g. "https://pve.example.net:8006"
    pub host: String,
    /// Token owner, e.g. "root"
    pub user: String,
    /// Authentication realm, e.g. "pam"
    pub realm: String,
    /// Token id
    pub token_id: String,
    /// Token secret; never log this value
    pub token_secret: String,
}

/// Every key the `general` section accepts; the flattened engine settings
/// included. Must stay in sync with [`GeneralConfig`] and
/// [`pve_ddns_core::EngineSettings`].
const GENERAL_KEYS: &[&str] = &[
    "update-interval-ms",
    "sync-host-static-v6-address",
    "prefix-sync-backoff-secs",
    "prefix-sync-settle-secs",
    "http-timeout-ms",
    "service-mode",
    "log",
    "public-ip",
    "pve-api",
];

impl FileConfig {
    /// Read and validate the config file
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read config file {}", path.display()))?;
        let value: serde_yaml::Value = serde_yaml::from_str(&text)
            .with_context(|| format!("cannot parse config file {}", path.display()))?;
        reject_unknown_general_keys(&value)?;
        let config: FileConfig = serde_yaml::from_value(value)
            .with_context(|| format!("cannot parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// The target sections as the core's spec value
    pub fn targets(&self) -> TargetsSpec {
        TargetsSpec {
            client: self.client.clone(),
            host: self.host.clone(),
            guests: self.guests.clone(),
        }
    }

    /// Engine pacing settings
    pub fn engine_settings(&self) -> EngineSettings {
        self.general.engine.clone()
    }

    /// Per-request HTTP timeout for every adapter
    pub fn http_timeout(&self) -> Duration {
        Duration::from_millis(self.general.http_timeout_ms)
    }

    fn validate(&self) -> Result<()> {
        let targets = self.targets();
        targets.validate()?;
        self.general.engine.validate()?;

        if targets.is_empty() {
            bail!("config defines no domains to manage in any section");
        }
        if self.general.http_timeout_ms == 0 {
            bail!("general.http-timeout-ms must be > 0");
        }
        match self.general.log.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            other => bail!("general.log.level '{other}' is not valid (trace, debug, info, warn, error)"),
        }

        let client_active = self.client.as_ref().is_some_and(|c| c.has_domains());
        if client_active && self.general.public_ip.is_none() {
            bail!("client section has domains but general.public-ip is not configured");
        }
        if let Some(public_ip) = &self.general.public_ip {
            match public_ip.service.as_str() {
                "ipify" => {}
                "iface" => {
                    if public_ip.credentials.is_empty() {
                        bail!(
                            "general.public-ip.credentials must name the interface for the iface service"
                        );
                    }
                }
                "porkbun" => {
                    if public_ip.credentials.is_empty() {
                        bail!("general.public-ip.credentials is required for the porkbun service");
                    }
                }
                other => bail!(
                    "general.public-ip.service '{other}' is not supported (ipify, iface, porkbun)"
                ),
            }
        }

        let platform_active = self.host.as_ref().is_some_and(|h| h.target.has_domains())
            || self.guests.iter().any(|g| g.target.has_domains());
        if platform_active && self.general.pve_api.is_none() {
            bail!("host/guest sections have domains but general.pve-api is not configured");
        }

        for target in [self.client.as_ref(), self.host.as_ref().map(|h| &h.target)]
            .into_iter()
            .flatten()
            .chain(self.guests.iter().map(|g| &g.target))
        {
            for domain in target.ipv4.iter().chain(target.ipv6.iter()) {
                validate_domain_name(domain)?;
            }
        }
        Ok(())
    }
}

/// Reject unknown keys under `general` before deserializing
///
/// Serde's `deny_unknown_fields` cannot be used on a struct with a
/// `flatten` field, which would make this the one section where typos pass
/// silently.
fn reject_unknown_general_keys(value: &serde_yaml::Value) -> Result<()> {
    let Some(general) = value.get("general").and_then(|g| g.as_mapping()) else {
        return Ok(());
    };
    for key in general.keys() {
        let Some(name) = key.as_str() else {
            bail!("general: keys must be strings");
        };
        if !GENERAL_KEYS.contains(&name) {
            bail!(
                "general: unknown field '{name}' (expected one of: {})",
                GENERAL_KEYS.join(", ")
            );
        }
    }
    Ok(())
}

/// Basic RFC 1035 domain name validation
///
/// Not comprehensive, but catches the common config typos before any
/// provider sees them.
pub fn validate_domain_name(domain: &str) -> Result<()> {
    if domain.is_empty() {
        bail!("domain name cannot be empty");
    }
    if domain.len() > 253 {
        bail!("domain name too long: {} chars (max 253): {domain}", domain.len());
    }
    for label in domain.split('.') {
        if label.is_empty() {
            bail!("domain name has an empty label: '{domain}'");
        }
        if label.len() > 63 {
            bail!("domain label too long: {} chars (max 63): '{label}'", label.len());
        }
        if !label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
            bail!("domain label '{label}' contains invalid characters (alphanumeric and hyphen only)");
        }
        if label.starts_with('-') || label.ends_with('-') {
            bail!("domain label '{label}' cannot start or end with a hyphen");
        }
    }
    Ok(())
}
