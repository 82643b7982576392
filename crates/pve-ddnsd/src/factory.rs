//! Adapter construction
//!
//! The provider set is closed: a plain `match` on the configured type name
//! builds the concrete adapter, verifies its credentials against the live
//! API, and hands back an owned trait object. Compiled-out providers
//! (disabled cargo features) fail here with a config-class error rather
//! than at first use.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, bail};
use pve_ddns_core::registry::BindingKey;
use pve_ddns_core::traits::{DnsProvider, PublicIpResolver};
use tracing::info;

use crate::config::PublicIpConfig;

/// Build and verify the DNS provider adapter for one binding key
pub async fn build_provider(key: &BindingKey, timeout: Duration) -> Result<Arc<dyn DnsProvider>> {
    let provider: Arc<dyn DnsProvider> = match key.dns_type() {
        #[cfg(feature = "cloudflare")]
        "cloudflare" => {
            let adapter =
                pve_ddns_provider_cloudflare::CloudflareDns::new(key.credentials(), timeout)?;
            adapter.verify().await?;
            Arc::new(adapter)
        }
        #[cfg(feature = "dnspod")]
        "dnspod" => {
            let adapter = pve_ddns_provider_dnspod::DnspodDns::new(key.credentials(), timeout)?;
            adapter.verify().await?;
            Arc::new(adapter)
        }
        #[cfg(feature = "porkbun")]
        "porkbun" => {
            let adapter = pve_ddns_provider_porkbun::PorkbunDns::new(key.credentials(), timeout)?;
            adapter.verify().await?;
            Arc::new(adapter)
        }
        other => bail!(
            "dns provider type '{other}' is not supported by this build \
             (enabled: {})",
            enabled_providers().join(", ")
        ),
    };
    info!(
        "verified {} credentials for binding {key:?}",
        provider.provider_name()
    );
    Ok(provider)
}

/// Build the public-IP resolver for the client target
pub fn build_public_ip(
    config: &PublicIpConfig,
    timeout: Duration,
) -> Result<Arc<dyn PublicIpResolver>> {
    match config.service.as_str() {
        "ipify" => Ok(Arc::new(pve_ddns_ip_http::IpifyResolver::new(timeout)?)),
        // credentials name the interface to read
        "iface" => Ok(Arc::new(pve_ddns_ip_iface::IfaceResolver::new(
            &config.credentials,
            timeout,
        )?)),
        #[cfg(feature = "porkbun")]
        "porkbun" => Ok(Arc::new(pve_ddns_provider_porkbun::PorkbunPublicIp::new(
            &config.credentials,
            timeout,
        )?)),
        other => bail!(
            "public-ip service '{other}' is not supported by this build \
             (enabled: ipify, iface{})",
            if cfg!(feature = "porkbun") { ", porkbun" } else { "" }
        ),
    }
}

/// Provider type names this binary was built with
fn enabled_providers() -> Vec<&'static str> {
    let mut providers = Vec::new();
    if cfg!(feature = "cloudflare") {
        providers.push("cloudflare");
    }
    if cfg!(feature = "dnspod") {
        providers.push("dnspod");
    }
    if cfg!(feature = "porkbun") {
        providers.push("porkbun");
    }
    providers
}
