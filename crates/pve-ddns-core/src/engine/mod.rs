//! Core reconciliation engine
//!
//! The ReconcileEngine is responsible for:
//! - Resolving the current addresses of every registered target
//! - Diffing them against the record cache
//! - Pushing changed records to the bound DNS providers
//! - Driving host IPv6 prefix sync when enabled
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────┐   public IP services   ┌──────────────────┐
//! │ PublicIpResolver │◄───── (client) ────────┤                  │
//! └──────────────────┘                        │                  │
//! ┌──────────────────┐   platform API         │ ReconcileEngine  │
//! │ PlatformResolver │◄── (host, VM guests) ──┤  + RecordCache   │
//! └──────────────────┘                        │                  │
//! ┌──────────────────┐   runtime CLI          │                  │
//! │ ContainerRuntime │◄── (CT guests) ────────┤                  │
//! └──────────────────┘                        └────────┬─────────┘
//!                                                      │ diff != cache
//!                                             ┌────────▼─────────┐
//!                                             │   DnsProvider    │
//!                                             │ (per binding key)│
//!                                             └──────────────────┘
//! ```
//!
//! ## Tick Flow
//!
//! 1. Client target: public-IP lookup per configured family
//! 2. Host target: platform lookup; empty required family is soft-fatal
//! 3. Guest targets in config order: container runtime or platform lookup;
//!    first non-empty IPv6 becomes the prefix-sync reference
//! 4. Host IPv6 prefix sync (when enabled)
//!
//! Exactly one tick runs at a time. A tick that overruns the interval
//! delays the next one; ticks are never burst to catch up. The shutdown
//! token is consulted between steps and after every sleep.

mod prefix;

pub use prefix::PrefixSyncOutcome;

use std::collections::HashSet;
use std::net::{IpAddr, Ipv6Addr};
use std::sync::Arc;

use chrono::Utc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::cache::{RecordCache, RecordFamily};
use crate::config::EngineSettings;
use crate::error::{Error, Result};
use crate::registry::{ProviderBindings, Target, TargetId, TargetRegistry};
use crate::shutdown::ShutdownToken;
use crate::traits::{ContainerRuntime, DnsProvider, IpPair, PlatformResolver, PublicIpResolver};

/// Why the reconciliation loop stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// Shutdown was requested via the cancellation token
    Cancelled,
    /// A host/guest address required by configured domains came back empty
    AddressLost(String),
}

/// What one tick resolved and did
///
/// Live-resolved addresses exist only here; nothing about a tick is kept in
/// shared mutable state besides the record cache itself.
#[derive(Debug, Clone, Default)]
pub struct TickReport {
    /// Client public addresses resolved this tick
    pub client: IpPair,
    /// Host interface addresses resolved this tick
    pub host: IpPair,
    /// First non-empty guest IPv6 seen this tick (prefix-sync reference)
    pub guest_reference_v6: Option<Ipv6Addr>,
    /// Provider writes that succeeded
    pub records_updated: u32,
    /// Domains that could not be resolved or written this tick
    pub records_failed: u32,
    /// Set when a required host/guest address was empty (stops the loop
    /// after the tick completes)
    pub soft_fatal: Option<String>,
    /// Outcome of the prefix-sync machine, when it ran
    pub prefix_sync: Option<PrefixSyncOutcome>,
}

impl TickReport {
    fn absorb(&mut self, outcome: FamilyOutcome) {
        self.records_updated += outcome.updated;
        self.records_failed += outcome.failed;
    }

    fn mark_soft_fatal(&mut self, reason: String) {
        // keep the first reason; later ones are still logged by the caller
        if self.soft_fatal.is_none() {
            self.soft_fatal = Some(reason);
        }
    }
}

/// Per-family reconciliation counts for one target
#[derive(Debug, Clone, Copy, Default)]
struct FamilyOutcome {
    updated: u32,
    unchanged: u32,
    failed: u32,
}

/// Core reconciliation engine
///
/// ## Lifecycle
///
/// 1. Assemble with [`ReconcileEngine::builder()`]
/// 2. Start with [`run()`](ReconcileEngine::run), or execute a single tick
///    with [`run_once()`](ReconcileEngine::run_once) (one-shot mode)
/// 3. The loop ends on cancellation or on a soft-fatal tick
///
/// ## Threading
///
/// The engine owns the record cache and runs every operation on one async
/// task; adapters are shared behind `Arc` and must be `Send + Sync`.
#[derive(Debug)]
pub struct ReconcileEngine {
    settings: EngineSettings,
    registry: TargetRegistry,
    bindings: ProviderBindings,
    public_ip: Option<Arc<dyn PublicIpResolver>>,
    platform: Option<Arc<dyn PlatformResolver>>,
    containers: Option<Arc<dyn ContainerRuntime>>,
    cache: RecordCache,
    shutdown: ShutdownToken,
}

impl ReconcileEngine {
    /// Start assembling an engine
    pub fn builder(
        settings: EngineSettings,
        registry: TargetRegistry,
        bindings: ProviderBindings,
    ) -> EngineBuilder {
        EngineBuilder {
            settings,
            registry,
            bindings,
            public_ip: None,
            platform: None,
            containers: None,
            cache: RecordCache::new(),
            shutdown: None,
        }
    }

    /// Read access to the record cache (inspection and tests)
    pub fn cache(&self) -> &RecordCache {
        &self.cache
    }

    /// Run the reconciliation loop until cancellation or soft-fatal
    ///
    /// The first tick fires immediately; subsequent ticks follow the
    /// configured interval, delayed (never burst) when a tick overruns.
    pub async fn run(&mut self) -> StopReason {
        info!(
            "reconciliation loop starting: {} target(s), tick interval {:?}",
            self.registry.len(),
            self.settings.update_interval()
        );

        let mut ticker = tokio::time::interval(self.settings.update_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = self.shutdown.cancelled() => {
                    info!("shutdown requested, reconciliation loop stopping");
                    return StopReason::Cancelled;
                }
            }

            let report = self.run_once().await;

            if let Some(reason) = report.soft_fatal {
                warn!("reconciliation loop stopping: {reason}");
                return StopReason::AddressLost(reason);
            }
            if self.shutdown.is_cancelled() {
                info!("shutdown requested, reconciliation loop stopping");
                return StopReason::Cancelled;
            }
        }
    }

    /// Execute exactly one reconciliation tick
    pub async fn run_once(&mut self) -> TickReport {
        debug!("reconciliation tick started");
        let mut report = TickReport::default();

        self.reconcile_client(&mut report).await;
        if self.shutdown.is_cancelled() {
            return report;
        }

        self.reconcile_host(&mut report).await;
        if self.shutdown.is_cancelled() {
            return report;
        }

        self.reconcile_guests(&mut report).await;
        if self.shutdown.is_cancelled() {
            return report;
        }

        self.sync_host_prefix(&mut report).await;

        if report.records_updated > 0 || report.records_failed > 0 {
            info!(
                "tick complete: {} record(s) updated, {} failed, {} cached",
                report.records_updated,
                report.records_failed,
                self.cache.len()
            );
        } else {
            debug!("tick complete, records up to date");
        }
        report
    }

    /// Step 1: the client target, resolved through public-IP services
    ///
    /// Lookup failures here are never fatal; the affected family is skipped
    /// for this tick.
    async fn reconcile_client(&mut self, report: &mut TickReport) {
        let Some(client) = self.registry.client().cloned() else {
            return;
        };
        let Some(resolver) = self.public_ip.clone() else {
            return;
        };

        if !client.ipv4_domains.is_empty() {
            match resolver.public_v4().await {
                Ok(Some(ip)) => {
                    report.client.v4 = Some(ip);
                    let outcome = self
                        .reconcile_target_family(&client, RecordFamily::V4, IpAddr::V4(ip))
                        .await;
                    report.absorb(outcome);
                }
                Ok(None) => warn!(
                    "{} reported no public IPv4 address, skipping client A records this tick",
                    resolver.service_name()
                ),
                Err(e) => warn!(
                    "public IPv4 lookup via {} failed, skipping client A records this tick: {e}",
                    resolver.service_name()
                ),
            }
        }

        if !client.ipv6_domains.is_empty() {
            match resolver.public_v6().await {
                Ok(Some(ip)) => {
                    report.client.v6 = Some(ip);
                    let outcome = self
                        .reconcile_target_family(&client, RecordFamily::V6, IpAddr::V6(ip))
                        .await;
                    report.absorb(outcome);
                }
                Ok(None) => warn!(
                    "{} reported no public IPv6 address, skipping client AAAA records this tick",
                    resolver.service_name()
                ),
                Err(e) => warn!(
                    "public IPv6 lookup via {} failed, skipping client AAAA records this tick: {e}",
                    resolver.service_name()
                ),
            }
        }
    }

    /// Step 2: the host target, resolved through the platform API
    async fn reconcile_host(&mut self, report: &mut TickReport) {
        let Some(host) = self.registry.host().cloned() else {
            return;
        };
        let Some(platform) = self.platform.clone() else {
            return;
        };
        let Some(placement) = host.placement.clone() else {
            return;
        };

        let resolved = match platform.host_ip(&placement.node, &placement.iface).await {
            Ok(pair) => pair,
            Err(e) => {
                warn!(
                    "host address lookup failed for {}/{}: {e}",
                    placement.node, placement.iface
                );
                IpPair::default()
            }
        };
        debug!(
            "host {}/{} resolved to {resolved}",
            placement.node, placement.iface
        );
        report.host = resolved;

        self.reconcile_placed(&host, resolved, report).await;
    }

    /// Step 3: guest targets, in config order
    ///
    /// The container-id list is fetched once per tick; listed guests resolve
    /// through the container runtime, everything else through the platform
    /// VM agent API.
    async fn reconcile_guests(&mut self, report: &mut TickReport) {
        let guests: Vec<Target> = self.registry.guests().to_vec();
        if guests.is_empty() {
            return;
        }
        let Some(platform) = self.platform.clone() else {
            return;
        };
        let containers = self.containers.clone();

        let container_ids: HashSet<u32> = match &containers {
            Some(runtime) => match runtime.container_ids().await {
                Ok(ids) => ids,
                Err(e) => {
                    warn!("container listing failed, treating all guests as VMs this tick: {e}");
                    HashSet::new()
                }
            },
            None => HashSet::new(),
        };

        for guest in &guests {
            if self.shutdown.is_cancelled() {
                return;
            }
            let TargetId::Guest(vmid) = guest.id else {
                continue;
            };
            let Some(placement) = guest.placement.clone() else {
                continue;
            };

            let resolved = if container_ids.contains(&vmid) {
                match &containers {
                    Some(runtime) => match runtime.container_ip(vmid, &placement.iface).await {
                        Ok(pair) => pair,
                        Err(e) => {
                            warn!("container address lookup failed for guest {vmid}: {e}");
                            IpPair::default()
                        }
                    },
                    None => IpPair::default(),
                }
            } else {
                match platform
                    .guest_ip(&placement.node, vmid, &placement.iface)
                    .await
                {
                    Ok(pair) => pair,
                    Err(e) => {
                        warn!("guest address lookup failed for guest {vmid}: {e}");
                        IpPair::default()
                    }
                }
            };
            debug!("guest {vmid} iface {} resolved to {resolved}", placement.iface);

            report.guest_reference_v6 = report.guest_reference_v6.or(resolved.v6);

            self.reconcile_placed(guest, resolved, report).await;
        }
    }

    /// Shared host/guest per-family handling
    ///
    /// An empty address for a family that has configured domains means the
    /// platform can no longer answer for this machine; the tick still
    /// completes, then the loop stops.
    async fn reconcile_placed(&mut self, target: &Target, resolved: IpPair, report: &mut TickReport) {
        if !target.ipv4_domains.is_empty() {
            match resolved.v4 {
                Some(ip) => {
                    let outcome = self
                        .reconcile_target_family(target, RecordFamily::V4, IpAddr::V4(ip))
                        .await;
                    report.absorb(outcome);
                }
                None => {
                    let reason =
                        format!("{} has A domains configured but no IPv4 address resolved", target.id);
                    warn!("{reason}; finishing this tick, then stopping");
                    report.mark_soft_fatal(reason);
                }
            }
        }

        if !target.ipv6_domains.is_empty() {
            match resolved.v6 {
                Some(ip) => {
                    let outcome = self
                        .reconcile_target_family(target, RecordFamily::V6, IpAddr::V6(ip))
                        .await;
                    report.absorb(outcome);
                }
                None => {
                    let reason = format!(
                        "{} has AAAA domains configured but no IPv6 address resolved",
                        target.id
                    );
                    warn!("{reason}; finishing this tick, then stopping");
                    report.mark_soft_fatal(reason);
                }
            }
        }
    }

    async fn reconcile_target_family(
        &mut self,
        target: &Target,
        family: RecordFamily,
        desired: IpAddr,
    ) -> FamilyOutcome {
        let Some(provider) = self.bindings.get(&target.binding) else {
            // build() verifies bindings, so this arm is unreachable in a
            // constructed engine
            warn!("no provider adapter bound for {}", target.id);
            return FamilyOutcome {
                failed: target.domains(family).len() as u32,
                ..FamilyOutcome::default()
            };
        };
        reconcile_domains(
            &mut self.cache,
            provider.as_ref(),
            target.id,
            target.domains(family),
            desired,
        )
        .await
    }

    /// Step 4: host IPv6 prefix sync
    async fn sync_host_prefix(&mut self, report: &mut TickReport) {
        if !self.settings.sync_host_static_v6_address {
            return;
        }
        let Some(host) = self.registry.host().cloned() else {
            return;
        };
        let Some(platform) = self.platform.clone() else {
            return;
        };
        let Some(placement) = host.placement.clone() else {
            return;
        };
        let Some(provider) = self.bindings.get(&host.binding) else {
            return;
        };

        let request = prefix::SyncRequest {
            node: placement.node,
            iface: placement.iface,
            host_v4: report.host.v4,
            host_v6: report.host.v6,
            guest_v6: report.guest_reference_v6,
            domains: host.ipv6_domains.clone(),
            backoff: self.settings.prefix_sync_backoff(),
            settle: self.settings.prefix_sync_settle(),
        };

        let outcome = prefix::sync_host_prefix(
            platform.as_ref(),
            provider.as_ref(),
            &mut self.cache,
            &self.shutdown,
            &request,
        )
        .await;

        match &outcome {
            PrefixSyncOutcome::InSync => debug!("host IPv6 prefix already in sync"),
            PrefixSyncOutcome::Updated { address, attempts } => info!(
                "host IPv6 address moved to {address} after {attempts} attempt(s)"
            ),
            PrefixSyncOutcome::Rejected { reason } => {
                warn!("host IPv6 prefix sync rejected: {reason}")
            }
            PrefixSyncOutcome::GaveUp { attempts } => warn!(
                "host IPv6 prefix sync gave up after {attempts} attempt(s); retrying next tick"
            ),
            PrefixSyncOutcome::Cancelled => {
                debug!("host IPv6 prefix sync interrupted by shutdown")
            }
        }
        report.prefix_sync = Some(outcome);
    }
}

/// Reconcile every domain of one (target, family) against `desired`
///
/// This is the only place cache entries are created or overwritten, which
/// keeps the cache contract in one spot: seed from the provider on first
/// touch, write only on diff, upsert only after the provider accepted.
async fn reconcile_domains(
    cache: &mut RecordCache,
    provider: &dyn DnsProvider,
    target: TargetId,
    domains: &[String],
    desired: IpAddr,
) -> FamilyOutcome {
    let family = RecordFamily::of(&desired);
    let mut outcome = FamilyOutcome::default();

    for domain in domains {
        let known = match cache.get(domain, family) {
            Some(entry) => entry.last_ip,
            None => match provider.record(domain, family).await {
                Ok(Some(existing)) => {
                    debug!(
                        "resolved {family} record {domain} -> {existing} ({target})"
                    );
                    cache.upsert(domain, family, existing, Utc::now());
                    existing
                }
                Ok(None) => {
                    warn!(
                        "no {family} record exists for {domain} at {}; it must be created once before updates can take over",
                        provider.provider_name()
                    );
                    outcome.failed += 1;
                    continue;
                }
                Err(e) => {
                    warn!(
                        "failed to resolve {family} record {domain} via {}: {e}",
                        provider.provider_name()
                    );
                    outcome.failed += 1;
                    continue;
                }
            },
        };

        if known == desired {
            debug!("{family} record {domain} already points at {desired}");
            outcome.unchanged += 1;
            continue;
        }

        match provider.set_record(domain, desired).await {
            Ok(()) => {
                info!("updated {family} record {domain}: {known} -> {desired} ({target})");
                cache.upsert(domain, family, desired, Utc::now());
                outcome.updated += 1;
            }
            Err(e) => {
                warn!(
                    "failed to update {family} record {domain} to {desired}: {e}; cached value kept, retrying next tick"
                );
                outcome.failed += 1;
            }
        }
    }
    outcome
}

/// Assembles a [`ReconcileEngine`], validating the wiring at `build()`
pub struct EngineBuilder {
    settings: EngineSettings,
    registry: TargetRegistry,
    bindings: ProviderBindings,
    public_ip: Option<Arc<dyn PublicIpResolver>>,
    platform: Option<Arc<dyn PlatformResolver>>,
    containers: Option<Arc<dyn ContainerRuntime>>,
    cache: RecordCache,
    shutdown: Option<ShutdownToken>,
}

impl EngineBuilder {
    /// Public-IP resolver for the client target
    pub fn public_ip(mut self, resolver: Arc<dyn PublicIpResolver>) -> Self {
        self.public_ip = Some(resolver);
        self
    }

    /// Platform resolver for host and VM guest targets
    pub fn platform(mut self, platform: Arc<dyn PlatformResolver>) -> Self {
        self.platform = Some(platform);
        self
    }

    /// Container runtime for container guest targets
    pub fn containers(mut self, containers: Arc<dyn ContainerRuntime>) -> Self {
        self.containers = Some(containers);
        self
    }

    /// Start from a pre-populated record cache instead of an empty one
    pub fn record_cache(mut self, cache: RecordCache) -> Self {
        self.cache = cache;
        self
    }

    /// Cancellation token observed by the loop and by every retry wait
    pub fn shutdown(mut self, token: ShutdownToken) -> Self {
        self.shutdown = Some(token);
        self
    }

    /// Validate the wiring and produce the engine
    ///
    /// Fails when a registered target has no provider adapter or when a
    /// required resolver is missing; the loop must never start with a
    /// target it cannot serve.
    pub fn build(self) -> Result<ReconcileEngine> {
        self.settings.validate()?;

        for target in self.registry.targets() {
            if !self.bindings.contains(&target.binding) {
                return Err(Error::config(format!(
                    "no provider adapter bound for {} ({})",
                    target.id,
                    target.binding.dns_type()
                )));
            }
        }
        if self.registry.client().is_some() && self.public_ip.is_none() {
            return Err(Error::config(
                "client target configured but no public-IP resolver supplied",
            ));
        }
        if self.registry.needs_platform() && self.platform.is_none() {
            return Err(Error::config(
                "host/guest targets configured but no platform resolver supplied",
            ));
        }
        if !self.registry.guests().is_empty() && self.containers.is_none() {
            return Err(Error::config(
                "guest targets configured but no container runtime supplied",
            ));
        }

        Ok(ReconcileEngine {
            settings: self.settings,
            registry: self.registry,
            bindings: self.bindings,
            public_ip: self.public_ip,
            platform: self.platform,
            containers: self.containers,
            cache: self.cache,
            shutdown: self.shutdown.unwrap_or_else(ShutdownToken::never),
        })
    }
}
