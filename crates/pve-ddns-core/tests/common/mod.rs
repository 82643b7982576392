//! Test doubles and common utilities for architecture contract tests
//!
//! This module provides scriptable doubles for the four adapter traits so
//! tests can drive whole reconciliation ticks without any network or
//! platform access.

use std::collections::{HashMap, HashSet};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use pve_ddns_core::error::{Error, Result};
use pve_ddns_core::traits::{
    ContainerRuntime, DnsProvider, IpPair, PlatformResolver, PublicIpResolver,
};
use pve_ddns_core::{
    EngineSettings, GuestSpec, HostSpec, ProviderBindings, TargetRegistry, TargetSpec,
};

/// Shared call journal for asserting cross-adapter ordering
#[derive(Clone, Debug, Default)]
pub struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, entry: impl Into<String>) {
        self.0.lock().unwrap().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

/// Decrement a failure budget; `usize::MAX` means "fail forever"
fn consume(budget: &Mutex<usize>) -> bool {
    let mut remaining = budget.lock().unwrap();
    if *remaining == 0 {
        return false;
    }
    if *remaining != usize::MAX {
        *remaining -= 1;
    }
    true
}

/// A mock DnsProvider backed by in-memory record maps
///
/// Successful writes update the maps, so a later read observes them the way
/// a real provider would.
#[derive(Debug)]
pub struct MockDnsProvider {
    records_a: Mutex<HashMap<String, Ipv4Addr>>,
    records_aaaa: Mutex<HashMap<String, Ipv6Addr>>,
    /// Call counter for ipv4()/ipv6()
    get_call_count: Arc<AtomicUsize>,
    /// Call counter for set_ipv4()/set_ipv6()
    set_call_count: Arc<AtomicUsize>,
    /// Every accepted write, in order
    writes: Mutex<Vec<(String, IpAddr)>>,
    fail_gets: Mutex<usize>,
    fail_sets: Mutex<usize>,
    journal: Journal,
}

impl MockDnsProvider {
    pub fn new() -> Self {
        Self {
            records_a: Mutex::new(HashMap::new()),
            records_aaaa: Mutex::new(HashMap::new()),
            get_call_count: Arc::new(AtomicUsize::new(0)),
            set_call_count: Arc::new(AtomicUsize::new(0)),
            writes: Mutex::new(Vec::new()),
            fail_gets: Mutex::new(0),
            fail_sets: Mutex::new(0),
            journal: Journal::new(),
        }
    }

    pub fn with_journal(mut self, journal: Journal) -> Self {
        self.journal = journal;
        self
    }

    /// Seed an existing A record
    pub fn with_a(self, domain: &str, ip: Ipv4Addr) -> Self {
        self.records_a.lock().unwrap().insert(domain.to_string(), ip);
        self
    }

    /// Seed an existing AAAA record
    pub fn with_aaaa(self, domain: &str, ip: Ipv6Addr) -> Self {
        self.records_aaaa
            .lock()
            .unwrap()
            .insert(domain.to_string(), ip);
        self
    }

    /// Make the next `n` reads fail (`usize::MAX` = all)
    pub fn fail_gets(&self, n: usize) {
        *self.fail_gets.lock().unwrap() = n;
    }

    /// Make the next `n` writes fail (`usize::MAX` = all)
    pub fn fail_sets(&self, n: usize) {
        *self.fail_sets.lock().unwrap() = n;
    }

    pub fn get_call_count(&self) -> usize {
        self.get_call_count.load(Ordering::SeqCst)
    }

    pub fn set_call_count(&self) -> usize {
        self.set_call_count.load(Ordering::SeqCst)
    }

    /// Every accepted write, in order
    pub fn writes(&self) -> Vec<(String, IpAddr)> {
        self.writes.lock().unwrap().clone()
    }

    pub fn a_record(&self, domain: &str) -> Option<Ipv4Addr> {
        self.records_a.lock().unwrap().get(domain).copied()
    }

    pub fn aaaa_record(&self, domain: &str) -> Option<Ipv6Addr> {
        self.records_aaaa.lock().unwrap().get(domain).copied()
    }
}

#[async_trait::async_trait]
impl DnsProvider for MockDnsProvider {
    fn provider_name(&self) -> &'static str {
        "mockdns"
    }

    async fn ipv4(&self, domain: &str) -> Result<Option<Ipv4Addr>> {
        self.get_call_count.fetch_add(1, Ordering::SeqCst);
        self.journal.record(format!("dns get A {domain}"));
        if consume(&self.fail_gets) {
            return Err(Error::provider("mockdns", "scripted read failure"));
        }
        Ok(self.records_a.lock().unwrap().get(domain).copied())
    }

    async fn ipv6(&self, domain: &str) -> Result<Option<Ipv6Addr>> {
        self.get_call_count.fetch_add(1, Ordering::SeqCst);
        self.journal.record(format!("dns get AAAA {domain}"));
        if consume(&self.fail_gets) {
            return Err(Error::provider("mockdns", "scripted read failure"));
        }
        Ok(self.records_aaaa.lock().unwrap().get(domain).copied())
    }

    async fn set_ipv4(&self, domain: &str, ip: Ipv4Addr) -> Result<()> {
        self.set_call_count.fetch_add(1, Ordering::SeqCst);
        self.journal.record(format!("dns set A {domain} {ip}"));
        if consume(&self.fail_sets) {
            return Err(Error::provider("mockdns", "scripted write failure"));
        }
        self.records_a.lock().unwrap().insert(domain.to_string(), ip);
        self.writes
            .lock()
            .unwrap()
            .push((domain.to_string(), IpAddr::V4(ip)));
        Ok(())
    }

    async fn set_ipv6(&self, domain: &str, ip: Ipv6Addr) -> Result<()> {
        self.set_call_count.fetch_add(1, Ordering::SeqCst);
        self.journal.record(format!("dns set AAAA {domain} {ip}"));
        if consume(&self.fail_sets) {
            return Err(Error::provider("mockdns", "scripted write failure"));
        }
        self.records_aaaa
            .lock()
            .unwrap()
            .insert(domain.to_string(), ip);
        self.writes
            .lock()
            .unwrap()
            .push((domain.to_string(), IpAddr::V6(ip)));
        Ok(())
    }
}

/// A mock public-IP service with fixed answers
#[derive(Debug)]
pub struct MockPublicIp {
    v4: Mutex<Option<Ipv4Addr>>,
    v6: Mutex<Option<Ipv6Addr>>,
    /// Call counter for public_v4()
    v4_call_count: Arc<AtomicUsize>,
    /// Call counter for public_v6()
    v6_call_count: Arc<AtomicUsize>,
    fail_v4: Mutex<usize>,
    fail_v6: Mutex<usize>,
    journal: Journal,
}

impl MockPublicIp {
    pub fn new(v4: Option<Ipv4Addr>, v6: Option<Ipv6Addr>) -> Self {
        Self {
            v4: Mutex::new(v4),
            v6: Mutex::new(v6),
            v4_call_count: Arc::new(AtomicUsize::new(0)),
            v6_call_count: Arc::new(AtomicUsize::new(0)),
            fail_v4: Mutex::new(0),
            fail_v6: Mutex::new(0),
            journal: Journal::new(),
        }
    }

    pub fn with_journal(mut self, journal: Journal) -> Self {
        self.journal = journal;
        self
    }

    pub fn set_v4(&self, ip: Option<Ipv4Addr>) {
        *self.v4.lock().unwrap() = ip;
    }

    pub fn fail_v4(&self, n: usize) {
        *self.fail_v4.lock().unwrap() = n;
    }

    pub fn fail_v6(&self, n: usize) {
        *self.fail_v6.lock().unwrap() = n;
    }

    pub fn v4_call_count(&self) -> usize {
        self.v4_call_count.load(Ordering::SeqCst)
    }

    pub fn v6_call_count(&self) -> usize {
        self.v6_call_count.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl PublicIpResolver for MockPublicIp {
    fn service_name(&self) -> &'static str {
        "mockip"
    }

    async fn public_v4(&self) -> Result<Option<Ipv4Addr>> {
        self.v4_call_count.fetch_add(1, Ordering::SeqCst);
        self.journal.record("public_ip v4");
        if consume(&self.fail_v4) {
            return Err(Error::public_ip("scripted lookup failure"));
        }
        Ok(*self.v4.lock().unwrap())
    }

    async fn public_v6(&self) -> Result<Option<Ipv6Addr>> {
        self.v6_call_count.fetch_add(1, Ordering::SeqCst);
        self.journal.record("public_ip v6");
        if consume(&self.fail_v6) {
            return Err(Error::public_ip("scripted lookup failure"));
        }
        Ok(*self.v6.lock().unwrap())
    }
}

/// A mock platform with one host interface and a set of guest answers
///
/// Staged host addresses follow the platform's transactional model: stage
/// records the pending address, apply makes it the live host IPv6, revert
/// discards it.
#[derive(Debug)]
pub struct MockPlatform {
    host: Mutex<IpPair>,
    guests: Mutex<HashMap<u32, IpPair>>,
    staged: Mutex<Option<Ipv6Addr>>,
    /// Every address handed to stage_host_address(), in order
    staged_addresses: Mutex<Vec<Ipv6Addr>>,
    host_ip_call_count: Arc<AtomicUsize>,
    guest_ip_call_count: Arc<AtomicUsize>,
    stage_call_count: Arc<AtomicUsize>,
    apply_call_count: Arc<AtomicUsize>,
    revert_call_count: Arc<AtomicUsize>,
    fail_stages: Mutex<usize>,
    fail_applies: Mutex<usize>,
    journal: Journal,
}

impl MockPlatform {
    pub fn new(host: IpPair) -> Self {
        Self {
            host: Mutex::new(host),
            guests: Mutex::new(HashMap::new()),
            staged: Mutex::new(None),
            staged_addresses: Mutex::new(Vec::new()),
            host_ip_call_count: Arc::new(AtomicUsize::new(0)),
            guest_ip_call_count: Arc::new(AtomicUsize::new(0)),
            stage_call_count: Arc::new(AtomicUsize::new(0)),
            apply_call_count: Arc::new(AtomicUsize::new(0)),
            revert_call_count: Arc::new(AtomicUsize::new(0)),
            fail_stages: Mutex::new(0),
            fail_applies: Mutex::new(0),
            journal: Journal::new(),
        }
    }

    pub fn with_journal(mut self, journal: Journal) -> Self {
        self.journal = journal;
        self
    }

    pub fn with_guest(self, vmid: u32, pair: IpPair) -> Self {
        self.guests.lock().unwrap().insert(vmid, pair);
        self
    }

    pub fn fail_stages(&self, n: usize) {
        *self.fail_stages.lock().unwrap() = n;
    }

    pub fn fail_applies(&self, n: usize) {
        *self.fail_applies.lock().unwrap() = n;
    }

    pub fn host_pair(&self) -> IpPair {
        *self.host.lock().unwrap()
    }

    pub fn staged_addresses(&self) -> Vec<Ipv6Addr> {
        self.staged_addresses.lock().unwrap().clone()
    }

    pub fn host_ip_call_count(&self) -> usize {
        self.host_ip_call_count.load(Ordering::SeqCst)
    }

    pub fn guest_ip_call_count(&self) -> usize {
        self.guest_ip_call_count.load(Ordering::SeqCst)
    }

    pub fn stage_call_count(&self) -> usize {
        self.stage_call_count.load(Ordering::SeqCst)
    }

    pub fn apply_call_count(&self) -> usize {
        self.apply_call_count.load(Ordering::SeqCst)
    }

    pub fn revert_call_count(&self) -> usize {
        self.revert_call_count.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl PlatformResolver for MockPlatform {
    async fn host_ip(&self, _node: &str, _iface: &str) -> Result<IpPair> {
        self.host_ip_call_count.fetch_add(1, Ordering::SeqCst);
        self.journal.record("platform host_ip");
        Ok(*self.host.lock().unwrap())
    }

    async fn guest_ip(&self, _node: &str, vmid: u32, _iface: &str) -> Result<IpPair> {
        self.guest_ip_call_count.fetch_add(1, Ordering::SeqCst);
        self.journal.record(format!("platform guest_ip {vmid}"));
        Ok(self
            .guests
            .lock()
            .unwrap()
            .get(&vmid)
            .copied()
            .unwrap_or_default())
    }

    async fn stage_host_address(
        &self,
        _node: &str,
        _iface: &str,
        _v4: Option<Ipv4Addr>,
        v6: Ipv6Addr,
    ) -> Result<()> {
        self.stage_call_count.fetch_add(1, Ordering::SeqCst);
        self.staged_addresses.lock().unwrap().push(v6);
        self.journal.record(format!("platform stage {v6}"));
        if consume(&self.fail_stages) {
            return Err(Error::platform("scripted stage failure"));
        }
        *self.staged.lock().unwrap() = Some(v6);
        Ok(())
    }

    async fn apply_host_network(&self, _node: &str) -> Result<()> {
        self.apply_call_count.fetch_add(1, Ordering::SeqCst);
        self.journal.record("platform apply");
        if consume(&self.fail_applies) {
            return Err(Error::platform("scripted apply failure"));
        }
        if let Some(v6) = self.staged.lock().unwrap().take() {
            self.host.lock().unwrap().v6 = Some(v6);
        }
        Ok(())
    }

    async fn revert_host_network(&self, _node: &str) -> Result<()> {
        self.revert_call_count.fetch_add(1, Ordering::SeqCst);
        self.journal.record("platform revert");
        *self.staged.lock().unwrap() = None;
        Ok(())
    }
}

/// A mock container runtime with a fixed id set
#[derive(Debug)]
pub struct MockContainers {
    ids: Mutex<HashSet<u32>>,
    pairs: Mutex<HashMap<u32, IpPair>>,
    list_call_count: Arc<AtomicUsize>,
    ip_call_count: Arc<AtomicUsize>,
    fail_lists: Mutex<usize>,
    journal: Journal,
}

impl MockContainers {
    pub fn new() -> Self {
        Self {
            ids: Mutex::new(HashSet::new()),
            pairs: Mutex::new(HashMap::new()),
            list_call_count: Arc::new(AtomicUsize::new(0)),
            ip_call_count: Arc::new(AtomicUsize::new(0)),
            fail_lists: Mutex::new(0),
            journal: Journal::new(),
        }
    }

    pub fn with_journal(mut self, journal: Journal) -> Self {
        self.journal = journal;
        self
    }

    pub fn with_container(self, vmid: u32, pair: IpPair) -> Self {
        self.ids.lock().unwrap().insert(vmid);
        self.pairs.lock().unwrap().insert(vmid, pair);
        self
    }

    pub fn fail_lists(&self, n: usize) {
        *self.fail_lists.lock().unwrap() = n;
    }

    pub fn list_call_count(&self) -> usize {
        self.list_call_count.load(Ordering::SeqCst)
    }

    pub fn ip_call_count(&self) -> usize {
        self.ip_call_count.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl ContainerRuntime for MockContainers {
    async fn container_ids(&self) -> Result<HashSet<u32>> {
        self.list_call_count.fetch_add(1, Ordering::SeqCst);
        self.journal.record("containers list");
        if consume(&self.fail_lists) {
            return Err(Error::container("scripted list failure"));
        }
        Ok(self.ids.lock().unwrap().clone())
    }

    async fn container_ip(&self, vmid: u32, _iface: &str) -> Result<IpPair> {
        self.ip_call_count.fetch_add(1, Ordering::SeqCst);
        self.journal.record(format!("containers ip {vmid}"));
        Ok(self
            .pairs
            .lock()
            .unwrap()
            .get(&vmid)
            .copied()
            .unwrap_or_default())
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// A client target spec bound to the mock provider
pub fn client_spec(ipv4: &[&str], ipv6: &[&str]) -> TargetSpec {
    TargetSpec {
        dns: "mockdns".to_string(),
        credentials: "secret".to_string(),
        ipv4: strings(ipv4),
        ipv6: strings(ipv6),
    }
}

/// A host target spec on node "pve1" / iface "vmbr0"
pub fn host_spec(ipv4: &[&str], ipv6: &[&str]) -> HostSpec {
    HostSpec {
        node: "pve1".to_string(),
        iface: "vmbr0".to_string(),
        target: client_spec(ipv4, ipv6),
    }
}

/// A guest target spec on node "pve1" / iface "eth0"
pub fn guest_spec(vmid: u32, ipv4: &[&str], ipv6: &[&str]) -> GuestSpec {
    GuestSpec {
        vmid,
        node: "pve1".to_string(),
        iface: "eth0".to_string(),
        target: client_spec(ipv4, ipv6),
    }
}

/// Engine settings with a short tick interval, prefix sync off
pub fn fast_settings() -> EngineSettings {
    EngineSettings {
        update_interval_ms: 1_000,
        ..EngineSettings::default()
    }
}

/// Bind every key the registry knows to the one mock provider
pub fn bind_all(registry: &TargetRegistry, provider: &Arc<MockDnsProvider>) -> ProviderBindings {
    let mut bindings = ProviderBindings::new();
    for key in registry.binding_keys() {
        bindings.insert(key, provider.clone());
    }
    bindings
}
