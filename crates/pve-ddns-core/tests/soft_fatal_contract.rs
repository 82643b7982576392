//! Architectural Contract Test: Soft-Fatal Address Loss
//!
//! A host or guest that no longer reports an address for a family with
//! configured domains means the platform view and the DNS view cannot be
//! reconciled; the daemon stops rather than publish stale records forever.
//! The stop is soft: the tick in progress still completes for every other
//! target.
//!
//! Constraints verified:
//! - Host/guest missing a required family stops the loop after the tick
//! - The failing tick still reconciles the remaining targets
//! - Families without configured domains never trigger the stop
//! - Client public-IP gaps are skips, never stops
//!
//! If this test fails, the stop-on-address-loss policy is broken.

mod common;

use std::net::{Ipv4Addr, Ipv6Addr};
use std::sync::Arc;
use std::time::Duration;

use common::*;
use pve_ddns_core::{IpPair, ReconcileEngine, StopReason, TargetRegistry, TargetsSpec};

#[tokio::test]
async fn host_missing_required_family_stops_after_full_tick() {
    let guest_ip = Ipv4Addr::new(192, 0, 2, 20);

    let provider = Arc::new(
        MockDnsProvider::new()
            .with_a("host.example.com", Ipv4Addr::new(198, 51, 100, 1))
            .with_a("vm100.example.com", Ipv4Addr::new(198, 51, 100, 2)),
    );
    // Host reports no IPv4 at all
    let platform = Arc::new(
        MockPlatform::new(IpPair::default())
            .with_guest(100, IpPair { v4: Some(guest_ip), v6: None }),
    );
    let containers = Arc::new(MockContainers::new());

    let registry = TargetRegistry::from_spec(&TargetsSpec {
        client: None,
        host: Some(host_spec(&["host.example.com"], &[])),
        guests: vec![guest_spec(100, &["vm100.example.com"], &[])],
    });
    let bindings = bind_all(&registry, &provider);
    let mut engine = ReconcileEngine::builder(fast_settings(), registry, bindings)
        .platform(platform)
        .containers(containers)
        .build()
        .expect("engine construction succeeds");

    let report = engine.run_once().await;

    assert!(report.soft_fatal.is_some(), "missing host IPv4 must flag the tick");
    // The guest after the host was still reconciled in the same tick
    assert_eq!(provider.a_record("vm100.example.com"), Some(guest_ip));
}

#[tokio::test]
async fn run_stops_with_address_lost() {
    let provider = Arc::new(
        MockDnsProvider::new().with_a("host.example.com", Ipv4Addr::new(198, 51, 100, 1)),
    );
    let platform = Arc::new(MockPlatform::new(IpPair::default()));

    let registry = TargetRegistry::from_spec(&TargetsSpec {
        client: None,
        host: Some(host_spec(&["host.example.com"], &[])),
        guests: vec![],
    });
    let bindings = bind_all(&registry, &provider);
    let mut engine = ReconcileEngine::builder(fast_settings(), registry, bindings)
        .platform(platform)
        .build()
        .expect("engine construction succeeds");

    let reason = tokio::time::timeout(Duration::from_secs(5), engine.run())
        .await
        .expect("loop must stop on its first tick");
    assert!(matches!(reason, StopReason::AddressLost(_)));
}

#[tokio::test]
async fn families_without_domains_do_not_require_addresses() {
    let host_v6: Ipv6Addr = "2001:db8:1:1::10".parse().unwrap();

    let provider = Arc::new(MockDnsProvider::new().with_aaaa("host.example.com", host_v6));
    // IPv6-only host, IPv6-only domains: the missing IPv4 is irrelevant
    let platform = Arc::new(MockPlatform::new(IpPair { v4: None, v6: Some(host_v6) }));

    let registry = TargetRegistry::from_spec(&TargetsSpec {
        client: None,
        host: Some(host_spec(&[], &["host.example.com"])),
        guests: vec![],
    });
    let bindings = bind_all(&registry, &provider);
    let mut engine = ReconcileEngine::builder(fast_settings(), registry, bindings)
        .platform(platform)
        .build()
        .expect("engine construction succeeds");

    let report = engine.run_once().await;
    assert!(report.soft_fatal.is_none());
    assert_eq!(report.records_failed, 0);
}

#[tokio::test]
async fn guest_missing_required_family_is_soft_fatal_too() {
    let other_ip = Ipv4Addr::new(192, 0, 2, 30);

    let provider = Arc::new(
        MockDnsProvider::new()
            .with_a("vm100.example.com", Ipv4Addr::new(198, 51, 100, 1))
            .with_a("vm101.example.com", Ipv4Addr::new(198, 51, 100, 2)),
    );
    // Guest 100 lost its address; guest 101 still has one
    let platform = Arc::new(
        MockPlatform::new(IpPair::default())
            .with_guest(101, IpPair { v4: Some(other_ip), v6: None }),
    );
    let containers = Arc::new(MockContainers::new());

    let registry = TargetRegistry::from_spec(&TargetsSpec {
        client: None,
        host: None,
        guests: vec![
            guest_spec(100, &["vm100.example.com"], &[]),
            guest_spec(101, &["vm101.example.com"], &[]),
        ],
    });
    let bindings = bind_all(&registry, &provider);
    let mut engine = ReconcileEngine::builder(fast_settings(), registry, bindings)
        .platform(platform)
        .containers(containers)
        .build()
        .expect("engine construction succeeds");

    let report = engine.run_once().await;

    assert!(report.soft_fatal.is_some());
    // Guest 101, later in config order, was still brought up to date
    assert_eq!(provider.a_record("vm101.example.com"), Some(other_ip));
}

#[tokio::test]
async fn client_without_public_address_is_skipped_not_fatal() {
    let provider = Arc::new(
        MockDnsProvider::new().with_a("me.example.com", Ipv4Addr::new(198, 51, 100, 1)),
    );
    // Service answers but reports no address
    let public_ip = Arc::new(MockPublicIp::new(None, None));

    let registry = TargetRegistry::from_spec(&TargetsSpec {
        client: Some(client_spec(&["me.example.com"], &[])),
        host: None,
        guests: vec![],
    });
    let bindings = bind_all(&registry, &provider);
    let mut engine = ReconcileEngine::builder(fast_settings(), registry, bindings)
        .public_ip(public_ip)
        .build()
        .expect("engine construction succeeds");

    let report = engine.run_once().await;
    assert!(report.soft_fatal.is_none());
    assert_eq!(provider.set_call_count(), 0);
    assert_eq!(provider.get_call_count(), 0, "no address means nothing to diff");
}
