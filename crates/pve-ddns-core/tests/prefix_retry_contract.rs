//! Architectural Contract Test: Host IPv6 Prefix Sync & Bounded Retry
//!
//! This test verifies the prefix-sync state machine: compare the host's
//! routing prefix with the guest reference, stage and apply the recombined
//! address on the platform, wait for the interface to settle, then update
//! the AAAA records. Failures before the network change is live roll the
//! staged change back; failures after leave it live and retry only DNS.
//!
//! Constraints verified:
//! - Matching prefixes and missing reference addresses are no-ops
//! - The recombined address is guest prefix + host suffix
//! - Stage/apply failures revert and retry with backoff, bounded at five
//!   attempts per tick
//! - DNS failures after a successful apply never roll back
//! - Prefixes compare by numeric group, not rendered text
//! - Addresses without routing information are rejected without touching
//!   the platform
//! - Exhausted retries are a warning, not a stop; the next tick starts fresh
//!
//! If this test fails, host address rewriting is broken.

mod common;

use std::net::Ipv6Addr;
use std::sync::Arc;

use common::*;
use pve_ddns_core::{
    EngineSettings, IpPair, PrefixSyncOutcome, ReconcileEngine, TargetRegistry, TargetsSpec,
};

const HOST_V6: &str = "2001:db8:aaaa:bbbb:1:2:3:4";
const GUEST_V6: &str = "2001:db8:cccc:dddd:5:6:7:8";
const MOVED_V6: &str = "2001:db8:cccc:dddd:1:2:3:4";

fn v6(addr: &str) -> Ipv6Addr {
    addr.parse().unwrap()
}

fn sync_settings() -> EngineSettings {
    EngineSettings {
        update_interval_ms: 1_000,
        sync_host_static_v6_address: true,
        ..EngineSettings::default()
    }
}

/// Host + one guest, AAAA records pre-matching their current addresses, so
/// a tick performs no ordinary updates and the prefix machine is isolated
fn rig(host_v6: Ipv6Addr, guest_v6: Ipv6Addr) -> (Arc<MockDnsProvider>, Arc<MockPlatform>, ReconcileEngine) {
    let provider = Arc::new(
        MockDnsProvider::new()
            .with_aaaa("host.example.com", host_v6)
            .with_aaaa("vm100.example.com", guest_v6),
    );
    let platform = Arc::new(
        MockPlatform::new(IpPair { v4: None, v6: Some(host_v6) })
            .with_guest(100, IpPair { v4: None, v6: Some(guest_v6) }),
    );
    let containers = Arc::new(MockContainers::new());

    let registry = TargetRegistry::from_spec(&TargetsSpec {
        client: None,
        host: Some(host_spec(&[], &["host.example.com"])),
        guests: vec![guest_spec(100, &[], &["vm100.example.com"])],
    });
    let bindings = bind_all(&registry, &provider);
    let engine = ReconcileEngine::builder(sync_settings(), registry, bindings)
        .platform(platform.clone())
        .containers(containers)
        .build()
        .expect("engine construction succeeds");

    (provider, platform, engine)
}

#[tokio::test(start_paused = true)]
async fn moves_host_to_guest_prefix_end_to_end() {
    let (provider, platform, mut engine) = rig(v6(HOST_V6), v6(GUEST_V6));

    let report = engine.run_once().await;

    assert_eq!(
        report.prefix_sync,
        Some(PrefixSyncOutcome::Updated { address: v6(MOVED_V6), attempts: 1 })
    );
    assert_eq!(platform.staged_addresses(), vec![v6(MOVED_V6)]);
    assert_eq!(platform.apply_call_count(), 1);
    assert_eq!(platform.revert_call_count(), 0);
    assert_eq!(
        provider.aaaa_record("host.example.com"),
        Some(v6(MOVED_V6)),
        "AAAA must follow the applied address"
    );
    assert_eq!(platform.host_pair().v6, Some(v6(MOVED_V6)));

    // Next tick: the host now carries the guest prefix, nothing to do
    let report = engine.run_once().await;
    assert_eq!(report.prefix_sync, Some(PrefixSyncOutcome::InSync));
    assert_eq!(platform.stage_call_count(), 1, "no further staging once in sync");
    assert_eq!(provider.set_call_count(), 1, "one AAAA write in total");
}

#[tokio::test]
async fn matching_prefixes_are_a_noop() {
    // Same /64-style prefix, different interface suffixes
    let (provider, platform, mut engine) =
        rig(v6("2001:db8:aaaa:bbbb:1:2:3:4"), v6("2001:db8:aaaa:bbbb:5:6:7:8"));

    let report = engine.run_once().await;

    assert_eq!(report.prefix_sync, Some(PrefixSyncOutcome::InSync));
    assert_eq!(platform.stage_call_count(), 0);
    assert_eq!(platform.apply_call_count(), 0);
    assert_eq!(provider.set_call_count(), 0);
}

#[tokio::test]
async fn missing_guest_reference_is_a_noop() {
    let host_v6 = v6(HOST_V6);
    let provider = Arc::new(MockDnsProvider::new().with_aaaa("host.example.com", host_v6));
    let platform = Arc::new(MockPlatform::new(IpPair { v4: None, v6: Some(host_v6) }));

    // No guests at all: there is no reference prefix to follow
    let registry = TargetRegistry::from_spec(&TargetsSpec {
        client: None,
        host: Some(host_spec(&[], &["host.example.com"])),
        guests: vec![],
    });
    let bindings = bind_all(&registry, &provider);
    let mut engine = ReconcileEngine::builder(sync_settings(), registry, bindings)
        .platform(platform.clone())
        .build()
        .expect("engine construction succeeds");

    let report = engine.run_once().await;

    assert_eq!(report.guest_reference_v6, None);
    assert_eq!(report.prefix_sync, Some(PrefixSyncOutcome::InSync));
    assert_eq!(platform.stage_call_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn stage_failure_rolls_back_and_retries() {
    let (provider, platform, mut engine) = rig(v6(HOST_V6), v6(GUEST_V6));
    platform.fail_stages(1);

    let report = engine.run_once().await;

    assert_eq!(
        report.prefix_sync,
        Some(PrefixSyncOutcome::Updated { address: v6(MOVED_V6), attempts: 2 })
    );
    assert_eq!(platform.stage_call_count(), 2);
    assert_eq!(platform.revert_call_count(), 1, "failed attempt reverts its staged change");
    assert_eq!(platform.apply_call_count(), 1);
    assert_eq!(provider.aaaa_record("host.example.com"), Some(v6(MOVED_V6)));
}

#[tokio::test(start_paused = true)]
async fn gives_up_after_five_attempts_and_starts_fresh_next_tick() {
    let (provider, platform, mut engine) = rig(v6(HOST_V6), v6(GUEST_V6));
    platform.fail_applies(usize::MAX);

    let report = engine.run_once().await;

    assert_eq!(report.prefix_sync, Some(PrefixSyncOutcome::GaveUp { attempts: 5 }));
    assert!(report.soft_fatal.is_none(), "exhausted retries must not stop the loop");
    assert_eq!(platform.stage_call_count(), 5);
    assert_eq!(platform.apply_call_count(), 5);
    assert_eq!(platform.revert_call_count(), 5);
    assert_eq!(provider.set_call_count(), 0, "records untouched while the change never applied");

    // A new tick runs a fresh machine with its own attempt budget
    let report = engine.run_once().await;
    assert_eq!(report.prefix_sync, Some(PrefixSyncOutcome::GaveUp { attempts: 5 }));
    assert_eq!(platform.stage_call_count(), 10);
}

#[tokio::test(start_paused = true)]
async fn dns_failure_after_apply_does_not_roll_back() {
    let (provider, platform, mut engine) = rig(v6(HOST_V6), v6(GUEST_V6));
    provider.fail_sets(1);

    let report = engine.run_once().await;

    assert_eq!(
        report.prefix_sync,
        Some(PrefixSyncOutcome::Updated { address: v6(MOVED_V6), attempts: 2 })
    );
    assert_eq!(
        platform.revert_call_count(),
        0,
        "the network change is live; only DNS retries"
    );
    assert_eq!(provider.set_call_count(), 2, "one rejected write, one accepted");
    assert_eq!(provider.aaaa_record("host.example.com"), Some(v6(MOVED_V6)));
}

#[tokio::test]
async fn zero_run_inside_the_prefix_still_compares_equal() {
    // Both addresses render compressed ("2001::1:2:3:4"); equal prefixes
    // must be recognized no matter how the zero groups print
    let (provider, platform, mut engine) =
        rig(v6("2001:0:0:0:1:2:3:4"), v6("2001:0:0:0:5:6:7:8"));

    let report = engine.run_once().await;

    assert_eq!(report.prefix_sync, Some(PrefixSyncOutcome::InSync));
    assert_eq!(platform.stage_call_count(), 0);
    assert_eq!(platform.apply_call_count(), 0);
    assert_eq!(provider.set_call_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn compressed_host_address_keeps_its_own_suffix() {
    // The host's zero run sits inside the prefix; its suffix groups
    // 1:2:3:4 must survive the move intact
    let (_, platform, mut engine) = rig(v6("2001:db8:0:0:1:2:3:4"), v6(GUEST_V6));

    let report = engine.run_once().await;

    assert_eq!(
        report.prefix_sync,
        Some(PrefixSyncOutcome::Updated { address: v6(MOVED_V6), attempts: 1 })
    );
    assert_eq!(platform.staged_addresses(), vec![v6(MOVED_V6)]);
}

#[tokio::test]
async fn zero_prefix_address_is_rejected_without_platform_calls() {
    // "::1" carries an all-zeros routing prefix; nothing to synchronize
    let (_, platform, mut engine) = rig(v6("::1"), v6(GUEST_V6));

    let report = engine.run_once().await;

    assert!(matches!(
        report.prefix_sync,
        Some(PrefixSyncOutcome::Rejected { .. })
    ));
    assert_eq!(platform.stage_call_count(), 0);
    assert_eq!(platform.apply_call_count(), 0);
    assert_eq!(platform.revert_call_count(), 0);
    assert!(report.soft_fatal.is_none());
}

#[tokio::test]
async fn disabled_sync_never_runs_the_machine() {
    let host_v6 = v6(HOST_V6);
    let guest_v6 = v6(GUEST_V6);
    let provider = Arc::new(
        MockDnsProvider::new()
            .with_aaaa("host.example.com", host_v6)
            .with_aaaa("vm100.example.com", guest_v6),
    );
    let platform = Arc::new(
        MockPlatform::new(IpPair { v4: None, v6: Some(host_v6) })
            .with_guest(100, IpPair { v4: None, v6: Some(guest_v6) }),
    );
    let containers = Arc::new(MockContainers::new());

    let registry = TargetRegistry::from_spec(&TargetsSpec {
        client: None,
        host: Some(host_spec(&[], &["host.example.com"])),
        guests: vec![guest_spec(100, &[], &["vm100.example.com"])],
    });
    let bindings = bind_all(&registry, &provider);
    let mut engine = ReconcileEngine::builder(fast_settings(), registry, bindings)
        .platform(platform.clone())
        .containers(containers)
        .build()
        .expect("engine construction succeeds");

    let report = engine.run_once().await;

    assert_eq!(report.prefix_sync, None, "disabled feature leaves no outcome");
    assert_eq!(platform.stage_call_count(), 0);
}
