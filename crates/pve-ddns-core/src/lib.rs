// # pve-ddns-core
//
// Core library for the poll-based dynamic DNS reconciliation daemon.
//
// ## Architecture Overview
//
// This library provides the machinery that keeps DNS records pointed at
// hypervisor machines:
// - **TargetRegistry**: The client/host/guest targets with their provider bindings
// - **DnsProvider**: Trait for reading and writing records via provider APIs
// - **PublicIpResolver / PlatformResolver / ContainerRuntime**: Traits for
//   resolving the current address of each target kind
// - **RecordCache**: Last written/resolved record per (domain, family)
// - **ReconcileEngine**: The periodic tick that diffs addresses against the
//   cache and pushes changes, including host IPv6 prefix sync
//
// ## Design Principles
//
// 1. **Poll, don't subscribe**: One tick resolves everything, diffs, writes
// 2. **Cache-gated writes**: A provider write happens only on an observed diff
// 3. **Owned state**: The engine owns cache and registry; no global config
// 4. **Bounded retries**: Prefix sync retries a fixed number of times, then
//    defers to the next tick
// 5. **Cooperative shutdown**: Every wait races the cancellation token

pub mod cache;
pub mod config;
pub mod domain;
pub mod engine;
pub mod error;
pub mod registry;
pub mod shutdown;
pub mod traits;

// Re-export core types for convenience
pub use cache::{RecordCache, RecordEntry, RecordFamily};
pub use config::{EngineSettings, GuestSpec, HostSpec, TargetSpec, TargetsSpec};
pub use engine::{EngineBuilder, PrefixSyncOutcome, ReconcileEngine, StopReason, TickReport};
pub use error::{Error, Result};
pub use registry::{BindingKey, Placement, ProviderBindings, Target, TargetId, TargetRegistry};
pub use shutdown::{ShutdownHandle, ShutdownToken};
pub use traits::{ContainerRuntime, DnsProvider, IpPair, PlatformResolver, PublicIpResolver};
