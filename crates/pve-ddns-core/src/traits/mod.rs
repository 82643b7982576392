//! Capability traits for the pve-ddns system
//!
//! These are the seams between the reconciliation engine and the outside
//! world. Every external collaborator is reached through exactly one of
//! them:
//!
//! - [`DnsProvider`]: read and write DNS records via a provider API
//! - [`PublicIpResolver`]: discover the client machine's public addresses
//! - [`PlatformResolver`]: read host/guest addresses and stage, apply or
//!   revert host network changes via the virtualization platform API
//! - [`ContainerRuntime`]: enumerate containers and read their addresses
//!   via the container runtime CLI
//!
//! All of them report failure as [`Error`](crate::Error) values; none may
//! panic across the boundary. The engine decides what a failure means.

pub mod container;
pub mod dns_provider;
pub mod platform;
pub mod public_ip;

pub use container::ContainerRuntime;
pub use dns_provider::DnsProvider;
pub use platform::{IpPair, PlatformResolver};
pub use public_ip::PublicIpResolver;
