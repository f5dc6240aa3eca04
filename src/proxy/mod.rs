//! Proxy identity management
//!
//! This module provides:
//! - The shared rotating pool of proxy identities
//! - The catalog of premium vendors and local free-tier endpoints
//! - A reachability probe for pooled identities

pub mod pool;
pub mod probe;
pub mod providers;

pub use pool::{BlockTracker, PoolStats, ProxyPool, RotationTrigger};
pub use probe::{ProbeConfig, ProbeReport, ProxyProbe};
pub use providers::{find_vendor, tor_endpoints, Vendor, PREMIUM_VENDORS};
