//! Shared pool of proxy identities
//!
//! Passive (interval) and forced (block-triggered) rotation are the same
//! transition on one state machine: advance the cursor by one, modulo the
//! pool size. Writers take the state lock exclusively, readers share it.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, info};

use crate::models::{ProxyEndpoint, ProxyTier};

/// What caused a rotation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotationTrigger {
    /// The rotation interval elapsed
    Interval,
    /// A block was detected on the current identity
    Forced,
    /// Explicit call to [`ProxyPool::rotate`]
    Manual,
}

impl RotationTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Interval => "interval",
            Self::Forced => "forced",
            Self::Manual => "manual",
        }
    }
}

struct RotationState {
    index: usize,
    last_rotation: Instant,
    last_rotated_at: DateTime<Utc>,
}

/// Per-identity block counter
///
/// In-memory only; counts reset with the process.
#[derive(Debug, Default)]
pub struct BlockTracker {
    blocks: DashMap<String, u64>,
}

impl BlockTracker {
    pub fn new() -> Self {
        Self {
            blocks: DashMap::new(),
        }
    }

    pub fn record(&self, key: &str) {
        self.blocks
            .entry(key.to_string())
            .and_modify(|c| *c += 1)
            .or_insert(1);
    }

    pub fn get(&self, key: &str) -> u64 {
        self.blocks.get(key).map(|v| *v).unwrap_or(0)
    }

    pub fn snapshot(&self) -> BTreeMap<String, u64> {
        self.blocks
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect()
    }

    pub fn clear(&self) {
        self.blocks.clear();
    }
}

/// Read-only snapshot of pool state
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolStats {
    pub total: usize,
    pub premium_count: usize,
    pub free_count: usize,
    pub current_provider: Option<String>,
    pub current_index: usize,
    pub rotations: u64,
    pub last_rotation: DateTime<Utc>,
    pub blocks_by_provider: BTreeMap<String, u64>,
}

/// Ordered proxy identities with a rotating cursor
///
/// Premium endpoints come first, free ones last. The endpoint list never
/// changes after construction; only the cursor moves.
pub struct ProxyPool {
    endpoints: Vec<Arc<ProxyEndpoint>>,
    state: RwLock<RotationState>,
    /// `None` disables passive rotation
    rotation_interval: Option<Duration>,
    rotations: AtomicU64,
    blocks: BlockTracker,
}

impl ProxyPool {
    pub fn new(mut endpoints: Vec<ProxyEndpoint>, rotation_interval: Option<Duration>) -> Self {
        // Stable: keeps configuration order within a tier.
        endpoints.sort_by_key(|e| e.tier);

        Self {
            endpoints: endpoints.into_iter().map(Arc::new).collect(),
            state: RwLock::new(RotationState {
                index: 0,
                last_rotation: Instant::now(),
                last_rotated_at: Utc::now(),
            }),
            rotation_interval: rotation_interval.filter(|d| !d.is_zero()),
            rotations: AtomicU64::new(0),
            blocks: BlockTracker::new(),
        }
    }

    /// A pool with no identities; every call degrades to "no proxy"
    pub fn empty() -> Self {
        Self::new(Vec::new(), None)
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    pub fn endpoints(&self) -> &[Arc<ProxyEndpoint>] {
        &self.endpoints
    }

    pub fn rotation_interval(&self) -> Option<Duration> {
        self.rotation_interval
    }

    pub fn current_index(&self) -> usize {
        self.state.read().index
    }

    /// Total rotations since construction, any trigger
    pub fn rotation_count(&self) -> u64 {
        self.rotations.load(Ordering::Relaxed)
    }

    /// Current identity, rotating first if the interval has elapsed
    ///
    /// Returns `None` when the pool is empty.
    pub fn get_current(&self) -> Option<Arc<ProxyEndpoint>> {
        if self.endpoints.is_empty() {
            return None;
        }

        self.maybe_rotate();

        let index = self.state.read().index;
        self.endpoints.get(index).cloned()
    }

    /// Advance to the next identity. No-op on an empty pool.
    pub fn rotate(&self) {
        let mut state = self.state.write();
        self.advance(&mut state, RotationTrigger::Manual);
    }

    /// Advance immediately after a detected block, ignoring the interval
    pub fn force_rotation(&self) -> Option<Arc<ProxyEndpoint>> {
        let next = {
            let mut state = self.state.write();
            self.advance(&mut state, RotationTrigger::Forced)
        };

        match &next {
            Some(endpoint) => info!(
                provider = %endpoint.provider,
                host = %endpoint.host,
                port = endpoint.port,
                "Forced proxy rotation"
            ),
            None => debug!("Forced rotation requested on empty proxy pool"),
        }

        next
    }

    /// Proxy URI for an endpoint; pure
    pub fn build_connection_string(endpoint: &ProxyEndpoint) -> String {
        endpoint.connection_string()
    }

    /// Attribute a block to an identity
    pub fn record_block(&self, endpoint: &ProxyEndpoint) {
        self.blocks.record(&endpoint.label());
    }

    pub fn blocks_for(&self, endpoint: &ProxyEndpoint) -> u64 {
        self.blocks.get(&endpoint.label())
    }

    pub fn stats(&self) -> PoolStats {
        let (index, last_rotation) = {
            let state = self.state.read();
            (state.index, state.last_rotated_at)
        };
        let premium_count = self
            .endpoints
            .iter()
            .filter(|e| e.tier == ProxyTier::Premium)
            .count();

        PoolStats {
            total: self.endpoints.len(),
            premium_count,
            free_count: self.endpoints.len() - premium_count,
            current_provider: self.endpoints.get(index).map(|e| e.provider.clone()),
            current_index: index,
            rotations: self.rotation_count(),
            last_rotation,
            blocks_by_provider: self.blocks.snapshot(),
        }
    }

    fn maybe_rotate(&self) {
        let Some(interval) = self.rotation_interval else {
            return;
        };
        let now = Instant::now();

        let should_rotate = {
            let state = self.state.read();
            now.duration_since(state.last_rotation) >= interval
        };

        if should_rotate {
            let mut state = self.state.write();
            // Double-check after acquiring the write lock
            if now.duration_since(state.last_rotation) >= interval {
                self.advance(&mut state, RotationTrigger::Interval);
            }
        }
    }

    fn advance(
        &self,
        state: &mut RotationState,
        trigger: RotationTrigger,
    ) -> Option<Arc<ProxyEndpoint>> {
        if self.endpoints.is_empty() {
            return None;
        }

        state.index = (state.index + 1) % self.endpoints.len();
        state.last_rotation = Instant::now();
        state.last_rotated_at = Utc::now();
        self.rotations.fetch_add(1, Ordering::Relaxed);

        let endpoint = self.endpoints[state.index].clone();
        debug!(
            trigger = trigger.as_str(),
            index = state.index,
            provider = %endpoint.provider,
            "Rotated proxy"
        );
        Some(endpoint)
    }
}

impl Default for ProxyPool {
    fn default() -> Self {
        Self::empty()
    }
}

impl std::fmt::Debug for ProxyPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyPool")
            .field("endpoints", &self.endpoints.len())
            .field("current_index", &self.current_index())
            .field("rotation_interval", &self.rotation_interval)
            .finish()
    }
}
