//! Peer record: everything the network knows about one node.
//!
//! A `PeerRecord` is both the registry entry and the `NodeData` gossip
//! message. Lifecycle transitions take an explicit `now` (Unix seconds) so
//! the uptime arithmetic is deterministic under test.

use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use oracle_core::wire::{Capabilities, PeerId, WorkerCategory};

/// Current wall-clock time as Unix seconds.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

// ── Activity ──────────────────────────────────────────────────────────────────

/// Last lifecycle transition. Encoded as an integer on the wire (0 = joined).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum Activity {
    #[default]
    Joined,
    Left,
}

impl From<Activity> for u8 {
    fn from(a: Activity) -> u8 {
        match a {
            Activity::Joined => 0,
            Activity::Left => 1,
        }
    }
}

impl TryFrom<u8> for Activity {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Activity::Joined),
            1 => Ok(Activity::Left),
            other => Err(format!("unknown activity {other}")),
        }
    }
}

// ── Performance counters ──────────────────────────────────────────────────────

/// Per-category outcome counters, observed locally. Never gossiped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CategoryStats {
    pub returned_count: u64,
    pub last_returned_at: u64,
    pub timeout_count: u64,
    pub consecutive_timeouts: u64,
    pub last_timeout_at: u64,
    pub not_found_count: u64,
    pub last_not_found_at: u64,
}

/// Additive update to one category's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PerformanceDelta {
    pub category: WorkerCategory,
    pub returned: u64,
    pub timeouts: u64,
    pub not_found: u64,
    /// When the outcome was observed.
    pub at: u64,
}

impl PerformanceDelta {
    pub fn returned(category: WorkerCategory, at: u64) -> Self {
        Self { category, returned: 1, timeouts: 0, not_found: 0, at }
    }

    pub fn timed_out(category: WorkerCategory, at: u64) -> Self {
        Self { category, returned: 0, timeouts: 1, not_found: 0, at }
    }

    pub fn not_found(category: WorkerCategory, at: u64) -> Self {
        Self { category, returned: 0, timeouts: 0, not_found: 1, at }
    }
}

impl CategoryStats {
    pub fn apply(&mut self, delta: &PerformanceDelta) {
        if delta.returned > 0 {
            self.returned_count += delta.returned;
            self.last_returned_at = self.last_returned_at.max(delta.at);
            self.consecutive_timeouts = 0;
        }
        if delta.timeouts > 0 {
            self.timeout_count += delta.timeouts;
            self.consecutive_timeouts += delta.timeouts;
            self.last_timeout_at = self.last_timeout_at.max(delta.at);
        }
        if delta.not_found > 0 {
            self.not_found_count += delta.not_found;
            self.last_not_found_at = self.last_not_found_at.max(delta.at);
        }
    }
}

// ── Record ────────────────────────────────────────────────────────────────────

/// One known peer. Timestamps are Unix seconds, 0 = never.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerRecord {
    pub peer_id: PeerId,
    #[serde(default)]
    pub addresses: Vec<String>,
    #[serde(default)]
    pub is_staked: bool,
    #[serde(default)]
    pub version: String,
    /// Created by the peer itself rather than inferred from a connection.
    #[serde(skip)]
    pub self_identified: bool,
    #[serde(flatten)]
    pub capabilities: Capabilities,
    #[serde(default)]
    pub activity: Activity,
    #[serde(default)]
    pub is_active: bool,
    #[serde(default)]
    pub first_joined_at: u64,
    #[serde(default)]
    pub last_joined_at: u64,
    #[serde(default)]
    pub last_left_at: u64,
    #[serde(default)]
    pub last_updated_at: u64,
    /// Sum of completed active intervals, in seconds.
    #[serde(default)]
    pub accumulated_uptime: u64,
    #[serde(skip)]
    pub stats: BTreeMap<WorkerCategory, CategoryStats>,
}

impl PeerRecord {
    /// A never-joined record. Call [`PeerRecord::joined`] to activate it.
    pub fn new(peer_id: PeerId) -> Self {
        Self {
            peer_id,
            addresses: Vec::new(),
            is_staked: false,
            version: String::new(),
            self_identified: false,
            capabilities: Capabilities::default(),
            activity: Activity::Left,
            is_active: false,
            first_joined_at: 0,
            last_joined_at: 0,
            last_left_at: 0,
            last_updated_at: 0,
            accumulated_uptime: 0,
            stats: BTreeMap::new(),
        }
    }

    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn with_stake(mut self, staked: bool) -> Self {
        self.is_staked = staked;
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn with_address(mut self, addr: &str) -> Self {
        self.merge_address(addr);
        self
    }

    pub fn supports(&self, category: WorkerCategory) -> bool {
        self.capabilities.supports(category)
    }

    /// Seconds in the current active interval. 0 while left.
    pub fn current_uptime(&self, now: u64) -> u64 {
        match self.activity {
            Activity::Joined => now.saturating_sub(self.last_joined_at),
            Activity::Left => 0,
        }
    }

    /// Accumulated plus current uptime.
    pub fn total_uptime(&self, now: u64) -> u64 {
        self.accumulated_uptime + self.current_uptime(now)
    }

    /// Mark active as of `now`.
    pub fn joined(&mut self, now: u64) {
        if self.first_joined_at == 0 {
            self.first_joined_at = now;
        }
        self.last_joined_at = now;
        self.last_updated_at = now;
        self.activity = Activity::Joined;
        self.is_active = true;
    }

    /// Mark inactive as of `now`, folding the current interval into
    /// accumulated uptime. No-op if already left.
    pub fn left(&mut self, now: u64) {
        if self.activity == Activity::Left {
            return;
        }
        self.accumulated_uptime += self.current_uptime(now);
        self.last_left_at = now;
        self.last_updated_at = now;
        self.activity = Activity::Left;
        self.is_active = false;
    }

    /// Fold the current interval and start a new one at `now` without
    /// passing through `Left`.
    pub fn rejoined(&mut self, now: u64) {
        if self.activity == Activity::Joined {
            self.accumulated_uptime += self.current_uptime(now);
        }
        self.joined(now);
    }

    /// Add an address unless an equivalent one is already present.
    /// Returns whether the list changed.
    pub fn merge_address(&mut self, addr: &str) -> bool {
        let addr = addr.trim().trim_end_matches('/');
        if addr.is_empty() {
            return false;
        }
        let key = normalize_address(addr);
        if self.addresses.iter().any(|a| normalize_address(a) == key) {
            return false;
        }
        self.addresses.push(addr.to_string());
        true
    }

    pub fn merge_addresses<'a>(&mut self, addrs: impl IntoIterator<Item = &'a String>) -> bool {
        let mut changed = false;
        for addr in addrs {
            changed |= self.merge_address(addr);
        }
        changed
    }

    pub fn stats(&self, category: WorkerCategory) -> CategoryStats {
        self.stats.get(&category).copied().unwrap_or_default()
    }

    pub fn apply_delta(&mut self, delta: &PerformanceDelta) {
        self.stats.entry(delta.category).or_default().apply(delta);
    }

    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

/// Comparison key for address dedup.
fn normalize_address(addr: &str) -> String {
    addr.trim().trim_end_matches('/').to_ascii_lowercase()
}
