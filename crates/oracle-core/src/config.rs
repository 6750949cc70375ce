//! Node configuration: a TOML file with `ORACLE_*` env overrides on top.
//!
//! Path and env lookups take an injectable source so tests never touch the
//! process environment.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::wire::{Capabilities, DEFAULT_VERSION};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OracleConfig {
    pub node: NodeConfig,
    pub capabilities: CapabilityConfig,
    pub workers: WorkerSettings,
    pub gossip: GossipSettings,
    pub devnet: DevnetSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Protocol version advertised in gossip and protocol names.
    pub version: String,
    /// Suffix for protocol and topic names. Empty = none.
    pub environment: String,
    /// Whether this node is staked. Verified outside the node.
    pub staked: bool,
    /// tracing filter used when RUST_LOG is unset.
    pub log_level: String,
}

/// Capability flags. Only enabled categories get handlers and are advertised.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CapabilityConfig {
    pub twitter: bool,
    pub web: bool,
    pub discord: bool,
    pub telegram: bool,
    pub llm: bool,
}

/// Ordering applied to remote candidates before dispatch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateOrder {
    /// Oldest `LastUpdatedAt` first, peer id as tie-break.
    #[default]
    LastUpdated,
    /// Best performance counters first.
    Reliability,
    /// Random order per dispatch.
    Shuffled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerSettings {
    /// Deadline for a local handler run.
    pub worker_timeout_ms: u64,
    /// Deadline for one remote attempt, stream open to response read.
    pub worker_response_timeout_ms: u64,
    /// Remote attempts per dispatch before local fallback.
    pub max_remote_workers: usize,
    pub candidate_order: CandidateOrder,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GossipSettings {
    /// Re-broadcast interval for the local node's own record.
    pub broadcast_interval_secs: u64,
    /// A reconnect buffered longer than this is promoted to a real rejoin.
    pub connect_buffer_window_secs: u64,
    /// Remote records not updated within this window are marked left. 0 = never.
    pub stale_after_secs: u64,
    /// How often buffer expiry and the stale sweep run.
    pub sweep_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DevnetSettings {
    /// Number of in-process nodes the daemon starts.
    pub nodes: usize,
    /// Interval between probe dispatches. 0 = no probes.
    pub probe_interval_secs: u64,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            version: DEFAULT_VERSION.to_string(),
            environment: String::new(),
            staked: false,
            log_level: "info".to_string(),
        }
    }
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            worker_timeout_ms: 45_000,
            worker_response_timeout_ms: 35_000,
            max_remote_workers: 25,
            candidate_order: CandidateOrder::LastUpdated,
        }
    }
}

impl Default for GossipSettings {
    fn default() -> Self {
        Self {
            broadcast_interval_secs: 60,
            connect_buffer_window_secs: 60,
            stale_after_secs: 120,
            sweep_interval_secs: 30,
        }
    }
}

impl Default for DevnetSettings {
    fn default() -> Self {
        Self {
            nodes: 3,
            probe_interval_secs: 10,
        }
    }
}

impl CapabilityConfig {
    pub fn to_capabilities(&self) -> Capabilities {
        Capabilities {
            twitter: self.twitter,
            web: self.web,
            discord: self.discord,
            telegram: self.telegram,
            llm: self.llm,
        }
    }
}

impl WorkerSettings {
    pub fn worker_timeout(&self) -> Duration {
        Duration::from_millis(self.worker_timeout_ms)
    }

    pub fn worker_response_timeout(&self) -> Duration {
        Duration::from_millis(self.worker_response_timeout_ms)
    }
}

impl GossipSettings {
    pub fn broadcast_interval(&self) -> Duration {
        Duration::from_secs(self.broadcast_interval_secs.max(1))
    }

    pub fn connect_buffer_window(&self) -> Duration {
        Duration::from_secs(self.connect_buffer_window_secs)
    }

    pub fn stale_after(&self) -> Option<Duration> {
        (self.stale_after_secs > 0).then(|| Duration::from_secs(self.stale_after_secs))
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    ReadFailed {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    ParseFailed {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("cannot write config {path}: {source}")]
    WriteFailed {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("cannot render default config: {0}")]
    SerializeFailed(#[from] toml::ser::Error),
}

// ── Loading ───────────────────────────────────────────────────────────────────

/// Where the config file lives, given an env source.
///
/// `$ORACLE_CONFIG` wins, then `$XDG_CONFIG_HOME/oracle/config.toml`, then
/// `$HOME/.config/oracle/config.toml`.
pub fn resolve_path(lookup: impl Fn(&str) -> Option<String>) -> PathBuf {
    if let Some(explicit) = lookup("ORACLE_CONFIG") {
        return PathBuf::from(explicit);
    }
    let base = lookup("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|| lookup("HOME").map(|home| PathBuf::from(home).join(".config")))
        .unwrap_or_else(std::env::temp_dir);
    base.join("oracle").join("config.toml")
}

fn process_env(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

impl OracleConfig {
    /// Load from the resolved path with process env overrides applied.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::file_path(), process_env)
    }

    /// Load `path` if present, else defaults, then apply overrides from
    /// `lookup`.
    pub fn load_from(
        path: &Path,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let mut config = match std::fs::read_to_string(path) {
            Ok(text) => toml::from_str(&text).map_err(|source| ConfigError::ParseFailed {
                path: path.to_path_buf(),
                source,
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => OracleConfig::default(),
            Err(source) => {
                return Err(ConfigError::ReadFailed {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        config.apply_env_overrides(lookup);
        Ok(config)
    }

    pub fn file_path() -> PathBuf {
        resolve_path(process_env)
    }

    /// Write defaults to the resolved path unless a file is already there.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        Self::write_default_to(&path)?;
        Ok(path)
    }

    /// Write defaults to `path` unless it exists. Returns whether it wrote.
    pub fn write_default_to(path: &Path) -> Result<bool, ConfigError> {
        if path.exists() {
            return Ok(false);
        }
        let write_failed = |source| ConfigError::WriteFailed {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(write_failed)?;
        }
        let text = toml::to_string_pretty(&OracleConfig::default())?;
        std::fs::write(path, text).map_err(write_failed)?;
        Ok(true)
    }

    /// Apply ORACLE_* overrides. `lookup` is the env source; tests pass a map.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let flag = |key: &str| lookup(key).map(|v| v == "true" || v == "1");

        if let Some(v) = flag("ORACLE_NODE__STAKED") {
            self.node.staked = v;
        }
        if let Some(v) = lookup("ORACLE_NODE__ENVIRONMENT") {
            self.node.environment = v;
        }
        if let Some(v) = flag("ORACLE_CAPABILITIES__TWITTER") {
            self.capabilities.twitter = v;
        }
        if let Some(v) = flag("ORACLE_CAPABILITIES__WEB") {
            self.capabilities.web = v;
        }
        if let Some(v) = flag("ORACLE_CAPABILITIES__DISCORD") {
            self.capabilities.discord = v;
        }
        if let Some(v) = flag("ORACLE_CAPABILITIES__TELEGRAM") {
            self.capabilities.telegram = v;
        }
        if let Some(v) = flag("ORACLE_CAPABILITIES__LLM") {
            self.capabilities.llm = v;
        }
        if let Some(Ok(n)) = lookup("ORACLE_WORKERS__MAX_REMOTE_WORKERS").map(|v| v.parse()) {
            self.workers.max_remote_workers = n;
        }
        if let Some(Ok(ms)) = lookup("ORACLE_WORKERS__WORKER_TIMEOUT_MS").map(|v| v.parse()) {
            self.workers.worker_timeout_ms = ms;
        }
        if let Some(Ok(ms)) =
            lookup("ORACLE_WORKERS__WORKER_RESPONSE_TIMEOUT_MS").map(|v| v.parse())
        {
            self.workers.worker_response_timeout_ms = ms;
        }
        if let Some(Ok(n)) = lookup("ORACLE_DEVNET__NODES").map(|v| v.parse()) {
            self.devnet.nodes = n;
        }
    }
}
