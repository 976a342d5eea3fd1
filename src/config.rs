//! Layered configuration, following the teacher's `RuntimeConfig` pattern:
//! a `serde`-deserializable struct with `#[serde(default)]`, merged from
//! built-in defaults, an optional TOML file, and environment variables.

use anyhow::Context;
use serde::Deserialize;
use std::time::Duration;

const DEFAULT_COMMIT_BATCH_SIZE: usize = 200;
const DEFAULT_THROTTLE_MILLIS: u64 = 10;
const DEFAULT_DEADLINE_SECONDS: u64 = 5;
const DEFAULT_MAX_TEXT_BYTES: usize = 1024 * 1024;

/// Policy inputs the Controller accepts (spec §4.6, §6).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IndexerConfig {
    /// Upper bound passed to text-heavy handlers for per-file content extraction.
    pub max_bytes: usize,
    /// When true, engage throttling between extractions.
    pub on_battery: bool,
    /// When true, pause the scheduler entirely.
    pub on_low_battery: bool,
    /// Ordered list of graph names to serve first.
    pub priority_graphs: Vec<String>,
    /// Number of results buffered before a commit is attempted.
    pub commit_batch_size: usize,
    /// Delay between extractions when throttled.
    pub throttle_interval: Duration,
    /// Per-handler deadline; overridable by `DEADLINE_SECONDS`.
    pub deadline: Duration,
    /// Disables the deadline entirely (spec §9 Open Question: whether a
    /// reimplementation keeps the memory-checking-harness escape hatch).
    /// Decided in DESIGN.md: yes, gated the same way, via an env var
    /// rather than a compile-time `cfg!`, since this is no longer C.
    pub deadline_disabled: bool,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            max_bytes: DEFAULT_MAX_TEXT_BYTES,
            on_battery: false,
            on_low_battery: false,
            priority_graphs: Vec::new(),
            commit_batch_size: DEFAULT_COMMIT_BATCH_SIZE,
            throttle_interval: Duration::from_millis(DEFAULT_THROTTLE_MILLIS),
            deadline: Duration::from_secs(DEFAULT_DEADLINE_SECONDS),
            deadline_disabled: false,
        }
    }
}

impl IndexerConfig {
    /// Merge in process environment variables, following spec §6's
    /// "recognized options" / `DEADLINE_SECONDS` table.
    pub fn apply_env(mut self) -> Self {
        if let Ok(v) = std::env::var("DEADLINE_SECONDS") {
            if let Ok(secs) = v.parse::<u64>() {
                self.deadline = Duration::from_secs(secs);
            } else {
                tracing::warn!(
                    target: "extract_core::config",
                    value = %v,
                    "DEADLINE_SECONDS is not a valid integer, ignoring"
                );
            }
        }
        if let Ok(v) = std::env::var("INDEXER_MAX_BYTES") {
            if let Ok(n) = v.parse::<usize>() {
                self.max_bytes = n;
            }
        }
        if let Ok(v) = std::env::var("INDEXER_ON_BATTERY") {
            self.on_battery = parse_bool(&v);
        }
        if let Ok(v) = std::env::var("INDEXER_ON_LOW_BATTERY") {
            self.on_low_battery = parse_bool(&v);
        }
        if let Ok(v) = std::env::var("INDEXER_PRIORITY_GRAPHS") {
            self.priority_graphs = v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Ok(v) = std::env::var("INDEXER_MEMCHECK") {
            // Mirrors the source's compile-time memory-checking-harness escape
            // hatch, but as a runtime flag rather than a `cfg!`.
            self.deadline_disabled = parse_bool(&v);
        }
        self
    }

    /// Load defaults, then an optional TOML file, then environment
    /// variables, in that precedence order (later wins).
    pub fn load(toml_path: Option<&std::path::Path>) -> anyhow::Result<Self> {
        let mut config = Self::default();
        if let Some(path) = toml_path {
            if path.exists() {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("reading config file {}", path.display()))?;
                let overrides: TomlOverrides = toml::from_str(&text)
                    .with_context(|| format!("parsing config file {}", path.display()))?;
                overrides.apply_to(&mut config);
            }
        }
        Ok(config.apply_env())
    }

    pub fn throttle_for(&self) -> Duration {
        if self.on_battery {
            self.throttle_interval
        } else {
            Duration::ZERO
        }
    }
}

fn parse_bool(v: &str) -> bool {
    matches!(v.trim(), "1" | "true" | "TRUE" | "True" | "yes")
}

/// The subset of [`IndexerConfig`] accepted from a TOML file, following the
/// teacher's pattern of a separate `#[serde(default)]` overlay struct so
/// every field is optional and only present keys override the built-in
/// defaults. `deadline`/`throttle_interval` are intentionally absent here:
/// TOML has no native duration type, and `DEADLINE_SECONDS` already covers
/// the one override operators actually need (spec §6).
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct TomlOverrides {
    max_bytes: Option<usize>,
    on_battery: Option<bool>,
    on_low_battery: Option<bool>,
    commit_batch_size: Option<usize>,
    priority_graphs: Option<Vec<String>>,
}

impl TomlOverrides {
    fn apply_to(self, config: &mut IndexerConfig) {
        if let Some(v) = self.max_bytes {
            config.max_bytes = v;
        }
        if let Some(v) = self.on_battery {
            config.on_battery = v;
        }
        if let Some(v) = self.on_low_battery {
            config.on_low_battery = v;
        }
        if let Some(v) = self.commit_batch_size {
            config.commit_batch_size = v;
        }
        if let Some(v) = self.priority_graphs {
            config.priority_graphs = v;
        }
    }
}
