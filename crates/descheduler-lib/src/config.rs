//! Descheduler configuration
//!
//! Loads the YAML configuration file, fills defaults for absent keys and
//! validates the result before the controller starts.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Locations probed, in order, when no config path is given on the CLI.
const DEFAULT_CONFIG_PATHS: &[&str] = &[
    "./config.yaml",
    "/etc/descheduler/config.yaml",
    "./configs/config.yaml",
];

/// Top-level descheduler configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeschedulerConfig {
    /// Seconds between descheduling cycles. 0 runs a single cycle and exits.
    #[serde(default = "default_interval")]
    pub interval: u64,

    /// Log eviction decisions without touching the cluster
    #[serde(default)]
    pub dry_run: bool,

    /// Log verbosity used when no CLI override is given
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Only nodes carrying every label in this map are considered.
    /// Empty matches all nodes.
    #[serde(default)]
    pub node_selector: BTreeMap<String, String>,

    /// Per-cycle eviction budgets
    #[serde(default)]
    pub limits: EvictionLimits,

    /// Strategy configuration; absent strategies stay disabled
    #[serde(default)]
    pub strategies: StrategiesConfig,

    /// Port for the health and metrics endpoint
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
}

/// Per-cycle eviction budgets. A value of 0 disables that limit.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvictionLimits {
    #[serde(default = "default_max_per_node")]
    pub max_per_node: usize,

    #[serde(default = "default_max_per_namespace")]
    pub max_per_namespace: usize,

    #[serde(default = "default_max_total")]
    pub max_total: usize,
}

impl Default for EvictionLimits {
    fn default() -> Self {
        Self {
            max_per_node: default_max_per_node(),
            max_per_namespace: default_max_per_namespace(),
            max_total: default_max_total(),
        }
    }
}

/// Strategy sections; each is optional and disabled unless present
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StrategiesConfig {
    pub remove_failed_pods: Option<RemoveFailedPodsConfig>,
    pub low_node_utilization: Option<LowNodeUtilizationConfig>,
    pub remove_duplicates: Option<RemoveDuplicatesConfig>,
}

/// Failed-pod cleanup strategy configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoveFailedPodsConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Pods younger than this many seconds are left alone. <= 0 disables
    /// the age check.
    #[serde(default)]
    pub min_lifetime_seconds: i64,

    /// Owner kinds whose pods are never cleaned up (e.g. Job, CronJob)
    #[serde(default)]
    pub exclude_owner_kinds: Vec<String>,

    /// When non-empty, only these namespaces are processed
    #[serde(default)]
    pub included_namespaces: Vec<String>,

    /// When non-empty (and includedNamespaces is empty), these namespaces
    /// are skipped
    #[serde(default)]
    pub excluded_namespaces: Vec<String>,
}

/// Node utilization balancing strategy configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LowNodeUtilizationConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Nodes below all of these percentages are under-utilized
    #[serde(default)]
    pub thresholds: ResourceThresholds,

    /// Nodes above any of these percentages are over-utilized
    #[serde(default)]
    pub target_thresholds: ResourceThresholds,

    /// Minimum number of under-utilized nodes required to act
    #[serde(default)]
    pub number_of_nodes: usize,
}

/// Duplicate-pod spreading strategy configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoveDuplicatesConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub exclude_owner_kinds: Vec<String>,

    #[serde(default)]
    pub included_namespaces: Vec<String>,

    #[serde(default)]
    pub excluded_namespaces: Vec<String>,
}

/// Utilization thresholds as integer percentages in [0, 100]
#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceThresholds {
    #[serde(default)]
    pub cpu: i64,

    #[serde(default)]
    pub memory: i64,

    #[serde(default)]
    pub pods: i64,
}

fn default_interval() -> u64 {
    300
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_metrics_port() -> u16 {
    8080
}

fn default_max_per_node() -> usize {
    10
}

fn default_max_per_namespace() -> usize {
    5
}

fn default_max_total() -> usize {
    50
}

impl DeschedulerConfig {
    /// Load and validate configuration from a YAML file
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;

        Self::from_yaml(&data)
            .with_context(|| format!("invalid config file {}", path.display()))
    }

    /// Parse and validate configuration from a YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let parsed: DeschedulerConfig =
            serde_yaml::from_str(yaml).context("failed to parse config")?;

        parsed.validate()?;
        Ok(parsed)
    }

    /// Cycle interval as a duration. Zero means single-shot.
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval)
    }

    fn validate(&self) -> Result<()> {
        if self.interval != 0 && self.interval < 60 {
            bail!("interval must be at least 1 minute (or exactly 0 for a single run)");
        }

        if let Some(lnu) = &self.strategies.low_node_utilization {
            if lnu.enabled {
                validate_thresholds("thresholds", &lnu.thresholds)?;
                validate_thresholds("targetThresholds", &lnu.target_thresholds)?;
            }
        }

        Ok(())
    }
}

fn validate_thresholds(field: &str, thresholds: &ResourceThresholds) -> Result<()> {
    for (name, value) in [
        ("cpu", thresholds.cpu),
        ("memory", thresholds.memory),
        ("pods", thresholds.pods),
    ] {
        if !(0..=100).contains(&value) {
            bail!("{field}.{name} must be between 0 and 100, got {value}");
        }
    }
    Ok(())
}

/// Resolve the configuration file path: an explicit path wins, otherwise the
/// first existing default location is used.
pub fn find_config_file(explicit: Option<&str>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(PathBuf::from(path));
    }

    for candidate in DEFAULT_CONFIG_PATHS {
        let path = Path::new(candidate);
        if path.exists() {
            return Ok(path.to_path_buf());
        }
    }

    bail!(
        "no configuration file found; pass -config or place config.yaml in one of: {}",
        DEFAULT_CONFIG_PATHS.join(", ")
    )
}
