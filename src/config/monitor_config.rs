//! Monitor configuration loaded from TOML
//!
//! Values are plain numbers with defaults. Out-of-range values are clamped
//! with a warning; only a missing topology source (no deployments, no hosts,
//! no sentinel block) is rejected.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use tracing::warn;

use super::tls_config::TlsConfig;
use crate::client::ConnectionFactory;
use crate::utils::{MonitorError, Result};

/// Resolved server address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerAddress {
    pub host: String,
    pub port: u16,
}

impl ServerAddress {
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            host: host.to_string(),
            port,
        }
    }

    /// Parse "host:port"; IPv6 hosts may be bracketed
    pub fn parse(addr: &str) -> Option<Self> {
        let (host, port) = addr.trim().rsplit_once(':')?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() {
            return None;
        }
        let port: u16 = port.parse().ok()?;
        Some(Self::new(host, port))
    }
}

impl fmt::Display for ServerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// How a deployment is laid out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentMode {
    Standalone,
    MasterSlave,
    Sentinel,
    Cluster,
}

impl DeploymentMode {
    /// Tag value used in records and log lines
    pub fn as_tag(&self) -> &'static str {
        match self {
            DeploymentMode::Standalone => "standalone",
            DeploymentMode::MasterSlave => "master-slave",
            DeploymentMode::Sentinel => "sentinel",
            DeploymentMode::Cluster => "cluster",
        }
    }

    /// Modes whose topology can change under us
    pub fn needs_topology_refresh(&self) -> bool {
        matches!(self, DeploymentMode::Sentinel | DeploymentMode::Cluster)
    }
}

impl fmt::Display for DeploymentMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_tag())
    }
}

/// Which node of an instance the scanner reads from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetRole {
    #[default]
    Master,
    Replica,
}

impl TargetRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetRole::Master => "master",
            TargetRole::Replica => "replica",
        }
    }
}

/// Hot/big key scanner settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HotBigKeyConfig {
    pub enable: bool,
    pub top_n: i64,
    pub mem_usage_samples: i64,
    pub scan_batch_size: i64,
    pub bigkey_threshold_len: i64,
    pub bigkey_threshold_bytes: i64,
    pub big_key_interval_secs: i64,
    pub hot_key_interval_secs: i64,
    pub scan_sleep_ms: i64,
    pub target_role: TargetRole,
}

impl Default for HotBigKeyConfig {
    fn default() -> Self {
        Self {
            enable: false,
            top_n: 10,
            mem_usage_samples: 100,
            scan_batch_size: 100,
            bigkey_threshold_len: 5000,
            bigkey_threshold_bytes: 10 * (1 << 20),
            big_key_interval_secs: 3 * 3600,
            hot_key_interval_secs: 15 * 60,
            scan_sleep_ms: 200,
            target_role: TargetRole::Master,
        }
    }
}

impl HotBigKeyConfig {
    /// Clamp out-of-range values; interval correction is left to the scheduler
    pub fn normalize(&mut self) {
        let defaults = Self::default();
        clamp_min("top_n", &mut self.top_n, 1, defaults.top_n);
        clamp_min(
            "mem_usage_samples",
            &mut self.mem_usage_samples,
            1,
            defaults.mem_usage_samples,
        );
        clamp_min(
            "scan_batch_size",
            &mut self.scan_batch_size,
            1,
            defaults.scan_batch_size,
        );
        clamp_min("bigkey_threshold_len", &mut self.bigkey_threshold_len, 0, 0);
        clamp_min("bigkey_threshold_bytes", &mut self.bigkey_threshold_bytes, 0, 0);
        clamp_min("scan_sleep_ms", &mut self.scan_sleep_ms, 0, 0);
    }

    pub fn top_n(&self) -> usize {
        self.top_n.max(0) as usize
    }

    pub fn batch_size(&self) -> usize {
        self.scan_batch_size.max(1) as usize
    }

    pub fn scan_sleep(&self) -> Duration {
        Duration::from_millis(self.scan_sleep_ms.max(0) as u64)
    }
}

fn clamp_min(name: &str, value: &mut i64, min: i64, replacement: i64) {
    if *value < min {
        warn!("reset {} from {} to {}", name, value, replacement);
        *value = replacement;
    }
}

/// Sentinel endpoints for a sentinel-managed deployment
#[derive(Debug, Clone, Deserialize)]
pub struct SentinelConfig {
    pub hosts: Vec<String>,
    pub master_name: String,
    #[serde(default)]
    pub password: Option<String>,
}

fn default_dbs() -> Vec<i64> {
    vec![0]
}

fn default_refresh_secs() -> i64 {
    600
}

fn default_setup_retry_ms() -> u64 {
    5000
}

fn default_connect_timeout_ms() -> u64 {
    5000
}

fn default_io_timeout_ms() -> u64 {
    3000
}

const MIN_REFRESH_SECS: i64 = 10;

/// One monitored deployment
#[derive(Debug, Clone, Deserialize)]
pub struct DeploymentConfig {
    pub name: String,
    pub mode: DeploymentMode,
    #[serde(default)]
    pub hosts: Vec<String>,
    #[serde(default)]
    pub sentinel: Option<SentinelConfig>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_dbs")]
    pub dbs: Vec<i64>,
    #[serde(default = "default_refresh_secs")]
    pub topology_refresh_interval_secs: i64,
    /// Wait between setup attempts while the deployment is unreachable
    #[serde(default = "default_setup_retry_ms")]
    pub setup_retry_interval_ms: u64,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_io_timeout_ms")]
    pub read_timeout_ms: u64,
    #[serde(default = "default_io_timeout_ms")]
    pub write_timeout_ms: u64,
    #[serde(default)]
    pub tls: Option<TlsConfig>,
    #[serde(default)]
    pub hot_big_keys: HotBigKeyConfig,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

impl DeploymentConfig {
    fn validate(&mut self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(MonitorError::Config("deployment name must not be empty".to_string()));
        }

        match self.mode {
            DeploymentMode::Sentinel => {
                let sentinel = self.sentinel.as_ref().ok_or_else(|| {
                    MonitorError::Config(format!(
                        "deployment {:?}: sentinel mode requires a [deployment.sentinel] block",
                        self.name
                    ))
                })?;
                if sentinel.hosts.is_empty() {
                    return Err(MonitorError::Config(format!(
                        "deployment {:?}: no sentinel hosts configured",
                        self.name
                    )));
                }
            }
            _ => {
                if self.hosts.is_empty() {
                    return Err(MonitorError::Config(format!(
                        "deployment {:?}: no hosts configured",
                        self.name
                    )));
                }
            }
        }

        if let Some(tls) = &self.tls {
            tls.client_identity()
                .map_err(|e| MonitorError::Config(format!("deployment {:?}: {}", self.name, e)))?;
        }

        if self.mode == DeploymentMode::Standalone && self.hosts.len() > 1 {
            warn!(
                "deployment {:?}: standalone mode uses only the first of {} hosts",
                self.name,
                self.hosts.len()
            );
            self.hosts.truncate(1);
        }

        if self.dbs.is_empty() {
            warn!("deployment {:?}: no dbs selected, using db 0", self.name);
            self.dbs = default_dbs();
        }
        self.dbs.retain(|db| {
            if *db < 0 {
                warn!("ignoring negative db index {}", db);
            }
            *db >= 0
        });
        if self.dbs.is_empty() {
            self.dbs = default_dbs();
        }

        if self.topology_refresh_interval_secs < MIN_REFRESH_SECS {
            warn!(
                "deployment {:?}: reset topology_refresh_interval_secs from {} to {}",
                self.name, self.topology_refresh_interval_secs, MIN_REFRESH_SECS
            );
            self.topology_refresh_interval_secs = MIN_REFRESH_SECS;
        }

        self.hot_big_keys.normalize();
        Ok(())
    }

    pub fn setup_retry_interval(&self) -> Duration {
        Duration::from_millis(self.setup_retry_interval_ms.max(1))
    }

    pub fn topology_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.topology_refresh_interval_secs.max(MIN_REFRESH_SECS) as u64)
    }

    /// Factory for data-node connections
    pub fn connection_factory(&self) -> ConnectionFactory {
        ConnectionFactory {
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            read_timeout: Duration::from_millis(self.read_timeout_ms),
            write_timeout: Duration::from_millis(self.write_timeout_ms),
            tls_config: self.tls.clone(),
            auth_password: self.password.clone(),
            auth_username: self.username.clone(),
        }
    }

    /// Factory for sentinel connections (sentinels carry their own password)
    pub fn sentinel_factory(&self) -> ConnectionFactory {
        let mut factory = self.connection_factory();
        factory.auth_password = self.sentinel.as_ref().and_then(|s| s.password.clone());
        factory.auth_username = None;
        factory
    }
}

/// Settings shared by every deployment
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct GlobalConfig {
    /// Extra tags attached to every record
    pub tags: BTreeMap<String, String>,
}

/// Top-level configuration file
#[derive(Debug, Clone, Deserialize)]
pub struct MonitorConfig {
    #[serde(default)]
    pub global: GlobalConfig,
    #[serde(default, rename = "deployment")]
    pub deployments: Vec<DeploymentConfig>,
}

impl MonitorConfig {
    /// Load and validate a configuration file
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path).map_err(|e| {
            MonitorError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&raw)
    }

    /// Parse and validate configuration text
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let mut config: MonitorConfig =
            toml::from_str(raw).map_err(|e| MonitorError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&mut self) -> Result<()> {
        if self.deployments.is_empty() {
            return Err(MonitorError::Config("no [[deployment]] configured".to_string()));
        }

        let mut seen = HashSet::new();
        for deployment in &mut self.deployments {
            deployment.validate()?;
            if !seen.insert(deployment.name.clone()) {
                return Err(MonitorError::Config(format!(
                    "duplicate deployment name {:?}",
                    deployment.name
                )));
            }
        }
        Ok(())
    }

    /// Global tags merged under a deployment's own tags
    pub fn merged_tags(&self, deployment: &DeploymentConfig) -> BTreeMap<String, String> {
        let mut tags = self.global.tags.clone();
        tags.extend(deployment.tags.clone());
        tags
    }
}
