//! Configuration types for Warden

use crate::error::{Result, WardenError};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration for Warden
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct WardenConfig {
    /// Proposal validation and health policy
    pub governance: GovernanceConfig,

    /// Timeouts for calls into external tool servers
    pub adapter: AdapterConfig,

    /// Live registry and dispatch settings
    pub registry: RegistryConfig,

    /// Persisted store location
    pub store: StoreConfig,
}

/// Governance policy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GovernanceConfig {
    /// Minimum description length for a proposal
    pub min_description_len: usize,

    /// Minimum tool name length
    pub name_min_len: usize,

    /// Maximum tool name length
    pub name_max_len: usize,

    /// Consecutive failures after which a tool is marked `down`
    pub health_failure_threshold: u32,

    /// Audit entries returned when no limit is given
    pub default_audit_limit: usize,

    /// Upper bound on any audit query
    pub max_audit_limit: usize,
}

impl Default for GovernanceConfig {
    fn default() -> Self {
        Self {
            min_description_len: 10,
            name_min_len: 2,
            name_max_len: 128,
            health_failure_threshold: 3,
            default_audit_limit: 100,
            max_audit_limit: 1000,
        }
    }
}

/// External tool client timeouts
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdapterConfig {
    /// Deadline for establishing a session
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,

    /// Deadline for a single capability invocation
    #[serde(with = "humantime_serde")]
    pub invoke_timeout: Duration,

    /// Deadline for a full health check (connect + list)
    #[serde(with = "humantime_serde")]
    pub health_timeout: Duration,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            invoke_timeout: Duration::from_secs(30),
            health_timeout: Duration::from_secs(5),
        }
    }
}

/// Live registry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Key prefix for governance-backed entries
    pub external_prefix: String,

    /// Size of the worker pool for blocking tool handles
    pub blocking_workers: usize,

    /// Upper bound on a single dispatch
    #[serde(with = "humantime_serde")]
    pub dispatch_timeout: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            external_prefix: "mcp__".to_string(),
            blocking_workers: 8,
            dispatch_timeout: Duration::from_secs(60),
        }
    }
}

/// Persisted store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Directory holding `tools.json`
    pub data_dir: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .map(|dir| dir.join("warden"))
            .unwrap_or_else(|| PathBuf::from("./data/warden"));
        Self { data_dir }
    }
}

impl StoreConfig {
    /// Path of the tool snapshot file
    pub fn tools_path(&self) -> PathBuf {
        self.data_dir.join("tools.json")
    }
}

impl WardenConfig {
    /// Load configuration from files and environment variables.
    ///
    /// Loads in this order:
    /// 1. Default configuration
    /// 2. `warden.toml` and `warden.yaml` in the working directory
    /// 3. The file named by `WARDEN_CONFIG_PATH` (TOML)
    /// 4. `WARDEN_*` environment variables, nested keys split on `__`
    ///
    /// # Errors
    ///
    /// Returns an error if a configuration source is invalid or the merged
    /// configuration fails validation.
    pub fn load() -> Result<Self> {
        use figment::{
            Figment,
            providers::{Env, Format, Serialized, Toml, Yaml},
        };

        let mut figment = Figment::from(Serialized::defaults(WardenConfig::default()))
            .merge(Toml::file("warden.toml"))
            .merge(Yaml::file("warden.yaml"));

        if let Ok(path) = std::env::var("WARDEN_CONFIG_PATH") {
            figment = figment.merge(Toml::file(path));
        }

        let config: WardenConfig = figment
            .merge(Env::prefixed("WARDEN_").ignore(&["CONFIG_PATH"]).split("__"))
            .extract()
            .map_err(|e| {
                WardenError::Configuration(format!("Failed to load configuration: {}", e))
            })?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed, or validated.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        use figment::{
            Figment,
            providers::{Format, Serialized, Toml},
        };

        let config: WardenConfig = Figment::from(Serialized::defaults(WardenConfig::default()))
            .merge(Toml::file(path.as_ref()))
            .extract()
            .map_err(|e| {
                WardenError::Configuration(format!("Failed to load configuration file: {}", e))
            })?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`WardenError::Configuration`] describing the first violation.
    pub fn validate(&self) -> Result<()> {
        let g = &self.governance;
        if g.name_min_len == 0 || g.name_min_len > g.name_max_len {
            return Err(WardenError::Configuration(format!(
                "name length bounds are inconsistent: {}..={}",
                g.name_min_len, g.name_max_len
            )));
        }
        if g.health_failure_threshold == 0 {
            return Err(WardenError::Configuration(
                "health_failure_threshold must be at least 1".to_string(),
            ));
        }
        if g.max_audit_limit == 0 || g.default_audit_limit > g.max_audit_limit {
            return Err(WardenError::Configuration(format!(
                "default_audit_limit ({}) exceeds max_audit_limit ({})",
                g.default_audit_limit, g.max_audit_limit
            )));
        }
        if self.registry.blocking_workers == 0 {
            return Err(WardenError::Configuration(
                "blocking_workers must be at least 1".to_string(),
            ));
        }
        if self.registry.external_prefix.is_empty() {
            return Err(WardenError::Configuration(
                "external_prefix must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}
