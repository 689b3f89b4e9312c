//! ---
//! anvil_section: "01-core-functionality"
//! anvil_subsection: "module"
//! anvil_type: "source"
//! anvil_scope: "code"
//! anvil_description: "Shared primitives and utilities for the agent runtime."
//! anvil_version: "v0.1.0-alpha"
//! anvil_owner: "tbd"
//! ---
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationSeconds};
use tracing::debug;
use url::Url;

use crate::logging::LogFormat;

fn default_jitter_min() -> f64 {
    0.3
}

fn default_jitter_max() -> f64 {
    0.6
}

fn default_initial_error_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_error_delay() -> Duration {
    Duration::from_secs(300)
}

fn default_backoff_factor() -> f64 {
    2.7
}

fn default_advertise_port() -> u16 {
    9999
}

fn default_hardware_root() -> PathBuf {
    PathBuf::from("/")
}

fn default_image_cache_dir() -> PathBuf {
    std::env::temp_dir().join("anvil-images")
}

fn default_logging_directory() -> PathBuf {
    PathBuf::from("target/logs")
}

fn default_log_format() -> LogFormat {
    LogFormat::StructuredJson
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_metrics_listen() -> SocketAddr {
    "0.0.0.0:9898"
        .parse()
        .expect("valid default metrics address")
}

fn default_api_enabled() -> bool {
    true
}

fn default_api_listen() -> SocketAddr {
    "0.0.0.0:9999".parse().expect("valid default api address")
}

/// Primary configuration object for the Anvil agent.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    pub overlord: OverlordConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub advertise: AdvertiseConfig,
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,
    #[serde(default)]
    pub hardware: HardwareConfig,
    #[serde(default)]
    pub images: ImagesConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Metadata describing where an [`AppConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedAppConfig {
    pub config: AppConfig,
    pub source: PathBuf,
}

impl AppConfig {
    pub const ENV_CONFIG_PATH: &str = "ANVIL_CONFIG";

    /// Load configuration from disk, respecting the `ANVIL_CONFIG` override.
    pub fn load<P: AsRef<Path>>(candidates: &[P]) -> Result<Self> {
        Ok(Self::load_with_source(candidates)?.config)
    }

    /// Load configuration from disk together with the effective source path.
    pub fn load_with_source<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedAppConfig> {
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                let path = PathBuf::from(env_path);
                let config = Self::from_path(path.clone())?;
                return Ok(LoadedAppConfig {
                    config,
                    source: path,
                });
            }
        }

        for candidate in candidates {
            if candidate.as_ref().exists() {
                let path = candidate.as_ref().to_path_buf();
                let config = Self::from_path(path.clone())?;
                return Ok(LoadedAppConfig {
                    config,
                    source: path,
                });
            }
        }

        Err(anyhow!(
            "no configuration files found. inspected: {}",
            candidates
                .iter()
                .map(|p| p.as_ref().display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ))
    }

    fn from_path(path: PathBuf) -> Result<Self> {
        debug!(config_path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(&path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        let config = toml::from_str::<AppConfig>(&contents)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<()> {
        self.overlord.validate()?;
        self.heartbeat.validate()?;
        if self.api.enabled && self.metrics.enabled && self.api.listen == self.metrics.listen {
            return Err(anyhow!(
                "api and metrics listeners must not share address {}",
                self.api.listen
            ));
        }
        Ok(())
    }
}

impl std::str::FromStr for AppConfig {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let config: AppConfig =
            toml::from_str(content).with_context(|| "failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }
}

/// Location of the central provisioning API the agent reports to.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct OverlordConfig {
    /// Base URL, e.g. `http://overlord.deploy.local:8080`.
    pub api_url: String,
}

impl OverlordConfig {
    pub fn validate(&self) -> Result<()> {
        let url = Url::parse(&self.api_url)
            .with_context(|| format!("invalid overlord api_url '{}'", self.api_url))?;
        match url.scheme() {
            "http" | "https" => {}
            other => {
                return Err(anyhow!(
                    "overlord api_url scheme must be http or https, got '{}'",
                    other
                ))
            }
        }
        if url.host_str().is_none() {
            return Err(anyhow!("overlord api_url '{}' has no host", self.api_url));
        }
        Ok(())
    }

    /// Parsed form of the configured URL. Only valid after [`validate`](Self::validate).
    pub fn url(&self) -> Result<Url> {
        Url::parse(&self.api_url).with_context(|| format!("invalid overlord url {}", self.api_url))
    }
}

/// Local command API listener settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_api_enabled")]
    pub enabled: bool,
    #[serde(default = "default_api_listen")]
    pub listen: SocketAddr,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: default_api_enabled(),
            listen: default_api_listen(),
        }
    }
}

/// Address the agent advertises to the overlord for callbacks.
///
/// When `host` is unset the agent resolves its API-facing address by opening
/// a throwaway connection towards the overlord and reading the local socket
/// address.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdvertiseConfig {
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default = "default_advertise_port")]
    pub port: u16,
}

impl Default for AdvertiseConfig {
    fn default() -> Self {
        Self {
            host: None,
            port: default_advertise_port(),
        }
    }
}

/// Heartbeat pacing knobs.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    /// Lower jitter multiplier applied to the overlord-granted deadline.
    #[serde(default = "default_jitter_min")]
    pub jitter_min: f64,
    /// Upper jitter multiplier applied to the overlord-granted deadline.
    #[serde(default = "default_jitter_max")]
    pub jitter_max: f64,
    /// First retry delay after a failed heartbeat.
    #[serde(default = "default_initial_error_delay")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub initial_error_delay: Duration,
    /// Ceiling for the exponential retry delay.
    #[serde(default = "default_max_error_delay")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub max_error_delay: Duration,
    /// Growth factor between consecutive retry delays.
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
}

impl HeartbeatConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.jitter_min > 0.0 && self.jitter_min <= self.jitter_max && self.jitter_max <= 1.0)
        {
            return Err(anyhow!(
                "heartbeat jitter multipliers must satisfy 0 < min <= max <= 1, got {}..{}",
                self.jitter_min,
                self.jitter_max
            ));
        }
        if self.backoff_factor <= 1.0 {
            return Err(anyhow!(
                "heartbeat backoff_factor must be greater than 1, got {}",
                self.backoff_factor
            ));
        }
        if self.initial_error_delay > self.max_error_delay {
            return Err(anyhow!(
                "heartbeat initial_error_delay exceeds max_error_delay"
            ));
        }
        Ok(())
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            jitter_min: default_jitter_min(),
            jitter_max: default_jitter_max(),
            initial_error_delay: default_initial_error_delay(),
            max_error_delay: default_max_error_delay(),
            backoff_factor: default_backoff_factor(),
        }
    }
}

/// Hardware inventory settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HardwareConfig {
    /// Filesystem root containing `sys/` and `proc/`. Overridden in tests.
    #[serde(default = "default_hardware_root")]
    pub root: PathBuf,
    /// Interface name to prefer when picking the primary MAC address.
    #[serde(default)]
    pub preferred_interface: Option<String>,
}

impl Default for HardwareConfig {
    fn default() -> Self {
        Self {
            root: default_hardware_root(),
            preferred_interface: None,
        }
    }
}

/// Image staging settings for standby mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImagesConfig {
    /// Directory where fetched image metadata is staged.
    #[serde(default = "default_image_cache_dir")]
    pub cache_dir: PathBuf,
}

impl Default for ImagesConfig {
    fn default() -> Self {
        Self {
            cache_dir: default_image_cache_dir(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_directory")]
    pub directory: PathBuf,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    #[serde(default)]
    pub file_prefix: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_logging_directory(),
            format: default_log_format(),
            file_prefix: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,
    #[serde(default = "default_metrics_listen")]
    pub listen: SocketAddr,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
            listen: default_metrics_listen(),
        }
    }
}
