use crate::tftp::{options, EngineConfig};
use anyhow::{bail, Context, Result};
use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const ENV_PREFIX: &str = "TFTP_GATEWAY_";
pub const CONFIG_FILE: &str = "gateway.toml";

/// Gateway configuration. Immutable once the gateway is built.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Base URL every object path is appended to
    pub base_url: String,
    /// UDP address the TFTP listener binds
    pub listen: String,
    pub backend: BackendConfig,
    pub transfer: TransferConfig,
}

/// HTTP client settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub timeout_ms: u64,
    pub connect_timeout_ms: u64,
    /// Extra attempts after a connect/timeout failure
    pub retry_attempts: u32,
    pub retry_backoff_ms: u64,
    /// Honour HTTP(S)_PROXY from the environment
    pub system_proxy: bool,
}

/// TFTP session settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    pub timeout_ms: u64,
    pub retries: u32,
    pub max_block_size: u16,
    pub max_transfer_size: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            listen: "0.0.0.0:69".to_string(),
            backend: BackendConfig::default(),
            transfer: TransferConfig::default(),
        }
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            connect_timeout_ms: 5_000,
            retry_attempts: 2,
            retry_backoff_ms: 200,
            system_proxy: true,
        }
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 2_000,
            retries: 5,
            max_block_size: options::MAX_BLOCK_SIZE,
            max_transfer_size: 64 * 1024 * 1024, // 64 MB
        }
    }
}

impl BackendConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

impl TransferConfig {
    pub fn engine(&self) -> EngineConfig {
        EngineConfig {
            timeout: Duration::from_millis(self.timeout_ms),
            retries: self.retries,
            max_block_size: self.max_block_size,
            max_transfer_size: self.max_transfer_size,
        }
    }
}

impl GatewayConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    /// Layered sources: defaults, TOML file, then `TFTP_GATEWAY_*` variables
    /// (nested keys separated by `__`).
    pub fn figment(path: Option<&Path>) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(GatewayConfig::default()));
        if let Some(path) = path {
            figment = figment.merge(Toml::file(path));
        }
        figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Load from `path`, or from the per-user config file when none is given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => {
                if !path.exists() {
                    bail!("config file not found: {}", path.display());
                }
                Some(path.to_path_buf())
            }
            None => default_config_path().filter(|p| p.exists()),
        };

        if let Some(path) = &path {
            tracing::debug!(path = %path.display(), "loading config file");
        }
        Self::figment(path.as_deref())
            .extract()
            .context("invalid configuration")
    }

    pub fn base_url(&self) -> Result<Url> {
        let url = Url::parse(&self.base_url)
            .with_context(|| format!("base_url {:?} is not a valid URL", self.base_url))?;
        if !matches!(url.scheme(), "http" | "https") {
            bail!("base_url must use http or https, got {}", url.scheme());
        }
        if url.cannot_be_a_base() {
            bail!("base_url {:?} cannot carry a path", self.base_url);
        }
        Ok(url)
    }

    pub fn validate(&self) -> Result<()> {
        if self.base_url.is_empty() {
            bail!("base_url must be set");
        }
        self.base_url()?;
        if self.listen.is_empty() {
            bail!("listen address must be set");
        }
        if self.backend.timeout_ms == 0 || self.transfer.timeout_ms == 0 {
            bail!("timeouts must be greater than zero");
        }
        if !(options::MIN_BLOCK_SIZE..=options::MAX_BLOCK_SIZE).contains(&self.transfer.max_block_size) {
            bail!(
                "transfer.max_block_size must be between {} and {}",
                options::MIN_BLOCK_SIZE,
                options::MAX_BLOCK_SIZE
            );
        }
        Ok(())
    }
}

pub fn default_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "tftp-gateway")
        .map(|dirs| dirs.config_dir().join(CONFIG_FILE))
}
