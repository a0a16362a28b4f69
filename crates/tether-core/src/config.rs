//! Sync engine configuration
//!
//! Configuration is loaded from:
//! 1. Default values
//! 2. Config file (~/.config/tether/config.toml)
//! 3. Environment variables (TETHER_* prefix)
//!
//! Environment variables take precedence over config file values.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

/// Environment variable prefix
const ENV_PREFIX: &str = "TETHER";

/// Minimum gap between the longest request timeout and the firing expiration
pub const FIRING_GRACE: Duration = Duration::from_secs(1);

/// Sync engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Directory for the durable queue database
    pub data_dir: PathBuf,

    /// Base URL that relative request URLs are resolved against
    pub base_url: Option<String>,

    /// Realtime (WebSocket) endpoint
    pub realtime_url: Option<String>,

    /// Retries allowed for transient failures before giving up
    pub max_retries: u32,

    /// Ceiling for the server-unavailable backoff, in seconds
    pub max_unavailable_retry_wait_secs: u64,

    /// Offline/online flaps at the head of the queue before a failure is
    /// reported as a suspected cross-origin error
    pub max_retries_before_cors_error: u32,

    /// RECEIPT events allowed in flight at once
    pub max_receipt_connections: usize,

    /// How long an event may stay in the firing state without a response
    ///
    /// Must exceed both request timeouts by at least [`FIRING_GRACE`].
    pub firing_expiration_ms: u64,

    /// How long a claim check may take before it counts as failed
    pub validation_expiration_ms: u64,

    /// Delay between reconnecting and resuming the queue
    pub reconnect_settle_ms: u64,

    /// Interval of the stale-state sweep
    pub sweep_interval_ms: u64,

    /// Default timeout for request/response calls
    pub http_timeout_ms: u64,

    /// Timeout for realtime requests awaiting a response
    pub realtime_request_timeout_ms: u64,

    /// Coalescing interval for cache eviction checks
    pub cache_purge_interval_ms: u64,

    /// Interval of the reachability probe
    pub probe_interval_secs: u64,

    /// Optional log file (CLI only)
    pub log_file: Option<PathBuf>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            base_url: None,
            realtime_url: None,
            max_retries: 20,
            max_unavailable_retry_wait_secs: 60,
            max_retries_before_cors_error: 3,
            max_receipt_connections: 4,
            firing_expiration_ms: 40_000,
            validation_expiration_ms: 2_000,
            reconnect_settle_ms: 100,
            sweep_interval_ms: 1_000,
            http_timeout_ms: 30_000,
            realtime_request_timeout_ms: 20_000,
            cache_purge_interval_ms: 10_000,
            probe_interval_secs: 30,
            log_file: None,
        }
    }
}

impl SyncConfig {
    /// Load configuration from default location and environment
    ///
    /// Order of precedence (highest to lowest):
    /// 1. Environment variables (TETHER_DATA_DIR, TETHER_BASE_URL, ...)
    /// 2. Config file (~/.config/tether/config.toml or TETHER_CONFIG)
    /// 3. Default values
    pub fn load() -> Result<Self> {
        Self::load_from_path(&Self::config_file_path())
    }

    /// Load configuration from an explicit path, or the default location
    pub fn load_with_cli_override(path: Option<&PathBuf>) -> Result<Self> {
        match path {
            Some(p) => Self::load_from_path(p),
            None => Self::load(),
        }
    }

    /// Load configuration from a specific path
    ///
    /// Environment variables are still applied as overrides.
    /// If the file doesn't exist, defaults are used.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {:?}", path))?;
            toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {:?}", path))?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML string (useful for testing)
    pub fn load_from_str(toml_content: &str) -> Result<Self> {
        let mut config: SyncConfig =
            toml::from_str(toml_content).context("Failed to parse config TOML")?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var(format!("{}_DATA_DIR", ENV_PREFIX)) {
            self.data_dir = PathBuf::from(val);
        }

        if let Ok(val) = std::env::var(format!("{}_BASE_URL", ENV_PREFIX)) {
            self.base_url = if val.is_empty() { None } else { Some(val) };
        }

        if let Ok(val) = std::env::var(format!("{}_REALTIME_URL", ENV_PREFIX)) {
            self.realtime_url = if val.is_empty() { None } else { Some(val) };
        }

        if let Ok(val) = std::env::var(format!("{}_MAX_RETRIES", ENV_PREFIX)) {
            if let Ok(n) = val.parse() {
                self.max_retries = n;
            }
        }
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.max_receipt_connections == 0 {
            bail!("max_receipt_connections must be at least 1");
        }
        let request_timeout = self.max_request_timeout();
        if self.firing_expiration() < request_timeout + FIRING_GRACE {
            bail!(
                "firing_expiration_ms ({}) must exceed http_timeout_ms and \
                 realtime_request_timeout_ms by at least {}ms",
                self.firing_expiration_ms,
                FIRING_GRACE.as_millis()
            );
        }
        if let Some(ref url) = self.base_url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                bail!("base_url must start with http:// or https://");
            }
        }
        if let Some(ref url) = self.realtime_url {
            if !url.starts_with("ws://") && !url.starts_with("wss://") {
                bail!("realtime_url must start with ws:// or wss://");
            }
        }
        Ok(())
    }

    /// Ensure data directory exists
    pub fn ensure_data_dir(&self) -> Result<()> {
        if !self.data_dir.exists() {
            std::fs::create_dir_all(&self.data_dir)
                .with_context(|| format!("Failed to create data directory: {:?}", self.data_dir))?;
        }
        Ok(())
    }

    /// Save configuration to the default file
    pub fn save(&self) -> Result<()> {
        self.save_to_path(&Self::config_file_path())
    }

    /// Save configuration to a specific file
    pub fn save_to_path(&self, config_path: &Path) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(config_path, content)
            .with_context(|| format!("Failed to write config file: {:?}", config_path))?;
        Ok(())
    }

    /// Get the config file path
    ///
    /// Can be overridden with TETHER_CONFIG environment variable
    pub fn config_file_path() -> PathBuf {
        if let Ok(path) = std::env::var(format!("{}_CONFIG", ENV_PREFIX)) {
            return PathBuf::from(path);
        }

        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("tether")
            .join("config.toml")
    }

    /// Get the path to the durable queue database
    pub fn queue_db_path(&self) -> PathBuf {
        self.data_dir.join("sync_queue.db")
    }

    pub fn firing_expiration(&self) -> Duration {
        Duration::from_millis(self.firing_expiration_ms)
    }

    pub fn validation_expiration(&self) -> Duration {
        Duration::from_millis(self.validation_expiration_ms)
    }

    pub fn reconnect_settle(&self) -> Duration {
        Duration::from_millis(self.reconnect_settle_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms.max(1))
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_millis(self.http_timeout_ms)
    }

    pub fn realtime_request_timeout(&self) -> Duration {
        Duration::from_millis(self.realtime_request_timeout_ms)
    }

    /// Longest a single transport call may wait for its answer
    ///
    /// Per-event timeouts are clamped to this, so a call always resolves
    /// before the sweep could release it.
    pub fn max_request_timeout(&self) -> Duration {
        self.http_timeout().max(self.realtime_request_timeout())
    }

    /// Age after which a durable claim may be taken over by another
    /// instance: the claim check plus a full firing window
    pub fn claim_expiration(&self) -> Duration {
        self.validation_expiration() + self.firing_expiration()
    }

    pub fn cache_purge_interval(&self) -> Duration {
        Duration::from_millis(self.cache_purge_interval_ms)
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe_interval_secs.max(1))
    }
}

/// Get the default data directory
fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tether")
}
