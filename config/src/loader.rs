use crate::error::{ConfigError, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use sessionwire_protocol::RetryPolicy;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable prefix (`SESSIONWIRE_REPLAY__ENABLED=true`).
pub const ENV_PREFIX: &str = "SESSIONWIRE";

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionwireConfig {
    /// Deployment environment name. `production` force-disables replay.
    #[serde(default = "default_deploy_env")]
    pub deploy_env: String,

    #[serde(default)]
    pub transport: TransportSettings,

    #[serde(default)]
    pub retry: RetrySettings,

    #[serde(default)]
    pub quota: QuotaSettings,

    #[serde(default)]
    pub replay: ReplaySettings,

    #[serde(default)]
    pub server: ServerSettings,
}

/// Transport client settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportSettings {
    /// Base URL of the live backend or replay endpoint.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Per-attempt request deadline.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Deadline for best-effort cancel calls.
    #[serde(default = "default_cancel_timeout_ms")]
    pub cancel_timeout_ms: u64,
}

/// Retry settings, converted into a [`RetryPolicy`] at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    #[serde(default = "default_jitter_factor")]
    pub jitter_factor: f64,
}

/// Admission control limits, per client origin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaSettings {
    #[serde(default = "default_requests_per_minute")]
    pub requests_per_minute: u32,

    #[serde(default = "default_daily_token_cap")]
    pub daily_token_cap: u64,
}

/// Replay engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplaySettings {
    /// Explicit opt-in. Ignored when `deploy_env` is production.
    #[serde(default)]
    pub enabled: bool,

    /// Directory holding `<runId>.events.ndjson` / `<runId>.report.json`.
    #[serde(default = "default_snapshot_dir")]
    pub snapshot_dir: PathBuf,

    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Pause after a non-empty batch.
    #[serde(default = "default_active_pause_ms")]
    pub active_pause_ms: u64,

    /// Pause after an empty batch.
    #[serde(default = "default_idle_pause_ms")]
    pub idle_pause_ms: u64,

    /// Hard cap on delivered events per session.
    #[serde(default = "default_max_events")]
    pub max_events: usize,

    /// Terminal sessions idle longer than this are evicted.
    #[serde(default = "default_idle_grace_secs")]
    pub idle_grace_secs: u64,

    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

/// HTTP listener settings for the replay server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_bind")]
    pub bind: String,

    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,

    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

fn default_deploy_env() -> String {
    "development".to_string()
}

fn default_base_url() -> String {
    "http://127.0.0.1:8787".to_string()
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

fn default_cancel_timeout_ms() -> u64 {
    5_000
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1_000
}

fn default_max_delay_ms() -> u64 {
    10_000
}

fn default_jitter_factor() -> f64 {
    0.2
}

fn default_requests_per_minute() -> u32 {
    60
}

fn default_daily_token_cap() -> u64 {
    1_000_000
}

fn default_snapshot_dir() -> PathBuf {
    PathBuf::from("snapshots")
}

fn default_batch_size() -> usize {
    25
}

fn default_active_pause_ms() -> u64 {
    100
}

fn default_idle_pause_ms() -> u64 {
    500
}

fn default_max_events() -> usize {
    10_000
}

fn default_idle_grace_secs() -> u64 {
    60
}

fn default_sweep_interval_secs() -> u64 {
    30
}

fn default_bind() -> String {
    "127.0.0.1:8787".to_string()
}

fn default_keep_alive_secs() -> u64 {
    15
}

fn default_max_body_bytes() -> usize {
    64 * 1024
}

impl Default for SessionwireConfig {
    fn default() -> Self {
        Self {
            deploy_env: default_deploy_env(),
            transport: TransportSettings::default(),
            retry: RetrySettings::default(),
            quota: QuotaSettings::default(),
            replay: ReplaySettings::default(),
            server: ServerSettings::default(),
        }
    }
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            request_timeout_ms: default_request_timeout_ms(),
            cancel_timeout_ms: default_cancel_timeout_ms(),
        }
    }
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter_factor: default_jitter_factor(),
        }
    }
}

impl Default for QuotaSettings {
    fn default() -> Self {
        Self {
            requests_per_minute: default_requests_per_minute(),
            daily_token_cap: default_daily_token_cap(),
        }
    }
}

impl Default for ReplaySettings {
    fn default() -> Self {
        Self {
            enabled: false,
            snapshot_dir: default_snapshot_dir(),
            batch_size: default_batch_size(),
            active_pause_ms: default_active_pause_ms(),
            idle_pause_ms: default_idle_pause_ms(),
            max_events: default_max_events(),
            idle_grace_secs: default_idle_grace_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            keep_alive_secs: default_keep_alive_secs(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

impl RetrySettings {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay_ms: self.base_delay_ms,
            max_delay_ms: self.max_delay_ms,
            jitter_factor: self.jitter_factor,
        }
    }
}

impl TransportSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn cancel_timeout(&self) -> Duration {
        Duration::from_millis(self.cancel_timeout_ms)
    }
}

impl SessionwireConfig {
    /// Rejects values the components cannot run with.
    pub fn validate(&self) -> Result<()> {
        let invalid = |field: &'static str, reason: String| -> Result<()> {
            Err(ConfigError::ValidationError { field, reason })
        };

        if self.retry.max_attempts == 0 {
            return invalid("retry.max_attempts", "must be at least 1".to_string());
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return invalid(
                "retry.base_delay_ms",
                format!(
                    "{} exceeds retry.max_delay_ms {}",
                    self.retry.base_delay_ms, self.retry.max_delay_ms
                ),
            );
        }
        if !(0.0..=1.0).contains(&self.retry.jitter_factor) {
            return invalid(
                "retry.jitter_factor",
                format!("{} is outside [0, 1]", self.retry.jitter_factor),
            );
        }
        if self.transport.request_timeout_ms == 0 {
            return invalid("transport.request_timeout_ms", "must be positive".to_string());
        }
        if self.quota.requests_per_minute == 0 {
            return invalid("quota.requests_per_minute", "must be positive".to_string());
        }
        if self.replay.batch_size == 0 {
            return invalid("replay.batch_size", "must be positive".to_string());
        }
        if self.replay.max_events == 0 {
            return invalid("replay.max_events", "must be positive".to_string());
        }
        Ok(())
    }
}

/// Configuration loader with layered merging support.
pub struct ConfigLoader {
    config_path: Option<PathBuf>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self { config_path: None }
    }

    pub fn with_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_path = Some(path.as_ref().to_path_buf());
        self
    }

    /// Load defaults, then the file (if any), then `SESSIONWIRE_*` variables,
    /// and validate the result.
    pub fn load(&self) -> Result<SessionwireConfig> {
        let mut builder = Config::builder();

        let defaults_json = serde_json::to_string(&SessionwireConfig::default())?;
        builder = builder.add_source(File::from_str(&defaults_json, config::FileFormat::Json));

        if let Some(ref path) = self.config_path {
            if !path.exists() {
                return Err(ConfigError::FileNotFound(path.clone()));
            }
            builder = builder.add_source(File::from(path.as_path()));
        }

        // SESSIONWIRE_QUOTA__REQUESTS_PER_MINUTE=120 -> quota.requests_per_minute
        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: SessionwireConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Locate the default config file:
    /// 1. `./sessionwire.toml`
    /// 2. `<config dir>/sessionwire/config.toml`
    pub fn find_config_file() -> Option<PathBuf> {
        let cwd_config = PathBuf::from("./sessionwire.toml");
        if cwd_config.exists() {
            return Some(cwd_config);
        }

        dirs::config_dir()
            .map(|dir| dir.join("sessionwire").join("config.toml"))
            .filter(|path| path.exists())
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}
