use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::resilience::{BreakerSettings, RetryPolicy};

/// Retry policy parameters (optional section in config.toml).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total number of attempts per call (including the first).
    pub max_retries: u32,
    /// Base delay in seconds for exponential backoff (e.g. 0.5 = 500ms).
    pub base_delay_secs: f64,
    /// Backoff growth factor per attempt.
    pub multiplier: f64,
    /// Maximum pre-jitter backoff delay in seconds.
    pub max_delay_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay_secs: 0.5,
            multiplier: 2.0,
            max_delay_secs: 30,
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries.max(1),
            base_delay: Duration::from_secs_f64(self.base_delay_secs.max(0.0)),
            multiplier: self.multiplier.max(1.0),
            max_delay: Duration::from_secs(self.max_delay_secs),
        }
    }
}

/// Circuit breaker parameters (optional section in config.toml).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerConfig {
    /// Consecutive failures that trip an operation's circuit.
    pub threshold: u32,
    /// Seconds an open circuit rejects calls before allowing probes.
    pub cooldown_secs: u64,
    /// Consecutive probe successes that close the circuit again.
    pub half_open_success_threshold: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            threshold: 5,
            cooldown_secs: 30,
            half_open_success_threshold: 2,
        }
    }
}

impl BreakerConfig {
    pub fn settings(&self) -> BreakerSettings {
        BreakerSettings {
            threshold: self.threshold.max(1),
            cooldown: Duration::from_secs(self.cooldown_secs),
            half_open_success_threshold: self.half_open_success_threshold.max(1),
        }
    }
}

/// Strategy advisor tuning (optional section in config.toml).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanConfig {
    /// Below this per-task estimate (seconds), parallel overhead exceeds benefit.
    pub min_parallel_duration_secs: f64,
    /// Setup cost per isolated worker workspace, in seconds.
    pub isolation_setup_cost_secs: f64,
    /// Fallback per-task estimate when neither the task nor its category has one.
    pub default_duration_secs: f64,
    /// Per-category duration estimates, keyed by the task group.
    #[serde(default)]
    pub category_duration_secs: HashMap<String, f64>,
}

impl Default for PlanConfig {
    fn default() -> Self {
        Self {
            min_parallel_duration_secs: 30.0,
            isolation_setup_cost_secs: 1.5,
            default_duration_secs: 60.0,
            category_duration_secs: HashMap::new(),
        }
    }
}

/// Global configuration loaded from `~/.config/bulkfetch/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkfetchConfig {
    /// Default maximum fetch workers; the advisor may choose fewer.
    pub max_workers: usize,
    /// Maximum task ids per locator-resolution call.
    pub batch_size: usize,
    /// Quality/scale parameter forwarded to locator resolution.
    pub scale: f64,
    /// Timeout for locator-resolution (metadata) calls, seconds.
    pub metadata_timeout_secs: u64,
    /// Timeout for payload downloads, seconds. Independent of the metadata
    /// budget: payload transfers are larger and slower.
    pub download_timeout_secs: u64,
    /// Pool-wide cooldown when the service rate-limits without a hint, seconds.
    pub rate_limit_cooldown_secs: u64,
    /// Optional retry policy; built-in defaults when missing.
    #[serde(default)]
    pub retry: Option<RetryConfig>,
    /// Optional circuit breaker tuning; built-in defaults when missing.
    #[serde(default)]
    pub breaker: Option<BreakerConfig>,
    /// Optional strategy advisor tuning; built-in defaults when missing.
    #[serde(default)]
    pub plan: Option<PlanConfig>,
}

impl Default for BulkfetchConfig {
    fn default() -> Self {
        Self {
            max_workers: 8,
            batch_size: 15,
            scale: 1.0,
            metadata_timeout_secs: 15,
            download_timeout_secs: 120,
            rate_limit_cooldown_secs: 30,
            retry: None,
            breaker: None,
            plan: None,
        }
    }
}

impl BulkfetchConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry.clone().unwrap_or_default().policy()
    }

    pub fn breaker_settings(&self) -> BreakerSettings {
        self.breaker.clone().unwrap_or_default().settings()
    }

    pub fn plan_config(&self) -> PlanConfig {
        self.plan.clone().unwrap_or_default()
    }

    pub fn metadata_timeout(&self) -> Duration {
        Duration::from_secs(self.metadata_timeout_secs)
    }

    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }

    pub fn rate_limit_cooldown(&self) -> Duration {
        Duration::from_secs(self.rate_limit_cooldown_secs)
    }
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("bulkfetch")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Load configuration from disk, creating a default file if none exists.
pub fn load_or_init() -> Result<BulkfetchConfig> {
    let path = config_path()?;
    if !path.exists() {
        let default_cfg = BulkfetchConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, toml)?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }

    let data = fs::read_to_string(&path)?;
    let cfg: BulkfetchConfig = toml::from_str(&data)?;
    Ok(cfg)
}
