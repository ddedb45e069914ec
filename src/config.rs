//! Configuration management for the orchestrator service
//!
//! Loads configuration from TOML files with environment variable substitution.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub service: ServiceConfig,
    pub api: ApiConfig,
    pub metrics: MetricsConfig,
    pub builder: BuilderConfig,
    pub signer: SignerConfig,
    pub broadcast: BroadcastConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    pub pricing: PricingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    pub instance_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
    /// Origins allowed to call the price endpoint. Empty allows all.
    #[serde(default)]
    pub allowed_origins: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BuilderConfig {
    pub base_url: String,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_slippage_bps")]
    pub default_slippage_bps: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SignerConfig {
    pub url: String,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BroadcastConfig {
    pub url: String,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OrchestratorConfig {
    /// Trustline recoveries allowed per run
    #[serde(default = "default_max_recoveries")]
    pub max_precondition_recoveries: u32,
    /// Sessions at rest for longer than this are dropped
    #[serde(default = "default_session_idle_ttl_secs")]
    pub session_idle_ttl_secs: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_precondition_recoveries: default_max_recoveries(),
            session_idle_ttl_secs: default_session_idle_ttl_secs(),
        }
    }
}

impl OrchestratorConfig {
    pub fn session_idle_ttl(&self) -> Duration {
        Duration::from_secs(self.session_idle_ttl_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PricingConfig {
    pub upstream_url: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_price_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_batch_delay_ms")]
    pub batch_delay_ms: u64,
}

impl PricingConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn batch_delay(&self) -> Duration {
        Duration::from_millis(self.batch_delay_ms)
    }
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

fn default_slippage_bps() -> u32 {
    50
}

fn default_max_recoveries() -> u32 {
    1
}

fn default_session_idle_ttl_secs() -> u64 {
    300
}

fn default_batch_size() -> usize {
    2
}

fn default_price_timeout_ms() -> u64 {
    15_000
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    2_000
}

fn default_batch_delay_ms() -> u64 {
    1_000
}

impl Settings {
    /// Load settings from the configured file
    pub fn load() -> Result<Self> {
        let config_path = env::var("ORCHESTRATOR_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config/default.toml"));

        Self::load_from(&config_path)
    }

    /// Load settings from a specific file
    pub fn load_from(config_path: &Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {:?}", config_path))?;

        Self::parse(&config_str)
    }

    fn parse(raw: &str) -> Result<Self> {
        // Substitute environment variables
        let config_str = substitute_env_vars(raw);

        let settings: Settings =
            toml::from_str(&config_str).with_context(|| "Failed to parse configuration")?;

        settings.validate()?;

        Ok(settings)
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        let urls = [
            ("builder.base_url", &self.builder.base_url),
            ("signer.url", &self.signer.url),
            ("broadcast.url", &self.broadcast.url),
            ("pricing.upstream_url", &self.pricing.upstream_url),
        ];
        for (name, url) in urls {
            if url.trim().is_empty() {
                anyhow::bail!("{} must be set", name);
            }
        }

        if self.pricing.batch_size == 0 {
            anyhow::bail!("pricing.batch_size must be at least 1");
        }
        if self.pricing.max_attempts == 0 {
            anyhow::bail!("pricing.max_attempts must be at least 1");
        }
        if self.orchestrator.session_idle_ttl_secs == 0 {
            anyhow::bail!("orchestrator.session_idle_ttl_secs must be at least 1");
        }
        if self.orchestrator.max_precondition_recoveries > 3 {
            anyhow::bail!("orchestrator.max_precondition_recoveries must not exceed 3");
        }

        if self.api.allowed_origins.is_empty() {
            tracing::warn!("api.allowed_origins is empty - price endpoint accepts any origin");
        }

        Ok(())
    }
}

/// Substitute environment variables in the format ${VAR_NAME}
fn substitute_env_vars(input: &str) -> String {
    lazy_static::lazy_static! {
        static ref ENV_VAR: regex::Regex =
            regex::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").expect("valid env var pattern");
    }

    ENV_VAR
        .replace_all(input, |cap: &regex::Captures| {
            env::var(&cap[1]).unwrap_or_default()
        })
        .into_owned()
}
