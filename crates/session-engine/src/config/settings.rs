use anyhow::Result;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Settings {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub llm: LlmConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub persistence: PersistenceConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub scenarios: ScenariosConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub pool_max_size: u32,
    pub pool_timeout_seconds: u64,
    /// Upper bound for a single remote store round trip
    #[serde(default = "default_statement_timeout_ms")]
    pub statement_timeout_ms: u64,
}

fn default_statement_timeout_ms() -> u64 {
    3_000
}

impl DatabaseConfig {
    pub fn statement_timeout(&self) -> Duration {
        Duration::from_millis(self.statement_timeout_ms.max(1))
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LlmConfig {
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    pub timeout_seconds: u64,
    pub max_tokens: usize,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

fn default_model() -> String {
    "default".to_string()
}

fn default_temperature() -> f32 {
    0.7
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CacheConfig {
    /// Maximum messages kept per session (oldest dropped first)
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
    /// Messages rendered into the generation context
    #[serde(default = "default_context_window")]
    pub context_window: usize,
    #[serde(default = "default_ttl_seconds")]
    pub ttl_seconds: u64,
    #[serde(default = "default_sweep_interval_seconds")]
    pub sweep_interval_seconds: u64,
}

fn default_history_limit() -> usize {
    20
}

fn default_context_window() -> usize {
    10
}

fn default_ttl_seconds() -> u64 {
    30 * 60
}

fn default_sweep_interval_seconds() -> u64 {
    5 * 60
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            history_limit: default_history_limit(),
            context_window: default_context_window(),
            ttl_seconds: default_ttl_seconds(),
            sweep_interval_seconds: default_sweep_interval_seconds(),
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_seconds.max(1))
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct PersistenceConfig {
    /// How often fallback-only records are replayed into the remote store
    #[serde(default = "default_reconcile_interval_seconds")]
    pub reconcile_interval_seconds: u64,
}

fn default_reconcile_interval_seconds() -> u64 {
    60
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            reconcile_interval_seconds: default_reconcile_interval_seconds(),
        }
    }
}

impl PersistenceConfig {
    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile_interval_seconds.max(1))
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SessionConfig {
    #[serde(default = "default_max_input_chars")]
    pub max_input_chars: usize,
    #[serde(default = "default_fallback_utterance")]
    pub fallback_utterance: String,
}

fn default_max_input_chars() -> usize {
    2_000
}

fn default_fallback_utterance() -> String {
    "Excusez-moi... je suis un peu perdu, vous pouvez répéter ?".to_string()
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_input_chars: default_max_input_chars(),
            fallback_utterance: default_fallback_utterance(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ScenariosConfig {
    #[serde(default = "default_scenarios_path")]
    pub path: PathBuf,
}

fn default_scenarios_path() -> PathBuf {
    PathBuf::from("config/scenarios.toml")
}

impl Default for ScenariosConfig {
    fn default() -> Self {
        Self {
            path: default_scenarios_path(),
        }
    }
}

impl Settings {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Config::builder()
            .add_source(File::with_name("config/settings").required(true))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let settings: Settings = config.try_deserialize()?;
        Ok(settings)
    }
}
