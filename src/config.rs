use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct MemoriaConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub embedding: EmbeddingConfig,
    pub oracle: OracleConfig,
    pub retrieval: RetrievalConfig,
    pub policy: DecayPolicy,
    pub policy_overrides: HashMap<String, DecayPolicy>,
    pub chain: ChainConfig,
    pub maintenance: MaintenanceConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub log_level: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    pub db_path: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// `hash` (offline, deterministic) or `http` (OpenAI-compatible endpoint).
    pub provider: String,
    pub endpoint: String,
    pub model: String,
    pub dimensions: usize,
    pub api_key_env: String,
    pub timeout_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct OracleConfig {
    /// `keyword` (offline heuristics) or `http` (OpenAI-compatible chat endpoint).
    pub provider: String,
    pub endpoint: String,
    pub model: String,
    pub api_key_env: String,
    pub timeout_ms: u64,
    pub max_concurrency: usize,
    /// Permits background work can never take.
    pub reserved_for_recall: usize,
    pub classify_emotion_fallback: bool,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RetrievalConfig {
    pub default_result_limit: usize,
    pub default_char_budget: usize,
    pub vector_k: usize,
    /// Cosine distance above which a vector hit is not a candidate.
    pub max_vector_distance: f32,
    pub tag_candidate_limit: usize,
    pub summary_chars: usize,
    pub cache_enabled: bool,
    pub cache_ttl_secs: u64,
    pub cache_capacity: usize,
}

/// Per-user retention policy consumed by the decay cycle.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct DecayPolicy {
    /// Reinforcement multiplier is `1 + strengthen_threshold`.
    pub strengthen_threshold: f64,
    pub forget_threshold_days: i64,
    pub importance_range: (f64, f64),
    pub forget_factor: f64,
    pub forget_max_resonance: f64,
    pub reinforce_window_days: i64,
    pub reinforce_min_resonance: f64,
    pub reinforce_min_uses: u32,
    /// Added to resonance on reinforcement, capped at 100.
    pub resonance_step: f64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ChainConfig {
    pub window_size: usize,
    pub max_connections: usize,
    pub min_link_resonance: f64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct MaintenanceConfig {
    pub enabled: bool,
    pub decay_interval_hours: u64,
    pub chain_interval_minutes: u64,
    pub index_rebuild_interval_minutes: u64,
}

impl Default for MemoriaConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            storage: StorageConfig::default(),
            embedding: EmbeddingConfig::default(),
            oracle: OracleConfig::default(),
            retrieval: RetrievalConfig::default(),
            policy: DecayPolicy::default(),
            policy_overrides: HashMap::new(),
            chain: ChainConfig::default(),
            maintenance: MaintenanceConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            log_level: "info".into(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        let db_path = default_memoria_dir()
            .join("memory.db")
            .to_string_lossy()
            .into_owned();
        Self { db_path }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "hash".into(),
            endpoint: "https://api.openai.com/v1/embeddings".into(),
            model: "text-embedding-3-small".into(),
            dimensions: 256,
            api_key_env: "OPENAI_API_KEY".into(),
            timeout_ms: 5000,
        }
    }
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            provider: "keyword".into(),
            endpoint: "https://api.openai.com/v1/chat/completions".into(),
            model: "gpt-4o".into(),
            api_key_env: "OPENAI_API_KEY".into(),
            timeout_ms: 5000,
            max_concurrency: 8,
            reserved_for_recall: 2,
            classify_emotion_fallback: false,
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            default_result_limit: 5,
            default_char_budget: 2000,
            vector_k: 20,
            max_vector_distance: 0.8,
            tag_candidate_limit: 50,
            summary_chars: 200,
            cache_enabled: true,
            cache_ttl_secs: 3600,
            cache_capacity: 1024,
        }
    }
}

impl Default for DecayPolicy {
    fn default() -> Self {
        Self {
            strengthen_threshold: 0.1,
            forget_threshold_days: 30,
            importance_range: (1000.0, 10000.0),
            forget_factor: 0.85,
            forget_max_resonance: 50.0,
            reinforce_window_days: 7,
            reinforce_min_resonance: 85.0,
            reinforce_min_uses: 3,
            resonance_step: 1.0,
        }
    }
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            window_size: 50,
            max_connections: 20,
            min_link_resonance: 30.0,
        }
    }
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            decay_interval_hours: 24,
            chain_interval_minutes: 60,
            index_rebuild_interval_minutes: 360,
        }
    }
}

impl DecayPolicy {
    pub fn min_importance(&self) -> f64 {
        self.importance_range.0.min(self.importance_range.1)
    }

    pub fn max_importance(&self) -> f64 {
        self.importance_range.0.max(self.importance_range.1)
    }

    pub fn clamp_importance(&self, value: f64) -> f64 {
        value.clamp(self.min_importance(), self.max_importance())
    }
}

/// Returns `~/.memoria/`
pub fn default_memoria_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(".memoria")
}

/// Returns the default config file path: `~/.memoria/config.toml`
pub fn default_config_path() -> PathBuf {
    default_memoria_dir().join("config.toml")
}

impl MemoriaConfig {
    /// Load config from TOML file (if it exists) then apply env var overrides.
    pub fn load() -> Result<Self> {
        Self::load_from(default_config_path())
    }

    /// Load from a specific path, then apply env var overrides.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let contents =
                std::fs::read_to_string(path).context("failed to read config file")?;
            toml::from_str(&contents).context("failed to parse config TOML")?
        } else {
            info!("no config file at {}, using defaults", path.display());
            MemoriaConfig::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides
    /// (MEMORIA_DB, MEMORIA_LOG_LEVEL, MEMORIA_ORACLE_ENDPOINT).
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("MEMORIA_DB") {
            self.storage.db_path = val;
        }
        if let Ok(val) = std::env::var("MEMORIA_LOG_LEVEL") {
            self.server.log_level = val;
        }
        if let Ok(val) = std::env::var("MEMORIA_ORACLE_ENDPOINT") {
            self.oracle.endpoint = val;
        }
    }

    /// Resolve the database path, expanding `~` if needed.
    pub fn resolved_db_path(&self) -> PathBuf {
        expand_tilde(&self.storage.db_path)
    }

    /// Policy for a user, falling back to the default policy.
    pub fn policy_for(&self, user_id: Option<&str>) -> DecayPolicy {
        user_id
            .and_then(|u| self.policy_overrides.get(u))
            .cloned()
            .unwrap_or_else(|| self.policy.clone())
    }
}

pub fn expand_tilde(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}
