//! Process configuration, loaded once from environment variables.
//!
//! Follows the teacher's `RateLimitConfig::from_env()` shape: defaults for
//! everything, except the handful of keys spec.md §6.4 calls "required",
//! which fail fast at startup naming the missing variable.

use crate::error::EngineError;
use std::env;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct RateLimitSettings {
    pub per_user_minute: u32,
    pub per_user_hour: u32,
    pub per_user_day: u32,
    pub per_user_burst_capacity: u32,
    pub per_user_burst_refill_per_minute: u32,
    pub global_per_minute: u32,
    pub per_ip_per_minute: u32,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            per_user_minute: 10,
            per_user_hour: 100,
            per_user_day: 1000,
            per_user_burst_capacity: 20,
            per_user_burst_refill_per_minute: 10,
            global_per_minute: 1000,
            per_ip_per_minute: 20,
        }
    }
}

impl RateLimitSettings {
    fn from_env() -> Self {
        let mut s = Self::default();
        if let Some(v) = env_u32("RATE_LIMIT_USER_MINUTE") {
            s.per_user_minute = v;
        }
        if let Some(v) = env_u32("RATE_LIMIT_USER_HOUR") {
            s.per_user_hour = v;
        }
        if let Some(v) = env_u32("RATE_LIMIT_USER_DAY") {
            s.per_user_day = v;
        }
        if let Some(v) = env_u32("RATE_LIMIT_BURST_CAPACITY") {
            s.per_user_burst_capacity = v;
        }
        if let Some(v) = env_u32("RATE_LIMIT_BURST_REFILL_PER_MINUTE") {
            s.per_user_burst_refill_per_minute = v;
        }
        if let Some(v) = env_u32("RATE_LIMIT_GLOBAL_MINUTE") {
            s.global_per_minute = v;
        }
        if let Some(v) = env_u32("RATE_LIMIT_IP_MINUTE") {
            s.per_ip_per_minute = v;
        }
        s
    }
}

#[derive(Debug, Clone)]
pub struct CacheTtlSettings {
    pub l1: Duration,
    pub l2: Duration,
    pub l3: Duration,
    pub l4: Duration,
    pub l1_l3_l4_fallback_max_entries: usize,
}

impl Default for CacheTtlSettings {
    fn default() -> Self {
        Self {
            l1: Duration::from_secs(30 * 60),
            l2: Duration::from_secs(60 * 60),
            l3: Duration::from_secs(60 * 60),
            l4: Duration::from_secs(24 * 60 * 60),
            l1_l3_l4_fallback_max_entries: 10_000,
        }
    }
}

impl CacheTtlSettings {
    fn from_env() -> Self {
        let mut s = Self::default();
        if let Some(v) = env_secs("CACHE_TTL_L1_SECS") {
            s.l1 = v;
        }
        if let Some(v) = env_secs("CACHE_TTL_L2_SECS") {
            s.l2 = v;
        }
        if let Some(v) = env_secs("CACHE_TTL_L3_SECS") {
            s.l3 = v;
        }
        if let Some(v) = env_secs("CACHE_TTL_L4_SECS") {
            s.l4 = v;
        }
        if let Some(v) = env_usize("CACHE_L1_MAX_ENTRIES_FALLBACK") {
            s.l1_l3_l4_fallback_max_entries = v;
        }
        s
    }
}

#[derive(Debug, Clone)]
pub struct DeadlineSettings {
    pub intent_classification: Duration,
    pub response_generation: Duration,
    pub knowledge_retrieval: Duration,
    pub overall_request: Duration,
}

impl Default for DeadlineSettings {
    fn default() -> Self {
        Self {
            intent_classification: Duration::from_secs(30),
            response_generation: Duration::from_secs(60),
            knowledge_retrieval: Duration::from_secs(10),
            overall_request: Duration::from_secs(90),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub llm_api_key: String,
    pub llm_model_intent: String,
    pub llm_model_generation: String,
    pub llm_base_url: String,
    pub embedding_base_url: String,
    pub cache_url: Option<String>,
    pub cache_password: Option<String>,
    pub vector_store_path: String,
    pub database_url: String,
    pub rate_limits: RateLimitSettings,
    pub cache_ttls: CacheTtlSettings,
    pub deadlines: DeadlineSettings,
    pub session_inactivity_minutes: i64,
    pub retention_days: i64,
    pub retention_sweep_interval_secs: u64,
    pub server_port: u16,
}

impl AppConfig {
    /// Load configuration from the environment. Fails fast, naming the
    /// missing variable, if a required key is absent (spec.md §6.4).
    pub fn from_env() -> Result<Self, EngineError> {
        let llm_api_key = required("LLM_API_KEY")?;
        let database_url =
            env::var("DATABASE_URL").unwrap_or_else(|_| "data/orderdesk.db".to_string());
        let vector_store_path =
            env::var("VECTOR_STORE_PATH").unwrap_or_else(|_| "data/vector_store".to_string());

        Ok(Self {
            llm_api_key,
            llm_model_intent: env::var("LLM_MODEL_INTENT")
                .unwrap_or_else(|_| "fast-classifier-v1".to_string()),
            llm_model_generation: env::var("LLM_MODEL_GENERATION")
                .unwrap_or_else(|_| "grounded-responder-v1".to_string()),
            llm_base_url: env::var("LLM_BASE_URL")
                .unwrap_or_else(|_| "https://api.llm-provider.invalid/v1".to_string()),
            embedding_base_url: env::var("EMBEDDING_BASE_URL")
                .unwrap_or_else(|_| "https://api.llm-provider.invalid/v1/embeddings".to_string()),
            cache_url: env::var("CACHE_URL").ok(),
            cache_password: env::var("CACHE_PASSWORD").ok(),
            vector_store_path,
            database_url,
            rate_limits: RateLimitSettings::from_env(),
            cache_ttls: CacheTtlSettings::from_env(),
            deadlines: DeadlineSettings::default(),
            session_inactivity_minutes: env_i64("SESSION_INACTIVITY_MINUTES").unwrap_or(30),
            retention_days: env_i64("RETENTION_DAYS").unwrap_or(90),
            retention_sweep_interval_secs: env_secs("RETENTION_SWEEP_INTERVAL_SECS")
                .map(|d| d.as_secs())
                .unwrap_or(3600),
            server_port: env_u32("SERVER_PORT").map(|v| v as u16).unwrap_or(8080),
        })
    }
}

fn required(key: &str) -> Result<String, EngineError> {
    env::var(key).map_err(|_| EngineError::Fatal {
        reason: format!("missing required environment variable: {key}"),
    })
}

fn env_u32(key: &str) -> Option<u32> {
    env::var(key).ok().and_then(|v| v.parse().ok())
}

fn env_i64(key: &str) -> Option<i64> {
    env::var(key).ok().and_then(|v| v.parse().ok())
}

fn env_usize(key: &str) -> Option<usize> {
    env::var(key).ok().and_then(|v| v.parse().ok())
}

fn env_secs(key: &str) -> Option<Duration> {
    env_u32(key).map(|v| Duration::from_secs(v as u64))
}
