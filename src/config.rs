//! Crate configuration, loaded the way the teacher's runtime config loads:
//! explicit constructor defaults layered with `.env`/environment overrides.

use crate::hash::HashAlgorithm;

/// Top-level configuration for a `SyncEngine` instance.
#[derive(Clone, Debug)]
pub struct SyncCoreConfig {
    pub store: StoreConfig,
    pub executor: ExecutorConfig,
    pub rate_limit: RateLimitConfig,
    pub checkpoint: CheckpointConfig,
    pub hash_algorithm: HashAlgorithm,
}

impl Default for SyncCoreConfig {
    fn default() -> Self {
        Self {
            store: StoreConfig::default(),
            executor: ExecutorConfig::default(),
            rate_limit: RateLimitConfig::default(),
            checkpoint: CheckpointConfig::default(),
            hash_algorithm: HashAlgorithm::Sha256,
        }
    }
}

impl SyncCoreConfig {
    /// Build configuration from explicit defaults overlaid with environment
    /// variables, loading a `.env` file first if present.
    ///
    /// Recognized variables: `SYNCCORE_SQLITE_DB`, `SYNCCORE_CONCURRENCY`,
    /// `SYNCCORE_TOKENS_PER_INTERVAL`, `SYNCCORE_CHECKPOINT_INTERVAL`.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        let mut cfg = Self::default();
        if let Ok(path) = std::env::var("SYNCCORE_SQLITE_DB") {
            cfg.store = StoreConfig::Sqlite { path };
        }
        if let Ok(v) = std::env::var("SYNCCORE_CONCURRENCY") {
            if let Ok(n) = v.parse() {
                cfg.executor.concurrency = n;
            }
        }
        if let Ok(v) = std::env::var("SYNCCORE_TOKENS_PER_INTERVAL") {
            if let Ok(n) = v.parse() {
                cfg.rate_limit.tokens_per_interval = n;
            }
        }
        if let Ok(v) = std::env::var("SYNCCORE_CHECKPOINT_INTERVAL") {
            if let Ok(n) = v.parse() {
                cfg.checkpoint.checkpoint_interval = n;
            }
        }
        cfg
    }
}

/// Which store backend to use.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StoreConfig {
    InMemory,
    Sqlite { path: String },
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig::InMemory
    }
}

/// Parallel executor tuning.
#[derive(Clone, Debug)]
pub struct ExecutorConfig {
    pub concurrency: usize,
    pub task_timeout_ms: u64,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub backoff: f64,
    pub queue_high_water: usize,
    pub queue_low_water: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            concurrency: 8,
            task_timeout_ms: 30_000,
            max_retries: 3,
            retry_delay_ms: 500,
            backoff: 2.0,
            queue_high_water: 10_000,
            queue_low_water: 2_000,
        }
    }
}

/// Token-bucket rate limiter tuning.
#[derive(Clone, Debug)]
pub struct RateLimitConfig {
    pub tokens_per_interval: u32,
    pub interval_ms: u64,
    pub max_burst: u32,
    pub fair_queuing: bool,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            tokens_per_interval: 10,
            interval_ms: 1_000,
            max_burst: 20,
            fair_queuing: true,
        }
    }
}

/// Checkpoint cadence and retention.
#[derive(Clone, Debug)]
pub struct CheckpointConfig {
    pub checkpoint_interval: u32,
    pub max_age_secs: i64,
    pub max_checkpoints: usize,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            checkpoint_interval: 50,
            max_age_secs: 7 * 24 * 60 * 60,
            max_checkpoints: 10,
        }
    }
}
