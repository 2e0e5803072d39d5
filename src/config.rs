//! Environment-based configuration.
//!
//! All knobs come from the environment (a `.env` file is honored in dev).
//! There is no dynamic reconfiguration; restart to apply changes.

use std::env;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: String,
    pub port: u16,
    /// Admin endpoints are disabled when unset.
    pub admin_api_key: Option<String>,
    pub cors_origins: Vec<String>,
    pub rate_limit_requests: u32,
    pub rate_limit_window_secs: u64,
    pub rate_limit_burst: u32,
    pub default_page_size: usize,
    pub model_storage_path: PathBuf,
    /// Cap on candidate destinations per (player, as_of, horizon).
    pub max_candidates: usize,
    pub min_training_samples: usize,
    pub test_split: f64,
    pub random_seed: u64,
    pub attention_window_hours: i64,
    pub cooccurrence_window_hours: i64,
    pub derived_signal_confidence: f64,
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv::dotenv().ok();

        let database_path =
            env::var("DATABASE_PATH").unwrap_or_else(|_| "./transferscope.db".to_string());

        let cors_origins = env::var("CORS_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:3000".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let model_storage_path = PathBuf::from(
            env::var("MODEL_STORAGE_PATH").unwrap_or_else(|_| "./models".to_string()),
        );

        Ok(Self {
            database_path,
            port: env_parse("PORT", 8080),
            admin_api_key: env::var("ADMIN_API_KEY").ok().filter(|k| !k.is_empty()),
            cors_origins,
            rate_limit_requests: env_parse("RATE_LIMIT_REQUESTS", 60),
            rate_limit_window_secs: env_parse("RATE_LIMIT_WINDOW_SECS", 60),
            rate_limit_burst: env_parse("RATE_LIMIT_BURST", 40),
            default_page_size: env_parse("DEFAULT_PAGE_SIZE", 50),
            model_storage_path,
            max_candidates: env_parse("MAX_CANDIDATES", 20),
            min_training_samples: env_parse("MIN_TRAINING_SAMPLES", 50),
            test_split: env_parse("TEST_SPLIT_FRACTION", 0.2),
            random_seed: env_parse("RANDOM_SEED", 42),
            attention_window_hours: env_parse("ATTENTION_WINDOW_HOURS", 24),
            cooccurrence_window_hours: env_parse("COOCCURRENCE_WINDOW_HOURS", 168),
            derived_signal_confidence: env_parse("DERIVED_SIGNAL_CONFIDENCE", 0.6),
        })
    }
}

impl Default for Config {
    /// Defaults without touching the environment. Used by tests and by jobs
    /// that only need the derivation/training knobs.
    fn default() -> Self {
        Self {
            database_path: "./transferscope.db".to_string(),
            port: 8080,
            admin_api_key: None,
            cors_origins: vec!["http://localhost:3000".to_string()],
            rate_limit_requests: 60,
            rate_limit_window_secs: 60,
            rate_limit_burst: 40,
            default_page_size: 50,
            model_storage_path: PathBuf::from("./models"),
            max_candidates: 20,
            min_training_samples: 50,
            test_split: 0.2,
            random_seed: 42,
            attention_window_hours: 24,
            cooccurrence_window_hours: 168,
            derived_signal_confidence: 0.6,
        }
    }
}
