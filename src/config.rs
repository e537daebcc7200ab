//! Environment-driven configuration
//!
//! Credentials and tunables come from the environment (or a .env file).
//! Missing provider credentials are tolerated: the engine degrades to the
//! in-crate stub providers so the pipeline stays exercisable.

use std::env;
use std::time::Duration;

/// Settings for one engine instance
#[derive(Debug, Clone)]
pub struct Settings {
    pub port: u16,

    // Provider credentials / endpoints
    pub gemini_api_key: Option<String>,
    pub openai_api_key: Option<String>,
    pub market_data_base_url: Option<String>,
    pub market_data_api_key: Option<String>,
    pub filings_base_url: Option<String>,
    pub search_base_url: Option<String>,
    pub search_api_key: Option<String>,
    pub database_url: Option<String>,

    // Pipeline tunables
    pub llm_timeout: Duration,
    pub llm_fallback_timeout: Duration,
    pub llm_max_retries: u32,
    pub agent_soft_timeout: Duration,
    pub job_hard_timeout: Duration,
    pub coverage_floor: usize,

    // Financial analyst tunables
    pub rd_capitalization_rate: f64,
    pub monte_carlo_iterations: usize,
    pub monte_carlo_seed: u64,

    pub artifact_dir: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            port: 8080,
            gemini_api_key: None,
            openai_api_key: None,
            market_data_base_url: None,
            market_data_api_key: None,
            filings_base_url: None,
            search_base_url: None,
            search_api_key: None,
            database_url: None,
            llm_timeout: Duration::from_secs(90),
            llm_fallback_timeout: Duration::from_secs(120),
            llm_max_retries: 3,
            agent_soft_timeout: Duration::from_secs(300),
            job_hard_timeout: Duration::from_secs(30 * 60),
            coverage_floor: 10,
            rd_capitalization_rate: 0.6,
            monte_carlo_iterations: 500,
            monte_carlo_seed: 42,
            artifact_dir: "artifacts".to_string(),
        }
    }
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Settings {
    /// Load settings from the environment
    pub fn from_env() -> Self {
        let defaults = Settings::default();

        Self {
            port: env_parse("PORT", defaults.port),
            gemini_api_key: env_opt("GEMINI_API_KEY"),
            openai_api_key: env_opt("OPENAI_API_KEY"),
            market_data_base_url: env_opt("MARKET_DATA_BASE_URL"),
            market_data_api_key: env_opt("MARKET_DATA_API_KEY"),
            filings_base_url: env_opt("FILINGS_BASE_URL"),
            search_base_url: env_opt("SEARCH_BASE_URL"),
            search_api_key: env_opt("SEARCH_API_KEY"),
            database_url: env_opt("POSTGRES_URL").or_else(|| env_opt("DATABASE_URL")),
            llm_timeout: Duration::from_secs(env_parse("LLM_TIMEOUT_SECS", 90)),
            llm_fallback_timeout: Duration::from_secs(env_parse("LLM_FALLBACK_TIMEOUT_SECS", 120)),
            llm_max_retries: env_parse("LLM_MAX_RETRIES", defaults.llm_max_retries),
            agent_soft_timeout: Duration::from_secs(env_parse("AGENT_SOFT_TIMEOUT_SECS", 300)),
            job_hard_timeout: Duration::from_secs(env_parse("JOB_HARD_TIMEOUT_SECS", 30 * 60)),
            coverage_floor: env_parse("AGENT_COVERAGE_FLOOR", defaults.coverage_floor),
            rd_capitalization_rate: env_parse(
                "RD_CAPITALIZATION_RATE",
                defaults.rd_capitalization_rate,
            ),
            monte_carlo_iterations: env_parse(
                "MONTE_CARLO_ITERATIONS",
                defaults.monte_carlo_iterations,
            ),
            monte_carlo_seed: env_parse("MONTE_CARLO_SEED", defaults.monte_carlo_seed),
            artifact_dir: env_opt("ARTIFACT_DIR").unwrap_or(defaults.artifact_dir),
        }
    }
}
