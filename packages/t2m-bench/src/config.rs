//! `BenchConfig`: every `TEXT2MEM_*` / provider env var spec.md §6 enumerates,
//! resolved once at construction (grounded on `codegraph-ir`'s
//! `StageConfig::default()` env-overridable-defaults pattern). Nothing
//! downstream of this module calls `std::env::var` directly, which is what
//! keeps the pipeline/provider layers unit-testable without process-global
//! state (spec.md §9 Design Note "Global singletons -> injected
//! dependencies").

use std::collections::HashMap;
use std::time::Duration;

/// Generation tuning, concurrency, and retrieval defaults read from the
/// environment. Constructed once per run and passed down by value/reference;
/// no component re-reads the environment after this.
#[derive(Debug, Clone)]
pub struct BenchConfig {
    pub embedding_provider: Option<String>,
    pub generation_provider: Option<String>,
    pub embedding_model: Option<String>,
    pub generation_model: Option<String>,

    pub temperature: f32,
    pub max_tokens: u32,
    pub top_p: f32,
    pub request_timeout: Duration,
    pub max_retries: u32,
    pub batch_size: usize,

    pub search_alpha: f64,
    pub search_beta: f64,
    pub search_phrase_bonus: f64,
    pub search_default_limit: usize,
    pub search_max_limit: usize,
    pub search_default_k: usize,

    pub max_concurrent: usize,
    pub checkpoint_batch_size: usize,
    pub use_async: bool,
    pub retry_max: u32,
    pub retry_delay: Duration,

    pub eval_timeout: Duration,
    pub eval_split: Option<String>,
    pub eval_mode: Option<String>,
    pub eval_verbose: bool,
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            embedding_provider: None,
            generation_provider: None,
            embedding_model: None,
            generation_model: None,
            temperature: 0.7,
            max_tokens: 1024,
            top_p: 1.0,
            request_timeout: Duration::from_secs(120),
            max_retries: 3,
            batch_size: 10,
            search_alpha: 0.7,
            search_beta: 0.3,
            search_phrase_bonus: 0.2,
            search_default_limit: 10,
            search_max_limit: 100,
            search_default_k: 10,
            max_concurrent: 5,
            checkpoint_batch_size: 10,
            use_async: false,
            retry_max: 3,
            retry_delay: Duration::from_secs(2),
            eval_timeout: Duration::from_secs(30),
            eval_split: None,
            eval_mode: None,
            eval_verbose: false,
        }
    }
}

impl BenchConfig {
    /// Reads the actual process environment (the one place this crate
    /// touches `std::env`).
    pub fn from_env() -> Self {
        let map: HashMap<String, String> = std::env::vars().collect();
        Self::from_map(&map)
    }

    /// Builds a config from a plain map, so tests stay hermetic instead of
    /// mutating process env.
    pub fn from_map(env: &HashMap<String, String>) -> Self {
        let base = Self::default();
        let get = |key: &str| env.get(key).cloned();
        let parse_or = |key: &str, fallback: f64| get(key).and_then(|v| v.parse().ok()).unwrap_or(fallback);
        let parse_usize_or = |key: &str, fallback: usize| get(key).and_then(|v| v.parse().ok()).unwrap_or(fallback);
        let parse_u32_or = |key: &str, fallback: u32| get(key).and_then(|v| v.parse().ok()).unwrap_or(fallback);
        let parse_bool_or = |key: &str, fallback: bool| {
            get(key)
                .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
                .unwrap_or(fallback)
        };

        Self {
            embedding_provider: get("TEXT2MEM_EMBEDDING_PROVIDER").or_else(|| get("TEXT2MEM_PROVIDER")),
            generation_provider: get("TEXT2MEM_GENERATION_PROVIDER").or_else(|| get("TEXT2MEM_PROVIDER")),
            embedding_model: get("TEXT2MEM_EMBEDDING_MODEL"),
            generation_model: get("TEXT2MEM_GENERATION_MODEL"),

            temperature: parse_or("TEXT2MEM_TEMPERATURE", base.temperature as f64) as f32,
            max_tokens: parse_u32_or("TEXT2MEM_MAX_TOKENS", base.max_tokens),
            top_p: parse_or("TEXT2MEM_TOP_P", base.top_p as f64) as f32,
            request_timeout: Duration::from_secs(parse_u32_or(
                "TEXT2MEM_REQUEST_TIMEOUT",
                base.request_timeout.as_secs() as u32,
            ) as u64),
            max_retries: parse_u32_or("TEXT2MEM_MAX_RETRIES", base.max_retries),
            batch_size: parse_usize_or("TEXT2MEM_BATCH_SIZE", base.batch_size),

            search_alpha: parse_or("TEXT2MEM_SEARCH_ALPHA", base.search_alpha),
            search_beta: parse_or("TEXT2MEM_SEARCH_BETA", base.search_beta),
            search_phrase_bonus: parse_or("TEXT2MEM_SEARCH_PHRASE_BONUS", base.search_phrase_bonus),
            search_default_limit: parse_usize_or("TEXT2MEM_SEARCH_DEFAULT_LIMIT", base.search_default_limit),
            search_max_limit: parse_usize_or("TEXT2MEM_SEARCH_MAX_LIMIT", base.search_max_limit),
            search_default_k: parse_usize_or("TEXT2MEM_SEARCH_DEFAULT_K", base.search_default_k),

            max_concurrent: parse_usize_or("TEXT2MEM_BENCH_GEN_MAX_CONCURRENT", base.max_concurrent),
            checkpoint_batch_size: parse_usize_or(
                "TEXT2MEM_BENCH_GEN_CHECKPOINT_BATCH",
                base.checkpoint_batch_size,
            ),
            use_async: parse_bool_or("TEXT2MEM_BENCH_GEN_USE_ASYNC", base.use_async),
            retry_max: parse_u32_or("TEXT2MEM_BENCH_GEN_RETRY_MAX", base.retry_max),
            retry_delay: Duration::from_secs(parse_u32_or(
                "TEXT2MEM_BENCH_GEN_RETRY_DELAY",
                base.retry_delay.as_secs() as u32,
            ) as u64),

            eval_timeout: Duration::from_secs(parse_u32_or(
                "TEXT2MEM_BENCH_TIMEOUT",
                base.eval_timeout.as_secs() as u32,
            ) as u64),
            eval_split: get("TEXT2MEM_BENCH_SPLIT"),
            eval_mode: get("TEXT2MEM_BENCH_MODE"),
            eval_verbose: parse_bool_or("TEXT2MEM_BENCH_VERBOSE", base.eval_verbose),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_documented_values() {
        let config = BenchConfig::default();
        assert_eq!(config.max_concurrent, 5);
        assert_eq!(config.checkpoint_batch_size, 10);
        assert_eq!(config.request_timeout, Duration::from_secs(120));
        assert_eq!(config.retry_delay, Duration::from_secs(2));
    }

    #[test]
    fn env_overrides_take_precedence_over_defaults() {
        let mut env = HashMap::new();
        env.insert("TEXT2MEM_BENCH_GEN_MAX_CONCURRENT".to_string(), "8".to_string());
        env.insert("TEXT2MEM_SEARCH_ALPHA".to_string(), "0.5".to_string());
        env.insert("TEXT2MEM_BENCH_GEN_USE_ASYNC".to_string(), "true".to_string());
        let config = BenchConfig::from_map(&env);
        assert_eq!(config.max_concurrent, 8);
        assert!((config.search_alpha - 0.5).abs() < 1e-9);
        assert!(config.use_async);
    }

    #[test]
    fn provider_selection_falls_back_to_shared_provider_var() {
        let mut env = HashMap::new();
        env.insert("TEXT2MEM_PROVIDER".to_string(), "ollama".to_string());
        let config = BenchConfig::from_map(&env);
        assert_eq!(config.embedding_provider.as_deref(), Some("ollama"));
        assert_eq!(config.generation_provider.as_deref(), Some("ollama"));
    }
}
