//! Process configuration, loaded from the environment (optionally via `.env`).
//!
//! Every field here corresponds to one of the enumerated configuration keys;
//! missing required values are a `Configuration` error and fail startup fast.

use crate::error::PipelineError;

#[derive(Debug, Clone)]
pub struct WatcherConfig {
    pub watch_path: String,
    pub depth: usize,
    pub ignore_patterns: Vec<String>,
    pub debounce_delay_ms: u64,
    pub stability_threshold_ms: u64,
    pub startup_delay_ms: u64,
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub concurrency: usize,
    pub cache_ttl_hours: u64,
    pub max_context_tokens: usize,
    pub ai_timeout_ms: u64,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

#[derive(Debug, Clone)]
pub struct RateLimiterConfig {
    pub max_concurrent: usize,
    pub requests_per_minute: usize,
    pub backoff_multiplier: f64,
    pub max_retries: u32,
    pub initial_delay_ms: u64,
}

#[derive(Debug, Clone)]
pub struct RealtimeConfig {
    pub keepalive_ms: u64,
}

#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Attempts allowed before a job lands in `failed` for good. The shipped
    /// default (1) means no automatic retry, matching the "no retry until
    /// the operator enables it" default the queue contract documents.
    pub max_attempts: u32,
    /// How often the delayed set is polled for jobs whose backoff has
    /// elapsed. Only matters when `max_attempts > 1`.
    pub process_delayed_interval_ms: u64,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub watcher: WatcherConfig,
    pub worker: WorkerConfig,
    pub rate_limiter: RateLimiterConfig,
    pub realtime: RealtimeConfig,
    pub queue: QueueConfig,
    pub reset_deleted: bool,
    pub server_port: u16,
    pub database_url: String,
    pub redis_url: String,
    pub anthropic_api_key: String,
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_required(key: &str) -> Result<String, PipelineError> {
    std::env::var(key)
        .map_err(|_| PipelineError::Configuration(format!("missing required env var {key}")))
}

impl Config {
    pub fn from_env() -> Result<Self, PipelineError> {
        let watch_path = env_required("WATCH_PATH")?;
        if watch_path.trim().is_empty() {
            return Err(PipelineError::Configuration(
                "WATCH_PATH must not be empty".into(),
            ));
        }

        let anthropic_api_key = env_required("ANTHROPIC_API_KEY")?;

        let database_url = env_string("DATABASE_URL", "postgres://localhost/project_pipeline");
        let redis_url = env_string("REDIS_URL", "redis://127.0.0.1:6379");

        let ignore_patterns = std::env::var("WATCHER_IGNORE_PATTERNS")
            .map(|v| v.split(',').map(|s| s.trim().to_string()).collect())
            .unwrap_or_default();

        Ok(Self {
            watcher: WatcherConfig {
                watch_path,
                depth: env_parse("WATCHER_DEPTH", 1),
                ignore_patterns,
                debounce_delay_ms: env_parse("WATCHER_DEBOUNCE_DELAY_MS", 2000),
                stability_threshold_ms: env_parse("WATCHER_STABILITY_THRESHOLD_MS", 2000),
                startup_delay_ms: env_parse("WATCHER_STARTUP_DELAY_MS", 0),
            },
            worker: WorkerConfig {
                concurrency: env_parse("WORKER_CONCURRENCY", 5),
                cache_ttl_hours: env_parse("CACHE_TTL_HOURS", 24),
                max_context_tokens: env_parse("MAX_CONTEXT_TOKENS", 10_000),
                ai_timeout_ms: env_parse("AI_TIMEOUT_MS", 180_000),
                model: env_string("ANTHROPIC_MODEL", "claude-sonnet-4-5"),
                max_tokens: env_parse("AI_MAX_TOKENS", 4096),
                temperature: env_parse("AI_TEMPERATURE", 0.2),
            },
            rate_limiter: RateLimiterConfig {
                max_concurrent: env_parse("RATE_LIMIT_MAX_CONCURRENT", 3),
                requests_per_minute: env_parse("RATE_LIMIT_REQUESTS_PER_MINUTE", 10),
                backoff_multiplier: env_parse("RATE_LIMIT_BACKOFF_MULTIPLIER", 2.0),
                max_retries: env_parse("RATE_LIMIT_MAX_RETRIES", 3),
                initial_delay_ms: env_parse("RATE_LIMIT_INITIAL_DELAY_MS", 2000),
            },
            realtime: RealtimeConfig {
                keepalive_ms: env_parse("REALTIME_KEEPALIVE_MS", 30_000),
            },
            queue: QueueConfig {
                max_attempts: env_parse("QUEUE_MAX_ATTEMPTS", 1),
                process_delayed_interval_ms: env_parse("QUEUE_PROCESS_DELAYED_INTERVAL_MS", 5_000),
            },
            reset_deleted: env_parse("RESET_DELETED", false),
            server_port: env_parse("SERVER_PORT", 8080),
            database_url,
            redis_url,
            anthropic_api_key,
        })
    }
}
