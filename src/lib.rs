//! Project Discovery & Analysis Pipeline
//!
//! Continuously discovers software projects under a watched root, enriches
//! them with detected metadata, and drives them through a bounded-concurrency
//! AI-analysis pipeline whose results are cached, persisted, and streamed to
//! realtime subscribers.

pub mod analyzer;
pub mod api;
pub mod cache;
pub mod config;
pub mod context;
pub mod discovery;
pub mod error;
pub mod events;
pub mod executor;
pub mod model;
pub mod queue;
pub mod storage;
pub mod validator;
pub mod watcher;
pub mod worker;

use std::sync::Arc;

use config::Config;
use error::PipelineError;

/// Shared application state handed to the HTTP/WS layer and the background
/// tasks `serve` spawns.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn storage::ProjectStore>,
    pub bus: events::EventBus,
    pub queue: Arc<queue::AnalysisQueue>,
    pub cache: Arc<cache::ResultCache>,
    pub executor: Arc<executor::RateLimitedExecutor>,
    pub analyzer: Arc<analyzer::AnalyzerClient>,
    pub config: Arc<Config>,
}

impl AppState {
    pub async fn new(config: Config) -> Result<Self, PipelineError> {
        let store: Arc<dyn storage::ProjectStore> =
            Arc::new(storage::PgStore::connect(&config.database_url).await?);
        let bus = events::EventBus::new(1024);
        let queue = Arc::new(queue::AnalysisQueue::new(
            &config.redis_url,
            config.queue.max_attempts,
        )?);
        let cache = Arc::new(cache::ResultCache::new(
            &config.redis_url,
            config.worker.cache_ttl_hours,
        )?);
        let executor = Arc::new(executor::RateLimitedExecutor::new(&config.rate_limiter));
        let analyzer = Arc::new(analyzer::AnalyzerClient::new(
            config.anthropic_api_key.clone(),
            &config.worker,
        ));

        Ok(Self {
            store,
            bus,
            queue,
            cache,
            executor,
            analyzer,
            config: Arc::new(config),
        })
    }
}
