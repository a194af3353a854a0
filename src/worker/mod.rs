//! Worker Processor (C10): drains the analysis queue and runs each job
//! through the full pipeline — cache lookup, context extraction, the
//! rate-limited analyzer call, cache write, and the atomic
//! analysis-insert/status-update transaction — publishing lifecycle events
//! at every stage.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use tracing::{error, warn};
use uuid::Uuid;

use crate::analyzer::AnalyzerClient;
use crate::cache::ResultCache;
use crate::config::WorkerConfig;
use crate::error::PipelineError;
use crate::events::EventBus;
use crate::executor::RateLimitedExecutor;
use crate::model::{Analysis, Event, EventKind, JobPayload, JobProgress};
use crate::queue::AnalysisQueue;
use crate::storage::ProjectStore;
use crate::{context, validator};

const CONTEXT_TIMEOUT: Duration = Duration::from_secs(30);

pub struct WorkerProcessor {
    store: Arc<dyn ProjectStore>,
    bus: EventBus,
    queue: Arc<AnalysisQueue>,
    cache: Arc<ResultCache>,
    executor: Arc<RateLimitedExecutor>,
    analyzer: Arc<AnalyzerClient>,
    config: WorkerConfig,
}

impl WorkerProcessor {
    pub fn new(
        store: Arc<dyn ProjectStore>,
        bus: EventBus,
        queue: Arc<AnalysisQueue>,
        cache: Arc<ResultCache>,
        executor: Arc<RateLimitedExecutor>,
        analyzer: Arc<AnalyzerClient>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            store,
            bus,
            queue,
            cache,
            executor,
            analyzer,
            config,
        }
    }

    /// One cooperating worker task: poll-dequeue, process to completion or
    /// failure, repeat. Intended to be spawned `concurrency` times.
    pub async fn run_loop(self: Arc<Self>, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() {
                return;
            }
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return;
                    }
                }
                job = self.queue.dequeue() => {
                    match job {
                        Ok(Some(job)) => self.process(job.id, job.payload).await,
                        Ok(None) => tokio::time::sleep(Duration::from_millis(250)).await,
                        Err(err) => {
                            warn!(%err, "dequeue failed");
                            tokio::time::sleep(Duration::from_millis(500)).await;
                        }
                    }
                }
            }
        }
    }

    async fn process(&self, job_id: String, payload: JobPayload) {
        if let Err(reason) = self.run_pipeline(&job_id, &payload).await {
            error!(job_id, project_id = %payload.project_id, %reason, "analysis failed");
            let _ = self.queue.fail(&job_id, reason.to_string()).await;
            let _ = self
                .store
                .set_status(payload.project_id, crate::model::ProjectStatus::Error)
                .await;
            self.bus
                .publish(Event::new(
                    EventKind::AnalysisFailed,
                    Some(payload.project_id),
                    json!({ "jobId": job_id, "reason": reason.to_string() }),
                ))
                .await;
        } else {
            let _ = self.queue.complete(&job_id).await;
        }
    }

    async fn progress(&self, job_id: &str, project_id: Uuid, status: &str, percent: u8) {
        let _ = self
            .queue
            .update_progress(job_id, JobProgress::new(status, percent))
            .await;
        self.bus
            .publish(Event::new(
                EventKind::AnalysisProgress,
                Some(project_id),
                json!({ "jobId": job_id, "status": status, "progress": percent }),
            ))
            .await;
    }

    async fn run_pipeline(&self, job_id: &str, payload: &JobPayload) -> Result<(), PipelineError> {
        let project_id = payload.project_id;

        self.bus
            .publish(Event::new(
                EventKind::AnalysisStarted,
                Some(project_id),
                json!({ "jobId": job_id }),
            ))
            .await;
        self.progress(job_id, project_id, "queued", 0).await;

        let path = Path::new(&payload.project_path);
        let metadata = std::fs::metadata(path).map_err(|_| {
            PipelineError::Validation(format!("{} no longer exists", payload.project_path))
        })?;
        if !metadata.is_dir() {
            return Err(PipelineError::Validation(format!(
                "{} is not a directory",
                payload.project_path
            )));
        }
        let last_modified: chrono::DateTime<Utc> = metadata
            .modified()
            .map(chrono::DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());

        if !payload.force_refresh {
            if let Some(entry) = self.cache.get(&payload.project_path, last_modified).await? {
                self.finish_from_cache(project_id, entry.result).await?;
                return Ok(());
            }
        }

        self.progress(job_id, project_id, "extracting", 20).await;
        let max_tokens = self.config.max_context_tokens;
        let root = path.to_path_buf();
        let ctx = tokio::time::timeout(
            CONTEXT_TIMEOUT,
            tokio::task::spawn_blocking(move || context::extract(&root, max_tokens)),
        )
        .await
        .map_err(|_| PipelineError::Timeout(CONTEXT_TIMEOUT.as_secs(), "context extraction".into()))?
        .map_err(|e| PipelineError::TransientIo(e.to_string()))?;

        let validation = validator::validate(path);
        let project_metadata = validator::extract(path, &validation);
        self.store
            .update_project_metadata(
                project_id,
                project_metadata.file_count,
                project_metadata.lines_of_code,
                project_metadata.size_bytes,
                Some(last_modified),
            )
            .await?;

        self.progress(job_id, project_id, "analyzing", 50).await;
        let ai_timeout = Duration::from_millis(self.config.ai_timeout_ms);
        let analyzer = self.analyzer.clone();
        let content = ctx.content.clone();
        let result = self
            .executor
            .execute(
                || {
                    let analyzer = analyzer.clone();
                    let content = content.clone();
                    async move {
                        tokio::time::timeout(ai_timeout, analyzer.analyze(&content))
                            .await
                            .map_err(|_| {
                                PipelineError::Timeout(ai_timeout.as_secs(), "analysis".into())
                            })?
                    }
                },
                |attempt, err| warn!(job_id, attempt, %err, "retrying analysis"),
            )
            .await?;

        self.progress(job_id, project_id, "caching", 80).await;
        self.cache
            .set(&payload.project_path, last_modified, result.clone())
            .await?;

        self.progress(job_id, project_id, "caching", 90).await;
        self.persist_analysis(project_id, result, false).await?;

        self.progress(job_id, project_id, "completed", 100).await;
        self.bus
            .publish(Event::new(
                EventKind::AnalysisCompleted,
                Some(project_id),
                json!({ "jobId": job_id }),
            ))
            .await;
        Ok(())
    }

    async fn finish_from_cache(
        &self,
        project_id: Uuid,
        result: crate::model::AnalysisResult,
    ) -> Result<(), PipelineError> {
        self.persist_analysis(project_id, result, true).await?;
        self.bus
            .publish(Event::new(
                EventKind::AnalysisCompleted,
                Some(project_id),
                json!({ "cacheHit": true }),
            ))
            .await;
        Ok(())
    }

    async fn persist_analysis(
        &self,
        project_id: Uuid,
        result: crate::model::AnalysisResult,
        cache_hit: bool,
    ) -> Result<(), PipelineError> {
        let analysis = Analysis {
            id: Uuid::new_v4(),
            project_id,
            summary: result.summary,
            tech_stack: result.tech_stack,
            complexity: result.complexity,
            recommendations: result.recommendations,
            completion_score: result.completion_score,
            maturity_level: result.maturity_level,
            production_gaps: result.production_gaps,
            estimated_value: result.estimated_value,
            model: result.model,
            tokens_used: result.tokens_used,
            cache_hit,
            created_at: Utc::now(),
        };
        self.store
            .insert_analysis_and_mark_analyzed(project_id, analysis)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RateLimiterConfig, WorkerConfig};
    use crate::model::Priority;
    use crate::storage::MockStore;

    fn worker_config() -> WorkerConfig {
        WorkerConfig {
            concurrency: 1,
            cache_ttl_hours: 24,
            max_context_tokens: 10_000,
            ai_timeout_ms: 5_000,
            model: "claude-test".into(),
            max_tokens: 1024,
            temperature: 0.2,
        }
    }

    fn rate_limiter_config() -> RateLimiterConfig {
        RateLimiterConfig {
            max_concurrent: 2,
            requests_per_minute: 100,
            backoff_multiplier: 2.0,
            max_retries: 1,
            initial_delay_ms: 10,
        }
    }

    #[tokio::test]
    async fn missing_path_fails_the_job_without_panicking() {
        let store: Arc<dyn ProjectStore> = Arc::new(MockStore::new());
        let outcome = store
            .upsert_project_by_path("/no/such/dir", "demo", None, None, None, None)
            .await
            .unwrap();
        let project_id = match outcome {
            crate::storage::UpsertOutcome::Created(p) => p.id,
            _ => unreachable!(),
        };

        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        let executor = Arc::new(RateLimitedExecutor::new(&rate_limiter_config()));
        let analyzer = Arc::new(AnalyzerClient::new("test-key".into(), &worker_config()));

        let payload = JobPayload {
            project_id,
            project_path: "/no/such/dir".into(),
            project_name: "demo".into(),
            priority: Priority::Normal,
            force_refresh: false,
        };

        while rx.try_recv().is_ok() {}

        let processor = WorkerProcessor {
            store: store.clone(),
            bus: bus.clone(),
            queue: Arc::new(AnalysisQueue::new("redis://127.0.0.1:1", 1).unwrap()),
            cache: Arc::new(ResultCache::new("redis://127.0.0.1:1", 24).unwrap()),
            executor,
            analyzer,
            config: worker_config(),
        };

        let result = processor.run_pipeline("job-1", &payload).await;
        assert!(result.is_err());
    }
}
