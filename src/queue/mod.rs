//! Priority Analysis Queue — a Redis-backed named queue (`project-analysis`)
//! with priority ordering, at-least-once delivery, per-job progress, and the
//! admin surface (`pause`/`resume`/`clear`/`remove`/`force-delete`).
//!
//! Waiting jobs live in a sorted set scored by `priority_rank * SEQ_SPACE +
//! sequence`, so jobs of the same priority dequeue in insertion order and
//! higher-priority jobs always sort first regardless of arrival time.

use chrono::{Duration as ChronoDuration, Utc};
use rand::Rng;
use redis::AsyncCommands;

use crate::error::PipelineError;
use crate::model::{Job, JobPayload, JobProgress, JobState, Priority};

const WAITING_KEY: &str = "queue:waiting";
const ACTIVE_KEY: &str = "queue:active";
const COMPLETED_KEY: &str = "queue:completed";
const FAILED_KEY: &str = "queue:failed";
const DELAYED_KEY: &str = "queue:delayed";
const PAUSED_KEY: &str = "queue:paused";
const SEQ_KEY: &str = "queue:seq";
const SEQ_SPACE: f64 = 1e13;

const COMPLETED_RETENTION_COUNT: isize = 100;
const COMPLETED_RETENTION_HOURS: i64 = 24;
const FAILED_RETENTION_COUNT: isize = 500;

fn job_key(id: &str) -> String {
    format!("queue:job:{id}")
}

fn priority_rank(priority: Priority) -> f64 {
    match priority {
        Priority::High => 1.0,
        Priority::Normal => 2.0,
        Priority::Low => 3.0,
    }
}

/// Exponential backoff with base 2s, multiplier 2, capped at 60s, ±20% jitter.
pub fn backoff_delay(attempt: u32) -> std::time::Duration {
    let base_ms = 2000.0_f64;
    let raw = base_ms * 2f64.powi(attempt as i32 - 1);
    let capped = raw.min(60_000.0);
    let jitter = rand::thread_rng().gen_range(-0.2..=0.2);
    let jittered = (capped * (1.0 + jitter)).max(0.0);
    std::time::Duration::from_millis(jittered as u64)
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct QueueCounts {
    pub waiting: u64,
    pub active: u64,
    pub completed: u64,
    pub failed: u64,
    pub delayed: u64,
}

pub struct AnalysisQueue {
    client: redis::Client,
    max_attempts: u32,
}

impl AnalysisQueue {
    /// `max_attempts` is the attempts-before-permanent-failure knob from
    /// `QueueConfig`; 1 (the shipped default) means no automatic retry.
    pub fn new(redis_url: &str, max_attempts: u32) -> Result<Self, PipelineError> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| PipelineError::Configuration(format!("redis: {e}")))?;
        Ok(Self { client, max_attempts })
    }

    async fn conn(&self) -> Result<redis::aio::MultiplexedConnection, PipelineError> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| PipelineError::TransientIo(e.to_string()))
    }

    /// Enqueue a job with a stable id `analysis-<projectId>-<monotonic-clock>`.
    pub async fn enqueue(&self, payload: JobPayload) -> Result<Job, PipelineError> {
        let mut conn = self.conn().await?;
        let seq: i64 = conn
            .incr(SEQ_KEY, 1)
            .await
            .map_err(|e| PipelineError::TransientIo(e.to_string()))?;

        let id = format!("analysis-{}-{}", payload.project_id, seq);
        let job = Job {
            id: id.clone(),
            name: "analyze-project".into(),
            payload,
            state: JobState::Waiting,
            sequence: seq,
            attempts: 0,
            max_attempts: self.max_attempts,
            created_at: Utc::now(),
            processed_at: None,
            finished_at: None,
            failed_reason: None,
            progress: JobProgress::new("waiting", 0),
        };

        let score = priority_rank(job.payload.priority) * SEQ_SPACE + seq as f64;
        self.write_job(&mut conn, &job).await?;
        let _: () = conn
            .zadd(WAITING_KEY, &id, score)
            .await
            .map_err(|e| PipelineError::TransientIo(e.to_string()))?;

        Ok(job)
    }

    /// Dequeue the highest-priority, earliest-enqueued waiting job. Returns
    /// `None` immediately if the queue is paused or empty.
    pub async fn dequeue(&self) -> Result<Option<Job>, PipelineError> {
        let mut conn = self.conn().await?;
        let paused: bool = conn
            .exists(PAUSED_KEY)
            .await
            .map_err(|e| PipelineError::TransientIo(e.to_string()))?;
        if paused {
            return Ok(None);
        }

        let popped: Vec<(String, f64)> = conn
            .zpopmin(WAITING_KEY, 1)
            .await
            .map_err(|e| PipelineError::TransientIo(e.to_string()))?;
        let Some((id, _score)) = popped.into_iter().next() else {
            return Ok(None);
        };

        let mut job = self.read_job(&mut conn, &id).await?.ok_or_else(|| {
            PipelineError::Conflict(format!("dequeued job {id} has no record"))
        })?;
        job.state = JobState::Active;
        job.attempts += 1;
        job.processed_at = Some(Utc::now());
        self.write_job(&mut conn, &job).await?;
        let _: () = conn
            .sadd(ACTIVE_KEY, &id)
            .await
            .map_err(|e| PipelineError::TransientIo(e.to_string()))?;

        Ok(Some(job))
    }

    pub async fn update_progress(
        &self,
        job_id: &str,
        progress: JobProgress,
    ) -> Result<(), PipelineError> {
        let mut conn = self.conn().await?;
        let Some(mut job) = self.read_job(&mut conn, job_id).await? else {
            return Ok(());
        };
        job.progress = progress;
        self.write_job(&mut conn, &job).await
    }

    pub async fn complete(&self, job_id: &str) -> Result<(), PipelineError> {
        let mut conn = self.conn().await?;
        let Some(mut job) = self.read_job(&mut conn, job_id).await? else {
            return Ok(());
        };
        job.state = JobState::Completed;
        job.finished_at = Some(Utc::now());
        job.progress = JobProgress::new("completed", 100);
        self.write_job(&mut conn, &job).await?;

        let _: () = conn
            .srem(ACTIVE_KEY, job_id)
            .await
            .map_err(|e| PipelineError::TransientIo(e.to_string()))?;
        let _: () = conn
            .zadd(COMPLETED_KEY, job_id, Utc::now().timestamp())
            .await
            .map_err(|e| PipelineError::TransientIo(e.to_string()))?;
        self.enforce_retention(
            &mut conn,
            COMPLETED_KEY,
            COMPLETED_RETENTION_COUNT,
            Some(COMPLETED_RETENTION_HOURS),
        )
        .await
    }

    /// The processor itself never retries; it reports failure and the queue
    /// decides. With the shipped default (`QUEUE_MAX_ATTEMPTS = 1`) this
    /// always lands in `failed`; raise `max_attempts` to enable the delayed
    /// retry path (see `process_delayed`).
    pub async fn fail(&self, job_id: &str, reason: String) -> Result<(), PipelineError> {
        let mut conn = self.conn().await?;
        let Some(mut job) = self.read_job(&mut conn, job_id).await? else {
            return Ok(());
        };

        let _: () = conn
            .srem(ACTIVE_KEY, job_id)
            .await
            .map_err(|e| PipelineError::TransientIo(e.to_string()))?;

        if job.attempts < job.max_attempts {
            let delay = backoff_delay(job.attempts);
            job.state = JobState::Delayed;
            job.failed_reason = Some(reason.clone());
            self.write_job(&mut conn, &job).await?;
            let ready_at = (Utc::now() + ChronoDuration::milliseconds(delay.as_millis() as i64))
                .timestamp();
            let _: () = conn
                .zadd(DELAYED_KEY, job_id, ready_at)
                .await
                .map_err(|e| PipelineError::TransientIo(e.to_string()))?;
            return Ok(());
        }

        job.state = JobState::Failed;
        job.finished_at = Some(Utc::now());
        job.failed_reason = Some(reason.clone());
        job.progress = JobProgress::failed(reason);
        self.write_job(&mut conn, &job).await?;
        let _: () = conn
            .zadd(FAILED_KEY, job_id, Utc::now().timestamp())
            .await
            .map_err(|e| PipelineError::TransientIo(e.to_string()))?;
        self.enforce_retention(&mut conn, FAILED_KEY, FAILED_RETENTION_COUNT, None)
            .await
    }

    /// Promote delayed jobs whose backoff has elapsed back onto the waiting
    /// set, preserving their original enqueue-order score. Intended to be
    /// polled periodically (see `QUEUE_PROCESS_DELAYED_INTERVAL_MS`).
    pub async fn process_delayed(&self) -> Result<u64, PipelineError> {
        let mut conn = self.conn().await?;
        let now = Utc::now().timestamp();
        let ready: Vec<String> = conn
            .zrangebyscore_limit(DELAYED_KEY, 0, now, 0, 100)
            .await
            .map_err(|e| PipelineError::TransientIo(e.to_string()))?;

        let mut promoted = 0u64;
        for id in ready {
            let Some(job) = self.read_job(&mut conn, &id).await? else {
                continue;
            };
            let score = priority_rank(job.payload.priority) * SEQ_SPACE + job.sequence as f64;
            let _: () = conn
                .zadd(WAITING_KEY, &id, score)
                .await
                .map_err(|e| PipelineError::TransientIo(e.to_string()))?;
            let _: () = conn
                .zrem(DELAYED_KEY, &id)
                .await
                .map_err(|e| PipelineError::TransientIo(e.to_string()))?;
            promoted += 1;
        }
        Ok(promoted)
    }

    pub async fn pause(&self) -> Result<(), PipelineError> {
        let mut conn = self.conn().await?;
        let _: () = conn
            .set(PAUSED_KEY, 1)
            .await
            .map_err(|e| PipelineError::TransientIo(e.to_string()))?;
        Ok(())
    }

    pub async fn resume(&self) -> Result<(), PipelineError> {
        let mut conn = self.conn().await?;
        let _: () = conn
            .del(PAUSED_KEY)
            .await
            .map_err(|e| PipelineError::TransientIo(e.to_string()))?;
        Ok(())
    }

    /// Removes completed and failed jobs older than 1 hour.
    pub async fn clear(&self) -> Result<u64, PipelineError> {
        let mut conn = self.conn().await?;
        let cutoff = (Utc::now() - ChronoDuration::hours(1)).timestamp();
        let mut removed = 0u64;
        for key in [COMPLETED_KEY, FAILED_KEY] {
            let ids: Vec<String> = conn
                .zrangebyscore(key, 0, cutoff)
                .await
                .map_err(|e| PipelineError::TransientIo(e.to_string()))?;
            for id in &ids {
                let _: () = conn
                    .del(job_key(id))
                    .await
                    .map_err(|e| PipelineError::TransientIo(e.to_string()))?;
            }
            let _: () = conn
                .zrembyscore(key, 0, cutoff)
                .await
                .map_err(|e| PipelineError::TransientIo(e.to_string()))?;
            removed += ids.len() as u64;
        }
        Ok(removed)
    }

    /// Remove a job outright. Returns `Conflict` if the job is currently
    /// active — a normal delete must never silently remove in-flight work.
    pub async fn remove(&self, job_id: &str) -> Result<(), PipelineError> {
        let mut conn = self.conn().await?;
        let is_active: bool = conn
            .sismember(ACTIVE_KEY, job_id)
            .await
            .map_err(|e| PipelineError::TransientIo(e.to_string()))?;
        if is_active {
            return Err(PipelineError::Conflict(format!(
                "job {job_id} is active; use force-delete"
            )));
        }
        self.purge(&mut conn, job_id).await
    }

    /// Force-delete an active-and-locked job: transitions it to `failed`
    /// first, then removes it entirely.
    pub async fn force_delete(&self, job_id: &str) -> Result<(), PipelineError> {
        let mut conn = self.conn().await?;
        let is_active: bool = conn
            .sismember(ACTIVE_KEY, job_id)
            .await
            .map_err(|e| PipelineError::TransientIo(e.to_string()))?;
        if is_active {
            self.fail(job_id, "force-deleted by operator".into())
                .await?;
        }
        self.purge(&mut conn, job_id).await
    }

    async fn purge(
        &self,
        conn: &mut redis::aio::MultiplexedConnection,
        job_id: &str,
    ) -> Result<(), PipelineError> {
        let _: () = conn
            .zrem(WAITING_KEY, job_id)
            .await
            .map_err(|e| PipelineError::TransientIo(e.to_string()))?;
        let _: () = conn
            .srem(ACTIVE_KEY, job_id)
            .await
            .map_err(|e| PipelineError::TransientIo(e.to_string()))?;
        let _: () = conn
            .zrem(COMPLETED_KEY, job_id)
            .await
            .map_err(|e| PipelineError::TransientIo(e.to_string()))?;
        let _: () = conn
            .zrem(FAILED_KEY, job_id)
            .await
            .map_err(|e| PipelineError::TransientIo(e.to_string()))?;
        let _: () = conn
            .zrem(DELAYED_KEY, job_id)
            .await
            .map_err(|e| PipelineError::TransientIo(e.to_string()))?;
        let _: () = conn
            .del(job_key(job_id))
            .await
            .map_err(|e| PipelineError::TransientIo(e.to_string()))?;
        Ok(())
    }

    async fn enforce_retention(
        &self,
        conn: &mut redis::aio::MultiplexedConnection,
        key: &str,
        keep: isize,
        max_age_hours: Option<i64>,
    ) -> Result<(), PipelineError> {
        let count: isize = conn
            .zcard(key)
            .await
            .map_err(|e| PipelineError::TransientIo(e.to_string()))?;
        if count > keep {
            let overflow = count - keep;
            let stale: Vec<String> = conn
                .zrange(key, 0, overflow - 1)
                .await
                .map_err(|e| PipelineError::TransientIo(e.to_string()))?;
            for id in &stale {
                let _: () = conn
                    .del(job_key(id))
                    .await
                    .map_err(|e| PipelineError::TransientIo(e.to_string()))?;
            }
            let _: () = conn
                .zremrangebyrank(key, 0, overflow - 1)
                .await
                .map_err(|e| PipelineError::TransientIo(e.to_string()))?;
        }
        if let Some(hours) = max_age_hours {
            let cutoff = (Utc::now() - ChronoDuration::hours(hours)).timestamp();
            let _: () = conn
                .zrembyscore(key, 0, cutoff)
                .await
                .map_err(|e| PipelineError::TransientIo(e.to_string()))?;
        }
        Ok(())
    }

    /// Clear all non-terminal jobs for a project — used by `reset-stuck` so
    /// a project forced back to `DISCOVERED` doesn't still have a ghost job
    /// sitting active or waiting.
    pub async fn clear_jobs_for_project(&self, project_id: uuid::Uuid) -> Result<(), PipelineError> {
        let mut conn = self.conn().await?;
        let mut candidates: Vec<String> = conn
            .zrange(WAITING_KEY, 0, -1)
            .await
            .map_err(|e| PipelineError::TransientIo(e.to_string()))?;
        let active: Vec<String> = conn
            .smembers(ACTIVE_KEY)
            .await
            .map_err(|e| PipelineError::TransientIo(e.to_string()))?;
        let delayed: Vec<String> = conn
            .zrange(DELAYED_KEY, 0, -1)
            .await
            .map_err(|e| PipelineError::TransientIo(e.to_string()))?;
        candidates.extend(active);
        candidates.extend(delayed);

        for id in candidates {
            if let Some(job) = self.read_job(&mut conn, &id).await? {
                if job.payload.project_id == project_id {
                    self.purge(&mut conn, &id).await?;
                }
            }
        }
        Ok(())
    }

    pub async fn get_job(&self, job_id: &str) -> Result<Option<Job>, PipelineError> {
        let mut conn = self.conn().await?;
        self.read_job(&mut conn, job_id).await
    }

    pub async fn stats(&self) -> Result<QueueCounts, PipelineError> {
        let mut conn = self.conn().await?;
        Ok(QueueCounts {
            waiting: conn
                .zcard(WAITING_KEY)
                .await
                .map_err(|e| PipelineError::TransientIo(e.to_string()))?,
            active: conn
                .scard(ACTIVE_KEY)
                .await
                .map_err(|e| PipelineError::TransientIo(e.to_string()))?,
            completed: conn
                .zcard(COMPLETED_KEY)
                .await
                .map_err(|e| PipelineError::TransientIo(e.to_string()))?,
            failed: conn
                .zcard(FAILED_KEY)
                .await
                .map_err(|e| PipelineError::TransientIo(e.to_string()))?,
            delayed: conn
                .zcard(DELAYED_KEY)
                .await
                .map_err(|e| PipelineError::TransientIo(e.to_string()))?,
        })
    }

    async fn write_job(
        &self,
        conn: &mut redis::aio::MultiplexedConnection,
        job: &Job,
    ) -> Result<(), PipelineError> {
        let serialized =
            serde_json::to_string(job).map_err(|e| PipelineError::Parse(e.to_string()))?;
        let _: () = conn
            .set(job_key(&job.id), serialized)
            .await
            .map_err(|e| PipelineError::TransientIo(e.to_string()))?;
        Ok(())
    }

    async fn read_job(
        &self,
        conn: &mut redis::aio::MultiplexedConnection,
        job_id: &str,
    ) -> Result<Option<Job>, PipelineError> {
        let raw: Option<String> = conn
            .get(job_key(job_id))
            .await
            .map_err(|e| PipelineError::TransientIo(e.to_string()))?;
        match raw {
            Some(raw) => serde_json::from_str(&raw)
                .map(Some)
                .map_err(|e| PipelineError::Parse(e.to_string())),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_exponentially_and_caps_at_60s() {
        let d1 = backoff_delay(1).as_millis() as f64;
        let d3 = backoff_delay(3).as_millis() as f64;
        assert!(d1 >= 1600.0 && d1 <= 2400.0);
        assert!(d3 <= 60_000.0 * 1.21);
    }

    #[test]
    fn priority_rank_orders_high_before_low() {
        assert!(priority_rank(Priority::High) < priority_rank(Priority::Normal));
        assert!(priority_rank(Priority::Normal) < priority_rank(Priority::Low));
    }
}
