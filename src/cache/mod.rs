//! Result Cache — a fingerprinted, Redis-backed store for `AnalysisResult`s.
//!
//! Key: `analysis:{sha256(path ++ ":" ++ last_modified.iso8601)}`. Expiry is
//! enforced twice: by Redis's own TTL, and again at the application layer by
//! comparing the stored `expires_at` against now, so a present-but-expired
//! entry (e.g. a clock skew edge case) is still treated as absent and
//! deleted on access.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use redis::AsyncCommands;
use sha2::{Digest, Sha256};

use crate::model::{AnalysisResult, CacheEntry};

#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
}

pub struct ResultCache {
    client: redis::Client,
    ttl_hours: u64,
    stats: std::sync::Arc<std::sync::Mutex<CacheStats>>,
}

fn entry_key(path: &str, last_modified: DateTime<Utc>) -> String {
    let fingerprint = format!("{path}:{}", last_modified.to_rfc3339());
    let mut hasher = Sha256::new();
    hasher.update(fingerprint.as_bytes());
    format!("analysis:{}", hex::encode(hasher.finalize()))
}

fn project_hash(path: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(path.as_bytes());
    hex::encode(hasher.finalize())
}

impl ResultCache {
    pub fn new(redis_url: &str, ttl_hours: u64) -> Result<Self, crate::error::PipelineError> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| crate::error::PipelineError::Configuration(format!("redis: {e}")))?;
        Ok(Self {
            client,
            ttl_hours,
            stats: Default::default(),
        })
    }

    async fn conn(&self) -> Result<redis::aio::MultiplexedConnection, crate::error::PipelineError> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| crate::error::PipelineError::TransientIo(e.to_string()))
    }

    pub async fn get(
        &self,
        path: &str,
        last_modified: DateTime<Utc>,
    ) -> Result<Option<CacheEntry>, crate::error::PipelineError> {
        let key = entry_key(path, last_modified);
        let mut conn = self.conn().await?;
        let raw: Option<String> = conn
            .get(&key)
            .await
            .map_err(|e| crate::error::PipelineError::TransientIo(e.to_string()))?;

        let Some(raw) = raw else {
            self.record_miss();
            return Ok(None);
        };

        let entry: CacheEntry = match serde_json::from_str(&raw) {
            Ok(e) => e,
            Err(_) => {
                self.record_miss();
                return Ok(None);
            }
        };

        if entry.expires_at <= Utc::now() {
            let _: Result<(), _> = conn.del(&key).await;
            self.record_miss();
            return Ok(None);
        }

        self.record_hit();
        Ok(Some(entry))
    }

    pub async fn set(
        &self,
        path: &str,
        last_modified: DateTime<Utc>,
        result: AnalysisResult,
    ) -> Result<bool, crate::error::PipelineError> {
        let key = entry_key(path, last_modified);
        let now = Utc::now();
        let entry = CacheEntry {
            project_hash: project_hash(path),
            last_modified,
            result,
            created_at: now,
            expires_at: now + ChronoDuration::hours(self.ttl_hours as i64),
        };
        let serialized = serde_json::to_string(&entry)
            .map_err(|e| crate::error::PipelineError::Parse(e.to_string()))?;

        let mut conn = self.conn().await?;
        let ttl_seconds = self.ttl_hours * 3600;
        let _: () = conn
            .set_ex(&key, serialized, ttl_seconds)
            .await
            .map_err(|e| crate::error::PipelineError::TransientIo(e.to_string()))?;
        Ok(true)
    }

    /// Best-effort invalidation by path: scans keys and compares the stored
    /// `project_hash`, since the key itself also folds in `last_modified`.
    pub async fn invalidate(&self, path: &str) -> Result<u64, crate::error::PipelineError> {
        let target_hash = project_hash(path);
        let mut conn = self.conn().await?;
        let keys: Vec<String> = conn
            .keys("analysis:*")
            .await
            .map_err(|e| crate::error::PipelineError::TransientIo(e.to_string()))?;

        let mut removed = 0u64;
        for key in keys {
            let raw: Option<String> = conn.get(&key).await.ok();
            let Some(raw) = raw else { continue };
            let Ok(entry) = serde_json::from_str::<CacheEntry>(&raw) else {
                continue;
            };
            if entry.project_hash == target_hash {
                let _: Result<(), _> = conn.del(&key).await;
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Application-layer sweep of expired-but-not-yet-TTL'd entries.
    pub async fn clear_expired(&self) -> Result<u64, crate::error::PipelineError> {
        let mut conn = self.conn().await?;
        let keys: Vec<String> = conn
            .keys("analysis:*")
            .await
            .map_err(|e| crate::error::PipelineError::TransientIo(e.to_string()))?;

        let now = Utc::now();
        let mut removed = 0u64;
        for key in keys {
            let raw: Option<String> = conn.get(&key).await.ok();
            let Some(raw) = raw else { continue };
            if let Ok(entry) = serde_json::from_str::<CacheEntry>(&raw) {
                if entry.expires_at <= now {
                    let _: Result<(), _> = conn.del(&key).await;
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }

    pub fn stats(&self) -> CacheStats {
        self.stats.lock().unwrap().clone()
    }

    pub async fn healthy(&self) -> bool {
        match self.conn().await {
            Ok(mut conn) => redis::cmd("PING")
                .query_async::<String>(&mut conn)
                .await
                .is_ok(),
            Err(_) => false,
        }
    }

    fn record_hit(&self) {
        self.stats.lock().unwrap().hits += 1;
    }

    fn record_miss(&self) {
        self.stats.lock().unwrap().misses += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_key_is_stable_for_same_inputs() {
        let t = DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let a = entry_key("/watch/demo", t);
        let b = entry_key("/watch/demo", t);
        assert_eq!(a, b);
        assert!(a.starts_with("analysis:"));
    }

    #[test]
    fn entry_key_changes_with_mtime() {
        let t1 = DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let t2 = DateTime::parse_from_rfc3339("2026-01-01T00:00:01Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_ne!(entry_key("/watch/demo", t1), entry_key("/watch/demo", t2));
    }

    #[test]
    fn project_hash_depends_only_on_path() {
        assert_eq!(project_hash("/a/b"), project_hash("/a/b"));
        assert_ne!(project_hash("/a/b"), project_hash("/a/c"));
    }
}
