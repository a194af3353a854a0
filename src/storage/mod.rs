//! Persistence layer: `ProjectStore` mirrors every operation the discovery
//! subscriber, queue, cache, and worker processor need, enabling `PgStore`
//! (real, `sqlx::Postgres`) and `MockStore` (in-memory, used by every test
//! in this crate) to be used interchangeably.

mod mock;
mod pg;

pub use mock::MockStore;
pub use pg::PgStore;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::PipelineError;
use crate::model::{Analysis, Project, ProjectStatus};

/// Result of an idempotent upsert-by-path.
pub enum UpsertOutcome {
    Created(Project),
    Updated(Project),
}

#[async_trait]
pub trait ProjectStore: Send + Sync {
    async fn get_project(&self, id: Uuid) -> Result<Option<Project>, PipelineError>;
    async fn get_project_by_path(&self, path: &str) -> Result<Option<Project>, PipelineError>;
    async fn list_projects(&self) -> Result<Vec<Project>, PipelineError>;

    /// Idempotent upsert by unique `path`. On a unique-constraint race, the
    /// implementation waits briefly, re-reads, and returns `Updated` with
    /// the row the other writer created.
    async fn upsert_project_by_path(
        &self,
        path: &str,
        name: &str,
        framework: Option<String>,
        language: Option<String>,
        package_manager: Option<String>,
        confidence: Option<f64>,
    ) -> Result<UpsertOutcome, PipelineError>;

    async fn update_project_metadata(
        &self,
        id: Uuid,
        file_count: i64,
        lines_of_code: i64,
        size_bytes: i64,
        last_modified: Option<chrono::DateTime<chrono::Utc>>,
    ) -> Result<(), PipelineError>;

    async fn set_status(&self, id: Uuid, status: ProjectStatus) -> Result<(), PipelineError>;

    async fn mark_removed(&self, path: &str) -> Result<Option<Project>, PipelineError>;

    /// `reset-stuck`: forces `ANALYZING -> DISCOVERED`.
    async fn reset_stuck(&self, id: Uuid) -> Result<(), PipelineError>;

    async fn list_stuck(&self) -> Result<Vec<Project>, PipelineError>;

    /// Atomically inserts the Analysis row and advances
    /// `status=ANALYZED, analyzedAt=now` — a reader must never observe
    /// `ANALYZED` without a corresponding Analysis.
    async fn insert_analysis_and_mark_analyzed(
        &self,
        project_id: Uuid,
        analysis: Analysis,
    ) -> Result<(), PipelineError>;

    async fn list_analyses(&self, project_id: Uuid) -> Result<Vec<Analysis>, PipelineError>;

    async fn clear_inactive_flags(&self) -> Result<u64, PipelineError>;
}
