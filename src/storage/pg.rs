//! Real `ProjectStore` backed by Postgres via `sqlx`. Migrations under
//! `migrations/` are applied on connect so a fresh database comes up ready.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use super::{ProjectStore, UpsertOutcome};
use crate::error::PipelineError;
use crate::model::{Analysis, Complexity, MaturityLevel, Project, ProjectStatus};

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> Result<Self, PipelineError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .map_err(|e| PipelineError::Configuration(format!("postgres connect: {e}")))?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| PipelineError::Configuration(format!("migration failed: {e}")))?;

        Ok(Self { pool })
    }

    fn row_to_project(row: &sqlx::postgres::PgRow) -> Project {
        Project {
            id: row.get("id"),
            name: row.get("name"),
            path: row.get("path"),
            description: row.get("description"),
            framework: row.get("framework"),
            language: row.get("language"),
            package_manager: row.get("package_manager"),
            file_count: row.get("file_count"),
            lines_of_code: row.get("lines_of_code"),
            size_bytes: row.get("size_bytes"),
            last_modified: row.get("last_modified"),
            status: row.get("status"),
            is_active: row.get("is_active"),
            confidence: row.get("confidence"),
            discovered_at: row.get("discovered_at"),
            analyzed_at: row.get("analyzed_at"),
            updated_at: row.get("updated_at"),
        }
    }

    fn row_to_analysis(row: &sqlx::postgres::PgRow) -> Analysis {
        let complexity_str: String = row.get("complexity");
        let maturity_str: String = row.get("maturity_level");
        Analysis {
            id: row.get("id"),
            project_id: row.get("project_id"),
            summary: row.get("summary"),
            tech_stack: row.get("tech_stack"),
            complexity: match complexity_str.as_str() {
                "simple" => Complexity::Simple,
                "complex" => Complexity::Complex,
                _ => Complexity::Moderate,
            },
            recommendations: row.get("recommendations"),
            completion_score: row.get("completion_score"),
            maturity_level: match maturity_str.as_str() {
                "mvp" => MaturityLevel::Mvp,
                "production" => MaturityLevel::Production,
                "mature" => MaturityLevel::Mature,
                _ => MaturityLevel::Poc,
            },
            production_gaps: row.get("production_gaps"),
            estimated_value: row.get("estimated_value"),
            model: row.get("model"),
            tokens_used: row.get("tokens_used"),
            cache_hit: row.get("cache_hit"),
            created_at: row.get("created_at"),
        }
    }

    fn complexity_str(c: &Complexity) -> &'static str {
        match c {
            Complexity::Simple => "simple",
            Complexity::Moderate => "moderate",
            Complexity::Complex => "complex",
        }
    }

    fn maturity_str(m: &MaturityLevel) -> &'static str {
        match m {
            MaturityLevel::Poc => "poc",
            MaturityLevel::Mvp => "mvp",
            MaturityLevel::Production => "production",
            MaturityLevel::Mature => "mature",
        }
    }
}

fn db_err(e: sqlx::Error) -> PipelineError {
    PipelineError::TransientIo(e.to_string())
}

#[async_trait]
impl ProjectStore for PgStore {
    async fn get_project(&self, id: Uuid) -> Result<Option<Project>, PipelineError> {
        let row = sqlx::query("SELECT * FROM projects WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(row.as_ref().map(Self::row_to_project))
    }

    async fn get_project_by_path(&self, path: &str) -> Result<Option<Project>, PipelineError> {
        let row = sqlx::query("SELECT * FROM projects WHERE path = $1")
            .bind(path)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(row.as_ref().map(Self::row_to_project))
    }

    async fn list_projects(&self) -> Result<Vec<Project>, PipelineError> {
        let rows = sqlx::query("SELECT * FROM projects ORDER BY discovered_at DESC")
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(rows.iter().map(Self::row_to_project).collect())
    }

    async fn upsert_project_by_path(
        &self,
        path: &str,
        name: &str,
        framework: Option<String>,
        language: Option<String>,
        package_manager: Option<String>,
        confidence: Option<f64>,
    ) -> Result<UpsertOutcome, PipelineError> {
        // `xmax = 0` is true only for the row version just inserted by this
        // statement, which is how Postgres tells an upsert's insert branch
        // apart from its update branch without a round trip.
        let row = sqlx::query(
            r#"
            INSERT INTO projects
                (id, name, path, framework, language, package_manager, confidence,
                 status, is_active, discovered_at, updated_at)
            VALUES
                ($1, $2, $3, $4, $5, $6, $7, 'DISCOVERED', true, now(), now())
            ON CONFLICT (path) DO UPDATE SET
                name = EXCLUDED.name,
                framework = EXCLUDED.framework,
                language = EXCLUDED.language,
                package_manager = EXCLUDED.package_manager,
                confidence = EXCLUDED.confidence,
                is_active = true,
                status = CASE WHEN projects.status = 'ARCHIVED' THEN 'DISCOVERED' ELSE projects.status END,
                updated_at = now()
            RETURNING *, (xmax = 0) AS inserted
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(name)
        .bind(path)
        .bind(framework)
        .bind(language)
        .bind(package_manager)
        .bind(confidence)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;

        let project = Self::row_to_project(&row);
        let inserted: bool = row.get("inserted");
        Ok(if inserted {
            UpsertOutcome::Created(project)
        } else {
            UpsertOutcome::Updated(project)
        })
    }

    async fn update_project_metadata(
        &self,
        id: Uuid,
        file_count: i64,
        lines_of_code: i64,
        size_bytes: i64,
        last_modified: Option<DateTime<Utc>>,
    ) -> Result<(), PipelineError> {
        sqlx::query(
            "UPDATE projects SET file_count = $2, lines_of_code = $3, size_bytes = $4, \
             last_modified = $5, updated_at = now() WHERE id = $1",
        )
        .bind(id)
        .bind(file_count)
        .bind(lines_of_code)
        .bind(size_bytes)
        .bind(last_modified)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn set_status(&self, id: Uuid, status: ProjectStatus) -> Result<(), PipelineError> {
        sqlx::query("UPDATE projects SET status = $2, updated_at = now() WHERE id = $1")
            .bind(id)
            .bind(status)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn mark_removed(&self, path: &str) -> Result<Option<Project>, PipelineError> {
        let row = sqlx::query(
            "UPDATE projects SET is_active = false, status = 'ARCHIVED', updated_at = now() \
             WHERE path = $1 RETURNING *",
        )
        .bind(path)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(row.as_ref().map(Self::row_to_project))
    }

    async fn reset_stuck(&self, id: Uuid) -> Result<(), PipelineError> {
        sqlx::query(
            "UPDATE projects SET status = 'DISCOVERED', updated_at = now() \
             WHERE id = $1 AND status = 'ANALYZING'",
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn list_stuck(&self) -> Result<Vec<Project>, PipelineError> {
        let rows = sqlx::query("SELECT * FROM projects WHERE status = 'ANALYZING'")
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(rows.iter().map(Self::row_to_project).collect())
    }

    async fn insert_analysis_and_mark_analyzed(
        &self,
        project_id: Uuid,
        analysis: Analysis,
    ) -> Result<(), PipelineError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        sqlx::query(
            r#"
            INSERT INTO project_analyses
                (id, project_id, summary, tech_stack, complexity, recommendations,
                 completion_score, maturity_level, production_gaps, estimated_value,
                 model, tokens_used, cache_hit, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, now())
            "#,
        )
        .bind(analysis.id)
        .bind(project_id)
        .bind(&analysis.summary)
        .bind(&analysis.tech_stack)
        .bind(Self::complexity_str(&analysis.complexity))
        .bind(&analysis.recommendations)
        .bind(analysis.completion_score)
        .bind(Self::maturity_str(&analysis.maturity_level))
        .bind(&analysis.production_gaps)
        .bind(&analysis.estimated_value)
        .bind(&analysis.model)
        .bind(analysis.tokens_used)
        .bind(analysis.cache_hit)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        sqlx::query(
            "UPDATE projects SET status = 'ANALYZED', analyzed_at = now(), updated_at = now() \
             WHERE id = $1",
        )
        .bind(project_id)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;
        Ok(())
    }

    async fn list_analyses(&self, project_id: Uuid) -> Result<Vec<Analysis>, PipelineError> {
        let rows = sqlx::query(
            "SELECT * FROM project_analyses WHERE project_id = $1 ORDER BY created_at DESC",
        )
        .bind(project_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(rows.iter().map(Self::row_to_analysis).collect())
    }

    async fn clear_inactive_flags(&self) -> Result<u64, PipelineError> {
        let result = sqlx::query("UPDATE projects SET is_active = true WHERE is_active = false")
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(result.rows_affected())
    }
}
