//! In-memory `ProjectStore` used by every test in this crate so the suite
//! never needs a live Postgres instance.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{ProjectStore, UpsertOutcome};
use crate::error::PipelineError;
use crate::model::{Analysis, Project, ProjectStatus};

#[derive(Default)]
struct Inner {
    projects: HashMap<Uuid, Project>,
    analyses: Vec<Analysis>,
}

#[derive(Clone, Default)]
pub struct MockStore {
    inner: Arc<RwLock<Inner>>,
}

impl MockStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProjectStore for MockStore {
    async fn get_project(&self, id: Uuid) -> Result<Option<Project>, PipelineError> {
        Ok(self.inner.read().await.projects.get(&id).cloned())
    }

    async fn get_project_by_path(&self, path: &str) -> Result<Option<Project>, PipelineError> {
        Ok(self
            .inner
            .read()
            .await
            .projects
            .values()
            .find(|p| p.path == path)
            .cloned())
    }

    async fn list_projects(&self) -> Result<Vec<Project>, PipelineError> {
        Ok(self.inner.read().await.projects.values().cloned().collect())
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
        let mut inner = self.inner.write().await;
        if let Some(existing) = inner.projects.values_mut().find(|p| p.path == path) {
            existing.name = name.to_string();
            existing.framework = framework;
            existing.language = language;
            existing.package_manager = package_manager;
            existing.confidence = confidence;
            existing.is_active = true;
            if existing.status == ProjectStatus::Archived {
                existing.status = ProjectStatus::Discovered;
            }
            existing.updated_at = Utc::now();
            return Ok(UpsertOutcome::Updated(existing.clone()));
        }

        let now = Utc::now();
        let project = Project {
            id: Uuid::new_v4(),
            name: name.to_string(),
            path: path.to_string(),
            description: None,
            framework,
            language,
            package_manager,
            file_count: 0,
            lines_of_code: 0,
            size_bytes: 0,
            last_modified: None,
            status: ProjectStatus::Discovered,
            is_active: true,
            confidence,
            discovered_at: now,
            analyzed_at: None,
            updated_at: now,
        };
        inner.projects.insert(project.id, project.clone());
        Ok(UpsertOutcome::Created(project))
    }

    async fn update_project_metadata(
        &self,
        id: Uuid,
        file_count: i64,
        lines_of_code: i64,
        size_bytes: i64,
        last_modified: Option<chrono::DateTime<chrono::Utc>>,
    ) -> Result<(), PipelineError> {
        let mut inner = self.inner.write().await;
        if let Some(project) = inner.projects.get_mut(&id) {
            project.file_count = file_count;
            project.lines_of_code = lines_of_code;
            project.size_bytes = size_bytes;
            project.last_modified = last_modified;
            project.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn set_status(&self, id: Uuid, status: ProjectStatus) -> Result<(), PipelineError> {
        let mut inner = self.inner.write().await;
        if let Some(project) = inner.projects.get_mut(&id) {
            project.status = status;
            project.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn mark_removed(&self, path: &str) -> Result<Option<Project>, PipelineError> {
        let mut inner = self.inner.write().await;
        if let Some(project) = inner.projects.values_mut().find(|p| p.path == path) {
            project.is_active = false;
            project.status = ProjectStatus::Archived;
            project.updated_at = Utc::now();
            return Ok(Some(project.clone()));
        }
        Ok(None)
    }

    async fn reset_stuck(&self, id: Uuid) -> Result<(), PipelineError> {
        let mut inner = self.inner.write().await;
        if let Some(project) = inner.projects.get_mut(&id) {
            if project.status == ProjectStatus::Analyzing {
                project.status = ProjectStatus::Discovered;
                project.updated_at = Utc::now();
            }
        }
        Ok(())
    }

    async fn list_stuck(&self) -> Result<Vec<Project>, PipelineError> {
        Ok(self
            .inner
            .read()
            .await
            .projects
            .values()
            .filter(|p| p.status == ProjectStatus::Analyzing)
            .cloned()
            .collect())
    }

    async fn insert_analysis_and_mark_analyzed(
        &self,
        project_id: Uuid,
        analysis: Analysis,
    ) -> Result<(), PipelineError> {
        let mut inner = self.inner.write().await;
        inner.analyses.push(analysis);
        if let Some(project) = inner.projects.get_mut(&project_id) {
            project.status = ProjectStatus::Analyzed;
            project.analyzed_at = Some(Utc::now());
            project.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn list_analyses(&self, project_id: Uuid) -> Result<Vec<Analysis>, PipelineError> {
        Ok(self
            .inner
            .read()
            .await
            .analyses
            .iter()
            .filter(|a| a.project_id == project_id)
            .cloned()
            .collect())
    }

    async fn clear_inactive_flags(&self) -> Result<u64, PipelineError> {
        let mut inner = self.inner.write().await;
        let mut count = 0u64;
        for project in inner.projects.values_mut() {
            if !project.is_active {
                project.is_active = true;
                count += 1;
            }
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn upsert_creates_then_updates() {
        let store = MockStore::new();
        let outcome = store
            .upsert_project_by_path("/watch/demo", "demo", None, None, None, Some(0.9))
            .await
            .unwrap();
        let id = match outcome {
            UpsertOutcome::Created(p) => p.id,
            _ => panic!("expected Created"),
        };

        let outcome2 = store
            .upsert_project_by_path("/watch/demo", "demo-renamed", None, None, None, Some(0.9))
            .await
            .unwrap();
        match outcome2 {
            UpsertOutcome::Updated(p) => assert_eq!(p.id, id),
            _ => panic!("expected Updated"),
        }
    }

    #[tokio::test]
    async fn analyzed_status_requires_analysis_row() {
        let store = MockStore::new();
        let outcome = store
            .upsert_project_by_path("/watch/demo", "demo", None, None, None, None)
            .await
            .unwrap();
        let id = match outcome {
            UpsertOutcome::Created(p) => p.id,
            _ => unreachable!(),
        };

        let analysis = Analysis {
            id: Uuid::new_v4(),
            project_id: id,
            summary: "ok".into(),
            tech_stack: serde_json::json!({}),
            complexity: crate::model::Complexity::Simple,
            recommendations: serde_json::json!([]),
            completion_score: 50,
            maturity_level: crate::model::MaturityLevel::Mvp,
            production_gaps: serde_json::json!([]),
            estimated_value: serde_json::json!({}),
            model: "test".into(),
            tokens_used: 0,
            cache_hit: false,
            created_at: Utc::now(),
        };
        store
            .insert_analysis_and_mark_analyzed(id, analysis)
            .await
            .unwrap();

        let project = store.get_project(id).await.unwrap().unwrap();
        assert_eq!(project.status, ProjectStatus::Analyzed);
        assert!(project.analyzed_at.is_some());
        assert_eq!(store.list_analyses(id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn rediscovering_an_archived_project_revives_it() {
        let store = MockStore::new();
        let outcome = store
            .upsert_project_by_path("/watch/demo", "demo", None, None, None, None)
            .await
            .unwrap();
        let id = match outcome {
            UpsertOutcome::Created(p) => p.id,
            _ => unreachable!(),
        };

        store.mark_removed("/watch/demo").await.unwrap();
        let archived = store.get_project(id).await.unwrap().unwrap();
        assert_eq!(archived.status, ProjectStatus::Archived);
        assert!(!archived.is_active);

        let outcome2 = store
            .upsert_project_by_path("/watch/demo", "demo", None, None, None, None)
            .await
            .unwrap();
        let revived = match outcome2 {
            UpsertOutcome::Updated(p) => p,
            _ => panic!("expected Updated"),
        };
        assert_eq!(revived.status, ProjectStatus::Discovered);
        assert!(revived.is_active);
    }

    #[tokio::test]
    async fn reset_stuck_only_affects_analyzing() {
        let store = MockStore::new();
        let outcome = store
            .upsert_project_by_path("/watch/demo", "demo", None, None, None, None)
            .await
            .unwrap();
        let id = match outcome {
            UpsertOutcome::Created(p) => p.id,
            _ => unreachable!(),
        };
        store.set_status(id, ProjectStatus::Analyzing).await.unwrap();
        store.reset_stuck(id).await.unwrap();
        let project = store.get_project(id).await.unwrap().unwrap();
        assert_eq!(project.status, ProjectStatus::Discovered);
    }
}
