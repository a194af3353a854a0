//! Discovery Subscriber (C4): consumes `WatchEvent`s from the filesystem
//! observer, re-verifies them against the filesystem, runs the validator
//! and metadata extractor, performs an idempotent upsert, and republishes
//! lifecycle events on the bus for the realtime fan-out.

use std::path::Path;
use std::sync::Arc;

use serde_json::json;
use tracing::{info, warn};

use crate::error::PipelineError;
use crate::events::EventBus;
use crate::model::{Event, EventKind, ProjectStatus};
use crate::queue::AnalysisQueue;
use crate::storage::{ProjectStore, UpsertOutcome};
use crate::validator;
use crate::watcher::WatchEvent;

pub struct DiscoverySubscriber {
    store: Arc<dyn ProjectStore>,
    bus: EventBus,
}

impl DiscoverySubscriber {
    pub fn new(store: Arc<dyn ProjectStore>, bus: EventBus) -> Self {
        Self { store, bus }
    }

    /// Drains `rx` until the watcher's sender drops, handling one event at a
    /// time so that, for a single project, discovery is delivered in order.
    pub async fn run(&self, mut rx: tokio::sync::mpsc::Receiver<WatchEvent>) {
        while let Some(event) = rx.recv().await {
            match event {
                WatchEvent::Added(path) => self.handle_added(&path).await,
                WatchEvent::Removed(path) => self.handle_removed(&path).await,
            }
        }
    }

    async fn handle_added(&self, path: &Path) {
        if !path.exists() {
            return;
        }

        let validation = validator::validate(path);
        if !validation.valid {
            return;
        }
        let metadata = validator::extract(path, &validation);
        let path_str = path.to_string_lossy().to_string();

        let outcome = match self
            .store
            .upsert_project_by_path(
                &path_str,
                &metadata.name,
                metadata.framework.clone(),
                metadata.language.clone(),
                metadata.package_manager.clone(),
                Some(validation.confidence),
            )
            .await
        {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(path = %path_str, %err, "failed to upsert discovered project");
                return;
            }
        };

        let (project, kind) = match outcome {
            UpsertOutcome::Created(project) => (project, EventKind::ProjectAdded),
            UpsertOutcome::Updated(project) => (project, EventKind::ProjectUpdated),
        };

        if let Err(err) = self
            .store
            .update_project_metadata(
                project.id,
                metadata.file_count,
                metadata.lines_of_code,
                metadata.size_bytes,
                metadata.last_modified,
            )
            .await
        {
            warn!(path = %path_str, %err, "failed to write extracted metadata");
        }

        info!(path = %path_str, ?kind, "project discovered");
        self.bus
            .publish(Event::new(
                kind,
                Some(project.id),
                json!({
                    "name": project.name,
                    "path": project.path,
                    "framework": project.framework,
                    "language": project.language,
                    "status": project.status.to_string(),
                }),
            ))
            .await;
    }

    async fn handle_removed(&self, path: &Path) {
        let path_str = path.to_string_lossy().to_string();
        match self.store.mark_removed(&path_str).await {
            Ok(Some(project)) => {
                info!(path = %path_str, "project removed");
                self.bus
                    .publish(Event::new(
                        EventKind::ProjectRemoved,
                        Some(project.id),
                        json!({ "path": project.path }),
                    ))
                    .await;
            }
            Ok(None) => {
                warn!(path = %path_str, "removal for unknown project path dropped");
            }
            Err(err) => {
                warn!(path = %path_str, %err, "failed to mark project removed");
            }
        }
    }
}

/// Operator-initiated `ANALYZING -> DISCOVERED` transition; also clears any
/// queued jobs for the project so it can be safely re-enqueued.
pub async fn reset_stuck(
    store: &dyn ProjectStore,
    queue: &AnalysisQueue,
    project_id: uuid::Uuid,
) -> Result<(), PipelineError> {
    store.reset_stuck(project_id).await?;
    queue.clear_jobs_for_project(project_id).await
}

/// One-shot discovery over `root`'s immediate children (or the root itself
/// if it is already a project) without starting the watcher — used by the
/// `scan` CLI subcommand. When `reset_deleted` is set, previously archived
/// rows are given a chance to be picked back up by clearing `isActive`
/// before the scan runs.
pub async fn scan_once(
    store: &dyn ProjectStore,
    bus: &EventBus,
    root: &Path,
    depth: usize,
    reset_deleted: bool,
) -> Result<usize, PipelineError> {
    if reset_deleted {
        let cleared = store.clear_inactive_flags().await?;
        if cleared > 0 {
            info!(cleared, "reset-deleted cleared inactive flags before scan");
        }
    }

    let candidates = collect_candidates(root, depth);
    let mut discovered = 0usize;
    for candidate in &candidates {
        let validation = validator::validate(candidate);
        if !validation.valid {
            continue;
        }
        let metadata = validator::extract(candidate, &validation);
        let path_str = candidate.to_string_lossy().to_string();
        let outcome = store
            .upsert_project_by_path(
                &path_str,
                &metadata.name,
                metadata.framework.clone(),
                metadata.language.clone(),
                metadata.package_manager.clone(),
                Some(validation.confidence),
            )
            .await?;
        let (project, kind) = match outcome {
            UpsertOutcome::Created(project) => (project, EventKind::ProjectAdded),
            UpsertOutcome::Updated(project) => (project, EventKind::ProjectUpdated),
        };
        store
            .update_project_metadata(
                project.id,
                metadata.file_count,
                metadata.lines_of_code,
                metadata.size_bytes,
                metadata.last_modified,
            )
            .await?;
        bus.publish(Event::new(
            kind,
            Some(project.id),
            json!({ "name": project.name, "path": project.path }),
        ))
        .await;
        discovered += 1;
    }
    Ok(discovered)
}

fn collect_candidates(root: &Path, depth: usize) -> Vec<std::path::PathBuf> {
    if depth == 0 {
        return vec![root.to_path_buf()];
    }
    std::fs::read_dir(root)
        .map(|entries| {
            entries
                .flatten()
                .map(|e| e.path())
                .filter(|p| p.is_dir())
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MockStore;
    use tempfile::tempdir;

    #[tokio::test]
    async fn added_event_creates_project_and_publishes() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join("package.json"),
            r#"{"dependencies":{"react":"^18"}}"#,
        )
        .unwrap();
        std::fs::create_dir(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("src/index.tsx"), "export {}").unwrap();

        let store: Arc<dyn ProjectStore> = Arc::new(MockStore::new());
        let bus = EventBus::new(16);
        let mut subscriber_rx = bus.subscribe();
        let subscriber = DiscoverySubscriber::new(store.clone(), bus);

        subscriber.handle_added(dir.path()).await;

        let event = subscriber_rx.recv().await.unwrap();
        assert!(matches!(event.kind, EventKind::ProjectAdded));

        let project = store
            .get_project_by_path(&dir.path().to_string_lossy())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(project.status, ProjectStatus::Discovered);
        assert!(project.is_active);
        assert_eq!(project.framework.as_deref(), Some("React"));
    }

    #[tokio::test]
    async fn removed_event_on_unknown_path_is_dropped_quietly() {
        let store: Arc<dyn ProjectStore> = Arc::new(MockStore::new());
        let bus = EventBus::new(16);
        let mut subscriber_rx = bus.subscribe();
        let subscriber = DiscoverySubscriber::new(store, bus);

        subscriber
            .handle_removed(Path::new("/does/not/exist"))
            .await;

        assert!(subscriber_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn vanished_path_is_silently_dropped() {
        let store: Arc<dyn ProjectStore> = Arc::new(MockStore::new());
        let bus = EventBus::new(16);
        let subscriber = DiscoverySubscriber::new(store.clone(), bus);

        subscriber.handle_added(Path::new("/no/such/directory")).await;

        assert!(store.list_projects().await.unwrap().is_empty());
    }
}
