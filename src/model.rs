//! Shared data-model types: `Project`, `Analysis`, `Tag`, cache and queue
//! records, and the bus `Event` envelope. Dynamic producer/consumer blobs
//! (`techStack`, `recommendations`, `estimatedValue`, `productionGaps`) are
//! modeled as opaque `serde_json::Value` at rest and parsed defensively
//! only when presented to a caller.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "project_status", rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum ProjectStatus {
    Discovered,
    Queued,
    Analyzing,
    Analyzed,
    Error,
    Archived,
}

impl std::fmt::Display for ProjectStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ProjectStatus::Discovered => "DISCOVERED",
            ProjectStatus::Queued => "QUEUED",
            ProjectStatus::Analyzing => "ANALYZING",
            ProjectStatus::Analyzed => "ANALYZED",
            ProjectStatus::Error => "ERROR",
            ProjectStatus::Archived => "ARCHIVED",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: Uuid,
    pub name: String,
    pub path: String,
    pub description: Option<String>,
    pub framework: Option<String>,
    pub language: Option<String>,
    pub package_manager: Option<String>,
    pub file_count: i64,
    pub lines_of_code: i64,
    pub size_bytes: i64,
    pub last_modified: Option<DateTime<Utc>>,
    pub status: ProjectStatus,
    pub is_active: bool,
    pub confidence: Option<f64>,
    pub discovered_at: DateTime<Utc>,
    pub analyzed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Simple,
    Moderate,
    Complex,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MaturityLevel {
    Poc,
    Mvp,
    Production,
    Mature,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Analysis {
    pub id: Uuid,
    pub project_id: Uuid,
    pub summary: String,
    pub tech_stack: serde_json::Value,
    pub complexity: Complexity,
    pub recommendations: serde_json::Value,
    pub completion_score: i32,
    pub maturity_level: MaturityLevel,
    pub production_gaps: serde_json::Value,
    pub estimated_value: serde_json::Value,
    pub model: String,
    pub tokens_used: i64,
    pub cache_hit: bool,
    pub created_at: DateTime<Utc>,
}

/// The structured result a completed analysis job produces, independent of
/// storage — `AnalysisResult` becomes an `Analysis` row once persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub summary: String,
    pub tech_stack: serde_json::Value,
    pub complexity: Complexity,
    pub recommendations: serde_json::Value,
    pub completion_score: i32,
    pub maturity_level: MaturityLevel,
    pub production_gaps: serde_json::Value,
    pub estimated_value: serde_json::Value,
    pub model: String,
    pub tokens_used: i64,
}

impl AnalysisResult {
    /// Defaulted result for when the external provider's content is unparseable.
    /// Never fails — carries a `tooling`/`high` recommendation telling an
    /// operator manual review is required.
    pub fn fallback(model: &str) -> Self {
        Self {
            summary: "Automated analysis could not be parsed; manual review required.".into(),
            tech_stack: serde_json::json!({}),
            complexity: Complexity::Moderate,
            recommendations: serde_json::json!([{
                "kind": "tooling",
                "priority": "high",
                "message": "Automated analysis output was unparseable; review this project manually.",
            }]),
            completion_score: 0,
            maturity_level: MaturityLevel::Poc,
            production_gaps: serde_json::json!([]),
            estimated_value: serde_json::json!({"value": 0, "confidence": "low"}),
            model: model.to_string(),
            tokens_used: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tag {
    pub id: Uuid,
    pub name: String,
    pub color: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub project_hash: String,
    pub last_modified: DateTime<Utc>,
    pub result: AnalysisResult,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High = 1,
    Normal = 2,
    Low = 3,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobPayload {
    pub project_id: Uuid,
    pub project_path: String,
    pub project_name: String,
    pub priority: Priority,
    pub force_refresh: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Waiting,
    Active,
    Completed,
    Failed,
    Delayed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobProgress {
    pub status: String,
    pub percent: u8,
    pub message: Option<String>,
    pub error: Option<String>,
}

impl JobProgress {
    pub fn new(status: impl Into<String>, percent: u8) -> Self {
        Self {
            status: status.into(),
            percent,
            message: None,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: "failed".into(),
            percent: 0,
            message: None,
            error: Some(error.into()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub name: String,
    pub payload: JobPayload,
    pub state: JobState,
    /// Monotonic enqueue sequence, used to preserve insertion order within a
    /// priority level across both the waiting and delayed sets.
    pub sequence: i64,
    pub attempts: u32,
    pub max_attempts: u32,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub failed_reason: Option<String>,
    pub progress: JobProgress,
}

/// Bus message envelope. `data` is an opaque payload whose shape is owned by
/// the event `kind`, not by the bus itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub project_id: Option<Uuid>,
    pub data: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    #[serde(rename = "project:added")]
    ProjectAdded,
    #[serde(rename = "project:updated")]
    ProjectUpdated,
    #[serde(rename = "project:removed")]
    ProjectRemoved,
    #[serde(rename = "analysis:started")]
    AnalysisStarted,
    #[serde(rename = "analysis:progress")]
    AnalysisProgress,
    #[serde(rename = "analysis:completed")]
    AnalysisCompleted,
    #[serde(rename = "analysis:failed")]
    AnalysisFailed,
}

impl Event {
    pub fn new(kind: EventKind, project_id: Option<Uuid>, data: serde_json::Value) -> Self {
        Self {
            kind,
            project_id,
            data,
            timestamp: Utc::now(),
        }
    }
}
