use serde::{Deserialize, Serialize};

pub const DEFAULT_MAX_RETRIES: u32 = 3;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct TaskId(pub u64);

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    AiRequest,
    FileUpload,
    DataSync,
    Export,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AiRequest => "ai_request",
            Self::FileUpload => "file_upload",
            Self::DataSync => "data_sync",
            Self::Export => "export",
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

/// A unit of deferred work. Persisted as part of the queue snapshot, so every
/// field must survive a JSON round trip.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub kind: TaskKind,
    pub payload: serde_json::Value,
    pub entity_id: Option<String>,
    pub status: TaskStatus,
    pub created_at_unix: i64,
    pub completed_at_unix: Option<i64>,
    pub error: Option<String>,
    pub retry_count: u32,
    pub max_retries: u32,
    /// Earliest unix second at which a retry may be attempted. Zero means
    /// immediately eligible.
    #[serde(default)]
    pub not_before_unix: i64,
}

impl Task {
    pub fn retry_budget_left(&self) -> bool {
        self.retry_count < self.max_retries
    }
}
