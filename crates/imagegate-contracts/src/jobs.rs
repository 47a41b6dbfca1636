use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Pending,
    Succeeded,
    Failed,
    Unknown,
}

impl TaskStatus {
    /// Maps a provider status string. Matching is case-insensitive; values
    /// nobody has documented land on `Unknown` and keep the job polling.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "SUCCEED" | "SUCCEEDED" | "SUCCESS" | "COMPLETED" => Self::Succeeded,
            "FAILED" | "FAILURE" | "ERROR" => Self::Failed,
            "PENDING" | "QUEUED" | "RUNNING" | "PROCESSING" | "IN_PROGRESS" => Self::Pending,
            _ => Self::Unknown,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Succeeded => "SUCCEEDED",
            Self::Failed => "FAILED",
            Self::Unknown => "UNKNOWN",
        }
    }
}

/// A submitted asynchronous job, tracked by its provider-assigned handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationJob {
    pub handle: String,
    pub status: TaskStatus,
    pub attempts: u32,
    pub max_attempts: u32,
    pub poll_interval: Duration,
    pub elapsed: Duration,
}

impl GenerationJob {
    pub fn new(handle: impl Into<String>, max_attempts: u32, poll_interval: Duration) -> Self {
        Self {
            handle: handle.into(),
            status: TaskStatus::Pending,
            attempts: 0,
            max_attempts,
            poll_interval,
            elapsed: Duration::ZERO,
        }
    }

    /// A job answered in the submission call itself, with no handle to poll.
    pub fn completed_inline(elapsed: Duration) -> Self {
        Self {
            handle: String::new(),
            status: TaskStatus::Succeeded,
            attempts: 0,
            max_attempts: 0,
            poll_interval: Duration::ZERO,
            elapsed,
        }
    }

    pub fn attempts_exhausted(&self) -> bool {
        self.attempts >= self.max_attempts
    }

    /// Fields every terminal report carries.
    pub fn report_payload(&self) -> Map<String, Value> {
        let mut payload = Map::new();
        payload.insert("task_id".to_string(), Value::String(self.handle.clone()));
        payload.insert(
            "status".to_string(),
            Value::String(self.status.as_str().to_string()),
        );
        payload.insert("attempts".to_string(), Value::from(self.attempts));
        payload.insert("max_attempts".to_string(), Value::from(self.max_attempts));
        payload.insert(
            "elapsed_ms".to_string(),
            Value::from(self.elapsed.as_millis() as u64),
        );
        payload
    }
}
