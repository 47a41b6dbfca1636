use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::jobs::{GenerationJob, TaskStatus};

const INLINE_PAYLOAD_KEYS: &[&str] = &["b64_json", "base64", "b64", "image_base64", "data"];
const MAX_EVENT_STRING_CHARS: usize = 2048;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskEventKind {
    TaskSucceeded,
    TaskFailed,
    TaskTimedOut,
}

/// One line of the task report log, written when an async job ends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskReport {
    #[serde(rename = "type")]
    pub kind: TaskEventKind,
    pub session_id: String,
    pub ts: String,
    pub task_id: String,
    pub status: TaskStatus,
    pub attempts: u32,
    pub max_attempts: u32,
    pub elapsed_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_count: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagnostics: Option<Vec<String>>,
    /// Upstream failure payload, already passed through [`sanitize_payload`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<Value>,
}

/// Append-only JSONL log of terminal task reports.
///
/// Each report is one compact JSON object stamped with the writer's session
/// id and a UTC timestamp. Failure payloads never reach disk unsanitized.
#[derive(Debug, Clone)]
pub struct EventWriter {
    inner: Arc<EventWriterInner>,
}

#[derive(Debug)]
struct EventWriterInner {
    path: PathBuf,
    session_id: String,
    lock: Mutex<()>,
}

impl EventWriter {
    pub fn new(path: impl Into<PathBuf>, session_id: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(EventWriterInner {
                path: path.into(),
                session_id: session_id.into(),
                lock: Mutex::new(()),
            }),
        }
    }

    pub fn task_succeeded(
        &self,
        job: &GenerationJob,
        image_count: usize,
        diagnostics: &[String],
    ) -> anyhow::Result<TaskReport> {
        let mut report = self.report(TaskEventKind::TaskSucceeded, job);
        report.image_count = Some(image_count);
        report.diagnostics = Some(diagnostics.to_vec());
        self.append(report)
    }

    pub fn task_failed(&self, job: &GenerationJob, raw: &Value) -> anyhow::Result<TaskReport> {
        let mut report = self.report(TaskEventKind::TaskFailed, job);
        report.detail = Some(sanitize_payload(raw));
        self.append(report)
    }

    pub fn task_timed_out(&self, job: &GenerationJob) -> anyhow::Result<TaskReport> {
        let report = self.report(TaskEventKind::TaskTimedOut, job);
        self.append(report)
    }

    fn report(&self, kind: TaskEventKind, job: &GenerationJob) -> TaskReport {
        TaskReport {
            kind,
            session_id: self.inner.session_id.clone(),
            ts: now_utc_iso(),
            task_id: job.handle.clone(),
            status: job.status,
            attempts: job.attempts,
            max_attempts: job.max_attempts,
            elapsed_ms: job.elapsed.as_millis() as u64,
            image_count: None,
            diagnostics: None,
            detail: None,
        }
    }

    fn append(&self, report: TaskReport) -> anyhow::Result<TaskReport> {
        if let Some(parent) = self.inner.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let line = serde_json::to_string(&report)?;
        let _guard = self
            .inner
            .lock
            .lock()
            .map_err(|_| anyhow::anyhow!("event writer lock poisoned"))?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.inner.path)?;
        file.write_all(line.as_bytes())?;
        file.write_all(b"\n")?;

        Ok(report)
    }
}

/// Strips inline image payloads and overlong strings from a provider payload
/// before it is written to a log line or event.
pub fn sanitize_payload(value: &Value) -> Value {
    match value {
        Value::Null | Value::Bool(_) | Value::Number(_) => value.clone(),
        Value::String(text) => {
            if text.starts_with("data:") {
                return Value::String("<inline image omitted>".to_string());
            }
            if text.chars().count() > MAX_EVENT_STRING_CHARS {
                let clipped: String = text.chars().take(MAX_EVENT_STRING_CHARS).collect();
                return Value::String(clipped + "…");
            }
            value.clone()
        }
        Value::Array(rows) => Value::Array(rows.iter().map(sanitize_payload).collect()),
        Value::Object(map) => {
            let mut out = Map::new();
            for (key, row) in map {
                let lowered = key.to_ascii_lowercase();
                if INLINE_PAYLOAD_KEYS.contains(&lowered.as_str()) && row.is_string() {
                    out.insert(key.clone(), Value::String("<omitted>".to_string()));
                    continue;
                }
                out.insert(key.clone(), sanitize_payload(row));
            }
            Value::Object(out)
        }
    }
}

fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::time::Duration;

    use chrono::DateTime;
    use serde_json::json;

    use super::*;

    fn finished_job(status: TaskStatus) -> GenerationJob {
        let mut job = GenerationJob::new("task-1", 60, Duration::from_secs(5));
        job.status = status;
        job.attempts = 4;
        job.elapsed = Duration::from_millis(20_500);
        job
    }

    fn read_lines(path: &std::path::Path) -> anyhow::Result<Vec<Value>> {
        let content = fs::read_to_string(path)?;
        content
            .lines()
            .map(|line| Ok(serde_json::from_str(line)?))
            .collect()
    }

    #[test]
    fn success_report_is_one_compact_line() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("events.jsonl");
        let writer = EventWriter::new(&path, "session-123");

        let report = writer.task_succeeded(&finished_job(TaskStatus::Succeeded), 2, &[])?;

        let lines = read_lines(&path)?;
        assert_eq!(lines.len(), 1);
        let parsed = &lines[0];
        assert_eq!(parsed["type"], json!("task_succeeded"));
        assert_eq!(parsed["session_id"], json!("session-123"));
        assert_eq!(parsed["task_id"], json!("task-1"));
        assert_eq!(parsed["status"], json!("SUCCEEDED"));
        assert_eq!(parsed["attempts"], json!(4));
        assert_eq!(parsed["max_attempts"], json!(60));
        assert_eq!(parsed["elapsed_ms"], json!(20_500));
        assert_eq!(parsed["image_count"], json!(2));
        assert_eq!(parsed["diagnostics"], json!([]));
        assert!(parsed.get("detail").is_none());
        assert_eq!(serde_json::from_value::<TaskReport>(parsed.clone())?, report);

        DateTime::parse_from_rfc3339(&report.ts)?;
        Ok(())
    }

    #[test]
    fn failure_report_never_writes_inline_image_data() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("events.jsonl");
        let writer = EventWriter::new(&path, "session-123");
        let raw = json!({
            "task_status": "FAILED",
            "error": {"message": "nsfw"},
            "output": {"b64_json": "QUJD".repeat(4096)},
            "preview": "data:image/png;base64,AAAA"
        });

        let report = writer.task_failed(&finished_job(TaskStatus::Failed), &raw)?;

        let written = fs::read_to_string(&path)?;
        assert!(!written.contains("QUJD"));
        assert!(!written.contains("data:image/png"));
        let detail = report.detail.unwrap_or_default();
        assert_eq!(detail["error"]["message"], json!("nsfw"));
        assert_eq!(detail["output"]["b64_json"], json!("<omitted>"));
        assert!(report.image_count.is_none());
        Ok(())
    }

    #[test]
    fn reports_append_and_create_parent_dirs() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("nested").join("events.jsonl");
        let writer = EventWriter::new(&path, "session-123");

        writer.task_timed_out(&finished_job(TaskStatus::Pending))?;
        writer.task_succeeded(&finished_job(TaskStatus::Succeeded), 1, &[])?;

        let lines = read_lines(&path)?;
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["type"], json!("task_timed_out"));
        assert_eq!(lines[0]["status"], json!("PENDING"));
        assert!(lines[0].get("image_count").is_none());
        assert_eq!(lines[1]["type"], json!("task_succeeded"));
        Ok(())
    }

    #[test]
    fn sanitize_omits_inline_images() {
        let raw = json!({
            "task_status": "FAILED",
            "output": {
                "images": [
                    {"b64_json": "AAAA"},
                    "data:image/png;base64,AAAA",
                    {"url": "https://cdn.example.com/x.png"}
                ]
            }
        });
        let clean = sanitize_payload(&raw);
        assert_eq!(clean["task_status"], json!("FAILED"));
        assert_eq!(clean["output"]["images"][0]["b64_json"], json!("<omitted>"));
        assert_eq!(
            clean["output"]["images"][1],
            json!("<inline image omitted>")
        );
        assert_eq!(
            clean["output"]["images"][2]["url"],
            json!("https://cdn.example.com/x.png")
        );
    }
}
