//! Submit-then-poll driver for providers whose image jobs run asynchronously.
//!
//! A job moves `submitted -> (poll)* -> succeeded | failed | timed out`. The
//! wait between polls goes through [`Sleeper`] so the whole attempt budget
//! can be exercised without real time passing.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use imagegate_contracts::events::{sanitize_payload, EventWriter, TaskReport};
use imagegate_contracts::images::{ImageMode, ImageReference};
use imagegate_contracts::jobs::{GenerationJob, TaskStatus};
use reqwest::Url;
use serde_json::{json, Map, Value};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{GatewayError, Result};
use crate::extract::extract_image_references;
use crate::providers::ProviderRequest;
use crate::transport::{
    parse_url, send_json, FormField, HttpTransport, RequestBody, TransportRequest,
};
use crate::util::{truncate_text, value_as_non_empty_string};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_MAX_POLL_ATTEMPTS: u32 = 60;
pub const DEFAULT_UPLOAD_FIELD: &str = "image";
pub const DEFAULT_IMAGE_SIZE: &str = "1024x1024";
pub const TASK_TYPE_HEADER: &str = "X-Task-Type";

const FAILURE_DETAIL_MAX_CHARS: usize = 2048;

#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskSettings {
    pub api_base: String,
    pub api_key: Option<String>,
    /// Sent as `X-Task-Type` on status queries when set.
    pub task_type: Option<String>,
    pub upload_field: String,
    pub poll_interval: Duration,
    pub max_attempts: u32,
    pub request_timeout: Duration,
}

impl TaskSettings {
    pub fn new(api_base: impl Into<String>) -> Self {
        Self {
            api_base: api_base.into().trim().trim_end_matches('/').to_string(),
            api_key: None,
            task_type: None,
            upload_field: DEFAULT_UPLOAD_FIELD.to_string(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_attempts: DEFAULT_MAX_POLL_ATTEMPTS,
            request_timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TaskOutcome {
    pub job: GenerationJob,
    pub images: Vec<ImageReference>,
    pub diagnostics: Vec<String>,
    pub raw: Value,
}

pub struct TaskOrchestrator {
    transport: Arc<dyn HttpTransport>,
    settings: TaskSettings,
    sleeper: Arc<dyn Sleeper>,
    events: Option<EventWriter>,
}

impl TaskOrchestrator {
    pub fn new(transport: Arc<dyn HttpTransport>, settings: TaskSettings) -> Self {
        Self {
            transport,
            settings,
            sleeper: Arc::new(TokioSleeper),
            events: None,
        }
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn with_events(mut self, events: Option<EventWriter>) -> Self {
        self.events = events;
        self
    }

    pub fn settings(&self) -> &TaskSettings {
        &self.settings
    }

    pub async fn run(&self, request: &ProviderRequest) -> Result<TaskOutcome> {
        let started = Instant::now();
        let submission = self.build_submission(request)?;
        let payload = self.submit(submission).await?;

        let Some(handle) = job_handle(&payload) else {
            debug!("submission answered without a task id; treating it as the result");
            let job = GenerationJob::completed_inline(started.elapsed());
            return Ok(self.finish_success(job, payload));
        };
        info!(task_id = %handle, mode = request.mode.as_str(), "image task submitted");
        self.poll_until_terminal(handle, started).await
    }

    fn build_submission(&self, request: &ProviderRequest) -> Result<TransportRequest> {
        let size = request
            .size
            .clone()
            .unwrap_or_else(|| DEFAULT_IMAGE_SIZE.to_string());
        let (endpoint, body) = match request.mode {
            ImageMode::Edit => {
                if request.images.is_empty() {
                    return Err(GatewayError::MissingReferenceImage);
                }
                let mut fields = vec![
                    FormField::text("model", request.model.clone()),
                    FormField::text("prompt", request.prompt.clone()),
                    FormField::text("n", request.n.max(1).to_string()),
                    FormField::text("size", size),
                    FormField::text("response_format", "url"),
                ];
                for image in &request.images {
                    fields.push(FormField::file(
                        self.settings.upload_field.clone(),
                        image.upload_file_name(),
                        image.media_type.clone(),
                        image.bytes.clone(),
                    ));
                }
                ("images/edits", RequestBody::Multipart(fields))
            }
            ImageMode::Generate => {
                let mut payload = Map::new();
                payload.insert("model".to_string(), json!(request.model));
                payload.insert("prompt".to_string(), json!(request.prompt));
                match request.images.as_slice() {
                    [] => {}
                    [single] => {
                        payload.insert("image".to_string(), json!(single.data_url));
                    }
                    many => {
                        let urls: Vec<&str> =
                            many.iter().map(|image| image.data_url.as_str()).collect();
                        payload.insert("image".to_string(), json!(urls));
                    }
                }
                payload.insert("response_format".to_string(), json!("url"));
                payload.insert("size".to_string(), json!(size));
                payload.insert("n".to_string(), json!(1));
                ("images/generations", RequestBody::Json(Value::Object(payload)))
            }
        };
        let url = parse_url(&format!("{}/{endpoint}", self.settings.api_base))?;
        Ok(TransportRequest::post(url, body).bearer_auth(self.settings.api_key.as_deref()))
    }

    async fn submit(&self, request: TransportRequest) -> Result<Value> {
        send_json(
            self.transport.as_ref(),
            "task submission",
            self.settings.request_timeout,
            request,
        )
        .await
    }

    async fn poll_until_terminal(&self, handle: String, started: Instant) -> Result<TaskOutcome> {
        let status_url = self.status_url(&handle)?;
        let mut job = GenerationJob::new(
            handle,
            self.settings.max_attempts,
            self.settings.poll_interval,
        );

        while !job.attempts_exhausted() {
            self.sleeper.sleep(job.poll_interval).await;
            job.attempts += 1;
            let payload = self.query_status(&status_url, &job).await;
            job.elapsed = started.elapsed();
            let Some(payload) = payload else {
                continue;
            };

            job.status = task_status(&payload);
            match job.status {
                TaskStatus::Succeeded => return Ok(self.finish_success(job, payload)),
                TaskStatus::Failed => return Err(self.finish_failure(job, &payload)),
                TaskStatus::Pending | TaskStatus::Unknown => {
                    debug!(
                        task_id = %job.handle,
                        attempt = job.attempts,
                        status = job.status.as_str(),
                        "task still running"
                    );
                }
            }
        }

        job.elapsed = started.elapsed();
        Err(self.finish_timeout(job))
    }

    fn status_url(&self, handle: &str) -> Result<Url> {
        let mut url = parse_url(&format!("{}/tasks", self.settings.api_base))?;
        url.path_segments_mut()
            .map_err(|_| GatewayError::invalid_request("task API base cannot carry a path"))?
            .push(handle);
        Ok(url)
    }

    /// One poll attempt. Failures are transient and yield `None`; when the
    /// task-type header was sent, one immediate retry goes out without it.
    async fn query_status(&self, url: &Url, job: &GenerationJob) -> Option<Value> {
        let mut request =
            TransportRequest::get(url.clone()).bearer_auth(self.settings.api_key.as_deref());
        if let Some(task_type) = self.settings.task_type.as_deref() {
            request = request.header(TASK_TYPE_HEADER, task_type);
        }

        let err = match self.status_once(request.clone()).await {
            Ok(payload) => return Some(payload),
            Err(err) => err,
        };
        if request.header_value(TASK_TYPE_HEADER).is_some() {
            debug!(
                task_id = %job.handle,
                attempt = job.attempts,
                error = %err,
                "status query failed with task type header; retrying without it"
            );
            match self
                .status_once(request.without_header(TASK_TYPE_HEADER))
                .await
            {
                Ok(payload) => return Some(payload),
                Err(retry_err) => {
                    warn!(
                        task_id = %job.handle,
                        attempt = job.attempts,
                        error = %retry_err,
                        "status query failed; will poll again"
                    );
                    return None;
                }
            }
        }
        warn!(
            task_id = %job.handle,
            attempt = job.attempts,
            error = %err,
            "status query failed; will poll again"
        );
        None
    }

    async fn status_once(&self, request: TransportRequest) -> Result<Value> {
        send_json(
            self.transport.as_ref(),
            "task status query",
            self.settings.request_timeout,
            request,
        )
        .await
    }

    fn finish_success(&self, job: GenerationJob, payload: Value) -> TaskOutcome {
        let mut images = extract_image_references(&payload);
        if images.is_empty() {
            if let Some(inner) = payload.get("data").filter(|value| value.is_object()) {
                images = extract_image_references(inner);
            }
        }
        let mut diagnostics = Vec::new();
        if images.is_empty() {
            diagnostics.push(format!(
                "task {} succeeded but no image could be extracted from the response",
                display_handle(&job)
            ));
        }

        info!(
            task_id = %display_handle(&job),
            attempts = job.attempts,
            elapsed_ms = job.elapsed.as_millis() as u64,
            images = images.len(),
            "image task succeeded"
        );
        self.record("task_succeeded", |events| {
            events.task_succeeded(&job, images.len(), &diagnostics)
        });

        TaskOutcome {
            job,
            images,
            diagnostics,
            raw: payload,
        }
    }

    fn finish_failure(&self, job: GenerationJob, payload: &Value) -> GatewayError {
        let detail = truncate_text(
            &sanitize_payload(payload).to_string(),
            FAILURE_DETAIL_MAX_CHARS,
        );
        warn!(
            task_id = %job.handle,
            attempts = job.attempts,
            elapsed_ms = job.elapsed.as_millis() as u64,
            detail = %detail,
            "image task failed upstream"
        );
        self.record("task_failed", |events| events.task_failed(&job, payload));

        GatewayError::UpstreamTaskFailed {
            task_id: job.handle,
            attempts: job.attempts,
            elapsed: job.elapsed,
            detail,
        }
    }

    fn finish_timeout(&self, job: GenerationJob) -> GatewayError {
        warn!(
            task_id = %job.handle,
            attempts = job.attempts,
            elapsed_ms = job.elapsed.as_millis() as u64,
            "image task polling exhausted"
        );
        self.record("task_timed_out", |events| events.task_timed_out(&job));

        GatewayError::PollTimeout {
            task_id: job.handle,
            attempts: job.attempts,
            elapsed: job.elapsed,
        }
    }

    fn record<F>(&self, event_type: &str, write: F)
    where
        F: FnOnce(&EventWriter) -> anyhow::Result<TaskReport>,
    {
        let Some(events) = self.events.as_ref() else {
            return;
        };
        if let Err(err) = write(events) {
            warn!(event = event_type, error = %format!("{err:#}"), "failed to write task event");
        }
    }
}

fn display_handle(job: &GenerationJob) -> &str {
    if job.handle.is_empty() {
        "<inline>"
    } else {
        job.handle.as_str()
    }
}

fn job_handle(payload: &Value) -> Option<String> {
    value_as_non_empty_string(payload.get("task_id")).or_else(|| {
        value_as_non_empty_string(payload.get("data").and_then(|data| data.get("task_id")))
    })
}

fn task_status(payload: &Value) -> TaskStatus {
    let nested = payload.get("data");
    [
        payload.get("task_status"),
        payload.get("status"),
        nested.and_then(|data| data.get("task_status")),
        nested.and_then(|data| data.get("status")),
    ]
    .into_iter()
    .flatten()
    .find_map(Value::as_str)
    .map(TaskStatus::parse)
    .unwrap_or(TaskStatus::Unknown)
}
