//! HTTP seam shared by the fetcher, the orchestrator and the providers.
//!
//! Responses expose their body as a chunk stream so callers can bound what
//! they read and cancel a transfer by dropping the stream.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::BoxStream;
use futures_util::{StreamExt, TryStreamExt};
use reqwest::header::{HeaderMap, CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::multipart::{Form as MultipartForm, Part as MultipartPart};
use reqwest::redirect::Policy as RedirectPolicy;
use reqwest::{Client as HttpClient, Method, Url};
use serde_json::Value;

use crate::error::{GatewayError, Result};
use crate::util::truncate_text;

pub type BodyStream = BoxStream<'static, Result<Bytes>>;

const ERROR_BODY_MAX_CHARS: usize = 512;
const ERROR_BODY_MAX_BYTES: usize = ERROR_BODY_MAX_CHARS * 4;

#[derive(Debug, Clone)]
pub struct TransportRequest {
    pub method: Method,
    pub url: Url,
    pub headers: Vec<(String, String)>,
    pub body: RequestBody,
}

impl TransportRequest {
    pub fn get(url: Url) -> Self {
        Self {
            method: Method::GET,
            url,
            headers: Vec::new(),
            body: RequestBody::Empty,
        }
    }

    pub fn post(url: Url, body: RequestBody) -> Self {
        Self {
            method: Method::POST,
            url,
            headers: Vec::new(),
            body,
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn bearer_auth(self, token: Option<&str>) -> Self {
        match token.map(str::trim).filter(|value| !value.is_empty()) {
            Some(token) => self.header("Authorization", format!("Bearer {token}")),
            None => self,
        }
    }

    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn without_header(&self, name: &str) -> Self {
        let mut copy = self.clone();
        copy.headers.retain(|(key, _)| !key.eq_ignore_ascii_case(name));
        copy
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    Empty,
    Json(Value),
    Multipart(Vec<FormField>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct FormField {
    pub name: String,
    pub value: FormValue,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FormValue {
    Text(String),
    File {
        file_name: String,
        media_type: String,
        bytes: Vec<u8>,
    },
}

impl FormField {
    pub fn text(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: FormValue::Text(value.into()),
        }
    }

    pub fn file(
        name: impl Into<String>,
        file_name: impl Into<String>,
        media_type: impl Into<String>,
        bytes: Vec<u8>,
    ) -> Self {
        Self {
            name: name.into(),
            value: FormValue::File {
                file_name: file_name.into(),
                media_type: media_type.into(),
                bytes,
            },
        }
    }
}

pub struct TransportResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: BodyStream,
}

impl TransportResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn content_length(&self) -> Option<u64> {
        self.headers
            .get(CONTENT_LENGTH)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse::<u64>().ok())
    }

    pub fn content_type(&self) -> Option<&str> {
        self.headers
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
    }

    pub async fn bytes(self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        let mut body = self.body;
        while let Some(chunk) = body.next().await {
            out.extend_from_slice(&chunk?);
        }
        Ok(out)
    }

    pub async fn text(self) -> Result<String> {
        let bytes = self.bytes().await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    pub async fn json(self) -> Result<Value> {
        let text = self.text().await?;
        serde_json::from_str(&text).map_err(|err| {
            GatewayError::malformed(format!(
                "expected JSON ({err}): {}",
                truncate_text(&text, ERROR_BODY_MAX_CHARS)
            ))
        })
    }

    /// Turns a non-2xx response into `UpstreamError`. At most
    /// `ERROR_BODY_MAX_BYTES` of the body are read, best-effort; the rest of
    /// the transfer is dropped.
    pub async fn into_upstream_error(self) -> GatewayError {
        let status = self.status;
        let mut collected = Vec::new();
        let mut body = self.body;
        while collected.len() < ERROR_BODY_MAX_BYTES {
            match body.next().await {
                Some(Ok(chunk)) => collected.extend_from_slice(&chunk),
                Some(Err(_)) | None => break,
            }
        }
        drop(body);
        collected.truncate(ERROR_BODY_MAX_BYTES);
        let text = String::from_utf8_lossy(&collected);
        GatewayError::UpstreamError {
            status,
            body: truncate_text(text.trim(), ERROR_BODY_MAX_CHARS),
        }
    }
}

impl std::fmt::Debug for TransportResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn execute(&self, request: TransportRequest) -> Result<TransportResponse>;
}

/// Production transport over an async `reqwest` client.
///
/// Redirects are never followed here: a 3xx reaches the caller, which decides
/// whether the next hop is allowed.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    http: HttpClient,
}

impl ReqwestTransport {
    pub fn new() -> Result<Self> {
        let http = HttpClient::builder()
            .redirect(RedirectPolicy::none())
            .build()?;
        Ok(Self { http })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn execute(&self, request: TransportRequest) -> Result<TransportResponse> {
        let mut builder = self.http.request(request.method, request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        builder = match request.body {
            RequestBody::Empty => builder,
            RequestBody::Json(payload) => builder.json(&payload),
            RequestBody::Multipart(fields) => builder.multipart(multipart_form(fields)?),
        };

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let body = response
            .bytes_stream()
            .map_err(GatewayError::from)
            .boxed();
        Ok(TransportResponse {
            status,
            headers,
            body,
        })
    }
}

fn multipart_form(fields: Vec<FormField>) -> Result<MultipartForm> {
    let mut form = MultipartForm::new();
    for field in fields {
        form = match field.value {
            FormValue::Text(value) => form.text(field.name, value),
            FormValue::File {
                file_name,
                media_type,
                bytes,
            } => {
                let part = MultipartPart::bytes(bytes)
                    .file_name(file_name)
                    .mime_str(&media_type)
                    .map_err(|err| {
                        GatewayError::invalid_request(format!(
                            "invalid media type '{media_type}' for upload: {err}"
                        ))
                    })?;
                form.part(field.name, part)
            }
        };
    }
    Ok(form)
}

/// Runs `future` under a single time budget; expiry drops the in-flight
/// future, which cancels any transfer it owns.
pub async fn with_deadline<T, F>(operation: &str, budget: Duration, future: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(budget, future).await {
        Ok(result) => result,
        Err(_) => Err(GatewayError::timeout(operation, budget)),
    }
}

/// Sends a request expecting a 2xx JSON reply, all inside one deadline.
pub async fn send_json(
    transport: &dyn HttpTransport,
    operation: &str,
    budget: Duration,
    request: TransportRequest,
) -> Result<Value> {
    with_deadline(operation, budget, async {
        let response = transport.execute(request).await?;
        if !response.is_success() {
            return Err(response.into_upstream_error().await);
        }
        response.json().await
    })
    .await
}

pub fn parse_url(raw: &str) -> Result<Url> {
    Url::parse(raw.trim()).map_err(|err| {
        GatewayError::invalid_request(format!("invalid upstream URL '{raw}': {err}"))
    })
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use futures_util::stream;
    use serde_json::json;

    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::{parse_url, with_deadline, FormField, TransportRequest, TransportResponse};
    use crate::error::{ErrorKind, GatewayError};
    use crate::testing::{counted_body, header_map, response_with_chunks};

    #[test]
    fn request_header_helpers() {
        let url = parse_url("https://api.example.com/v1/tasks/1").unwrap();
        let request = TransportRequest::get(url)
            .bearer_auth(Some(" sk-test "))
            .header("X-Task-Type", "image");
        assert_eq!(request.header_value("authorization"), Some("Bearer sk-test"));
        let stripped = request.without_header("x-task-type");
        assert_eq!(stripped.header_value("X-Task-Type"), None);
        assert_eq!(stripped.header_value("Authorization"), Some("Bearer sk-test"));

        let anonymous = TransportRequest::get(parse_url("https://a.example").unwrap())
            .bearer_auth(Some("  "));
        assert!(anonymous.headers.is_empty());
    }

    #[test]
    fn file_field_keeps_name_and_media_type() {
        let field = FormField::file("image", "image.png", "image/png", vec![1, 2]);
        assert_eq!(field.name, "image");
        assert!(matches!(
            field.value,
            super::FormValue::File { ref file_name, .. } if file_name == "image.png"
        ));
    }

    #[tokio::test]
    async fn json_helper_reports_malformed_bodies() {
        let response = response_with_chunks(
            200,
            &[("content-type", "text/html")],
            vec![b"<html>".to_vec()],
        );
        let err = response.json().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedResponse);

        let response =
            response_with_chunks(200, &[], vec![b"{\"a\":".to_vec(), b"1}".to_vec()]);
        assert_eq!(response.json().await.unwrap(), json!({"a": 1}));
    }

    #[tokio::test]
    async fn upstream_error_swallows_body_read_failures() {
        let response = TransportResponse {
            status: 503,
            headers: Default::default(),
            body: Box::pin(stream::iter(vec![Err(GatewayError::Network {
                message: "reset".to_string(),
            })])),
        };
        match response.into_upstream_error().await {
            GatewayError::UpstreamError { status, body } => {
                assert_eq!(status, 503);
                assert!(body.is_empty());
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn upstream_error_reads_a_bounded_prefix_of_huge_bodies() {
        let pulled = Arc::new(AtomicUsize::new(0));
        let response = TransportResponse {
            status: 500,
            headers: header_map(&[("content-type", "text/plain")]),
            body: counted_body(vec![vec![b'x'; 1024 * 1024]; 64], pulled.clone()),
        };

        match response.into_upstream_error().await {
            GatewayError::UpstreamError { status, body } => {
                assert_eq!(status, 500);
                assert_eq!(body.chars().count(), 513);
                assert!(body.ends_with('…'));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(pulled.load(Ordering::SeqCst), 1);

        let pulled = Arc::new(AtomicUsize::new(0));
        let response = TransportResponse {
            status: 502,
            headers: header_map(&[]),
            body: counted_body(vec![vec![b'y'; 1000]; 10], pulled.clone()),
        };
        response.into_upstream_error().await;
        assert_eq!(pulled.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_cancels_slow_operations() {
        let result: Result<(), GatewayError> = with_deadline(
            "status query",
            Duration::from_secs(2),
            std::future::pending(),
        )
        .await;
        let err = result.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert_eq!(err.to_string(), "status query timed out after 2000ms");
    }
}
