//! In-memory doubles for the transport and sleeper seams.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{stream, StreamExt};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde_json::Value;

use crate::error::{GatewayError, Result};
use crate::orchestrator::Sleeper;
use crate::transport::{BodyStream, HttpTransport, TransportRequest, TransportResponse};

type ReplyFn = Box<dyn FnOnce(&TransportRequest) -> Result<TransportResponse> + Send>;
type RepeatFn = Arc<dyn Fn(&TransportRequest) -> Result<TransportResponse> + Send + Sync>;

pub(crate) const PNG_1X1_BASE64: &str =
    "iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAYAAAAfFcSJAAAADUlEQVR42mNkYPhfDwAChwGA60e6kgAAAABJRU5ErkJggg==";

pub(crate) fn header_map(headers: &[(&str, &str)]) -> HeaderMap {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        map.insert(
            HeaderName::from_bytes(name.as_bytes()).expect("valid header name"),
            HeaderValue::from_str(value).expect("valid header value"),
        );
    }
    map
}

pub(crate) fn response_with_chunks(
    status: u16,
    headers: &[(&str, &str)],
    chunks: Vec<Vec<u8>>,
) -> TransportResponse {
    TransportResponse {
        status,
        headers: header_map(headers),
        body: stream::iter(chunks.into_iter().map(|chunk| Ok(Bytes::from(chunk)))).boxed(),
    }
}

/// Body stream that counts how many chunks were actually pulled.
pub(crate) fn counted_body(chunks: Vec<Vec<u8>>, pulled: Arc<AtomicUsize>) -> BodyStream {
    stream::iter(chunks)
        .map(move |chunk| {
            pulled.fetch_add(1, Ordering::SeqCst);
            Ok(Bytes::from(chunk))
        })
        .boxed()
}

pub(crate) fn json_response(status: u16, payload: &Value) -> TransportResponse {
    response_with_chunks(
        status,
        &[("content-type", "application/json")],
        vec![payload.to_string().into_bytes()],
    )
}

/// Replays scripted replies in order and records every request it sees.
#[derive(Default)]
pub(crate) struct ScriptedTransport {
    replies: Mutex<VecDeque<ReplyFn>>,
    repeat: Option<RepeatFn>,
    requests: Mutex<Vec<TransportRequest>>,
}

impl ScriptedTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn then_reply<F>(self, reply: F) -> Self
    where
        F: FnOnce(&TransportRequest) -> Result<TransportResponse> + Send + 'static,
    {
        self.replies
            .lock()
            .expect("replies lock")
            .push_back(Box::new(reply));
        self
    }

    pub(crate) fn then_json(self, status: u16, payload: Value) -> Self {
        self.then_reply(move |_| Ok(json_response(status, &payload)))
    }

    pub(crate) fn then_network_error(self, message: &str) -> Self {
        let message = message.to_string();
        self.then_reply(move |_| Err(GatewayError::Network { message }))
    }

    pub(crate) fn repeat_json(mut self, status: u16, payload: Value) -> Self {
        self.repeat = Some(Arc::new(move |_| Ok(json_response(status, &payload))));
        self
    }

    pub(crate) fn requests(&self) -> Vec<TransportRequest> {
        self.requests.lock().expect("requests lock").clone()
    }

    pub(crate) fn request_count(&self) -> usize {
        self.requests.lock().expect("requests lock").len()
    }
}

#[async_trait]
impl HttpTransport for ScriptedTransport {
    async fn execute(&self, request: TransportRequest) -> Result<TransportResponse> {
        self.requests
            .lock()
            .expect("requests lock")
            .push(request.clone());
        let next = self.replies.lock().expect("replies lock").pop_front();
        match (next, &self.repeat) {
            (Some(reply), _) => reply(&request),
            (None, Some(repeat)) => repeat(&request),
            (None, None) => Err(GatewayError::Network {
                message: format!("no scripted reply for {} {}", request.method, request.url),
            }),
        }
    }
}

/// Sleeper that returns immediately and remembers what it was asked for.
#[derive(Debug, Default)]
pub(crate) struct RecordingSleeper {
    naps: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub(crate) fn naps(&self) -> Vec<Duration> {
        self.naps.lock().expect("naps lock").clone()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.naps.lock().expect("naps lock").push(duration);
    }
}
