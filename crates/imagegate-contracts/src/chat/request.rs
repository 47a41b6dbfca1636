use std::fmt;

use serde_json::{Map, Value};

use crate::images::{ImageMode, ImageRequest};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatRequestError(String);

impl ChatRequestError {
    fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }

    pub fn message(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChatRequestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for ChatRequestError {}

impl ImageRequest {
    pub fn from_chat_body(body: &Value) -> Result<Self, ChatRequestError> {
        image_request_from_chat_body(body)
    }
}

/// Normalizes an OpenAI chat-completion body into an image request.
///
/// The prompt is the text of the last `user` message; image references are
/// collected from every `image_url` part of the user messages, in order. A
/// request carrying references becomes an edit.
pub fn image_request_from_chat_body(body: &Value) -> Result<ImageRequest, ChatRequestError> {
    let Some(root) = body.as_object() else {
        return Err(ChatRequestError::new("request body must be a JSON object"));
    };
    let messages = root
        .get("messages")
        .and_then(Value::as_array)
        .filter(|rows| !rows.is_empty())
        .ok_or_else(|| ChatRequestError::new("request body has no messages"))?;

    let mut prompt: Option<String> = None;
    let mut images = Vec::new();
    for message in messages.iter().filter_map(Value::as_object) {
        if !is_user_message(message) {
            continue;
        }
        let content = message.get("content").unwrap_or(&Value::Null);
        let text = message_text(content);
        if !text.is_empty() {
            prompt = Some(text);
        }
        collect_image_urls(content, &mut images);
    }

    let Some(prompt) = prompt else {
        return Err(ChatRequestError::new("no user prompt found in messages"));
    };

    let n = root
        .get("n")
        .and_then(Value::as_u64)
        .map(|value| value.clamp(1, 10) as u32)
        .unwrap_or(1);
    let mode = if images.is_empty() {
        ImageMode::Generate
    } else {
        ImageMode::Edit
    };

    Ok(ImageRequest {
        prompt,
        mode,
        model: non_empty_str(root.get("model")),
        size: non_empty_str(root.get("size")),
        n,
        images,
        provider: non_empty_str(root.get("provider")),
    })
}

fn is_user_message(message: &Map<String, Value>) -> bool {
    message
        .get("role")
        .and_then(Value::as_str)
        .map(|role| role.trim().eq_ignore_ascii_case("user"))
        .unwrap_or(false)
}

fn message_text(content: &Value) -> String {
    match content {
        Value::String(text) => text.trim().to_string(),
        Value::Array(parts) => parts
            .iter()
            .filter_map(Value::as_object)
            .filter(|part| part.get("type").and_then(Value::as_str) == Some("text"))
            .filter_map(|part| part.get("text").and_then(Value::as_str))
            .map(str::trim)
            .filter(|text| !text.is_empty())
            .collect::<Vec<&str>>()
            .join("\n"),
        _ => String::new(),
    }
}

fn collect_image_urls(content: &Value, out: &mut Vec<String>) {
    let Some(parts) = content.as_array() else {
        return;
    };
    for part in parts.iter().filter_map(Value::as_object) {
        let url = match part.get("image_url") {
            Some(Value::String(url)) => Some(url.as_str()),
            Some(Value::Object(obj)) => obj.get("url").and_then(Value::as_str),
            _ => None,
        };
        if let Some(url) = url.map(str::trim).filter(|value| !value.is_empty()) {
            out.push(url.to_string());
        }
    }
}

fn non_empty_str(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}
