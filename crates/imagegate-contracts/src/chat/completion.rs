use chrono::Utc;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::images::ImageReference;

/// Renders provider results as an OpenAI `chat.completion` object whose
/// assistant message is one Markdown image link per result.
pub fn render_chat_completion(
    model: &str,
    images: &[ImageReference],
    warnings: &[String],
) -> Value {
    let mut lines: Vec<String> = images
        .iter()
        .enumerate()
        .map(|(idx, image)| image.to_markdown(idx))
        .collect();
    if images.is_empty() {
        lines.push("No image was returned by the provider.".to_string());
    }
    let content = lines.join("\n\n");

    let mut completion = json!({
        "id": format!("chatcmpl-{}", Uuid::new_v4().simple()),
        "object": "chat.completion",
        "created": Utc::now().timestamp(),
        "model": model,
        "choices": [{
            "index": 0,
            "message": {
                "role": "assistant",
                "content": content,
            },
            "finish_reason": "stop",
        }],
        "usage": {
            "prompt_tokens": 0,
            "completion_tokens": 0,
            "total_tokens": 0,
        },
    });
    if !warnings.is_empty() {
        completion["warnings"] = json!(warnings);
    }
    completion
}

/// OpenAI-style error envelope.
pub fn render_error_body(code: &str, message: &str) -> Value {
    json!({
        "error": {
            "message": message,
            "type": "image_gateway_error",
            "code": code,
        }
    })
}
