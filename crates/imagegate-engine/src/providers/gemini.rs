use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use imagegate_contracts::images::{ImageMode, ImageReference};
use imagegate_contracts::providers::NamedProvider;
use serde_json::{json, Map, Value};
use tracing::debug;

use super::{ImageProvider, ProviderRequest, ProviderResponse};
use crate::codec;
use crate::config::ProviderEndpoint;
use crate::error::{GatewayError, Result};
use crate::transport::{parse_url, send_json, HttpTransport, RequestBody, TransportRequest};
use crate::util::{push_unique_warning, truncate_text};

pub const GEMINI_DEFAULT_MODEL: &str = "gemini-2.5-flash-image";
const DEFAULT_INLINE_MEDIA_TYPE: &str = "image/png";
const WARNING_MAX_CHARS: usize = 500;

const RATIO_CANDIDATES: &[(&str, f64)] = &[
    ("1:1", 1.0),
    ("2:3", 2.0 / 3.0),
    ("3:2", 3.0 / 2.0),
    ("3:4", 3.0 / 4.0),
    ("4:3", 4.0 / 3.0),
    ("4:5", 4.0 / 5.0),
    ("5:4", 5.0 / 4.0),
    ("9:16", 9.0 / 16.0),
    ("16:9", 16.0 / 9.0),
    ("21:9", 21.0 / 9.0),
];

/// Gemini `generateContent` with inline image parts in both directions.
pub struct GeminiProvider {
    transport: Arc<dyn HttpTransport>,
    endpoint: ProviderEndpoint,
    request_timeout: Duration,
}

impl GeminiProvider {
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        endpoint: ProviderEndpoint,
        request_timeout: Duration,
    ) -> Self {
        Self {
            transport,
            endpoint,
            request_timeout,
        }
    }

    fn endpoint_for_model(&self, model: &str) -> String {
        let trimmed = model.trim();
        let model_path = if trimmed.starts_with("models/") {
            trimmed.to_string()
        } else {
            format!("models/{trimmed}")
        };
        format!("{}/{}:generateContent", self.endpoint.api_base, model_path)
    }

    fn build_payload(request: &ProviderRequest, warnings: &mut Vec<String>) -> Value {
        let mut parts: Vec<Value> = request
            .images
            .iter()
            .map(|image| {
                json!({
                    "inlineData": {
                        "mimeType": image.media_type,
                        "data": image.base64,
                    }
                })
            })
            .collect();
        parts.push(json!({ "text": request.prompt }));

        let mut generation_config = Map::new();
        generation_config.insert("responseModalities".to_string(), json!(["TEXT", "IMAGE"]));
        if let Some(ratio) = request
            .size
            .as_deref()
            .and_then(|size| nearest_ratio_from_size(size, warnings))
        {
            generation_config.insert("imageConfig".to_string(), json!({ "aspectRatio": ratio }));
        }

        json!({
            "contents": [{ "role": "user", "parts": parts }],
            "generationConfig": generation_config,
        })
    }
}

impl NamedProvider for GeminiProvider {
    fn name(&self) -> &str {
        "gemini"
    }
}

#[async_trait]
impl ImageProvider for GeminiProvider {
    fn default_model(&self) -> &str {
        GEMINI_DEFAULT_MODEL
    }

    async fn generate(&self, request: &ProviderRequest) -> Result<ProviderResponse> {
        let Some(api_key) = self.endpoint.api_key.as_deref() else {
            return Err(GatewayError::invalid_request(
                "GEMINI_API_KEY or GOOGLE_API_KEY not set",
            ));
        };
        if request.mode == ImageMode::Edit && request.images.is_empty() {
            return Err(GatewayError::MissingReferenceImage);
        }

        let endpoint = self.endpoint_for_model(&request.model);
        let mut url = parse_url(&endpoint)?;
        url.query_pairs_mut().append_pair("key", api_key);
        let mut warnings = Vec::new();
        let payload = Self::build_payload(request, &mut warnings);
        debug!(endpoint = %endpoint, images = request.images.len(), "sending Gemini request");

        let response_payload = send_json(
            self.transport.as_ref(),
            "Gemini request",
            self.request_timeout,
            TransportRequest::post(url, RequestBody::Json(payload)),
        )
        .await?;

        let (images, texts) = extract_parts(&response_payload)?;
        if images.is_empty() {
            for text in texts {
                push_unique_warning(&mut warnings, truncate_text(&text, WARNING_MAX_CHARS));
            }
            if let Some(reason) = response_payload
                .get("promptFeedback")
                .and_then(|feedback| feedback.get("blockReason"))
                .and_then(Value::as_str)
            {
                push_unique_warning(&mut warnings, format!("Gemini blocked the prompt: {reason}"));
            }
        }

        let mut provider_response = Map::new();
        provider_response.insert("endpoint".to_string(), Value::String(endpoint));
        provider_response.insert("image_count".to_string(), json!(images.len()));
        if let Some(usage) = response_payload.get("usageMetadata").cloned() {
            provider_response.insert("usage".to_string(), usage);
        }

        Ok(ProviderResponse {
            images,
            warnings,
            provider_response,
        })
    }
}

/// Inline images and text parts from `candidates[].content.parts[]`.
fn extract_parts(payload: &Value) -> Result<(Vec<ImageReference>, Vec<String>)> {
    let mut images = Vec::new();
    let mut texts = Vec::new();
    let parts = payload
        .get("candidates")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|candidate| candidate.get("content")?.get("parts")?.as_array())
        .flatten();

    for part in parts {
        if let Some(text) = part.get("text").and_then(Value::as_str) {
            if !text.trim().is_empty() {
                texts.push(text.trim().to_string());
            }
            continue;
        }
        let Some(inline) = part
            .get("inlineData")
            .or_else(|| part.get("inline_data"))
            .and_then(Value::as_object)
        else {
            continue;
        };
        let data = inline
            .get("data")
            .and_then(Value::as_str)
            .unwrap_or_default();
        if data.is_empty() {
            continue;
        }
        codec::decode(data).map_err(|err| {
            GatewayError::malformed(format!("Gemini image base64 decode failed: {err}"))
        })?;
        let media_type = inline
            .get("mimeType")
            .or_else(|| inline.get("mime_type"))
            .and_then(Value::as_str)
            .unwrap_or(DEFAULT_INLINE_MEDIA_TYPE);
        images.push(ImageReference::inline(media_type, data));
    }

    Ok((images, texts))
}

fn nearest_ratio_from_size(size: &str, warnings: &mut Vec<String>) -> Option<String> {
    let normalized = size.trim().to_ascii_lowercase();
    match normalized.as_str() {
        "" => return None,
        "portrait" | "tall" => return Some("9:16".to_string()),
        "landscape" | "wide" => return Some("16:9".to_string()),
        "square" => return Some("1:1".to_string()),
        _ => {}
    }

    let target_ratio = if let Some((left, right)) = parse_pair(&normalized, ':') {
        let direct = format!("{left}:{right}");
        if RATIO_CANDIDATES.iter().any(|(key, _)| *key == direct) {
            return Some(direct);
        }
        left as f64 / right as f64
    } else if let Some((width, height)) = parse_pair(&normalized, 'x') {
        width as f64 / height as f64
    } else {
        return None;
    };

    let mut best_key = "1:1";
    let mut best_delta = f64::MAX;
    for (key, ratio) in RATIO_CANDIDATES {
        let delta = (ratio - target_ratio).abs();
        if delta < best_delta {
            best_key = key;
            best_delta = delta;
        }
    }
    if best_key != normalized {
        push_unique_warning(
            warnings,
            format!("Gemini aspect ratio snapped to {best_key}."),
        );
    }
    Some(best_key.to_string())
}

fn parse_pair(raw: &str, separator: char) -> Option<(u32, u32)> {
    let (left, right) = raw.split_once(separator)?;
    let left = left.trim().parse::<u32>().ok()?;
    let right = right.trim().parse::<u32>().ok()?;
    (left > 0 && right > 0).then_some((left, right))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use imagegate_contracts::images::{ImageMode, ImageReference, ResolvedImage};
    use serde_json::json;

    use super::{nearest_ratio_from_size, GeminiProvider};
    use crate::config::ProviderEndpoint;
    use crate::error::GatewayError;
    use crate::providers::{ImageProvider, ProviderRequest};
    use crate::testing::ScriptedTransport;
    use crate::transport::RequestBody;

    fn provider(transport: &Arc<ScriptedTransport>) -> GeminiProvider {
        GeminiProvider::new(
            transport.clone(),
            ProviderEndpoint {
                api_base: "https://gemini.example.com/v1beta".to_string(),
                api_key: Some("g-key".to_string()),
            },
            Duration::from_secs(30),
        )
    }

    fn request(images: Vec<ResolvedImage>) -> ProviderRequest {
        ProviderRequest {
            mode: if images.is_empty() {
                ImageMode::Generate
            } else {
                ImageMode::Edit
            },
            prompt: "add a hat".to_string(),
            model: "gemini-2.5-flash-image".to_string(),
            size: Some("1920x1080".to_string()),
            n: 1,
            images,
        }
    }

    #[tokio::test]
    async fn sends_inline_parts_and_reads_inline_images() -> anyhow::Result<()> {
        let transport = Arc::new(ScriptedTransport::new().then_json(
            200,
            json!({
                "candidates": [{
                    "content": {"parts": [
                        {"text": "Here you go"},
                        {"inlineData": {"mimeType": "image/jpeg", "data": "AQID"}}
                    ]}
                }]
            }),
        ));
        let image = ResolvedImage::new("inline", "image/png", vec![0, 1, 2], "AAEC".to_string());

        let response = provider(&transport).generate(&request(vec![image])).await?;

        assert_eq!(
            response.images,
            vec![ImageReference::DataUrl("data:image/jpeg;base64,AQID".to_string())]
        );
        assert_eq!(response.warnings, vec!["Gemini aspect ratio snapped to 16:9."]);

        let requests = transport.requests();
        assert_eq!(
            requests[0].url.as_str(),
            "https://gemini.example.com/v1beta/models/gemini-2.5-flash-image:generateContent?key=g-key"
        );
        let RequestBody::Json(body) = &requests[0].body else {
            panic!("expected JSON body");
        };
        assert_eq!(
            body["contents"][0]["parts"][0],
            json!({"inlineData": {"mimeType": "image/png", "data": "AAEC"}})
        );
        assert_eq!(body["contents"][0]["parts"][1], json!({"text": "add a hat"}));
        assert_eq!(
            body["generationConfig"]["imageConfig"],
            json!({"aspectRatio": "16:9"})
        );
        Ok(())
    }

    #[tokio::test]
    async fn text_only_answers_become_warnings() -> anyhow::Result<()> {
        let transport = Arc::new(ScriptedTransport::new().then_json(
            200,
            json!({
                "candidates": [{"content": {"parts": [{"text": "I can't draw that."}]}}]
            }),
        ));

        let response = provider(&transport).generate(&request(Vec::new())).await?;

        assert!(response.images.is_empty());
        assert!(response
            .warnings
            .contains(&"I can't draw that.".to_string()));
        Ok(())
    }

    #[tokio::test]
    async fn corrupt_inline_data_is_malformed() {
        let transport = Arc::new(ScriptedTransport::new().then_json(
            200,
            json!({
                "candidates": [{"content": {"parts": [{"inline_data": {"data": "Zm9v!A=="}}]}}]
            }),
        ));

        let err = provider(&transport)
            .generate(&request(Vec::new()))
            .await
            .expect_err("corrupt base64");
        assert!(matches!(err, GatewayError::MalformedResponse { .. }));
    }

    #[test]
    fn sizes_snap_to_supported_ratios() {
        let mut warnings = Vec::new();
        assert_eq!(nearest_ratio_from_size("16:9", &mut warnings).as_deref(), Some("16:9"));
        assert_eq!(nearest_ratio_from_size("portrait", &mut warnings).as_deref(), Some("9:16"));
        assert!(warnings.is_empty());
        assert_eq!(nearest_ratio_from_size("1000x1010", &mut warnings).as_deref(), Some("1:1"));
        assert_eq!(warnings, vec!["Gemini aspect ratio snapped to 1:1."]);
        assert_eq!(nearest_ratio_from_size("huge", &mut warnings), None);
    }
}
