use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use imagegate_contracts::images::ImageMode;
use imagegate_contracts::providers::NamedProvider;
use serde_json::{json, Map, Value};
use tracing::debug;

use super::{ImageProvider, ProviderRequest, ProviderResponse};
use crate::config::ProviderEndpoint;
use crate::error::{GatewayError, Result};
use crate::extract::extract_image_references;
use crate::orchestrator::DEFAULT_IMAGE_SIZE;
use crate::transport::{
    parse_url, send_json, FormField, HttpTransport, RequestBody, TransportRequest,
};

pub const OPENAI_DEFAULT_MODEL: &str = "gpt-image-1";
const EDIT_UPLOAD_FIELD: &str = "image[]";

/// OpenAI-compatible Images API; answers in the same call.
pub struct OpenAiProvider {
    transport: Arc<dyn HttpTransport>,
    endpoint: ProviderEndpoint,
    request_timeout: Duration,
}

impl OpenAiProvider {
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

    fn api_key(&self) -> Result<&str> {
        self.endpoint
            .api_key
            .as_deref()
            .ok_or_else(|| GatewayError::invalid_request("OPENAI_API_KEY not set"))
    }

    fn edits_request(&self, request: &ProviderRequest, size: &str) -> Result<TransportRequest> {
        if request.images.is_empty() {
            return Err(GatewayError::MissingReferenceImage);
        }
        let mut fields = vec![
            FormField::text("model", request.model.clone()),
            FormField::text("prompt", request.prompt.clone()),
            FormField::text("n", request.n.max(1).to_string()),
            FormField::text("size", size),
        ];
        for image in &request.images {
            fields.push(FormField::file(
                EDIT_UPLOAD_FIELD,
                image.upload_file_name(),
                image.media_type.clone(),
                image.bytes.clone(),
            ));
        }
        let url = parse_url(&format!("{}/images/edits", self.endpoint.api_base))?;
        Ok(TransportRequest::post(url, RequestBody::Multipart(fields)))
    }

    fn generations_request(&self, request: &ProviderRequest, size: &str) -> Result<TransportRequest> {
        let payload = json!({
            "model": request.model,
            "prompt": request.prompt,
            "n": request.n.max(1),
            "size": size,
        });
        let url = parse_url(&format!("{}/images/generations", self.endpoint.api_base))?;
        Ok(TransportRequest::post(url, RequestBody::Json(payload)))
    }
}

impl NamedProvider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }
}

#[async_trait]
impl ImageProvider for OpenAiProvider {
    fn default_model(&self) -> &str {
        OPENAI_DEFAULT_MODEL
    }

    async fn generate(&self, request: &ProviderRequest) -> Result<ProviderResponse> {
        let api_key = self.api_key()?;
        let size = request.size.as_deref().unwrap_or(DEFAULT_IMAGE_SIZE);
        let is_edit = request.mode == ImageMode::Edit || !request.images.is_empty();
        let (operation, outbound) = if is_edit {
            ("OpenAI edits request", self.edits_request(request, size)?)
        } else {
            (
                "OpenAI generations request",
                self.generations_request(request, size)?,
            )
        };
        let endpoint = outbound.url.to_string();
        debug!(endpoint = %endpoint, model = %request.model, "sending OpenAI image request");

        let payload = send_json(
            self.transport.as_ref(),
            operation,
            self.request_timeout,
            outbound.bearer_auth(Some(api_key)),
        )
        .await?;

        let mut images = extract_image_references(&payload);
        if images.is_empty() {
            return Err(GatewayError::malformed("OpenAI response returned no images"));
        }
        images.truncate(request.n.max(1) as usize);

        let mut provider_response = Map::new();
        provider_response.insert("endpoint".to_string(), Value::String(endpoint));
        provider_response.insert(
            "created".to_string(),
            payload.get("created").cloned().unwrap_or(Value::Null),
        );
        provider_response.insert("data_count".to_string(), json!(images.len()));
        if let Some(usage) = payload.get("usage").cloned() {
            provider_response.insert("usage".to_string(), usage);
        }

        Ok(ProviderResponse {
            images,
            warnings: Vec::new(),
            provider_response,
        })
    }
}
