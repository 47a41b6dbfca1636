//! Request pipeline: pick a provider, resolve references, dispatch.

use std::sync::Arc;

use imagegate_contracts::chat::render_chat_completion;
use imagegate_contracts::events::EventWriter;
use imagegate_contracts::images::{ImageMode, ImageReference, ImageRequest};
use serde::Serialize;
use serde_json::Value;
use tracing::info;

use crate::config::GatewayConfig;
use crate::error::{GatewayError, Result};
use crate::providers::{default_provider_registry, ImageProviderRegistry, ProviderRequest};
use crate::resolver::ImageResolver;
use crate::transport::{HttpTransport, ReqwestTransport};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GatewayResponse {
    pub provider: String,
    pub model: String,
    pub images: Vec<ImageReference>,
    pub warnings: Vec<String>,
}

pub struct ImageGateway {
    config: GatewayConfig,
    resolver: ImageResolver,
    providers: ImageProviderRegistry,
}

impl ImageGateway {
    pub fn new(
        config: GatewayConfig,
        transport: Arc<dyn HttpTransport>,
        providers: ImageProviderRegistry,
    ) -> Self {
        let resolver = ImageResolver::new(transport, config.resolve_options());
        Self {
            config,
            resolver,
            providers,
        }
    }

    /// Production wiring: one `reqwest` transport shared by the resolver and
    /// every provider.
    pub fn from_config(config: GatewayConfig, events: Option<EventWriter>) -> Result<Self> {
        let transport: Arc<dyn HttpTransport> = Arc::new(ReqwestTransport::new()?);
        let providers = default_provider_registry(&config, transport.clone(), None, events);
        Ok(Self::new(config, transport, providers))
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn resolver(&self) -> &ImageResolver {
        &self.resolver
    }

    pub fn providers(&self) -> &ImageProviderRegistry {
        &self.providers
    }

    pub async fn handle(&self, request: &ImageRequest) -> Result<GatewayResponse> {
        let prompt = request.prompt.trim();
        if prompt.is_empty() {
            return Err(GatewayError::invalid_request("prompt must not be empty"));
        }
        let provider_name = request
            .provider
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .unwrap_or(self.config.default_provider.as_str());
        let Some(provider) = self.providers.get(provider_name) else {
            return Err(GatewayError::invalid_request(format!(
                "unknown provider '{provider_name}' (available: {})",
                self.providers.list().join(", ")
            )));
        };
        if request.mode == ImageMode::Edit && request.images.is_empty() {
            return Err(GatewayError::MissingReferenceImage);
        }

        let images = self.resolver.resolve_all(&request.images).await?;
        let model = request
            .model
            .as_deref()
            .map(str::trim)
            .filter(|model| !model.is_empty())
            .unwrap_or(provider.default_model())
            .to_string();
        let provider_request = ProviderRequest {
            mode: request.mode,
            prompt: prompt.to_string(),
            model,
            size: request.size.clone(),
            n: request.n.max(1),
            images,
        };

        let response = provider.generate(&provider_request).await?;
        info!(
            provider = provider.name(),
            model = %provider_request.model,
            mode = request.mode.as_str(),
            images = response.images.len(),
            "image request completed"
        );
        Ok(GatewayResponse {
            provider: provider.name().to_string(),
            model: provider_request.model,
            images: response.images,
            warnings: response.warnings,
        })
    }

    /// Runs an OpenAI chat-completion body and renders the answer in the same
    /// format. `provider` overrides whatever the body names.
    pub async fn chat_completion(&self, body: &Value, provider: Option<&str>) -> Result<Value> {
        let mut request = ImageRequest::from_chat_body(body)
            .map_err(|err| GatewayError::invalid_request(err.message()))?;
        if let Some(provider) = provider {
            request.provider = Some(provider.to_string());
        }
        let response = self.handle(&request).await?;
        Ok(render_chat_completion(
            &response.model,
            &response.images,
            &response.warnings,
        ))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use imagegate_contracts::images::{ImageMode, ImageReference, ImageRequest};
    use serde_json::json;

    use super::ImageGateway;
    use crate::config::GatewayConfig;
    use crate::error::GatewayError;
    use crate::providers::default_provider_registry;
    use crate::testing::{RecordingSleeper, ScriptedTransport, PNG_1X1_BASE64};
    use crate::transport::{FormValue, RequestBody};

    fn task_config() -> GatewayConfig {
        GatewayConfig::from_lookup(|key| match key {
            "IMAGEGATE_TASK_API_BASE" => Some("https://tasks.example.com/v1".to_string()),
            "IMAGEGATE_TASK_API_KEY" => Some("task-key".to_string()),
            _ => None,
        })
    }

    fn gateway(transport: &Arc<ScriptedTransport>, config: GatewayConfig) -> ImageGateway {
        let providers = default_provider_registry(
            &config,
            transport.clone(),
            Some(Arc::new(RecordingSleeper::default())),
            None,
        );
        ImageGateway::new(config, transport.clone(), providers)
    }

    fn edit(reference: &str) -> ImageRequest {
        let mut request = ImageRequest::new("make it night");
        request.mode = ImageMode::Edit;
        request.images = vec![reference.to_string()];
        request
    }

    #[tokio::test]
    async fn inline_reference_flows_through_the_task_provider() -> anyhow::Result<()> {
        let transport = Arc::new(
            ScriptedTransport::new()
                .then_json(200, json!({"task_id": "t-9"}))
                .then_json(
                    200,
                    json!({"task_status": "SUCCEED", "output": {"image_urls": ["https://cdn.example.com/n.png"]}}),
                ),
        );

        let response = gateway(&transport, task_config())
            .handle(&edit(&format!("data:image/png;base64,{PNG_1X1_BASE64}")))
            .await?;

        assert_eq!(response.provider, "async-task");
        assert_eq!(response.model, "gpt-image-1");
        assert_eq!(
            response.images,
            vec![ImageReference::Url("https://cdn.example.com/n.png".to_string())]
        );

        let requests = transport.requests();
        let RequestBody::Multipart(fields) = &requests[0].body else {
            panic!("expected multipart submission");
        };
        let Some(FormValue::File {
            file_name, bytes, ..
        }) = fields.iter().find(|field| field.name == "image").map(|field| &field.value)
        else {
            panic!("missing image field");
        };
        assert_eq!(file_name, "image.png");
        assert_eq!(&bytes[..4], &[0x89, b'P', b'N', b'G']);
        Ok(())
    }

    #[tokio::test]
    async fn private_reference_is_blocked_before_any_request() {
        let transport = Arc::new(ScriptedTransport::new());

        let err = gateway(&transport, task_config())
            .handle(&edit("http://192.168.1.5/cat.png"))
            .await
            .expect_err("blocked");

        assert!(matches!(err, GatewayError::BlockedBySsrfPolicy { .. }));
        assert_eq!(transport.request_count(), 0);
    }

    #[tokio::test]
    async fn unknown_provider_and_missing_reference_are_rejected() {
        let transport = Arc::new(ScriptedTransport::new());
        let gateway = gateway(&transport, task_config());

        let mut request = ImageRequest::new("a boat");
        request.provider = Some("midjourney".to_string());
        let err = gateway.handle(&request).await.expect_err("unknown provider");
        assert!(matches!(err, GatewayError::InvalidRequest { .. }));
        assert!(err.to_string().contains("async-task, gemini, openai"));

        let mut request = ImageRequest::new("a boat");
        request.mode = ImageMode::Edit;
        let err = gateway.handle(&request).await.expect_err("no reference");
        assert!(matches!(err, GatewayError::MissingReferenceImage));
        assert_eq!(transport.request_count(), 0);
    }

    #[tokio::test]
    async fn chat_body_renders_markdown_completion() -> anyhow::Result<()> {
        let transport = Arc::new(ScriptedTransport::new().then_json(
            200,
            json!({"data": [{"url": "https://cdn.example.com/sync.png"}]}),
        ));
        let body = json!({
            "model": "task-model",
            "messages": [{"role": "user", "content": "draw a kite"}]
        });

        let completion = gateway(&transport, task_config())
            .chat_completion(&body, None)
            .await?;

        assert_eq!(completion["object"], json!("chat.completion"));
        assert_eq!(completion["model"], json!("task-model"));
        assert_eq!(
            completion["choices"][0]["message"]["content"],
            json!("![image 1](https://cdn.example.com/sync.png)")
        );
        Ok(())
    }

    #[tokio::test]
    async fn chat_body_without_prompt_is_an_invalid_request() {
        let transport = Arc::new(ScriptedTransport::new());
        let err = gateway(&transport, task_config())
            .chat_completion(&json!({"messages": []}), Some("async-task"))
            .await
            .expect_err("no messages");
        assert!(matches!(err, GatewayError::InvalidRequest { .. }));
    }
}
