//! Image providers behind a common async trait.

pub mod async_task;
pub mod gemini;
pub mod openai;

use std::sync::Arc;

use async_trait::async_trait;
use imagegate_contracts::events::EventWriter;
use imagegate_contracts::images::{ImageMode, ImageReference, ResolvedImage};
use imagegate_contracts::providers::{NamedProvider, ProviderRegistry};
use serde_json::{Map, Value};

use crate::config::GatewayConfig;
use crate::error::Result;
use crate::orchestrator::{Sleeper, TaskOrchestrator};
use crate::transport::HttpTransport;

pub use async_task::AsyncTaskProvider;
pub use gemini::GeminiProvider;
pub use openai::OpenAiProvider;

/// What a provider is asked to do, with every reference already resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderRequest {
    pub mode: ImageMode,
    pub prompt: String,
    pub model: String,
    pub size: Option<String>,
    pub n: u32,
    pub images: Vec<ResolvedImage>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProviderResponse {
    pub images: Vec<ImageReference>,
    pub warnings: Vec<String>,
    pub provider_response: Map<String, Value>,
}

#[async_trait]
pub trait ImageProvider: NamedProvider + Send + Sync {
    fn default_model(&self) -> &str;

    async fn generate(&self, request: &ProviderRequest) -> Result<ProviderResponse>;
}

pub type ImageProviderRegistry = ProviderRegistry<Box<dyn ImageProvider>>;

/// Registers `openai` and `gemini`, plus `async-task` when a task API base is
/// configured.
pub fn default_provider_registry(
    config: &GatewayConfig,
    transport: Arc<dyn HttpTransport>,
    sleeper: Option<Arc<dyn Sleeper>>,
    events: Option<EventWriter>,
) -> ImageProviderRegistry {
    let mut registry = ImageProviderRegistry::default();
    registry.register(Box::new(OpenAiProvider::new(
        transport.clone(),
        config.openai.clone(),
        config.request_timeout,
    )));
    registry.register(Box::new(GeminiProvider::new(
        transport.clone(),
        config.gemini.clone(),
        config.request_timeout,
    )));
    if let Some(settings) = config.task_settings() {
        let mut orchestrator = TaskOrchestrator::new(transport, settings).with_events(events);
        if let Some(sleeper) = sleeper {
            orchestrator = orchestrator.with_sleeper(sleeper);
        }
        registry.register(Box::new(AsyncTaskProvider::new(
            orchestrator,
            config.task_model.clone(),
        )));
    }
    registry
}
