use async_trait::async_trait;
use imagegate_contracts::providers::NamedProvider;
use serde_json::json;

use super::{ImageProvider, ProviderRequest, ProviderResponse};
use crate::error::Result;
use crate::orchestrator::TaskOrchestrator;

/// Provider backed by a submit-then-poll task API.
pub struct AsyncTaskProvider {
    orchestrator: TaskOrchestrator,
    default_model: String,
}

impl AsyncTaskProvider {
    pub fn new(orchestrator: TaskOrchestrator, default_model: impl Into<String>) -> Self {
        Self {
            orchestrator,
            default_model: default_model.into(),
        }
    }
}

impl NamedProvider for AsyncTaskProvider {
    fn name(&self) -> &str {
        "async-task"
    }
}

#[async_trait]
impl ImageProvider for AsyncTaskProvider {
    fn default_model(&self) -> &str {
        &self.default_model
    }

    async fn generate(&self, request: &ProviderRequest) -> Result<ProviderResponse> {
        let outcome = self.orchestrator.run(request).await?;
        let mut provider_response = outcome.job.report_payload();
        provider_response.insert(
            "api_base".to_string(),
            json!(self.orchestrator.settings().api_base),
        );
        Ok(ProviderResponse {
            images: outcome.images,
            warnings: outcome.diagnostics,
            provider_response,
        })
    }
}
