pub mod model;
pub mod providers;
pub mod retry;
pub mod streaming;

use std::time::Duration;

use roundtable_core::config::{AppConfig, ModelConfig};
use roundtable_core::traits::LlmClient;

pub use model::{collect_text, extract_json, ChatModel};
pub use providers::openai::OpenAiClient;
pub use retry::RetryingClient;

/// Create an LLM client based on the provider name.
///
/// Every provider currently speaks the OpenAI-compatible protocol; `base_url`
/// selects the endpoint.
pub fn create_client(config: &ModelConfig) -> Box<dyn LlmClient> {
    Box::new(OpenAiClient::with_timeout(Duration::from_secs(
        config.request_timeout_secs,
    )))
}

/// Build the primary client wrapped with retries and configured fallbacks.
pub fn create_chat_model(config: &AppConfig) -> ChatModel {
    let fallbacks = config
        .fallback_models
        .iter()
        .map(|fb| (fb.clone(), create_client(fb)))
        .collect();
    let client = RetryingClient::new(
        create_client(&config.model),
        fallbacks,
        config.model.retry.clone().unwrap_or_default(),
    );
    ChatModel::new(std::sync::Arc::new(client), config.model.clone())
}
