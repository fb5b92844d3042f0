use std::sync::Arc;
use std::time::Instant;

use futures::stream::BoxStream;
use futures::StreamExt;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use roundtable_core::config::ModelConfig;
use roundtable_core::error::{Result, RoundtableError};
use roundtable_core::traits::LlmClient;
use roundtable_core::types::{ChatMessage, StreamDelta};

/// The language-model collaborator as the workflow sees it: a client plus
/// the model settings to call it with.
#[derive(Clone)]
pub struct ChatModel {
    llm: Arc<dyn LlmClient>,
    config: ModelConfig,
}

impl ChatModel {
    pub fn new(llm: Arc<dyn LlmClient>, config: ModelConfig) -> Self {
        Self { llm, config }
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    /// Generate one AI message from a system prompt and a conversation.
    ///
    /// `caller` names the calling step in logs.
    pub async fn generate(
        &self,
        caller: &str,
        system_prompt: &str,
        messages: &[ChatMessage],
    ) -> Result<ChatMessage> {
        let mut request = Vec::with_capacity(messages.len() + 1);
        request.push(ChatMessage::system(system_prompt));
        request.extend_from_slice(messages);

        debug!(caller, messages = request.len(), "LLM call");
        let start = Instant::now();

        let result = match self.llm.chat_stream(&self.config, request).await {
            Ok(stream) => collect_text(stream).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(text) => {
                debug!(
                    caller,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "LLM call completed"
                );
                Ok(ChatMessage::ai(text))
            }
            Err(e) => {
                warn!(caller, error = %e, "LLM call failed");
                Err(RoundtableError::collaborator("llm", format!("{}: {}", caller, e)))
            }
        }
    }

    /// Generate a value of type `T`, constraining the model to a JSON schema.
    ///
    /// Output that does not parse as `T` is a `Generation` error.
    pub async fn generate_structured<T: DeserializeOwned>(
        &self,
        caller: &str,
        system_prompt: &str,
        messages: &[ChatMessage],
        schema: &serde_json::Value,
    ) -> Result<T> {
        let prompt = format!(
            "{}\n\nRespond with ONLY valid JSON matching this JSON Schema:\n{}",
            system_prompt,
            serde_json::to_string_pretty(schema)?
        );
        let reply = self.generate(caller, &prompt, messages).await?;
        let json = extract_json(&reply.content);
        serde_json::from_str(json).map_err(|e| {
            RoundtableError::Generation(format!(
                "{} returned output that does not match its schema: {}",
                caller, e
            ))
        })
    }
}

/// Drain a delta stream into the concatenated text.
pub async fn collect_text(mut stream: BoxStream<'_, Result<StreamDelta>>) -> Result<String> {
    let mut text = String::new();
    while let Some(delta) = stream.next().await {
        if let StreamDelta::TextDelta(chunk) = delta? {
            text.push_str(&chunk);
        }
    }
    Ok(text)
}

/// Extract JSON from a response that may contain markdown code fences.
pub fn extract_json(text: &str) -> &str {
    let trimmed = text.trim();
    if let Some(start) = trimmed.find("```json") {
        let after = &trimmed[start + 7..];
        if let Some(end) = after.find("```") {
            return after[..end].trim();
        }
    }
    if let Some(start) = trimmed.find("```") {
        let after = &trimmed[start + 3..];
        if let Some(end) = after.find("```") {
            return after[..end].trim();
        }
    }
    let obj = trimmed.find('{').zip(trimmed.rfind('}'));
    let arr = trimmed.find('[').zip(trimmed.rfind(']'));
    match (obj, arr) {
        (Some((s, e)), Some((sa, _))) if s < sa => &trimmed[s..=e],
        (_, Some((s, e))) if s < e => &trimmed[s..=e],
        (Some((s, e)), _) if s < e => &trimmed[s..=e],
        _ => trimmed,
    }
}
