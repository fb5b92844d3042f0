use std::time::Duration;

use futures::future::BoxFuture;
use futures::stream::BoxStream;
use tracing::{info, warn};

use roundtable_core::config::{ModelConfig, RetryConfig};
use roundtable_core::error::{Result, RoundtableError};
use roundtable_core::traits::LlmClient;
use roundtable_core::types::*;

/// An LLM client that retries failed requests and falls back to alternative providers.
pub struct RetryingClient {
    primary: Box<dyn LlmClient>,
    fallbacks: Vec<(ModelConfig, Box<dyn LlmClient>)>,
    retry_config: RetryConfig,
}

impl RetryingClient {
    pub fn new(
        primary: Box<dyn LlmClient>,
        fallbacks: Vec<(ModelConfig, Box<dyn LlmClient>)>,
        retry_config: RetryConfig,
    ) -> Self {
        Self {
            primary,
            fallbacks,
            retry_config,
        }
    }
}

fn is_retryable(e: &RoundtableError) -> bool {
    match e {
        RoundtableError::LlmRequest(msg) => {
            msg.contains("429")
                || msg.contains("500")
                || msg.contains("502")
                || msg.contains("503")
                || msg.contains("timed out")
                || msg.contains("timeout")
                || msg.contains("connection")
        }
        RoundtableError::LlmStream(_) => true,
        _ => false,
    }
}

fn calculate_backoff(attempt: u32, config: &RetryConfig) -> Duration {
    let ms = config
        .initial_backoff_ms
        .saturating_mul(2u64.saturating_pow(attempt))
        .min(config.max_backoff_ms);
    // Jitter: 0.8x to 1.2x
    let jitter = 0.8 + rand::random::<f64>() * 0.4;
    Duration::from_millis((ms as f64 * jitter) as u64)
}

impl LlmClient for RetryingClient {
    fn chat_stream(
        &self,
        config: &ModelConfig,
        messages: Vec<ChatMessage>,
    ) -> BoxFuture<'_, Result<BoxStream<'_, Result<StreamDelta>>>> {
        let config = config.clone();

        Box::pin(async move {
            let max_retries = self.retry_config.max_retries;

            let mut last_err = None;
            for attempt in 0..=max_retries {
                match self.primary.chat_stream(&config, messages.clone()).await {
                    Ok(stream) => return Ok(stream),
                    Err(e) if is_retryable(&e) && attempt < max_retries => {
                        let backoff = calculate_backoff(attempt, &self.retry_config);
                        warn!(
                            attempt = attempt + 1,
                            max_retries,
                            backoff_ms = backoff.as_millis() as u64,
                            error = %e,
                            "Retrying LLM request"
                        );
                        tokio::time::sleep(backoff).await;
                        last_err = Some(e);
                    }
                    Err(e) => {
                        last_err = Some(e);
                        break;
                    }
                }
            }

            if !self.fallbacks.is_empty() {
                info!("Primary LLM exhausted, trying fallback models");
            }
            for (fb_config, fb_client) in &self.fallbacks {
                match fb_client.chat_stream(fb_config, messages.clone()).await {
                    Ok(stream) => {
                        info!(
                            model = %fb_config.model_id,
                            provider = %fb_config.provider,
                            "Fell back to alternative model"
                        );
                        return Ok(stream);
                    }
                    Err(e) => {
                        warn!(model = %fb_config.model_id, error = %e, "Fallback model also failed");
                    }
                }
            }

            Err(last_err.unwrap_or_else(|| RoundtableError::LlmRequest("All providers failed".into())))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use roundtable_test_utils::ScriptedLlm;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn fast_retry() -> RetryConfig {
        RetryConfig {
            max_retries: 2,
            initial_backoff_ms: 1,
            max_backoff_ms: 2,
        }
    }

    fn model() -> ModelConfig {
        roundtable_test_utils::model_config()
    }

    #[test]
    fn test_backoff_is_capped() {
        let config = RetryConfig {
            max_retries: 10,
            initial_backoff_ms: 1000,
            max_backoff_ms: 5000,
        };
        let d = calculate_backoff(8, &config);
        assert!(d <= Duration::from_millis(6000));
        assert!(d >= Duration::from_millis(4000));
    }

    #[test]
    fn test_retryable_classification() {
        assert!(is_retryable(&RoundtableError::LlmRequest("HTTP 429 Too Many Requests".into())));
        assert!(is_retryable(&RoundtableError::LlmStream("reset".into())));
        assert!(!is_retryable(&RoundtableError::LlmRequest("HTTP 401: bad key".into())));
        assert!(!is_retryable(&RoundtableError::Generation("x".into())));
    }

    #[tokio::test]
    async fn test_retries_then_succeeds() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let primary = ScriptedLlm::new(move |_| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(RoundtableError::LlmRequest("HTTP 503".into()))
            } else {
                Ok("recovered".into())
            }
        });
        let client = RetryingClient::new(Box::new(primary), vec![], fast_retry());
        let text = crate::collect_text(client.chat_stream(&model(), vec![]).await.unwrap())
            .await
            .unwrap();
        assert_eq!(text, "recovered");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_falls_back_after_fatal_error() {
        let primary = ScriptedLlm::new(|_| Err(RoundtableError::LlmRequest("HTTP 401".into())));
        let fallback = ScriptedLlm::new(|_| Ok("from fallback".into()));
        let client = RetryingClient::new(
            Box::new(primary),
            vec![(model(), Box::new(fallback) as Box<dyn LlmClient>)],
            fast_retry(),
        );
        let text = crate::collect_text(client.chat_stream(&model(), vec![]).await.unwrap())
            .await
            .unwrap();
        assert_eq!(text, "from fallback");
    }

    #[tokio::test]
    async fn test_all_providers_fail() {
        let primary = ScriptedLlm::new(|_| Err(RoundtableError::LlmRequest("HTTP 500".into())));
        let client = RetryingClient::new(Box::new(primary), vec![], fast_retry());
        let err = client.chat_stream(&model(), vec![]).await.err().unwrap();
        assert!(matches!(err, RoundtableError::LlmRequest(msg) if msg.contains("500")));
    }
}
