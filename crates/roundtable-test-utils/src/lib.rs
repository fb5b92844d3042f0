//! Test doubles for the external collaborators: a scripted language model
//! and canned search sources.

use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::stream::BoxStream;

use roundtable_core::config::ModelConfig;
use roundtable_core::error::{Result, RoundtableError};
use roundtable_core::traits::{LlmClient, SearchSource};
use roundtable_core::types::{ChatMessage, SearchDocument, StopReason, StreamDelta};

type Script = dyn Fn(&[ChatMessage]) -> Result<String> + Send + Sync;

/// An `LlmClient` whose reply is computed by a closure over the request.
pub struct ScriptedLlm {
    script: Box<Script>,
}

impl ScriptedLlm {
    pub fn new(script: impl Fn(&[ChatMessage]) -> Result<String> + Send + Sync + 'static) -> Self {
        Self {
            script: Box::new(script),
        }
    }

    /// Always reply with the same text.
    pub fn constant(text: &str) -> Self {
        let text = text.to_string();
        Self::new(move |_| Ok(text.clone()))
    }
}

impl LlmClient for ScriptedLlm {
    fn chat_stream(
        &self,
        _config: &ModelConfig,
        messages: Vec<ChatMessage>,
    ) -> BoxFuture<'_, Result<BoxStream<'_, Result<StreamDelta>>>> {
        Box::pin(async move {
            let text = (self.script)(&messages)?;
            let deltas = vec![
                Ok(StreamDelta::TextDelta(text)),
                Ok(StreamDelta::Stop(StopReason::EndTurn)),
            ];
            Ok(Box::pin(futures::stream::iter(deltas)) as BoxStream<'_, Result<StreamDelta>>)
        })
    }
}

/// A search source that returns fixed documents.
pub struct StaticSearch {
    name: String,
    docs: Vec<SearchDocument>,
    delay: Option<Duration>,
    calls: Arc<AtomicUsize>,
}

impl StaticSearch {
    pub fn new(name: &str, docs: Vec<SearchDocument>) -> Self {
        Self {
            name: name.to_string(),
            docs,
            delay: None,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// One web document whose content mentions the source name.
    pub fn web(name: &str) -> Self {
        Self::new(
            name,
            vec![SearchDocument::Web {
                url: format!("https://{}.example/article", name),
                content: format!("{} findings", name),
            }],
        )
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn call_counter(&self) -> Arc<AtomicUsize> {
        self.calls.clone()
    }
}

impl SearchSource for StaticSearch {
    fn name(&self) -> &str {
        &self.name
    }

    fn search(&self, _query: &str) -> BoxFuture<'_, Result<Vec<SearchDocument>>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            Ok(self.docs.clone())
        })
    }

    fn timeout_secs(&self) -> u64 {
        1
    }
}

/// A search source whose every call fails.
pub struct FailingSearch {
    name: String,
}

impl FailingSearch {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }
}

impl SearchSource for FailingSearch {
    fn name(&self) -> &str {
        &self.name
    }

    fn search(&self, _query: &str) -> BoxFuture<'_, Result<Vec<SearchDocument>>> {
        let name = self.name.clone();
        Box::pin(async move { Err(RoundtableError::collaborator(name, "HTTP 503 Service Unavailable")) })
    }
}

/// Minimal model config for tests.
pub fn model_config() -> ModelConfig {
    toml::from_str(r#"model_id = "test-model""#).expect("valid model config")
}

/// Write `content` to a temporary file and return its handle.
pub fn temp_file(content: &str) -> tempfile::NamedTempFile {
    let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
    tmp.write_all(content.as_bytes()).expect("write temp file");
    tmp
}

/// Unique path for an on-disk SQLite database inside a fresh temp dir.
pub fn temp_db() -> (tempfile::TempDir, std::path::PathBuf) {
    let dir = tempfile::tempdir().expect("create temp dir");
    let path = dir.path().join("sessions.db");
    (dir, path)
}
