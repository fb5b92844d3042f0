use futures::future::BoxFuture;
use futures::stream::BoxStream;

use crate::config::ModelConfig;
use crate::error::Result;
use crate::session::SessionRecord;
use crate::types::*;

/// LLM client: streaming chat completion.
pub trait LlmClient: Send + Sync + 'static {
    /// Send a chat request and receive a stream of deltas.
    fn chat_stream(
        &self,
        config: &ModelConfig,
        messages: Vec<ChatMessage>,
    ) -> BoxFuture<'_, Result<BoxStream<'_, Result<StreamDelta>>>>;
}

/// Search source: one external information collaborator.
pub trait SearchSource: Send + Sync + 'static {
    /// Source name (used in logs and degraded placeholders).
    fn name(&self) -> &str;

    /// Run a query and return the matching documents.
    fn search(&self, query: &str) -> BoxFuture<'_, Result<Vec<SearchDocument>>>;

    /// Timeout in seconds for one search call.
    fn timeout_secs(&self) -> u64 {
        30
    }
}

/// Session store: persistence backend for workflow sessions.
pub trait SessionStore: Send + Sync + 'static {
    /// Load the record for a session, if one exists.
    fn load(&self, session_id: &str) -> BoxFuture<'_, Result<Option<SessionRecord>>>;

    /// Write a record. Fails with `VersionConflict` unless the stored version
    /// equals `expected_version` (0 when no record exists yet). Returns the
    /// new version.
    fn save(&self, record: &SessionRecord, expected_version: u64) -> BoxFuture<'_, Result<u64>>;

    /// Delete a session. Returns whether a record existed.
    fn delete(&self, session_id: &str) -> BoxFuture<'_, Result<bool>>;

    /// List known session ids, most recently updated first.
    fn list(&self) -> BoxFuture<'_, Result<Vec<String>>>;
}
