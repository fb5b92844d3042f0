use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Result, RoundtableError};

/// Top-level Roundtable configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub model: ModelConfig,
    #[serde(default)]
    pub fallback_models: Vec<ModelConfig>,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub workflow: WorkflowConfig,
    #[serde(default)]
    pub store: StoreConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    pub model_id: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Per-request ceiling enforced by the HTTP client.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default)]
    pub retry: Option<RetryConfig>,
}

fn default_provider() -> String { "openai".to_string() }
fn default_max_tokens() -> u32 { 4096 }
fn default_temperature() -> f32 { 0.0 }
fn default_request_timeout() -> u64 { 120 }

/// Retry configuration for LLM requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
        }
    }
}

fn default_max_retries() -> u32 { 3 }
fn default_initial_backoff() -> u64 { 1000 }
fn default_max_backoff() -> u64 { 30000 }

/// Search collaborator configuration. A source whose API key is missing is
/// still wired in, but every call to it degrades to a placeholder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    #[serde(default)]
    pub tavily_api_key: Option<String>,
    #[serde(default)]
    pub news_api_key: Option<String>,
    /// Maximum web results per query.
    #[serde(default = "default_max_results")]
    pub max_results: usize,
    /// Maximum encyclopedia pages per query.
    #[serde(default = "default_encyclopedia_max_docs")]
    pub encyclopedia_max_docs: usize,
    #[serde(default = "default_news_page_size")]
    pub news_page_size: usize,
    #[serde(default = "default_news_language")]
    pub news_language: String,
    #[serde(default = "default_search_timeout")]
    pub timeout_secs: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            tavily_api_key: None,
            news_api_key: None,
            max_results: default_max_results(),
            encyclopedia_max_docs: default_encyclopedia_max_docs(),
            news_page_size: default_news_page_size(),
            news_language: default_news_language(),
            timeout_secs: default_search_timeout(),
        }
    }
}

fn default_max_results() -> usize { 5 }
fn default_encyclopedia_max_docs() -> usize { 2 }
fn default_news_page_size() -> usize { 10 }
fn default_news_language() -> String { "en".to_string() }
fn default_search_timeout() -> u64 { 30 }

/// What to do when a barrier's branches do not all report in time.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BarrierTimeoutPolicy {
    /// Fail the run with `BarrierTimeout`.
    #[default]
    Abort,
    /// Log the missing branches and continue with partial results.
    Proceed,
}

/// Research workflow configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowConfig {
    #[serde(default = "default_max_analysts")]
    pub max_analysts: usize,
    /// Expert answers per interview before it is wrapped up.
    #[serde(default = "default_max_num_turns")]
    pub max_num_turns: usize,
    #[serde(default = "default_approval_token")]
    pub approval_token: String,
    /// Case-sensitive phrase that ends an interview early.
    #[serde(default = "default_closing_phrase")]
    pub closing_phrase: String,
    /// Ceiling for any single barrier (superstep). None = no ceiling.
    #[serde(default)]
    pub barrier_timeout_secs: Option<u64>,
    #[serde(default)]
    pub on_barrier_timeout: BarrierTimeoutPolicy,
    /// Maximum supersteps per invocation of one graph.
    #[serde(default = "default_recursion_limit")]
    pub recursion_limit: usize,
    #[serde(default = "default_podcast_host")]
    pub podcast_host: String,
    #[serde(default = "default_podcast_name")]
    pub podcast_name: String,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            max_analysts: default_max_analysts(),
            max_num_turns: default_max_num_turns(),
            approval_token: default_approval_token(),
            closing_phrase: default_closing_phrase(),
            barrier_timeout_secs: None,
            on_barrier_timeout: BarrierTimeoutPolicy::default(),
            recursion_limit: default_recursion_limit(),
            podcast_host: default_podcast_host(),
            podcast_name: default_podcast_name(),
        }
    }
}

fn default_max_analysts() -> usize { 3 }
fn default_max_num_turns() -> usize { 2 }
fn default_approval_token() -> String { "approve".to_string() }
fn default_closing_phrase() -> String { "Thank you so much for your help".to_string() }
fn default_recursion_limit() -> usize { 25 }
fn default_podcast_host() -> String { "Samantha".to_string() }
fn default_podcast_name() -> String { "Tech Talk Roundtable".to_string() }

/// Session store backend.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Sqlite,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,
    #[serde(default = "default_store_path")]
    pub path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            path: default_store_path(),
        }
    }
}

fn default_store_path() -> String { "~/.roundtable/sessions.db".to_string() }

impl StoreConfig {
    /// Resolve the database path (expand ~).
    pub fn resolved_path(&self) -> PathBuf {
        if let Some(rest) = self.path.strip_prefix("~/") {
            if let Some(home) = dirs_home() {
                return home.join(rest);
            }
        }
        PathBuf::from(&self.path)
    }
}

impl AppConfig {
    /// Load config from a TOML file, with env var expansion.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| RoundtableError::ConfigNotFound(path.display().to_string()))?;

        // Expand ${ENV_VAR} references
        let expanded = expand_env_vars(&content);

        let config: Self =
            toml::from_str(&expanded).map_err(|e| RoundtableError::Config(e.to_string()))?;
        config.validate()?;
        debug!(
            path = %path.display(),
            model = %config.model.model_id,
            fallbacks = config.fallback_models.len(),
            "Config loaded"
        );
        Ok(config)
    }

    /// Reject values the workflow cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.workflow.max_analysts == 0 {
            return Err(RoundtableError::Config(
                "workflow.max_analysts must be at least 1".into(),
            ));
        }
        if self.workflow.max_num_turns == 0 {
            return Err(RoundtableError::Config(
                "workflow.max_num_turns must be at least 1".into(),
            ));
        }
        if self.workflow.recursion_limit == 0 {
            return Err(RoundtableError::Config(
                "workflow.recursion_limit must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Expand `${ENV_VAR}` patterns in a string.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut var_name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_name.push(c);
            }
            match std::env::var(&var_name) {
                Ok(val) => result.push_str(&val),
                Err(_) => {
                    // Keep original if env var not set
                    warn!(var = %var_name, "Config references an unset environment variable");
                    result.push_str(&format!("${{{}}}", var_name));
                }
            }
        } else {
            result.push(c);
        }
    }
    result
}

fn dirs_home() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}
