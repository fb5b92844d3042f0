use roundtable_core::config::{AppConfig, BarrierTimeoutPolicy, StoreBackend};
use roundtable_core::error::RoundtableError;
use roundtable_test_utils::temp_file;

#[test]
fn test_load_full_config_from_file() {
    let tmp = temp_file(
        r#"
[model]
provider = "openai"
model_id = "gpt-4o"
api_key = "sk-test-key"
max_tokens = 2048
temperature = 0.2

[model.retry]
max_retries = 5

[[fallback_models]]
model_id = "gpt-4o-mini"

[search]
tavily_api_key = "tvly-test"
news_api_key = "news-test"
max_results = 3
encyclopedia_max_docs = 1
timeout_secs = 10

[workflow]
max_analysts = 4
max_num_turns = 3
approval_token = "ship it"
barrier_timeout_secs = 300
on_barrier_timeout = "proceed"
podcast_host = "Alex"

[store]
backend = "sqlite"
path = "/tmp/roundtable-test/sessions.db"
"#,
    );

    let config = AppConfig::load(tmp.path()).expect("load config");

    assert_eq!(config.model.model_id, "gpt-4o");
    assert_eq!(config.model.api_key, Some("sk-test-key".to_string()));
    assert_eq!(config.model.max_tokens, 2048);
    assert_eq!(config.model.retry.as_ref().map(|r| r.max_retries), Some(5));
    assert_eq!(config.fallback_models.len(), 1);

    assert_eq!(config.search.tavily_api_key.as_deref(), Some("tvly-test"));
    assert_eq!(config.search.max_results, 3);
    assert_eq!(config.search.encyclopedia_max_docs, 1);
    assert_eq!(config.search.news_language, "en");

    assert_eq!(config.workflow.max_analysts, 4);
    assert_eq!(config.workflow.max_num_turns, 3);
    assert_eq!(config.workflow.approval_token, "ship it");
    assert_eq!(config.workflow.barrier_timeout_secs, Some(300));
    assert_eq!(config.workflow.on_barrier_timeout, BarrierTimeoutPolicy::Proceed);
    assert_eq!(config.workflow.podcast_host, "Alex");
    assert_eq!(config.workflow.podcast_name, "Tech Talk Roundtable");

    assert_eq!(config.store.backend, StoreBackend::Sqlite);
    assert_eq!(
        config.store.resolved_path().to_str(),
        Some("/tmp/roundtable-test/sessions.db")
    );
}

#[test]
fn test_env_var_expansion_in_config() {
    std::env::set_var("ROUNDTABLE_TEST_TAVILY_KEY", "expanded-key-value");

    let tmp = temp_file(
        r#"
[model]
model_id = "test-model"

[search]
tavily_api_key = "${ROUNDTABLE_TEST_TAVILY_KEY}"
"#,
    );

    let config = AppConfig::load(tmp.path()).expect("load config");
    assert_eq!(
        config.search.tavily_api_key,
        Some("expanded-key-value".to_string())
    );

    std::env::remove_var("ROUNDTABLE_TEST_TAVILY_KEY");
}

#[test]
fn test_minimal_config_uses_defaults() {
    let tmp = temp_file(
        r#"
[model]
model_id = "llama3.2"
"#,
    );

    let config = AppConfig::load(tmp.path()).expect("load config");

    assert_eq!(config.model.provider, "openai");
    assert_eq!(config.model.request_timeout_secs, 120);
    assert!(config.fallback_models.is_empty());
    assert!(config.search.tavily_api_key.is_none());
    assert!(config.search.news_api_key.is_none());
    assert_eq!(config.workflow.max_analysts, 3);
    assert_eq!(config.workflow.max_num_turns, 2);
    assert_eq!(config.workflow.recursion_limit, 25);
    assert_eq!(config.workflow.on_barrier_timeout, BarrierTimeoutPolicy::Abort);
    assert_eq!(config.store.backend, StoreBackend::Sqlite);
}

#[test]
fn test_invalid_workflow_values_are_rejected() {
    let tmp = temp_file(
        r#"
[model]
model_id = "llama3.2"

[workflow]
max_num_turns = 0
"#,
    );

    let err = AppConfig::load(tmp.path()).unwrap_err();
    assert!(matches!(err, RoundtableError::Config(msg) if msg.contains("max_num_turns")));
}

#[test]
fn test_missing_file_is_config_not_found() {
    let err = AppConfig::load(std::path::Path::new("/nonexistent/roundtable.toml")).unwrap_err();
    assert!(matches!(err, RoundtableError::ConfigNotFound(_)));
}

#[test]
fn test_malformed_toml_is_config_error() {
    let tmp = temp_file("[model\nmodel_id = ");
    assert!(matches!(
        AppConfig::load(tmp.path()),
        Err(RoundtableError::Config(_))
    ));
}
