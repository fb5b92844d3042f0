use futures::future::BoxFuture;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use roundtable_core::error::{Result, RoundtableError};
use roundtable_core::traits::SearchSource;
use roundtable_core::types::SearchDocument;

const TAVILY_API_URL: &str = "https://api.tavily.com/search";

/// Web search through the Tavily API.
pub struct TavilySearch {
    api_key: String,
    max_results: usize,
    timeout_secs: u64,
    http: reqwest::Client,
}

impl TavilySearch {
    pub fn new(api_key: &str, max_results: usize, timeout_secs: u64) -> Self {
        Self {
            api_key: api_key.to_string(),
            max_results,
            timeout_secs,
            http: reqwest::Client::new(),
        }
    }
}

#[derive(Deserialize)]
struct TavilyResponse {
    #[serde(default)]
    results: Vec<TavilyResult>,
}

#[derive(Deserialize)]
struct TavilyResult {
    #[serde(default)]
    url: String,
    #[serde(default)]
    content: String,
}

fn parse_response(body: &str) -> Result<Vec<SearchDocument>> {
    let resp: TavilyResponse = serde_json::from_str(body)
        .map_err(|e| RoundtableError::collaborator("web", format!("bad response: {}", e)))?;
    Ok(resp
        .results
        .into_iter()
        .map(|r| SearchDocument::Web {
            url: r.url,
            content: r.content,
        })
        .collect())
}

impl SearchSource for TavilySearch {
    fn name(&self) -> &str {
        "web"
    }

    fn search(&self, query: &str) -> BoxFuture<'_, Result<Vec<SearchDocument>>> {
        let query = query.to_string();
        Box::pin(async move {
            debug!(query = %query, "Tavily search");
            let resp = self
                .http
                .post(TAVILY_API_URL)
                .json(&json!({
                    "api_key": self.api_key,
                    "query": query,
                    "max_results": self.max_results,
                }))
                .send()
                .await
                .map_err(|e| RoundtableError::collaborator("web", e.to_string()))?;

            let status = resp.status();
            let body = resp
                .text()
                .await
                .map_err(|e| RoundtableError::collaborator("web", e.to_string()))?;
            if !status.is_success() {
                return Err(RoundtableError::collaborator(
                    "web",
                    format!("HTTP {}: {}", status, body),
                ));
            }
            parse_response(&body)
        })
    }

    fn timeout_secs(&self) -> u64 {
        self.timeout_secs
    }
}
