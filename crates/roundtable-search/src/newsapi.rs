use futures::future::BoxFuture;
use serde::Deserialize;
use tracing::{debug, warn};

use roundtable_core::error::{Result, RoundtableError};
use roundtable_core::traits::SearchSource;
use roundtable_core::types::SearchDocument;

const NEWS_API_URL: &str = "https://newsapi.org/v2/everything";

/// News article search through NewsAPI.
pub struct NewsApiSearch {
    api_key: String,
    language: String,
    page_size: usize,
    timeout_secs: u64,
    http: reqwest::Client,
}

impl NewsApiSearch {
    pub fn new(api_key: &str, language: &str, page_size: usize, timeout_secs: u64) -> Self {
        Self {
            api_key: api_key.to_string(),
            language: language.to_string(),
            page_size,
            timeout_secs,
            http: reqwest::Client::new(),
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct NewsResponse {
    status: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    articles: Vec<Article>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Article {
    #[serde(default)]
    url: String,
    #[serde(default)]
    published_at: String,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    description: Option<String>,
}

fn parse_response(body: &str) -> Result<Vec<SearchDocument>> {
    let resp: NewsResponse = serde_json::from_str(body)
        .map_err(|e| RoundtableError::collaborator("news", format!("bad response: {}", e)))?;

    if resp.status != "ok" {
        return Err(RoundtableError::collaborator(
            "news",
            resp.message.unwrap_or_else(|| format!("status {}", resp.status)),
        ));
    }

    Ok(resp
        .articles
        .into_iter()
        .filter_map(|a| {
            // Some articles only carry a description.
            let content = a.content.or(a.description)?;
            Some(SearchDocument::News {
                url: a.url,
                published_at: a.published_at,
                content,
            })
        })
        .collect())
}

impl SearchSource for NewsApiSearch {
    fn name(&self) -> &str {
        "news"
    }

    fn search(&self, query: &str) -> BoxFuture<'_, Result<Vec<SearchDocument>>> {
        let query = query.to_string();
        Box::pin(async move {
            let page_size = self.page_size.to_string();
            debug!(query = %query, language = %self.language, page_size = %page_size, "NewsAPI search");
            let resp = self
                .http
                .get(NEWS_API_URL)
                .query(&[
                    ("q", query.as_str()),
                    ("language", self.language.as_str()),
                    ("sortBy", "relevancy"),
                    ("page", "1"),
                    ("pageSize", page_size.as_str()),
                ])
                .header("X-Api-Key", &self.api_key)
                .header("User-Agent", concat!("roundtable/", env!("CARGO_PKG_VERSION")))
                .send()
                .await
                .map_err(|e| RoundtableError::collaborator("news", e.to_string()))?;

            let status = resp.status();
            let body = resp
                .text()
                .await
                .map_err(|e| RoundtableError::collaborator("news", e.to_string()))?;
            if !status.is_success() {
                warn!(status = %status, body = %body, "NewsAPI request failed");
            }
            parse_response(&body)
        })
    }

    fn timeout_secs(&self) -> u64 {
        self.timeout_secs
    }
}
