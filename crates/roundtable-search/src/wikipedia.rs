use futures::future::BoxFuture;
use serde::Deserialize;
use tracing::debug;

use roundtable_core::error::{Result, RoundtableError};
use roundtable_core::traits::SearchSource;
use roundtable_core::types::SearchDocument;

const WIKIPEDIA_API_URL: &str = "https://en.wikipedia.org/w/api.php";

/// Characters kept from each page extract.
const MAX_EXTRACT_CHARS: usize = 4000;

/// Encyclopedia search through the MediaWiki query API.
pub struct WikipediaSearch {
    max_docs: usize,
    timeout_secs: u64,
    http: reqwest::Client,
}

impl WikipediaSearch {
    pub fn new(max_docs: usize, timeout_secs: u64) -> Self {
        Self {
            max_docs,
            timeout_secs,
            http: reqwest::Client::new(),
        }
    }
}

#[derive(Deserialize)]
struct QueryResponse {
    #[serde(default)]
    query: Option<QueryPages>,
}

#[derive(Deserialize)]
struct QueryPages {
    #[serde(default)]
    pages: Vec<Page>,
}

#[derive(Deserialize)]
struct Page {
    #[serde(default)]
    index: usize,
    title: String,
    #[serde(default)]
    fullurl: String,
    #[serde(default)]
    extract: String,
}

fn parse_response(body: &str) -> Result<Vec<SearchDocument>> {
    let resp: QueryResponse = serde_json::from_str(body)
        .map_err(|e| RoundtableError::collaborator("encyclopedia", format!("bad response: {}", e)))?;

    let mut pages = resp.query.map(|q| q.pages).unwrap_or_default();
    // Search rank, not page id order.
    pages.sort_by_key(|p| p.index);

    Ok(pages
        .into_iter()
        .filter(|p| !p.extract.trim().is_empty())
        .map(|p| SearchDocument::Encyclopedia {
            source: p.fullurl,
            page: p.title,
            content: p.extract.chars().take(MAX_EXTRACT_CHARS).collect(),
        })
        .collect())
}

impl SearchSource for WikipediaSearch {
    fn name(&self) -> &str {
        "encyclopedia"
    }

    fn search(&self, query: &str) -> BoxFuture<'_, Result<Vec<SearchDocument>>> {
        let query = query.to_string();
        Box::pin(async move {
            debug!(query = %query, "Wikipedia search");
            let limit = self.max_docs.to_string();
            let resp = self
                .http
                .get(WIKIPEDIA_API_URL)
                .query(&[
                    ("action", "query"),
                    ("format", "json"),
                    ("formatversion", "2"),
                    ("generator", "search"),
                    ("gsrsearch", query.as_str()),
                    ("gsrlimit", limit.as_str()),
                    ("prop", "extracts|info"),
                    ("inprop", "url"),
                    ("explaintext", "1"),
                    ("exlimit", "max"),
                ])
                .header("User-Agent", concat!("roundtable/", env!("CARGO_PKG_VERSION")))
                .send()
                .await
                .map_err(|e| RoundtableError::collaborator("encyclopedia", e.to_string()))?;

            let status = resp.status();
            let body = resp
                .text()
                .await
                .map_err(|e| RoundtableError::collaborator("encyclopedia", e.to_string()))?;
            if !status.is_success() {
                return Err(RoundtableError::collaborator(
                    "encyclopedia",
                    format!("HTTP {}", status),
                ));
            }
            parse_response(&body)
        })
    }

    fn timeout_secs(&self) -> u64 {
        self.timeout_secs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_orders_by_rank() {
        let body = r#"{"query":{"pages":[
            {"pageid":2,"index":2,"title":"Qubit","fullurl":"https://en.wikipedia.org/wiki/Qubit","extract":"A qubit is..."},
            {"pageid":9,"index":1,"title":"Quantum computing","fullurl":"https://en.wikipedia.org/wiki/Quantum_computing","extract":"Quantum computing is..."}
        ]}}"#;
        let docs = parse_response(body).unwrap();
        assert_eq!(docs.len(), 2);
        match &docs[0] {
            SearchDocument::Encyclopedia { page, source, .. } => {
                assert_eq!(page, "Quantum computing");
                assert!(source.ends_with("Quantum_computing"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parse_no_hits() {
        assert!(parse_response(r#"{"batchcomplete":true}"#).unwrap().is_empty());
    }

    #[test]
    fn test_extract_is_truncated() {
        let long = "x".repeat(MAX_EXTRACT_CHARS + 50);
        let body = format!(
            r#"{{"query":{{"pages":[{{"index":1,"title":"T","fullurl":"u","extract":"{}"}}]}}}}"#,
            long
        );
        match &parse_response(&body).unwrap()[0] {
            SearchDocument::Encyclopedia { content, .. } => {
                assert_eq!(content.len(), MAX_EXTRACT_CHARS)
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
