use futures::future::BoxFuture;

use roundtable_core::error::{Result, RoundtableError};
use roundtable_core::traits::SearchSource;
use roundtable_core::types::SearchDocument;

/// Stand-in for a source that is not configured. Every call fails, so the
/// interview degrades that source to a placeholder instead of aborting.
pub struct UnavailableSource {
    name: String,
    reason: String,
}

impl UnavailableSource {
    pub fn new(name: &str, reason: &str) -> Self {
        Self {
            name: name.to_string(),
            reason: reason.to_string(),
        }
    }
}

impl SearchSource for UnavailableSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn search(&self, _query: &str) -> BoxFuture<'_, Result<Vec<SearchDocument>>> {
        Box::pin(async move { Err(RoundtableError::collaborator(&self.name, &self.reason)) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_always_fails_with_reason() {
        let src = UnavailableSource::new("news", "NEWS_API_KEY is not set");
        let err = src.search("anything").await.unwrap_err();
        assert!(err.is_collaborator());
        assert!(err.to_string().contains("NEWS_API_KEY"));
    }
}
