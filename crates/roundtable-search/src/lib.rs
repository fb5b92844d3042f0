pub mod newsapi;
pub mod tavily;
pub mod unavailable;
pub mod wikipedia;

use std::sync::Arc;

use tracing::warn;

use roundtable_core::config::SearchConfig;
use roundtable_core::traits::SearchSource;

pub use newsapi::NewsApiSearch;
pub use tavily::TavilySearch;
pub use unavailable::UnavailableSource;
pub use wikipedia::WikipediaSearch;

/// The three information sources every interview consults in parallel.
#[derive(Clone)]
pub struct SearchSources {
    pub web: Arc<dyn SearchSource>,
    pub encyclopedia: Arc<dyn SearchSource>,
    pub news: Arc<dyn SearchSource>,
}

impl SearchSources {
    pub fn new(
        web: Arc<dyn SearchSource>,
        encyclopedia: Arc<dyn SearchSource>,
        news: Arc<dyn SearchSource>,
    ) -> Self {
        Self {
            web,
            encyclopedia,
            news,
        }
    }

    /// Build the configured sources. Sources without an API key become
    /// `UnavailableSource`s.
    pub fn from_config(config: &SearchConfig) -> Self {
        let web: Arc<dyn SearchSource> = match config.tavily_api_key.as_deref() {
            Some(key) if !key.is_empty() => Arc::new(TavilySearch::new(
                key,
                config.max_results,
                config.timeout_secs,
            )),
            _ => {
                warn!("search.tavily_api_key is not set, web search disabled");
                Arc::new(UnavailableSource::new("web", "TAVILY_API_KEY is not set"))
            }
        };

        let news: Arc<dyn SearchSource> = match config.news_api_key.as_deref() {
            Some(key) if !key.is_empty() => Arc::new(NewsApiSearch::new(
                key,
                &config.news_language,
                config.news_page_size,
                config.timeout_secs,
            )),
            _ => {
                warn!("search.news_api_key is not set, news search disabled");
                Arc::new(UnavailableSource::new("news", "NEWS_API_KEY is not set"))
            }
        };

        let encyclopedia = Arc::new(WikipediaSearch::new(
            config.encyclopedia_max_docs,
            config.timeout_secs,
        ));

        Self::new(web, encyclopedia, news)
    }
}
