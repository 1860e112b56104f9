use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::cache::FeedCache;
use crate::fetcher::{FetchError, Fetcher};
use crate::normalize::{normalize_at, Article};
use crate::registry::FeedSource;

/// One feed that could not be fetched during a pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedFailure {
    pub feed: String,
    pub error: String,
}

/// Outcome of one aggregation pass. `errors` is `None` when every feed succeeded.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FeedFetchResult {
    pub articles: Vec<Article>,
    pub errors: Option<Vec<FeedFailure>>,
}

pub struct Aggregator {
    fetcher: Fetcher,
    cache: FeedCache,
    feed_deadline: Duration,
}

impl Aggregator {
    pub fn new(fetcher: Fetcher, cache: FeedCache, feed_deadline: Duration) -> Self {
        Self {
            fetcher,
            cache,
            feed_deadline,
        }
    }

    pub fn cache(&self) -> &FeedCache {
        &self.cache
    }

    /// Articles of one feed, served from the per-feed cache when still fresh.
    pub async fn fetch_feed(&self, feed: &FeedSource) -> Result<Arc<Vec<Article>>, FetchError> {
        if let Some(cached) = self.cache.get(&feed.url).await {
            debug!("Using cached articles for feed '{}'", feed.name);
            return Ok(cached);
        }

        info!("Fetching feed: {} ({})", feed.name, feed.url);
        let items = tokio::time::timeout(self.feed_deadline, self.fetcher.resolve(&feed.url))
            .await
            .map_err(|_| FetchError::Timeout)??;

        let fetched_at = Utc::now();
        let articles: Vec<Article> = items
            .iter()
            .map(|item| normalize_at(item, &feed.name, fetched_at))
            .collect();
        info!("Fetched {} articles for feed '{}'", articles.len(), feed.name);

        let articles = Arc::new(articles);
        self.cache.set(&feed.url, articles.clone()).await;
        Ok(articles)
    }

    /// Fetches every feed concurrently and merges the successes, newest first.
    /// A failing feed only adds an entry to `errors`.
    pub async fn fetch_all(&self, feeds: &[FeedSource]) -> FeedFetchResult {
        let outcomes = join_all(feeds.iter().map(|feed| self.fetch_feed(feed))).await;

        let mut articles = Vec::new();
        let mut errors = Vec::new();
        for (feed, outcome) in feeds.iter().zip(outcomes) {
            match outcome {
                Ok(feed_articles) => articles.extend(feed_articles.iter().cloned()),
                Err(e) => {
                    warn!("Failed to fetch feed '{}': {}", feed.name, e);
                    errors.push(FeedFailure {
                        feed: feed.name.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }

        // Stable: equal timestamps keep feed order.
        articles.sort_by(|a, b| b.pub_date.cmp(&a.pub_date));

        FeedFetchResult {
            articles,
            errors: (!errors.is_empty()).then_some(errors),
        }
    }
}
