use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::normalize::Article;

struct CachedFeed {
    articles: Arc<Vec<Article>>,
    stored_at: Instant,
}

/// Normalized articles per feed URL, kept for a fixed TTL so a feed is not
/// re-downloaded while its last fetch is still fresh.
pub struct FeedCache {
    ttl: Duration,
    entries: RwLock<HashMap<String, CachedFeed>>,
}

impl FeedCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the cached articles while they are younger than the TTL.
    pub async fn get(&self, feed_url: &str) -> Option<Arc<Vec<Article>>> {
        let entries = self.entries.read().await;
        let entry = entries.get(feed_url)?;
        (entry.stored_at.elapsed() < self.ttl).then(|| entry.articles.clone())
    }

    pub async fn set(&self, feed_url: &str, articles: Arc<Vec<Article>>) {
        let mut entries = self.entries.write().await;
        entries.retain(|_, entry| entry.stored_at.elapsed() < self.ttl);
        entries.insert(
            feed_url.to_string(),
            CachedFeed {
                articles,
                stored_at: Instant::now(),
            },
        );
    }

    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }

    #[cfg(test)]
    pub(crate) async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    #[cfg(test)]
    pub(crate) async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}
