use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::config::FeedConfig;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedSource {
    pub id: String,
    pub name: String,
    pub url: String,
    pub category: String,
    pub description: String,
    pub is_active: bool,
}

impl From<&FeedConfig> for FeedSource {
    fn from(config: &FeedConfig) -> Self {
        Self {
            id: config.id.clone(),
            name: config.name.clone(),
            url: config.url.clone(),
            category: config.category.clone(),
            description: config.description.clone(),
            is_active: config.is_active,
        }
    }
}

/// Catalog of configured feeds. Entries are never added or removed after
/// startup; only the active flag changes.
pub struct FeedRegistry {
    feeds: RwLock<Vec<FeedSource>>,
}

impl FeedRegistry {
    pub fn new(feeds: Vec<FeedSource>) -> Self {
        Self {
            feeds: RwLock::new(feeds),
        }
    }

    pub fn from_config(configs: &[FeedConfig]) -> Self {
        Self::new(configs.iter().map(FeedSource::from).collect())
    }

    pub async fn all(&self) -> Vec<FeedSource> {
        self.feeds.read().await.clone()
    }

    pub async fn active(&self) -> Vec<FeedSource> {
        self.feeds
            .read()
            .await
            .iter()
            .filter(|f| f.is_active)
            .cloned()
            .collect()
    }

    /// Distinct categories, sorted.
    pub async fn categories(&self) -> Vec<String> {
        let feeds = self.feeds.read().await;
        feeds
            .iter()
            .map(|f| f.category.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    pub async fn by_category(&self) -> BTreeMap<String, Vec<FeedSource>> {
        let feeds = self.feeds.read().await;
        let mut grouped: BTreeMap<String, Vec<FeedSource>> = BTreeMap::new();
        for feed in feeds.iter() {
            grouped
                .entry(feed.category.clone())
                .or_default()
                .push(feed.clone());
        }
        grouped
    }

    /// Returns the updated feed, or `None` when the id is unknown.
    pub async fn set_active(&self, feed_id: &str, is_active: bool) -> Option<FeedSource> {
        let mut feeds = self.feeds.write().await;
        let feed = feeds.iter_mut().find(|f| f.id == feed_id)?;
        feed.is_active = is_active;
        Some(feed.clone())
    }
}
