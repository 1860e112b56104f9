use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use tracing::{debug, error, info};

use crate::aggregator::{Aggregator, FeedFailure};
use crate::cache::FeedCache;
use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::fetcher::Fetcher;
use crate::normalize::Article;
use crate::notify::Notifier;
use crate::registry::{FeedRegistry, FeedSource};

/// Merged result of one aggregation pass, shared read-only once stored.
#[derive(Debug)]
pub struct ResultCacheEntry {
    pub articles: Vec<Article>,
    pub errors: Option<Vec<FeedFailure>>,
    pub cached_at: DateTime<Utc>,
    pub total_feeds: usize,
    stored_at: Instant,
}

type PassFuture = Shared<BoxFuture<'static, Result<Arc<ResultCacheEntry>, String>>>;

#[derive(Default)]
struct CacheState {
    entry: Option<Arc<ResultCacheEntry>>,
    /// The single running pass, tagged with the generation it started in
    in_flight: Option<(u64, PassFuture)>,
    /// A pass invalidated while running; the next pass waits for it
    superseded: Option<PassFuture>,
    /// Bumped by every invalidation; passes from older generations are not stored
    generation: u64,
    seen_ids: Option<HashSet<String>>,
}

/// Favorited article snapshots, in the order they were favorited.
#[derive(Default)]
pub struct FavoritesStore {
    entries: RwLock<Vec<(String, Value)>>,
}

impl FavoritesStore {
    /// Removes the favorite if present and returns `None`; otherwise stores the
    /// snapshot marked `isFavorite: true` and returns it.
    pub async fn toggle(&self, article_id: &str, snapshot: Value) -> Option<Value> {
        let mut entries = self.entries.write().await;
        if let Some(pos) = entries.iter().position(|(id, _)| id == article_id) {
            entries.remove(pos);
            return None;
        }

        let mut snapshot = match snapshot {
            Value::Object(map) => map,
            _ => serde_json::Map::new(),
        };
        snapshot
            .entry("id")
            .or_insert_with(|| Value::String(article_id.to_string()));
        snapshot.insert("isFavorite".to_string(), Value::Bool(true));

        let snapshot = Value::Object(snapshot);
        entries.push((article_id.to_string(), snapshot.clone()));
        Some(snapshot)
    }

    pub async fn contains(&self, article_id: &str) -> bool {
        self.entries.read().await.iter().any(|(id, _)| id == article_id)
    }

    pub async fn ids(&self) -> HashSet<String> {
        self.entries.read().await.iter().map(|(id, _)| id.clone()).collect()
    }

    pub async fn list(&self) -> Vec<Value> {
        self.entries.read().await.iter().map(|(_, v)| v.clone()).collect()
    }
}

#[derive(Default)]
pub struct ReadSet {
    ids: RwLock<HashSet<String>>,
}

impl ReadSet {
    pub async fn mark(&self, article_id: &str) {
        self.ids.write().await.insert(article_id.to_string());
    }

    pub async fn contains(&self, article_id: &str) -> bool {
        self.ids.read().await.contains(article_id)
    }

    pub async fn ids(&self) -> HashSet<String> {
        self.ids.read().await.clone()
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArticleView {
    #[serde(flatten)]
    pub article: Article,
    pub is_favorite: bool,
    pub is_read: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArticleListing {
    pub articles: Vec<ArticleView>,
    pub errors: Option<Vec<FeedFailure>>,
    pub total_feeds: usize,
}

struct Inner {
    registry: FeedRegistry,
    aggregator: Aggregator,
    notifier: Arc<Notifier>,
    ttl: Duration,
    state: Mutex<CacheState>,
    favorites: FavoritesStore,
    read: ReadSet,
    passes: AtomicUsize,
}

/// Owns the feed catalog, both cache tiers and the per-user article state.
/// Cloning is cheap and shares everything.
#[derive(Clone)]
pub struct ArticleService {
    inner: Arc<Inner>,
}

impl ArticleService {
    pub fn new(
        registry: FeedRegistry,
        aggregator: Aggregator,
        notifier: Arc<Notifier>,
        ttl: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                registry,
                aggregator,
                notifier,
                ttl,
                state: Mutex::new(CacheState::default()),
                favorites: FavoritesStore::default(),
                read: ReadSet::default(),
                passes: AtomicUsize::new(0),
            }),
        }
    }

    pub fn from_config(config: &Config, notifier: Arc<Notifier>) -> anyhow::Result<Self> {
        let settings = config.fetch_settings();
        let aggregator = Aggregator::new(
            Fetcher::new(&settings)?,
            FeedCache::new(config.feed_cache_ttl()),
            settings.feed_deadline,
        );
        Ok(Self::new(
            FeedRegistry::from_config(&config.feeds),
            aggregator,
            notifier,
            config.cache_ttl(),
        ))
    }

    pub fn registry(&self) -> &FeedRegistry {
        &self.inner.registry
    }

    pub fn notifier(&self) -> &Arc<Notifier> {
        &self.inner.notifier
    }

    pub fn favorites(&self) -> &FavoritesStore {
        &self.inner.favorites
    }

    pub fn read_set(&self) -> &ReadSet {
        &self.inner.read
    }

    #[cfg(test)]
    fn pass_count(&self) -> usize {
        self.inner.passes.load(Ordering::SeqCst)
    }

    pub async fn set_feed_active(&self, feed_id: &str, is_active: bool) -> AppResult<FeedSource> {
        let feed = self
            .inner
            .registry
            .set_active(feed_id, is_active)
            .await
            .ok_or_else(|| AppError::NotFound("Feed not found".to_string()))?;
        info!("Feed '{}' active = {}", feed.name, is_active);
        self.invalidate().await;
        Ok(feed)
    }

    /// Drops the merged result; the next read runs a fresh pass. A pass that
    /// is still running finishes first and its result is discarded.
    pub async fn invalidate(&self) {
        let mut state = self.inner.state.lock().await;
        state.generation += 1;
        state.entry = None;
        if let Some((_, pass)) = state.in_flight.take() {
            state.superseded = Some(pass);
        }
    }

    /// Merged articles annotated with favorite and read status.
    pub async fn get_articles(&self) -> AppResult<ArticleListing> {
        let entry = self.current_entry().await?;
        let favorites = self.inner.favorites.ids().await;
        let read = self.inner.read.ids().await;

        let articles = entry
            .articles
            .iter()
            .map(|article| ArticleView {
                is_favorite: favorites.contains(&article.id),
                is_read: read.contains(&article.id),
                article: article.clone(),
            })
            .collect();

        Ok(ArticleListing {
            articles,
            errors: entry.errors.clone(),
            total_feeds: entry.total_feeds,
        })
    }

    /// Fresh entries are served as is; stale ones are served while a background
    /// pass replaces them; an empty cache waits for a pass.
    async fn current_entry(&self) -> AppResult<Arc<ResultCacheEntry>> {
        let pass = {
            let mut state = self.inner.state.lock().await;
            if let Some(entry) = state.entry.clone() {
                if entry.stored_at.elapsed() >= self.inner.ttl {
                    debug!("Serving stale articles while refreshing");
                    self.start_pass(&mut state);
                }
                return Ok(entry);
            }
            self.start_pass(&mut state)
        };
        pass.await.map_err(AppError::Internal)
    }

    /// Forces a pass that bypasses the per-feed cache. Joins the running pass
    /// if there is one.
    pub async fn refresh(&self) -> AppResult<Arc<ResultCacheEntry>> {
        self.inner.aggregator.cache().clear().await;
        let pass = {
            let mut state = self.inner.state.lock().await;
            self.start_pass(&mut state)
        };
        pass.await.map_err(AppError::Internal)
    }

    /// Returns the running pass or spawns a new one. The pass runs as its own
    /// task, so it completes even if every waiter goes away. Passes never
    /// overlap: a new pass first waits for a superseded one.
    fn start_pass(&self, state: &mut CacheState) -> PassFuture {
        if let Some((_, pass)) = &state.in_flight {
            return pass.clone();
        }

        let generation = state.generation;
        let predecessor = state.superseded.take();
        let inner = self.inner.clone();
        let handle = tokio::spawn(async move {
            if let Some(previous) = predecessor {
                debug!("Waiting for superseded pass to finish");
                let _ = previous.await;
            }
            let outcome = AssertUnwindSafe(inner.run_pass()).catch_unwind().await;
            let entry = outcome.ok();
            inner.finish(generation, entry.clone()).await;
            entry.ok_or_else(|| "aggregation pass panicked".to_string())
        });

        let pass = async move {
            match handle.await {
                Ok(result) => result,
                Err(e) => Err(format!("aggregation pass aborted: {}", e)),
            }
        }
        .boxed()
        .shared();

        state.in_flight = Some((generation, pass.clone()));
        pass
    }
}

impl Inner {
    async fn run_pass(&self) -> Arc<ResultCacheEntry> {
        let feeds = self.registry.active().await;
        let number = self.passes.fetch_add(1, Ordering::SeqCst) + 1;
        info!("Starting aggregation pass #{} over {} feeds", number, feeds.len());

        let result = self.aggregator.fetch_all(&feeds).await;
        info!(
            "Aggregation pass complete: {} articles, {} failed feeds",
            result.articles.len(),
            result.errors.as_ref().map_or(0, Vec::len)
        );

        Arc::new(ResultCacheEntry {
            articles: result.articles,
            errors: result.errors,
            cached_at: Utc::now(),
            total_feeds: feeds.len(),
            stored_at: Instant::now(),
        })
    }

    /// Clears the in-flight handle and stores the entry unless the cache was
    /// invalidated meanwhile. Articles never seen in any earlier pass are
    /// announced off the read path.
    async fn finish(&self, generation: u64, entry: Option<Arc<ResultCacheEntry>>) {
        let new_articles = {
            let mut state = self.state.lock().await;
            if matches!(&state.in_flight, Some((g, _)) if *g == generation) {
                state.in_flight = None;
            }

            let Some(entry) = entry else {
                error!("Aggregation pass failed");
                return;
            };
            if state.generation != generation {
                debug!("Discarding pass result from before invalidation");
                return;
            }

            let new_articles: Vec<Article> = match &state.seen_ids {
                Some(seen) => entry
                    .articles
                    .iter()
                    .filter(|a| !seen.contains(&a.id))
                    .cloned()
                    .collect(),
                None => Vec::new(),
            };
            // Seen ids accumulate, so a feed that failed or was switched off
            // does not re-announce its backlog when it comes back.
            state
                .seen_ids
                .get_or_insert_with(HashSet::new)
                .extend(entry.articles.iter().map(|a| a.id.clone()));
            state.entry = Some(entry);
            new_articles
        };

        if !new_articles.is_empty() {
            info!("{} new articles since last pass", new_articles.len());
            let notifier = self.notifier.clone();
            tokio::spawn(async move {
                notifier.announce(&new_articles).await;
            });
        }
    }
}

/// Refreshes once at startup, then every `interval_minutes`, independent of
/// read traffic.
pub async fn start_background_refresh(service: ArticleService, interval_minutes: u64) {
    let interval = Duration::from_secs(interval_minutes * 60);

    info!("Starting initial feed fetch");
    if let Err(e) = service.refresh().await {
        error!("Initial feed fetch failed: {}", e);
    }

    loop {
        tokio::time::sleep(interval).await;
        info!("Starting scheduled feed refresh");
        if let Err(e) = service.refresh().await {
            error!("Scheduled feed refresh failed: {}", e);
        }
    }
}
