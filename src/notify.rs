//! Boundary to the push-notification subsystem.
//!
//! Delivery itself lives behind [`NotificationSink`]; this module only keeps
//! the subscriber list and decides what to announce.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::config::VapidKeys;
use crate::error::{AppError, AppResult};
use crate::normalize::Article;

pub const APP_TITLE: &str = "Design Diário";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationPayload {
    pub title: String,
    pub body: String,
    pub url: String,
}

/// A push subscription as registered by the browser. Only `endpoint` is
/// interpreted; the rest travels to the sink untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    #[serde(default)]
    pub endpoint: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DeliveryReport {
    pub sent: usize,
    pub failed: usize,
}

#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn deliver(
        &self,
        payload: &NotificationPayload,
        subscribers: &[Subscription],
    ) -> DeliveryReport;
}

/// Sink that only records deliveries in the log.
pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    async fn deliver(
        &self,
        payload: &NotificationPayload,
        subscribers: &[Subscription],
    ) -> DeliveryReport {
        info!(
            title = %payload.title,
            body = %payload.body,
            subscribers = subscribers.len(),
            "Notification dispatched"
        );
        DeliveryReport {
            sent: subscribers.len(),
            failed: 0,
        }
    }
}

pub struct Notifier {
    keys: Option<VapidKeys>,
    sink: Arc<dyn NotificationSink>,
    subscriptions: RwLock<HashMap<String, Subscription>>,
}

impl Notifier {
    pub fn new(keys: Option<VapidKeys>, sink: Arc<dyn NotificationSink>) -> Self {
        Self {
            keys,
            sink,
            subscriptions: RwLock::new(HashMap::new()),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.keys.is_some()
    }

    fn keys(&self) -> AppResult<&VapidKeys> {
        self.keys
            .as_ref()
            .ok_or_else(|| AppError::Configuration("VAPID keys not configured".to_string()))
    }

    pub fn public_key(&self) -> AppResult<&str> {
        Ok(&self.keys()?.public_key)
    }

    pub async fn subscribe(&self, subscription: Subscription) -> AppResult<()> {
        self.keys()?;
        if subscription.endpoint.trim().is_empty() {
            return Err(AppError::BadRequest("Invalid subscription".to_string()));
        }
        self.subscriptions
            .write()
            .await
            .insert(subscription.endpoint.clone(), subscription);
        Ok(())
    }

    pub async fn unsubscribe(&self, endpoint: &str) {
        self.subscriptions.write().await.remove(endpoint);
    }

    pub async fn subscriber_count(&self) -> usize {
        self.subscriptions.read().await.len()
    }

    pub async fn send(&self, payload: &NotificationPayload) -> AppResult<DeliveryReport> {
        self.keys()?;
        let subscribers: Vec<Subscription> =
            self.subscriptions.read().await.values().cloned().collect();
        Ok(self.sink.deliver(payload, &subscribers).await)
    }

    pub async fn send_test(&self) -> AppResult<DeliveryReport> {
        self.send(&NotificationPayload {
            title: APP_TITLE.to_string(),
            body: "New articles available".to_string(),
            url: "/".to_string(),
        })
        .await
    }

    /// Announces freshly seen articles. Does nothing when notifications are not
    /// configured or nobody is subscribed.
    pub async fn announce(&self, new_articles: &[Article]) -> Option<DeliveryReport> {
        let payload = new_articles_payload(new_articles)?;
        if !self.is_configured() || self.subscriber_count().await == 0 {
            debug!("Skipping notification for {} new articles", new_articles.len());
            return None;
        }
        self.send(&payload).await.ok()
    }
}

pub fn new_articles_payload(new_articles: &[Article]) -> Option<NotificationPayload> {
    match new_articles {
        [] => None,
        [article] => Some(NotificationPayload {
            title: format!("{}: {}", APP_TITLE, article.feed_source),
            body: article.title.clone(),
            url: if article.link.is_empty() {
                "/".to_string()
            } else {
                article.link.clone()
            },
        }),
        many => Some(NotificationPayload {
            title: APP_TITLE.to_string(),
            body: format!("{} new articles available", many.len()),
            url: "/".to_string(),
        }),
    }
}
