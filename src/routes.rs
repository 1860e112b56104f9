use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, patch, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tower_http::trace::TraceLayer;

use crate::aggregator::FeedFailure;
use crate::error::{AppResult, ErrorResponse};
use crate::notify::{DeliveryReport, Subscription};
use crate::registry::FeedSource;
use crate::service::{ArticleListing, ArticleService};

pub struct AppState {
    pub service: ArticleService,
}

pub fn router(state: Arc<AppState>) -> Router {
    let api = Router::new()
        .route("/feeds", get(list_feeds))
        .route("/feeds/by-category", get(feeds_by_category))
        .route("/feeds/:feed_id", patch(update_feed_status))
        .route("/articles", get(list_articles))
        .route("/articles/refresh", post(refresh_articles))
        .route("/favorites", get(list_favorites))
        .route("/favorites/:article_id", post(toggle_favorite))
        .route("/read/:article_id", post(mark_read))
        .route("/notifications/public-key", get(public_key))
        .route("/notifications/subscribe", post(subscribe))
        .route("/notifications/unsubscribe", post(unsubscribe))
        .route("/notifications/test", post(send_test));

    Router::new()
        .nest("/api", api)
        .route("/health", get(health))
        .fallback(not_found)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
pub struct FeedsResponse {
    pub feeds: Vec<FeedSource>,
    pub categories: Vec<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateFeedStatus {
    pub is_active: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshResponse {
    pub refreshed_at: DateTime<Utc>,
    pub total_feeds: usize,
    pub errors: Option<Vec<FeedFailure>>,
}

#[derive(Deserialize)]
pub struct UnsubscribeRequest {
    pub endpoint: Option<String>,
}

// Feed catalog
pub async fn list_feeds(State(state): State<Arc<AppState>>) -> Json<FeedsResponse> {
    let registry = state.service.registry();
    Json(FeedsResponse {
        feeds: registry.all().await,
        categories: registry.categories().await,
    })
}

pub async fn feeds_by_category(
    State(state): State<Arc<AppState>>,
) -> Json<BTreeMap<String, Vec<FeedSource>>> {
    Json(state.service.registry().by_category().await)
}

pub async fn update_feed_status(
    State(state): State<Arc<AppState>>,
    Path(feed_id): Path<String>,
    Json(body): Json<UpdateFeedStatus>,
) -> AppResult<Json<FeedSource>> {
    let feed = state.service.set_feed_active(&feed_id, body.is_active).await?;
    Ok(Json(feed))
}

// Articles
pub async fn list_articles(State(state): State<Arc<AppState>>) -> AppResult<Json<ArticleListing>> {
    Ok(Json(state.service.get_articles().await?))
}

pub async fn refresh_articles(
    State(state): State<Arc<AppState>>,
) -> AppResult<Json<RefreshResponse>> {
    let entry = state.service.refresh().await?;
    Ok(Json(RefreshResponse {
        refreshed_at: entry.cached_at,
        total_feeds: entry.total_feeds,
        errors: entry.errors.clone(),
    }))
}

// Favorites and read state
pub async fn toggle_favorite(
    State(state): State<Arc<AppState>>,
    Path(article_id): Path<String>,
    body: Option<Json<Value>>,
) -> Json<Value> {
    let snapshot = body.map(|Json(v)| v).unwrap_or(Value::Null);
    match state.service.favorites().toggle(&article_id, snapshot).await {
        Some(stored) => Json(stored),
        None => Json(json!({ "isFavorite": false, "id": article_id })),
    }
}

pub async fn list_favorites(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({ "favorites": state.service.favorites().list().await }))
}

pub async fn mark_read(
    State(state): State<Arc<AppState>>,
    Path(article_id): Path<String>,
) -> Json<Value> {
    state.service.read_set().mark(&article_id).await;
    Json(json!({ "isRead": true }))
}

// Notifications
pub async fn public_key(State(state): State<Arc<AppState>>) -> AppResult<Json<Value>> {
    let key = state.service.notifier().public_key()?;
    Ok(Json(json!({ "publicKey": key })))
}

pub async fn subscribe(
    State(state): State<Arc<AppState>>,
    body: Option<Json<Subscription>>,
) -> AppResult<Json<Value>> {
    let subscription = body.map(|Json(s)| s).unwrap_or_default();
    state.service.notifier().subscribe(subscription).await?;
    Ok(Json(json!({ "ok": true })))
}

pub async fn unsubscribe(
    State(state): State<Arc<AppState>>,
    body: Option<Json<UnsubscribeRequest>>,
) -> Json<Value> {
    if let Some(endpoint) = body.and_then(|Json(b)| b.endpoint) {
        state.service.notifier().unsubscribe(&endpoint).await;
    }
    Json(json!({ "ok": true }))
}

pub async fn send_test(State(state): State<Arc<AppState>>) -> AppResult<Json<DeliveryReport>> {
    Ok(Json(state.service.notifier().send_test().await?))
}

pub async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

pub async fn not_found() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorResponse {
            error: "Route not found".to_string(),
        }),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::Aggregator;
    use crate::cache::FeedCache;
    use crate::config::{FetchSettings, VapidKeys};
    use crate::fetcher::Fetcher;
    use crate::notify::{LogSink, Notifier};
    use crate::registry::FeedRegistry;
    use axum::body::Body;
    use axum::http::{header, Request};
    use http_body_util::BodyExt;
    use std::time::Duration;
    use tower::ServiceExt;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn create_feed(id: &str, category: &str, url: String) -> FeedSource {
        FeedSource {
            id: id.to_string(),
            name: format!("Feed {}", id),
            url,
            category: category.to_string(),
            description: String::new(),
            is_active: true,
        }
    }

    fn create_test_app(feeds: Vec<FeedSource>, keys: Option<VapidKeys>) -> Router {
        let settings = FetchSettings {
            timeout: Duration::from_secs(3),
            ..FetchSettings::default()
        };
        let service = ArticleService::new(
            FeedRegistry::new(feeds),
            Aggregator::new(
                Fetcher::new(&settings).unwrap(),
                FeedCache::new(Duration::from_secs(600)),
                Duration::from_secs(5),
            ),
            Arc::new(Notifier::new(keys, Arc::new(LogSink))),
            Duration::from_secs(300),
        );
        router(Arc::new(AppState { service }))
    }

    fn offline_feeds() -> Vec<FeedSource> {
        vec![
            create_feed("1", "UX Design", "http://127.0.0.1:9/one".to_string()),
            create_feed("2", "UI Design", "http://127.0.0.1:9/two".to_string()),
            create_feed("3", "UX Design", "http://127.0.0.1:9/three".to_string()),
        ]
    }

    async fn mount_rss(server: &MockServer) {
        let body = r#"<?xml version="1.0"?>
            <rss version="2.0"><channel><title>F</title>
              <item><title>Grids</title><guid>g-1</guid><link>https://a.example.com/grids</link>
                <pubDate>Tue, 02 Jan 2024 10:00:00 GMT</pubDate></item>
              <item><title>Color</title><guid>g-2</guid><link>https://a.example.com/color</link>
                <pubDate>Mon, 01 Jan 2024 10:00:00 GMT</pubDate></item>
            </channel></rss>"#;
        Mock::given(method("GET"))
            .and(path("/rss"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body, "application/rss+xml"))
            .mount(server)
            .await;
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json = if body.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body).unwrap()
        };
        (status, json)
    }

    fn get_request(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn empty_post(uri: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    mod health_tests {
        use super::*;

        #[tokio::test]
        async fn test_health_endpoint() {
            let app = create_test_app(Vec::new(), None);
            let (status, body) = send(&app, get_request("/health")).await;

            assert_eq!(status, StatusCode::OK);
            assert_eq!(body["status"], "ok");
            assert!(body["timestamp"].is_string());
        }

        #[tokio::test]
        async fn test_unknown_route() {
            let app = create_test_app(Vec::new(), None);
            let (status, body) = send(&app, get_request("/api/nope")).await;

            assert_eq!(status, StatusCode::NOT_FOUND);
            assert_eq!(body["error"], "Route not found");
        }
    }

    mod feed_tests {
        use super::*;

        #[tokio::test]
        async fn test_list_feeds_with_categories() {
            let app = create_test_app(offline_feeds(), None);
            let (status, body) = send(&app, get_request("/api/feeds")).await;

            assert_eq!(status, StatusCode::OK);
            assert_eq!(body["feeds"].as_array().unwrap().len(), 3);
            assert_eq!(body["feeds"][0]["isActive"], true);
            assert_eq!(body["categories"], json!(["UI Design", "UX Design"]));
        }

        #[tokio::test]
        async fn test_feeds_by_category() {
            let app = create_test_app(offline_feeds(), None);
            let (status, body) = send(&app, get_request("/api/feeds/by-category")).await;

            assert_eq!(status, StatusCode::OK);
            assert_eq!(body["UX Design"].as_array().unwrap().len(), 2);
            assert_eq!(body["UI Design"][0]["id"], "2");
        }

        #[tokio::test]
        async fn test_update_feed_status() {
            let app = create_test_app(offline_feeds(), None);
            let (status, body) = send(
                &app,
                json_request("PATCH", "/api/feeds/2", json!({ "isActive": false })),
            )
            .await;

            assert_eq!(status, StatusCode::OK);
            assert_eq!(body["id"], "2");
            assert_eq!(body["isActive"], false);

            let (_, feeds) = send(&app, get_request("/api/feeds")).await;
            assert_eq!(feeds["feeds"][1]["isActive"], false);
        }

        #[tokio::test]
        async fn test_update_unknown_feed() {
            let app = create_test_app(offline_feeds(), None);
            let (status, body) = send(
                &app,
                json_request("PATCH", "/api/feeds/999", json!({ "isActive": true })),
            )
            .await;

            assert_eq!(status, StatusCode::NOT_FOUND);
            assert_eq!(body["error"], "Feed not found");
        }
    }

    mod article_tests {
        use super::*;

        #[tokio::test]
        async fn test_list_articles() {
            let server = MockServer::start().await;
            mount_rss(&server).await;
            let app = create_test_app(
                vec![create_feed("1", "UX", format!("{}/rss", server.uri()))],
                None,
            );

            let (status, body) = send(&app, get_request("/api/articles")).await;

            assert_eq!(status, StatusCode::OK);
            assert_eq!(body["totalFeeds"], 1);
            assert!(body["errors"].is_null());
            let articles = body["articles"].as_array().unwrap();
            assert_eq!(articles.len(), 2);
            assert_eq!(articles[0]["id"], "g-1");
            assert_eq!(articles[0]["feedSource"], "Feed 1");
            assert_eq!(articles[0]["isFavorite"], false);
            assert_eq!(articles[0]["isRead"], false);
        }

        #[tokio::test]
        async fn test_failed_feeds_listed_in_errors() {
            let server = MockServer::start().await;
            mount_rss(&server).await;
            let app = create_test_app(
                vec![
                    create_feed("1", "UX", format!("{}/rss", server.uri())),
                    create_feed("2", "UX", format!("{}/missing", server.uri())),
                ],
                None,
            );

            let (status, body) = send(&app, get_request("/api/articles")).await;

            assert_eq!(status, StatusCode::OK);
            assert_eq!(body["articles"].as_array().unwrap().len(), 2);
            assert_eq!(body["errors"][0]["feed"], "Feed 2");
        }

        #[tokio::test]
        async fn test_refresh_articles() {
            let server = MockServer::start().await;
            mount_rss(&server).await;
            let app = create_test_app(
                vec![create_feed("1", "UX", format!("{}/rss", server.uri()))],
                None,
            );

            let (status, body) = send(&app, empty_post("/api/articles/refresh")).await;

            assert_eq!(status, StatusCode::OK);
            assert_eq!(body["totalFeeds"], 1);
            assert!(body["refreshedAt"].is_string());
            assert!(body["errors"].is_null());
        }

        #[tokio::test]
        async fn test_read_and_favorite_annotations() {
            let server = MockServer::start().await;
            mount_rss(&server).await;
            let app = create_test_app(
                vec![create_feed("1", "UX", format!("{}/rss", server.uri()))],
                None,
            );

            let (status, body) = send(&app, empty_post("/api/read/g-2")).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body, json!({ "isRead": true }));

            send(
                &app,
                json_request("POST", "/api/favorites/g-1", json!({ "id": "g-1", "title": "Grids" })),
            )
            .await;

            let (_, body) = send(&app, get_request("/api/articles")).await;
            assert_eq!(body["articles"][0]["isFavorite"], true);
            assert_eq!(body["articles"][0]["isRead"], false);
            assert_eq!(body["articles"][1]["isFavorite"], false);
            assert_eq!(body["articles"][1]["isRead"], true);
        }
    }

    mod favorite_tests {
        use super::*;

        #[tokio::test]
        async fn test_toggle_favorite_round_trip() {
            let app = create_test_app(Vec::new(), None);
            let snapshot = json!({ "id": "a1", "title": "Grids", "link": "https://a.example.com" });

            let (status, added) =
                send(&app, json_request("POST", "/api/favorites/a1", snapshot)).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(added["isFavorite"], true);
            assert_eq!(added["title"], "Grids");

            let (_, listed) = send(&app, get_request("/api/favorites")).await;
            assert_eq!(listed["favorites"].as_array().unwrap().len(), 1);
            assert_eq!(listed["favorites"][0]["isFavorite"], true);

            let (_, removed) = send(&app, json_request("POST", "/api/favorites/a1", json!({}))).await;
            assert_eq!(removed, json!({ "isFavorite": false, "id": "a1" }));

            let (_, listed) = send(&app, get_request("/api/favorites")).await;
            assert_eq!(listed["favorites"], json!([]));
        }

        #[tokio::test]
        async fn test_favorite_without_body() {
            let app = create_test_app(Vec::new(), None);
            let (status, added) = send(&app, empty_post("/api/favorites/a9")).await;

            assert_eq!(status, StatusCode::OK);
            assert_eq!(added, json!({ "id": "a9", "isFavorite": true }));
        }
    }

    mod notification_tests {
        use super::*;

        fn keys() -> Option<VapidKeys> {
            VapidKeys::from_parts(Some("public-key".into()), Some("private-key".into()), None)
        }

        #[tokio::test]
        async fn test_unconfigured_notifications_return_503() {
            let app = create_test_app(Vec::new(), None);

            let (status, body) = send(&app, get_request("/api/notifications/public-key")).await;
            assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
            assert_eq!(body["error"], "VAPID keys not configured");

            let (status, _) = send(
                &app,
                json_request(
                    "POST",
                    "/api/notifications/subscribe",
                    json!({ "endpoint": "https://push.example.com/1" }),
                ),
            )
            .await;
            assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

            let (status, _) = send(&app, empty_post("/api/notifications/test")).await;
            assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        }

        #[tokio::test]
        async fn test_public_key() {
            let app = create_test_app(Vec::new(), keys());
            let (status, body) = send(&app, get_request("/api/notifications/public-key")).await;

            assert_eq!(status, StatusCode::OK);
            assert_eq!(body["publicKey"], "public-key");
        }

        #[tokio::test]
        async fn test_subscribe_without_endpoint() {
            let app = create_test_app(Vec::new(), keys());
            let (status, body) = send(
                &app,
                json_request("POST", "/api/notifications/subscribe", json!({ "keys": {} })),
            )
            .await;

            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert_eq!(body["error"], "Invalid subscription");
        }

        #[tokio::test]
        async fn test_subscribe_then_test_then_unsubscribe() {
            let app = create_test_app(Vec::new(), keys());
            let subscription = json!({
                "endpoint": "https://push.example.com/1",
                "keys": { "p256dh": "k", "auth": "a" }
            });

            let (status, body) = send(
                &app,
                json_request("POST", "/api/notifications/subscribe", subscription),
            )
            .await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body, json!({ "ok": true }));

            let (status, report) = send(&app, empty_post("/api/notifications/test")).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(report, json!({ "sent": 1, "failed": 0 }));

            let (status, _) = send(
                &app,
                json_request(
                    "POST",
                    "/api/notifications/unsubscribe",
                    json!({ "endpoint": "https://push.example.com/1" }),
                ),
            )
            .await;
            assert_eq!(status, StatusCode::OK);

            let (_, report) = send(&app, empty_post("/api/notifications/test")).await;
            assert_eq!(report, json!({ "sent": 0, "failed": 0 }));
        }

        #[tokio::test]
        async fn test_unsubscribe_without_body() {
            let app = create_test_app(Vec::new(), None);
            let (status, body) = send(&app, empty_post("/api/notifications/unsubscribe")).await;

            assert_eq!(status, StatusCode::OK);
            assert_eq!(body, json!({ "ok": true }));
        }
    }
}
