use std::sync::Arc;

use axum::http::{header, HeaderValue, Method};
use tower_http::cors::CorsLayer;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use design_hub::config::{Config, ServerSettings};
use design_hub::notify::{LogSink, Notifier};
use design_hub::routes::{self, AppState};
use design_hub::service::{start_background_refresh, ArticleService};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "design_hub=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let settings = ServerSettings::from_env()?;
    let config = Config::load(&settings.feeds_path)?;
    info!("Loaded {} feeds from {}", config.feeds.len(), settings.feeds_path);

    if settings.vapid.is_none() {
        warn!("VAPID keys not configured, push notifications disabled");
    }
    let notifier = Arc::new(Notifier::new(settings.vapid.clone(), Arc::new(LogSink)));
    let service = ArticleService::from_config(&config, notifier)?;

    // Start background refresh task
    let bg_service = service.clone();
    let refresh_interval = config.refresh_interval;
    tokio::spawn(async move {
        start_background_refresh(bg_service, refresh_interval).await;
    });

    let cors = CorsLayer::new()
        .allow_origin(settings.frontend_url.parse::<HeaderValue>()?)
        .allow_methods([Method::GET, Method::POST, Method::PATCH])
        .allow_headers([header::CONTENT_TYPE])
        .allow_credentials(true);

    let app = routes::router(Arc::new(AppState { service })).layer(cors);

    // Start server
    let addr = format!("{}:{}", settings.host, settings.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Server starting on http://{}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
