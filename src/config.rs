use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Background refresh interval in minutes
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval: u64,
    /// Merged article cache TTL in seconds
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl: u64,
    /// Per-feed article cache TTL in seconds
    #[serde(default = "default_feed_cache_ttl")]
    pub feed_cache_ttl: u64,
    /// Per-request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout: u64,
    /// Budget in seconds for resolving one feed, discovery and fallback paths included
    #[serde(default = "default_feed_deadline")]
    pub feed_deadline: u64,
    #[serde(default = "default_max_redirects")]
    pub max_redirects: usize,
    pub feeds: Vec<FeedConfig>,
}

fn default_refresh_interval() -> u64 {
    10
}

fn default_cache_ttl() -> u64 {
    5 * 60
}

fn default_feed_cache_ttl() -> u64 {
    10 * 60
}

fn default_request_timeout() -> u64 {
    12
}

fn default_feed_deadline() -> u64 {
    30
}

fn default_max_redirects() -> usize {
    5
}

fn default_active() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct FeedConfig {
    pub id: String,
    pub name: String,
    pub url: String,
    pub category: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Parse config from a TOML string (useful for testing)
    pub fn from_str(content: &str) -> anyhow::Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        let mut seen = HashSet::new();
        for feed in &self.feeds {
            if !seen.insert(feed.id.as_str()) {
                anyhow::bail!("duplicate feed id '{}' in configuration", feed.id);
            }
        }
        Ok(())
    }

    pub fn fetch_settings(&self) -> FetchSettings {
        FetchSettings {
            timeout: Duration::from_secs(self.request_timeout),
            max_redirects: self.max_redirects,
            feed_deadline: Duration::from_secs(self.feed_deadline),
        }
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl)
    }

    pub fn feed_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.feed_cache_ttl)
    }
}

/// HTTP behaviour shared by every feed request.
#[derive(Debug, Clone)]
pub struct FetchSettings {
    pub timeout: Duration,
    pub max_redirects: usize,
    pub feed_deadline: Duration,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(default_request_timeout()),
            max_redirects: default_max_redirects(),
            feed_deadline: Duration::from_secs(default_feed_deadline()),
        }
    }
}

/// Process settings that come from the environment rather than `feeds.toml`.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    pub feeds_path: String,
    pub frontend_url: String,
    pub vapid: Option<VapidKeys>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VapidKeys {
    pub public_key: String,
    pub private_key: String,
    pub email: String,
}

impl ServerSettings {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let port = std::env::var("PORT")
            .unwrap_or_else(|_| "3001".to_string())
            .parse()?;

        Ok(Self {
            host: std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port,
            feeds_path: std::env::var("FEEDS_CONFIG").unwrap_or_else(|_| "feeds.toml".to_string()),
            frontend_url: std::env::var("FRONTEND_URL")
                .unwrap_or_else(|_| "http://localhost:5173".to_string()),
            vapid: VapidKeys::from_parts(
                std::env::var("VAPID_PUBLIC_KEY").ok(),
                std::env::var("VAPID_PRIVATE_KEY").ok(),
                std::env::var("VAPID_EMAIL").ok(),
            ),
        })
    }
}

impl VapidKeys {
    /// Both keys must be present and non-empty; the contact email is optional.
    pub fn from_parts(
        public_key: Option<String>,
        private_key: Option<String>,
        email: Option<String>,
    ) -> Option<Self> {
        let public_key = public_key.filter(|k| !k.trim().is_empty())?;
        let private_key = private_key.filter(|k| !k.trim().is_empty())?;
        Some(Self {
            public_key,
            private_key,
            email: email
                .filter(|e| !e.trim().is_empty())
                .unwrap_or_else(|| "no-reply@design-diario.local".to_string()),
        })
    }
}
