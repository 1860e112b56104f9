use reqwest::{header, redirect, Client};
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use crate::config::FetchSettings;
use crate::normalize::RawItem;
use crate::parser::{find_feed_link, parse_json, parse_xml, FeedDocument};

const USER_AGENT: &str = "DesignHub/1.0 (RSS Aggregator)";

const ACCEPT: &str = "application/rss+xml, application/atom+xml, application/feed+json, \
     application/xml;q=0.9, text/xml;q=0.9, application/json;q=0.8, */*;q=0.5";

/// Tried against the feed URL's origin when nothing else yields a feed.
const COMMON_FEED_PATHS: &[&str] = &[
    "/feed",
    "/feed/",
    "/feed.xml",
    "/rss",
    "/rss.xml",
    "/index.xml",
    "/atom.xml",
    "/blog/feed",
    "/blog/feed/",
];

/// Failure to turn one feed URL into items.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Request failed: {0}")]
    Network(reqwest::Error),
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    #[error("Request timed out")]
    Timeout,
    /// Body still malformed after sanitizing
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("Not a feed: {0}")]
    NotAFeed(String),
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FetchError::Timeout
        } else {
            FetchError::Network(err)
        }
    }
}

/// A response body together with the URL it was finally served from.
struct Fetched {
    url: Url,
    document: FeedDocument,
}

/// Resolves feed URLs of any supported shape into raw items.
pub struct Fetcher {
    client: Client,
}

impl Fetcher {
    pub fn new(settings: &FetchSettings) -> anyhow::Result<Self> {
        let mut headers = header::HeaderMap::new();
        headers.insert(header::ACCEPT, header::HeaderValue::from_static(ACCEPT));

        let client = Client::builder()
            .timeout(settings.timeout)
            .redirect(redirect::Policy::limited(settings.max_redirects))
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .build()?;

        Ok(Self { client })
    }

    async fn fetch(&self, url: &Url) -> Result<Fetched, FetchError> {
        let response = self.client.get(url.clone()).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::HttpStatus(status.as_u16()));
        }

        let final_url = response.url().clone();
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        let body = response.text().await?;

        Ok(Fetched {
            url: final_url,
            document: FeedDocument::classify(&content_type, body),
        })
    }

    /// Fetches `feed_url` and returns its items, whatever the format.
    ///
    /// Order of attempts: the URL itself (RSS/Atom, JSON Feed, or an HTML page
    /// linking to a feed), then well-known feed paths on the same origin, then
    /// an XML parse of the original body regardless of its content type. The
    /// error of the first attempt is returned when all of them fail.
    pub async fn resolve(&self, feed_url: &str) -> Result<Vec<RawItem>, FetchError> {
        let url = Url::parse(feed_url).map_err(|e| FetchError::InvalidUrl(e.to_string()))?;

        let (original, error) = match self.fetch(&url).await {
            Ok(fetched) => match self.items_from(&fetched).await {
                Ok(items) => return Ok(items),
                Err(e) => (Some(fetched.document), e),
            },
            Err(e) => (None, e),
        };
        debug!("Direct resolution of {} failed: {}", url, error);

        if let Some(items) = self.try_common_paths(&url).await {
            return Ok(items);
        }

        if let Some(document) = original {
            if let Ok(items) = parse_xml(document.body()) {
                info!("Parsed {} as XML despite its content type", url);
                return Ok(items);
            }
        }

        Err(error)
    }

    async fn items_from(&self, fetched: &Fetched) -> Result<Vec<RawItem>, FetchError> {
        let FeedDocument::Html(html) = &fetched.document else {
            return fetched.document.extract_items();
        };

        let feed_url = find_feed_link(html, &fetched.url)
            .ok_or_else(|| FetchError::NotAFeed("no feed link in HTML page".to_string()))?;
        info!("Discovered feed {} from {}", feed_url, fetched.url);

        // Discovery is one level deep: whatever the link serves is parsed as a feed.
        let discovered = self.fetch(&feed_url).await?;
        match discovered.document {
            FeedDocument::Json(body) => parse_json(&body),
            other => parse_xml(other.body()),
        }
    }

    async fn try_common_paths(&self, url: &Url) -> Option<Vec<RawItem>> {
        for candidate in candidate_urls(url) {
            let fetched = match self.fetch(&candidate).await {
                Ok(fetched) => fetched,
                Err(e) => {
                    debug!("Candidate {} failed: {}", candidate, e);
                    continue;
                }
            };

            let parsed = match fetched.document {
                FeedDocument::Html(_) => continue,
                FeedDocument::Json(body) => parse_json(&body),
                other => parse_xml(other.body()),
            };
            match parsed {
                Ok(items) => {
                    info!("Found feed for {} at {}", url, candidate);
                    return Some(items);
                }
                Err(e) => debug!("Candidate {} is not a feed: {}", candidate, e),
            }
        }
        None
    }
}

/// Candidate order: Medium heuristics, then the common paths on the origin.
/// The original URL and duplicates are skipped.
pub fn candidate_urls(url: &Url) -> Vec<Url> {
    let mut candidates = medium_candidates(url);
    candidates.extend(COMMON_FEED_PATHS.iter().filter_map(|path| url.join(path).ok()));

    let mut unique: Vec<Url> = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        if &candidate != url && !unique.contains(&candidate) {
            unique.push(candidate);
        }
    }
    unique
}

fn medium_candidates(url: &Url) -> Vec<Url> {
    let Some(host) = url.host_str() else {
        return Vec::new();
    };
    let path = url.path().trim_end_matches('/');

    if host.ends_with(".medium.com") {
        // sub.medium.com/publication -> sub.medium.com/publication/feed
        return url.join(&format!("{}/feed", path)).into_iter().collect();
    }

    if host == "medium.com" || host == "www.medium.com" {
        // medium.com/@user -> medium.com/feed/@user
        let first_segment = path.trim_start_matches('/').split('/').next().unwrap_or("");
        if !first_segment.is_empty() && first_segment != "feed" {
            return url
                .join(&format!("/feed/{}", first_segment))
                .into_iter()
                .collect();
        }
    }

    Vec::new()
}
