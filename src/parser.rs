use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use feed_rs::model::Entry;
use regex::Regex;
use serde::Deserialize;
use url::Url;

use crate::fetcher::FetchError;
use crate::normalize::{strip_html, RawItem};
use crate::sanitize::sanitize;

static LINK_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<link\b[^>]*>").expect("valid regex"));
static ATTRIBUTE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)([a-z][a-z0-9:-]*)\s*=\s*(?:"([^"]*)"|'([^']*)')"#).expect("valid regex")
});

const FEED_LINK_TYPES: &[&str] = &[
    "application/rss+xml",
    "application/atom+xml",
    "application/xml",
    "application/feed+json",
];

/// A fetched response body, classified once by what it claims to be.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedDocument {
    Xml(String),
    Json(String),
    /// A web page that may link to its feed
    Html(String),
    Unrecognized(String),
}

impl FeedDocument {
    pub fn classify(content_type: &str, body: String) -> Self {
        let content_type = content_type.to_ascii_lowercase();
        let head = body.trim_start_matches('\u{feff}').trim_start();

        if content_type.contains("application/feed+json") || content_type.contains("application/json")
        {
            FeedDocument::Json(body)
        } else if head.starts_with("<?xml") || is_xml_content_type(&content_type) {
            FeedDocument::Xml(body)
        } else if content_type.contains("text/html") {
            FeedDocument::Html(body)
        } else {
            FeedDocument::Unrecognized(body)
        }
    }

    pub fn body(&self) -> &str {
        match self {
            FeedDocument::Xml(body)
            | FeedDocument::Json(body)
            | FeedDocument::Html(body)
            | FeedDocument::Unrecognized(body) => body,
        }
    }

    /// Items of a feed document. HTML pages carry no items of their own; the
    /// resolver follows their feed link instead.
    pub fn extract_items(&self) -> Result<Vec<RawItem>, FetchError> {
        match self {
            FeedDocument::Xml(body) => parse_xml(body),
            FeedDocument::Json(body) => parse_json(body),
            FeedDocument::Html(_) => Err(FetchError::NotAFeed("HTML page".to_string())),
            FeedDocument::Unrecognized(_) => {
                Err(FetchError::NotAFeed("unrecognized content type".to_string()))
            }
        }
    }
}

fn is_xml_content_type(content_type: &str) -> bool {
    !content_type.contains("html")
        && (content_type.contains("xml")
            || content_type.contains("rss")
            || content_type.contains("atom"))
}

/// Sanitizes then parses RSS or Atom.
pub fn parse_xml(body: &str) -> Result<Vec<RawItem>, FetchError> {
    let cleaned = sanitize(body);
    // Empty ids stay empty so the normalizer can fall back to the link.
    let parser = feed_rs::parser::Builder::new()
        .id_generator(|_, _, _| String::new())
        .build();
    let feed = parser
        .parse(cleaned.as_bytes())
        .map_err(|e| FetchError::Parse(e.to_string()))?;

    Ok(feed.entries.into_iter().map(raw_item_from_entry).collect())
}

fn raw_item_from_entry(entry: Entry) -> RawItem {
    let link = entry
        .links
        .iter()
        .find(|l| l.rel.as_deref().map_or(true, |rel| rel == "alternate"))
        .or_else(|| entry.links.first())
        .map(|l| l.href.clone());

    let enclosure_url = entry
        .media
        .iter()
        .flat_map(|m| m.content.iter())
        .find_map(|c| c.url.as_ref().map(|u| u.to_string()));

    let thumbnail_url = entry
        .media
        .iter()
        .flat_map(|m| m.thumbnails.iter())
        .map(|t| t.image.uri.clone())
        .next();

    let content = entry.content.and_then(|c| c.body);
    let summary = entry.summary.map(|s| s.content);
    let snippet = content
        .as_deref()
        .or(summary.as_deref())
        .map(strip_html)
        .filter(|s| !s.is_empty());

    RawItem {
        guid: Some(entry.id).filter(|id| !id.is_empty()),
        link,
        title: entry.title.map(|t| t.content),
        snippet,
        content,
        summary,
        published: entry.published.or(entry.updated),
        authors: entry.authors.into_iter().map(|p| p.name).collect(),
        enclosure_url,
        thumbnail_url,
    }
}

#[derive(Debug, Deserialize)]
struct JsonFeed {
    items: Option<Vec<JsonFeedItem>>,
    #[serde(default)]
    authors: Vec<JsonAuthor>,
    author: Option<JsonAuthor>,
}

#[derive(Debug, Deserialize)]
struct JsonFeedItem {
    id: Option<serde_json::Value>,
    url: Option<String>,
    external_url: Option<String>,
    title: Option<String>,
    content_html: Option<String>,
    content_text: Option<String>,
    summary: Option<String>,
    image: Option<String>,
    banner_image: Option<String>,
    date_published: Option<String>,
    date_modified: Option<String>,
    #[serde(default)]
    authors: Vec<JsonAuthor>,
    author: Option<JsonAuthor>,
}

#[derive(Debug, Clone, Deserialize)]
struct JsonAuthor {
    name: Option<String>,
}

fn author_names(authors: &[JsonAuthor], author: &Option<JsonAuthor>) -> Vec<String> {
    authors
        .iter()
        .chain(author.iter())
        .filter_map(|a| a.name.clone())
        .collect()
}

fn parse_date(value: Option<&str>) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value?.trim())
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Parses a JSON Feed (versions 1.0 and 1.1).
pub fn parse_json(body: &str) -> Result<Vec<RawItem>, FetchError> {
    let feed: JsonFeed =
        serde_json::from_str(body).map_err(|e| FetchError::Parse(e.to_string()))?;
    let items = feed
        .items
        .ok_or_else(|| FetchError::Parse("JSON document has no items array".to_string()))?;
    let feed_authors = author_names(&feed.authors, &feed.author);

    Ok(items
        .into_iter()
        .map(|item| {
            let mut authors = author_names(&item.authors, &item.author);
            if authors.is_empty() {
                authors = feed_authors.clone();
            }

            let id = item.id.and_then(|id| match id {
                serde_json::Value::String(s) => Some(s),
                serde_json::Value::Number(n) => Some(n.to_string()),
                _ => None,
            });

            let snippet = item
                .content_text
                .clone()
                .or_else(|| item.content_html.as_deref().map(strip_html))
                .filter(|s| !s.trim().is_empty());

            RawItem {
                guid: id,
                link: item.url.or(item.external_url),
                title: item.title,
                snippet,
                content: item.content_html.or(item.content_text),
                summary: item.summary,
                published: parse_date(item.date_published.as_deref())
                    .or_else(|| parse_date(item.date_modified.as_deref())),
                authors,
                enclosure_url: item.image,
                thumbnail_url: item.banner_image,
            }
        })
        .collect())
}

/// First `<link rel="alternate">` pointing at a feed, resolved against `base`.
pub fn find_feed_link(html: &str, base: &Url) -> Option<Url> {
    LINK_TAG.find_iter(html).find_map(|tag| {
        let mut rel = None;
        let mut kind = None;
        let mut href = None;

        for caps in ATTRIBUTE.captures_iter(tag.as_str()) {
            let value = caps
                .get(2)
                .or_else(|| caps.get(3))
                .map(|m| m.as_str().trim())
                .unwrap_or_default();
            match caps[1].to_ascii_lowercase().as_str() {
                "rel" => rel = Some(value.to_ascii_lowercase()),
                "type" => kind = Some(value.to_ascii_lowercase()),
                "href" => href = Some(value.replace("&amp;", "&")),
                _ => {}
            }
        }

        let is_alternate = rel?.split_whitespace().any(|r| r == "alternate");
        let is_feed = FEED_LINK_TYPES.contains(&kind?.as_str());
        if !(is_alternate && is_feed) {
            return None;
        }
        base.join(&href?).ok()
    })
}
