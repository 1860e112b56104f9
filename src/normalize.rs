use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub const UNTITLED: &str = "Untitled";

static IMG_SRC: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"<img[^>]+src=["']([^"'>]+)["']"#).expect("valid regex"));
static HTML_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<[^>]*>").expect("valid regex"));
static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));

/// Format-neutral view of one feed entry, filled by whichever parser read it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawItem {
    pub guid: Option<String>,
    pub link: Option<String>,
    pub title: Option<String>,
    /// Plain-text rendition of the body
    pub snippet: Option<String>,
    pub content: Option<String>,
    pub summary: Option<String>,
    pub published: Option<DateTime<Utc>>,
    pub authors: Vec<String>,
    pub enclosure_url: Option<String>,
    pub thumbnail_url: Option<String>,
}

/// Canonical article as cached and served. Favorite/read flags are not part
/// of it; they are joined in per response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Article {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    pub content: Option<String>,
    pub link: String,
    pub pub_date: DateTime<Utc>,
    pub author: Option<String>,
    pub feed_source: String,
    pub image_url: Option<String>,
}

type Extractor = fn(&RawItem) -> Option<String>;

const DESCRIPTION_EXTRACTORS: &[Extractor] = &[snippet, content, summary];

const CONTENT_EXTRACTORS: &[Extractor] = &[content, summary, snippet];

const AUTHOR_EXTRACTORS: &[Extractor] = &[joined_authors];

const IMAGE_EXTRACTORS: &[Extractor] = &[enclosure_image, thumbnail_image, content_image];

/// Runs extractors in order and keeps the first non-blank value.
fn first_of(item: &RawItem, extractors: &[Extractor]) -> Option<String> {
    extractors
        .iter()
        .filter_map(|extract| extract(item))
        .find(|value| !value.trim().is_empty())
}

fn snippet(item: &RawItem) -> Option<String> {
    item.snippet.clone()
}

fn content(item: &RawItem) -> Option<String> {
    item.content.clone()
}

fn summary(item: &RawItem) -> Option<String> {
    item.summary.clone()
}

fn joined_authors(item: &RawItem) -> Option<String> {
    let names: Vec<&str> = item
        .authors
        .iter()
        .map(|a| a.trim())
        .filter(|a| !a.is_empty())
        .collect();
    (!names.is_empty()).then(|| names.join(", "))
}

fn enclosure_image(item: &RawItem) -> Option<String> {
    item.enclosure_url.clone()
}

fn thumbnail_image(item: &RawItem) -> Option<String> {
    item.thumbnail_url.clone()
}

fn content_image(item: &RawItem) -> Option<String> {
    [&item.content, &item.summary]
        .into_iter()
        .flatten()
        .find_map(|html| IMG_SRC.captures(html))
        .map(|caps| caps[1].to_string())
}

pub fn normalize(item: &RawItem, feed_name: &str) -> Article {
    normalize_at(item, feed_name, Utc::now())
}

/// `fetched_at` stands in for a missing publish date.
pub fn normalize_at(item: &RawItem, feed_name: &str, fetched_at: DateTime<Utc>) -> Article {
    let title = item
        .title
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .unwrap_or(UNTITLED)
        .to_string();

    let id = [&item.guid, &item.link]
        .into_iter()
        .flatten()
        .map(|v| v.trim())
        .find(|v| !v.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| synthetic_id(feed_name, &title, item.published));

    Article {
        id,
        title,
        description: first_of(item, DESCRIPTION_EXTRACTORS),
        content: first_of(item, CONTENT_EXTRACTORS),
        link: item.link.clone().unwrap_or_default(),
        pub_date: item.published.unwrap_or(fetched_at),
        author: first_of(item, AUTHOR_EXTRACTORS),
        feed_source: feed_name.to_string(),
        image_url: first_of(item, IMAGE_EXTRACTORS),
    }
}

/// Stable id for entries without guid or link, so repeated fetches of the
/// same entry keep their favorite/read state.
fn synthetic_id(feed_name: &str, title: &str, published: Option<DateTime<Utc>>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(feed_name.as_bytes());
    hasher.update(b"\n");
    hasher.update(title.as_bytes());
    hasher.update(b"\n");
    if let Some(published) = published {
        hasher.update(published.to_rfc3339().as_bytes());
    }
    format!("gen-{:x}", hasher.finalize())
}

/// Plain text of an HTML fragment: tags dropped, common entities decoded,
/// whitespace collapsed.
pub fn strip_html(html: &str) -> String {
    let text = HTML_TAG.replace_all(html, " ");
    let text = text
        .replace("&nbsp;", " ")
        .replace("&#160;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&amp;", "&");
    WHITESPACE.replace_all(&text, " ").trim().to_string()
}
