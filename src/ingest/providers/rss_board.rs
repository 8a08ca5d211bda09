// src/ingest/providers/rss_board.rs
use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use metrics::{counter, histogram};
use quick_xml::de::from_str;
use serde::Deserialize;
use std::time::{Duration, Instant};

use crate::ingest::http::{build_client, classify_status, classify_transport};
use crate::ingest::types::{FetchError, Query, RawPosting, SourceAdapter};
use crate::normalize::{canonical_text, dates, normalize_text};

#[derive(Debug, Deserialize)]
struct Rss {
    channel: Channel,
}

#[derive(Debug, Deserialize)]
struct Channel {
    #[serde(rename = "item", default)]
    item: Vec<Item>,
}

#[derive(Debug, Deserialize)]
struct Item {
    title: Option<String>,
    link: Option<String>,
    guid: Option<String>,
    #[serde(rename = "pubDate")]
    pub_date: Option<String>,
    description: Option<String>,
    region: Option<String>,
    location: Option<String>,
    #[serde(rename = "category", default)]
    categories: Vec<String>,
}

/// Generic job-board RSS feed. Titles follow the "Company: Role" convention
/// used by most remote boards; a title without the separator has no company
/// and is left for the normalizer to drop.
pub struct RssBoardAdapter {
    id: String,
    keyword_filter: bool,
    mode: Mode,
}

enum Mode {
    Fixture(String),
    Http { client: reqwest::Client, url: String },
}

/// Items read from one feed plus the number that could not be used.
#[derive(Debug, Default)]
pub struct ParsedFeed {
    pub items: Vec<RawPosting>,
    pub skipped: usize,
}

impl RssBoardAdapter {
    pub fn from_fixture_str(id: &str, xml: &str) -> Self {
        Self {
            id: id.to_string(),
            keyword_filter: false,
            mode: Mode::Fixture(xml.to_string()),
        }
    }

    pub fn from_url(id: &str, url: &str) -> Result<Self> {
        Ok(Self {
            id: id.to_string(),
            keyword_filter: false,
            mode: Mode::Http {
                client: build_client()?,
                url: url.to_string(),
            },
        })
    }

    /// Feeds that ignore search parameters can be narrowed locally to items
    /// mentioning at least one keyword.
    pub fn with_keyword_filter(mut self, on: bool) -> Self {
        self.keyword_filter = on;
        self
    }

    pub fn parse_feed(source_id: &str, xml: &str) -> Result<ParsedFeed, FetchError> {
        let xml_clean = scrub_html_entities_for_xml(xml);
        let rss: Rss = from_str(&xml_clean)
            .map_err(|e| FetchError::Unknown(format!("unreadable rss document: {e}")))?;

        let mut feed = ParsedFeed::default();
        for it in rss.channel.item {
            match to_raw(source_id, it) {
                Some(raw) => feed.items.push(raw),
                None => feed.skipped += 1,
            }
        }
        Ok(feed)
    }

    fn keep(&self, raw: &RawPosting, query: &Query, now: chrono::DateTime<Utc>) -> bool {
        if let Some(window) = query.filters().date_posted {
            let posted = raw
                .fields
                .get("pubDate")
                .and_then(|v| v.as_str())
                .and_then(|t| dates::parse_posted_at(t, now));
            if posted.is_some_and(|p| now - p > window.max_age()) {
                return false;
            }
        }
        if !self.keyword_filter {
            return true;
        }
        let haystack = canonical_text(
            &["title", "company", "description", "tags"]
                .iter()
                .filter_map(|k| raw.fields.get(*k))
                .filter_map(|v| match v {
                    serde_json::Value::String(s) => Some(s.clone()),
                    serde_json::Value::Array(a) => Some(
                        a.iter()
                            .filter_map(|x| x.as_str())
                            .collect::<Vec<_>>()
                            .join(" "),
                    ),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join(" "),
        );
        let padded = format!(" {haystack} ");
        query
            .keywords()
            .iter()
            .map(|k| canonical_text(k))
            .filter(|k| !k.is_empty())
            .any(|k| padded.contains(&format!(" {k} ")))
    }
}

/// Split "Company: Role" on the first colon. `None` when there is no company part.
pub fn split_title(title: &str) -> (Option<String>, String) {
    match title.split_once(':') {
        Some((company, role)) if !company.trim().is_empty() && !role.trim().is_empty() => {
            (Some(company.trim().to_string()), role.trim().to_string())
        }
        _ => (None, title.trim().to_string()),
    }
}

fn to_raw(source_id: &str, it: Item) -> Option<RawPosting> {
    let title = normalize_text(it.title.as_deref().unwrap_or_default());
    if title.is_empty() {
        return None;
    }
    let (company, role) = split_title(&title);
    let url = it.link.or(it.guid).map(|u| u.trim().to_string());
    let tags: Vec<String> = it
        .categories
        .iter()
        .map(|c| normalize_text(c))
        .filter(|c| !c.is_empty())
        .collect();
    Some(
        RawPosting::new(source_id)
            .with("title", Some(role))
            .with("company", company)
            .with("location", it.region.or(it.location).map(|l| normalize_text(&l)))
            .with("pubDate", it.pub_date)
            .with("description", it.description)
            .with("link", url)
            .with("tags", (!tags.is_empty()).then_some(tags)),
    )
}

#[async_trait]
impl SourceAdapter for RssBoardAdapter {
    fn id(&self) -> &str {
        &self.id
    }

    async fn fetch(&self, query: &Query, timeout: Duration) -> Result<Vec<RawPosting>, FetchError> {
        let body = match &self.mode {
            Mode::Fixture(s) => s.clone(),
            Mode::Http { client, url } => {
                let resp = client
                    .get(url)
                    .timeout(timeout)
                    .send()
                    .await
                    .map_err(|e| classify_transport(&e))?;
                if let Some(e) = classify_status(resp.status()) {
                    return Err(e);
                }
                resp.text().await.map_err(|e| classify_transport(&e))?
            }
        };

        let t0 = Instant::now();
        let feed = Self::parse_feed(&self.id, &body)?;
        let now = Utc::now();
        let total = feed.items.len();
        let out: Vec<RawPosting> = feed
            .items
            .into_iter()
            .filter(|raw| self.keep(raw, query, now))
            .collect();

        tracing::debug!(
            target: "ingest",
            source = %self.id,
            items = total,
            kept = out.len(),
            skipped = feed.skipped,
            "rss feed parsed"
        );
        if feed.skipped > 0 {
            counter!("market_adapter_items_skipped_total", "source" => self.id.clone())
                .increment(feed.skipped as u64);
        }
        histogram!("market_adapter_parse_ms", "source" => self.id.clone())
            .record(t0.elapsed().as_secs_f64() * 1_000.0);
        Ok(out)
    }
}

/// quick-xml only knows the five XML entities; feeds routinely carry HTML ones.
fn scrub_html_entities_for_xml(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&ndash;", "-")
        .replace("&mdash;", "-")
        .replace("&ldquo;", "\"")
        .replace("&rdquo;", "\"")
        .replace("&lsquo;", "'")
        .replace("&rsquo;", "'")
        .replace("&euro;", "€")
        .replace("&pound;", "£")
}
