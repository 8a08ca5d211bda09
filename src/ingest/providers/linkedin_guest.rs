// src/ingest/providers/linkedin_guest.rs
//! LinkedIn guest job search (the unauthenticated "see more postings" endpoint).
//! Returns HTML fragments of job cards, 25 per page.

use anyhow::Result;
use async_trait::async_trait;
use metrics::{counter, histogram};
use once_cell::sync::Lazy;
use reqwest::{header, Client, StatusCode};
use scraper::{ElementRef, Html, Selector};
use std::collections::HashSet;
use std::time::{Duration, Instant};

use crate::ingest::http::{build_client, classify_status, classify_transport, remaining};
use crate::ingest::types::{
    DatePosted, ExperienceLevel, FetchError, JobType, Query, RawPosting, SearchFilters,
    SourceAdapter, Workplace,
};
use crate::normalize::{canonical_link, normalize_text};

pub const DEFAULT_URL: &str = "https://www.linkedin.com/jobs-guest/jobs/api/seeMoreJobPostings/search";
const PAGE_SIZE: u32 = 25;

struct CardSelectors {
    card: Selector,
    title: Selector,
    company: Selector,
    location: Selector,
    listdate: Selector,
    any_time: Selector,
    link: Selector,
    salary: Selector,
}

static SELECTORS: Lazy<CardSelectors> = Lazy::new(|| {
    let sel = |s: &str| Selector::parse(s).expect("static card selector");
    CardSelectors {
        card: sel("div.base-card"),
        title: sel("h3.base-search-card__title"),
        company: sel("h4.base-search-card__subtitle"),
        location: sel("span.job-search-card__location"),
        listdate: sel("time.job-search-card__listdate"),
        any_time: sel("time"),
        link: sel("a.base-card__full-link"),
        salary: sel("span.job-search-card__salary-info"),
    }
});

pub struct LinkedInGuestAdapter {
    id: String,
    mode: Mode,
}

enum Mode {
    Fixture(Vec<String>),
    Http {
        client: Client,
        url: String,
        max_pages: u32,
        page_delay: Duration,
    },
}

/// Cards parsed from one page plus the number of cards that could not be read.
#[derive(Debug, Default)]
pub struct ParsedPage {
    pub cards: Vec<RawPosting>,
    pub skipped: usize,
}

impl LinkedInGuestAdapter {
    /// Serve pre-captured result pages instead of calling the network.
    pub fn from_fixture_pages<I, S>(id: &str, pages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            id: id.to_string(),
            mode: Mode::Fixture(pages.into_iter().map(Into::into).collect()),
        }
    }

    pub fn from_url(id: &str, url: &str, max_pages: u32, page_delay: Duration) -> Result<Self> {
        Ok(Self {
            id: id.to_string(),
            mode: Mode::Http {
                client: build_client()?,
                url: url.to_string(),
                max_pages: max_pages.max(1),
                page_delay,
            },
        })
    }

    /// Search filter parameters in LinkedIn's encoding.
    pub fn filter_params(filters: &SearchFilters) -> Vec<(&'static str, String)> {
        let mut out = Vec::new();
        if let Some(d) = filters.date_posted {
            let v = match d {
                DatePosted::Past24Hours => "r86400",
                DatePosted::PastWeek => "r604800",
                DatePosted::PastMonth => "r2592000",
            };
            out.push(("f_TPR", v.to_string()));
        }
        let joined = |codes: Vec<&str>| codes.join(",");
        if !filters.experience.is_empty() {
            let codes = filters
                .experience
                .iter()
                .map(|e| match e {
                    ExperienceLevel::Internship => "1",
                    ExperienceLevel::EntryLevel => "2",
                    ExperienceLevel::Associate => "3",
                    ExperienceLevel::MidSenior => "4",
                    ExperienceLevel::Director => "5",
                    ExperienceLevel::Executive => "6",
                })
                .collect();
            out.push(("f_E", joined(codes)));
        }
        if !filters.job_type.is_empty() {
            let codes = filters
                .job_type
                .iter()
                .map(|t| match t {
                    JobType::FullTime => "F",
                    JobType::PartTime => "P",
                    JobType::Contract => "C",
                    JobType::Temporary => "T",
                    JobType::Internship => "I",
                })
                .collect();
            out.push(("f_JT", joined(codes)));
        }
        if !filters.workplace.is_empty() {
            let codes = filters
                .workplace
                .iter()
                .map(|w| match w {
                    Workplace::OnSite => "1",
                    Workplace::Remote => "2",
                    Workplace::Hybrid => "3",
                })
                .collect();
            out.push(("f_WT", joined(codes)));
        }
        out
    }

    /// Parse one page of job cards. Cards without a title or link are skipped.
    pub fn parse_page(source_id: &str, html: &str) -> ParsedPage {
        let doc = Html::parse_fragment(html);
        let mut page = ParsedPage::default();
        for card in doc.select(&SELECTORS.card) {
            match parse_card(source_id, card) {
                Some(raw) => page.cards.push(raw),
                None => page.skipped += 1,
            }
        }
        page
    }

    fn page_query(query: &Query, page: u32) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("keywords", query.search_terms()),
            ("location", query.location().to_string()),
            ("start", (page * PAGE_SIZE).to_string()),
        ];
        params.extend(Self::filter_params(query.filters()));
        params
    }

    async fn fetch_page(
        client: &Client,
        url: &str,
        params: &[(&'static str, String)],
        timeout: Duration,
    ) -> Result<(StatusCode, String), FetchError> {
        let resp = client
            .get(url)
            .query(params)
            .header(header::ACCEPT_LANGUAGE, "en-US,en;q=0.9")
            .header(header::ACCEPT, "text/html,application/xhtml+xml")
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| classify_transport(&e))?;
        let status = resp.status();
        let body = resp.text().await.map_err(|e| classify_transport(&e))?;
        Ok((status, body))
    }
}

fn text_of(card: ElementRef<'_>, sel: &Selector) -> Option<String> {
    card.select(sel)
        .next()
        .map(|el| normalize_text(&el.text().collect::<Vec<_>>().join(" ")))
        .filter(|t| !t.is_empty())
}

fn parse_card(source_id: &str, card: ElementRef<'_>) -> Option<RawPosting> {
    let s = &*SELECTORS;
    let title = text_of(card, &s.title)?;
    let href = card.select(&s.link).next()?.value().attr("href")?;
    let url = href.split('?').next().unwrap_or(href).trim().to_string();
    if url.is_empty() {
        return None;
    }

    let time_el = card
        .select(&s.listdate)
        .next()
        .or_else(|| card.select(&s.any_time).next());
    let posted = time_el.and_then(|el| {
        el.value()
            .attr("datetime")
            .map(str::to_string)
            .or_else(|| Some(normalize_text(&el.text().collect::<String>())))
    });

    Some(
        RawPosting::new(source_id)
            .with("title", Some(title))
            .with("company", text_of(card, &s.company))
            .with("location", text_of(card, &s.location))
            .with("date_posted", posted)
            .with("salary", text_of(card, &s.salary))
            .with("job_id", Some(canonical_link(&url)))
            .with("url", Some(url)),
    )
}

/// No cards and nothing skipped: the result list is exhausted. A page of
/// unreadable cards does not end pagination.
fn is_last_page(page: &ParsedPage) -> bool {
    page.cards.is_empty() && page.skipped == 0
}

/// Append cards whose canonical job id was not seen on an earlier page.
fn merge_page(out: &mut Vec<RawPosting>, seen: &mut HashSet<String>, page: ParsedPage) -> usize {
    let mut added = 0;
    for card in page.cards {
        let key = card
            .fields
            .get("job_id")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        if seen.insert(key) {
            out.push(card);
            added += 1;
        }
    }
    added
}

#[async_trait]
impl SourceAdapter for LinkedInGuestAdapter {
    fn id(&self) -> &str {
        &self.id
    }

    async fn fetch(&self, query: &Query, timeout: Duration) -> Result<Vec<RawPosting>, FetchError> {
        let t0 = Instant::now();
        let deadline = t0 + timeout;
        let mut out = Vec::new();
        let mut seen = HashSet::new();
        let mut skipped = 0usize;

        match &self.mode {
            Mode::Fixture(pages) => {
                for html in pages {
                    let page = Self::parse_page(&self.id, html);
                    skipped += page.skipped;
                    if is_last_page(&page) {
                        break;
                    }
                    merge_page(&mut out, &mut seen, page);
                }
            }
            Mode::Http {
                client,
                url,
                max_pages,
                page_delay,
            } => {
                for page_no in 0..*max_pages {
                    if page_no > 0 && !page_delay.is_zero() {
                        let wait = (*page_delay).min(remaining(deadline).unwrap_or_default());
                        tokio::time::sleep(wait).await;
                    }
                    let left = match remaining(deadline) {
                        Ok(d) => d,
                        // Out of time after the first page: keep what is already gathered.
                        Err(_) if page_no > 0 => break,
                        Err(e) => return Err(e),
                    };
                    let params = Self::page_query(query, page_no);
                    let result = Self::fetch_page(client, url, &params, left).await;
                    let body = match result {
                        Ok((status, _)) if status == StatusCode::BAD_REQUEST && page_no > 0 => {
                            tracing::debug!(target: "ingest", source = %self.id, page = page_no, "pagination limit reached");
                            break;
                        }
                        Ok((status, body)) => match classify_status(status) {
                            None => body,
                            Some(e) if page_no == 0 => return Err(e),
                            Some(e) => {
                                tracing::warn!(target: "ingest", source = %self.id, page = page_no, error = %e, "stopping pagination early");
                                break;
                            }
                        },
                        Err(e) if page_no == 0 => return Err(e),
                        Err(e) => {
                            tracing::warn!(target: "ingest", source = %self.id, page = page_no, error = %e, "stopping pagination early");
                            break;
                        }
                    };
                    let page = Self::parse_page(&self.id, &body);
                    skipped += page.skipped;
                    if is_last_page(&page) {
                        break;
                    }
                    merge_page(&mut out, &mut seen, page);
                }
            }
        }

        if skipped > 0 {
            tracing::debug!(target: "ingest", source = %self.id, skipped, "unreadable job cards skipped");
            counter!("market_adapter_items_skipped_total", "source" => self.id.clone()).increment(skipped as u64);
        }
        histogram!("market_adapter_parse_ms", "source" => self.id.clone())
            .record(t0.elapsed().as_secs_f64() * 1_000.0);
        Ok(out)
    }
}
