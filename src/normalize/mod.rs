// src/normalize/mod.rs
//! Raw → canonical posting conversion.
//!
//! Adapters hand over loosely-shaped `RawPosting` bags whose field names and
//! formats differ per board. This module maps them onto one `Posting` shape.
//! Only title, company and location are mandatory; everything else is
//! best-effort and degrades to `None` (or the run's "now" for dates).

pub mod dates;
pub mod salary;
pub mod skills;

use chrono::{DateTime, Duration, Utc};
use once_cell::sync::OnceCell;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

use crate::ingest::types::RawPosting;
pub use crate::normalize::skills::SkillMatcher;

const TITLE_KEYS: &[&str] = &["title", "job_title", "jobTitle", "position", "role"];
const COMPANY_KEYS: &[&str] = &["company", "company_name", "companyName", "employer", "organization"];
const LOCATION_KEYS: &[&str] = &["location", "candidate_required_location", "region", "city"];
const SALARY_TEXT_KEYS: &[&str] = &["salary", "salary_text", "compensation", "pay"];
const SALARY_MIN_KEYS: &[&str] = &["salary_min", "min_salary", "salaryMin"];
const SALARY_MAX_KEYS: &[&str] = &["salary_max", "max_salary", "salaryMax"];
const CURRENCY_KEYS: &[&str] = &["currency", "salary_currency"];
const DATE_KEYS: &[&str] = &[
    "posted_at",
    "date_posted",
    "datePosted",
    "pubDate",
    "publication_date",
    "published",
    "created_at",
];
const URL_KEYS: &[&str] = &["url", "link", "href", "apply_url"];
const DESCRIPTION_KEYS: &[&str] = &["description", "summary", "body"];
const TAG_KEYS: &[&str] = &["tags", "skills", "category", "categories"];

const DESCRIPTION_MAX_CHARS: usize = 4000;

/// Canonical job-listing record shared across all sources.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Posting {
    pub id: String,
    pub title: String,
    pub company: String,
    pub location: String,
    pub salary_min: Option<f64>,
    pub salary_max: Option<f64>,
    pub currency: Option<String>,
    pub posted_at: DateTime<Utc>,
    pub source_url: String,
    pub source_id: String,
    pub skills: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Posting {
    /// 2 = both bounds, 1 = one bound, 0 = none.
    pub fn salary_completeness(&self) -> u8 {
        u8::from(self.salary_min.is_some()) + u8::from(self.salary_max.is_some())
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum NormalizeError {
    #[error("required field `{0}` is missing or empty")]
    MissingRequiredField(&'static str),
}

/// Run-scoped inputs. `now` is captured once per run so relative dates resolve identically.
#[derive(Debug, Clone, Copy)]
pub struct NormalizeContext<'a> {
    pub now: DateTime<Utc>,
    pub clock_skew: Duration,
    pub skills: &'a SkillMatcher,
}

/// Postings that survived plus per-source counts of dropped items.
#[derive(Debug, Clone, Default)]
pub struct NormalizeReport {
    pub postings: Vec<Posting>,
    pub dropped: BTreeMap<String, usize>,
}

impl NormalizeReport {
    pub fn dropped_total(&self) -> usize {
        self.dropped.values().sum()
    }
}

pub fn normalize(raw: &RawPosting, ctx: &NormalizeContext<'_>) -> Result<Posting, NormalizeError> {
    let title = required(raw, TITLE_KEYS, "title")?;
    let company = required(raw, COMPANY_KEYS, "company")?;
    let location = required(raw, LOCATION_KEYS, "location")?;

    let (salary_min, salary_max, currency) = salary_fields(raw);
    let posted_at = posted_at(raw, ctx);
    let source_url = field_text(raw, URL_KEYS)
        .map(|u| u.trim().to_string())
        .unwrap_or_default();
    let description = field_text(raw, DESCRIPTION_KEYS)
        .map(|d| truncate_chars(&normalize_text(&d), DESCRIPTION_MAX_CHARS))
        .filter(|d| !d.is_empty());

    let mut skills = ctx.skills.extract(&title);
    if let Some(d) = &description {
        skills.extend(ctx.skills.extract(d));
    }
    skills.extend(tags(raw));

    Ok(Posting {
        id: posting_id(&title, &company, &location, &raw.source_id),
        title,
        company,
        location,
        salary_min,
        salary_max,
        currency,
        posted_at,
        source_url,
        source_id: raw.source_id.clone(),
        skills,
        description,
    })
}

/// Normalize a batch, dropping (and counting) records that lack mandatory fields.
pub fn normalize_all(raw: &[RawPosting], ctx: &NormalizeContext<'_>) -> NormalizeReport {
    let mut report = NormalizeReport::default();
    for item in raw {
        match normalize(item, ctx) {
            Ok(p) => report.postings.push(p),
            Err(e) => {
                tracing::debug!(target: "pipeline", source = %item.source_id, error = %e, "posting dropped");
                *report.dropped.entry(item.source_id.clone()).or_insert(0) += 1;
            }
        }
    }
    report
}

/// Stable id: hash of the canonical title, company, location and source.
pub fn posting_id(title: &str, company: &str, location: &str, source_id: &str) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    for part in [title, company, location] {
        hasher.update(canonical_text(part).as_bytes());
        hasher.update([0x1f_u8]);
    }
    hasher.update(source_id.as_bytes());
    let digest = hasher.finalize();
    let mut out = String::with_capacity(16);
    for b in digest.iter().take(8) {
        use std::fmt::Write as _;
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}

/// Display-safe text: entities decoded, tags stripped, typographic quotes
/// flattened, whitespace collapsed.
pub fn normalize_text(s: &str) -> String {
    let mut out = html_escape::decode_html_entities(s).to_string();

    static RE_TAGS: OnceCell<Regex> = OnceCell::new();
    let re_tags = RE_TAGS.get_or_init(|| Regex::new(r"(?is)</?[^>]+>").expect("tag regex"));
    out = re_tags.replace_all(&out, " ").to_string();

    out = out
        .replace(['\u{201C}', '\u{201D}', '\u{00AB}', '\u{00BB}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'");

    static RE_WS: OnceCell<Regex> = OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| Regex::new(r"\s+").expect("whitespace regex"));
    re_ws.replace_all(&out, " ").trim().to_string()
}

/// Comparison key: lower-cased, punctuation folded to spaces, whitespace collapsed.
/// `+`, `#` and `.` inside words survive so "C++" and "Node.js" stay distinct.
pub fn canonical_text(s: &str) -> String {
    let lowered = normalize_text(s).to_lowercase();
    let mut out = String::with_capacity(lowered.len());
    let mut pending_space = false;
    let chars: Vec<char> = lowered.chars().collect();
    for (i, &c) in chars.iter().enumerate() {
        let inner_dot = c == '.'
            && i > 0
            && chars[i - 1].is_alphanumeric()
            && chars.get(i + 1).is_some_and(|n| n.is_alphanumeric());
        if c.is_alphanumeric() || c == '+' || c == '#' || inner_dot {
            if pending_space && !out.is_empty() {
                out.push(' ');
            }
            pending_space = false;
            out.push(c);
        } else {
            pending_space = true;
        }
    }
    out
}

/// Job id when the URL carries one, else the lower-cased URL without query,
/// fragment or trailing slash. Used to spot the same card on several pages.
pub fn canonical_link(url: &str) -> String {
    static RE_IDS: OnceCell<Vec<Regex>> = OnceCell::new();
    let patterns = RE_IDS.get_or_init(|| {
        [r"/jobs/view/(?:[^/?#]*-)?(\d+)", r"/jobs/(\d+)/", r"job[_-](\d+)", r"jobId[=:](\d+)"]
            .iter()
            .map(|p| Regex::new(p).expect("job id regex"))
            .collect()
    });
    for re in patterns {
        if let Some(m) = re.captures(url).and_then(|c| c.get(1)) {
            return m.as_str().to_string();
        }
    }
    let lower = url.to_lowercase();
    let no_query = lower.split(['?', '#']).next().unwrap_or_default();
    no_query.trim_end_matches('/').to_string()
}

fn required(raw: &RawPosting, keys: &[&str], name: &'static str) -> Result<String, NormalizeError> {
    field_text(raw, keys)
        .map(|v| normalize_text(&v))
        .filter(|v| !v.is_empty())
        .ok_or(NormalizeError::MissingRequiredField(name))
}

/// First present key (case-insensitive) rendered as text.
fn field<'a>(raw: &'a RawPosting, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().find_map(|k| {
        raw.fields
            .iter()
            .find(|(name, v)| name.eq_ignore_ascii_case(k) && !v.is_null())
            .map(|(_, v)| v)
    })
}

fn field_text(raw: &RawPosting, keys: &[&str]) -> Option<String> {
    match field(raw, keys)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn field_number(raw: &RawPosting, keys: &[&str]) -> Option<f64> {
    match field(raw, keys)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => salary::parse_amount(s),
        _ => None,
    }
    .filter(|v| v.is_finite() && *v > 0.0)
}

fn salary_fields(raw: &RawPosting) -> (Option<f64>, Option<f64>, Option<String>) {
    let explicit_currency = field_text(raw, CURRENCY_KEYS)
        .map(|c| c.trim().to_ascii_uppercase())
        .filter(|c| !c.is_empty());

    let num_min = field_number(raw, SALARY_MIN_KEYS);
    let num_max = field_number(raw, SALARY_MAX_KEYS);
    if num_min.is_some() || num_max.is_some() {
        let (min, max) = salary::ordered(num_min, num_max);
        return (min, max, explicit_currency);
    }

    match field_text(raw, SALARY_TEXT_KEYS).and_then(|t| salary::parse_salary(&t)) {
        Some(range) => (range.min, range.max, explicit_currency.or(range.currency)),
        None => (None, None, None),
    }
}

fn posted_at(raw: &RawPosting, ctx: &NormalizeContext<'_>) -> DateTime<Utc> {
    let text = field_text(raw, DATE_KEYS).unwrap_or_default();
    let parsed = match dates::parse_posted_at(&text, ctx.now) {
        Some(dt) => dt,
        None => {
            tracing::debug!(target: "pipeline", source = %raw.source_id, date = %text, "unparseable date, using run time");
            ctx.now
        }
    };
    if parsed > ctx.now {
        if parsed - ctx.now > ctx.clock_skew {
            tracing::warn!(target: "pipeline", source = %raw.source_id, date = %text, "posting dated in the future, clamped");
        }
        return ctx.now;
    }
    parsed
}

fn tags(raw: &RawPosting) -> BTreeSet<String> {
    let mut out = BTreeSet::new();
    let mut push = |s: &str| {
        let t = canonical_text(s);
        if !t.is_empty() {
            out.insert(t);
        }
    };
    match field(raw, TAG_KEYS) {
        Some(Value::Array(items)) => {
            for it in items {
                if let Value::String(s) = it {
                    push(s);
                }
            }
        }
        Some(Value::String(s)) => s.split(',').for_each(&mut push),
        _ => {}
    }
    out
}

fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() > max {
        s.chars().take(max).collect()
    } else {
        s.to_string()
    }
}
