// src/aggregate.rs
//! Market statistics over a deduplicated posting set.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use crate::ingest::types::FetchErrorKind;
use crate::normalize::{canonical_text, Posting};

pub const DEFAULT_TOP_N: usize = 10;

#[derive(Debug, Clone, Copy)]
pub struct AggregateOptions {
    pub now: DateTime<Utc>,
    pub top_n: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SalaryStats {
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub median: Option<f64>,
    pub p25: Option<f64>,
    pub p75: Option<f64>,
    pub sample_size: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankedCount {
    pub name: String,
    pub count: usize,
}

/// Posting ages in non-overlapping buckets relative to the run's `now`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Freshness {
    pub last24h: usize,
    pub last7d: usize,
    pub last30d: usize,
    pub older: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SourceStatus {
    Succeeded,
    TimedOut,
    RateLimited,
    Unavailable,
    Unknown,
}

impl SourceStatus {
    pub fn from_error(kind: FetchErrorKind) -> Self {
        match kind {
            FetchErrorKind::Timeout => SourceStatus::TimedOut,
            FetchErrorKind::RateLimited => SourceStatus::RateLimited,
            FetchErrorKind::Unavailable => SourceStatus::Unavailable,
            FetchErrorKind::Unknown => SourceStatus::Unknown,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SourceStatus::Succeeded => "succeeded",
            SourceStatus::TimedOut => "timedOut",
            SourceStatus::RateLimited => "rateLimited",
            SourceStatus::Unavailable => "unavailable",
            SourceStatus::Unknown => "unknown",
        }
    }
}

/// Outcome of one source within a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceHealth {
    pub succeeded: bool,
    pub status: SourceStatus,
    pub posting_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<FetchErrorKind>,
    pub latency_ms: u64,
    pub attempts: u32,
    pub dropped_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketAnalysis {
    pub total_postings: usize,
    pub unique_postings: usize,
    pub salary_stats: SalaryStats,
    pub top_companies: Vec<RankedCount>,
    pub top_skills: Vec<RankedCount>,
    pub freshness: Freshness,
    pub source_health: BTreeMap<String, SourceHealth>,
}

/// Representative salary: midpoint of both bounds, or the single bound present.
pub fn representative_salary(p: &Posting) -> Option<f64> {
    match (p.salary_min, p.salary_max) {
        (Some(a), Some(b)) => Some((a + b) / 2.0),
        (Some(v), None) | (None, Some(v)) => Some(v),
        (None, None) => None,
    }
}

/// Linear-interpolation percentile on an ascending sample; `p` in `[0, 1]`.
pub fn percentile(sorted: &[f64], p: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let rank = p.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let frac = rank - lo as f64;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * frac)
}

pub fn salary_stats(postings: &[Posting]) -> SalaryStats {
    let mut sample: Vec<f64> = postings.iter().filter_map(representative_salary).collect();
    sample.sort_by(|a, b| a.total_cmp(b));
    SalaryStats {
        min: sample.first().copied(),
        max: sample.last().copied(),
        median: percentile(&sample, 0.5),
        p25: percentile(&sample, 0.25),
        p75: percentile(&sample, 0.75),
        sample_size: sample.len(),
    }
}

/// Frequency table, count desc; ties keep first-seen order. Keys fold case,
/// the first spelling seen is displayed.
fn ranked<'a, I>(names: I, top_n: usize) -> Vec<RankedCount>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut rows: Vec<RankedCount> = Vec::new();
    let mut slot: HashMap<String, usize> = HashMap::new();
    for name in names {
        let key = canonical_text(name);
        if key.is_empty() {
            continue;
        }
        match slot.get(&key) {
            Some(&i) => rows[i].count += 1,
            None => {
                slot.insert(key, rows.len());
                rows.push(RankedCount {
                    name: name.to_string(),
                    count: 1,
                });
            }
        }
    }
    // sort_by is stable, so equal counts stay in first-seen order.
    rows.sort_by(|a, b| b.count.cmp(&a.count));
    rows.truncate(top_n);
    rows
}

pub fn freshness(postings: &[Posting], now: DateTime<Utc>) -> Freshness {
    let mut f = Freshness::default();
    for p in postings {
        let age = now - p.posted_at;
        if age <= Duration::hours(24) {
            f.last24h += 1;
        } else if age <= Duration::days(7) {
            f.last7d += 1;
        } else if age <= Duration::days(30) {
            f.last30d += 1;
        } else {
            f.older += 1;
        }
    }
    f
}

/// Statistics over deduplicated postings. `source_health` is left empty and
/// `total_postings` equals the input length; the orchestrator fills both.
pub fn aggregate(postings: &[Posting], opts: &AggregateOptions) -> MarketAnalysis {
    MarketAnalysis {
        total_postings: postings.len(),
        unique_postings: postings.len(),
        salary_stats: salary_stats(postings),
        top_companies: ranked(postings.iter().map(|p| p.company.as_str()), opts.top_n),
        top_skills: ranked(
            postings.iter().flat_map(|p| p.skills.iter().map(String::as_str)),
            opts.top_n,
        ),
        freshness: freshness(postings, opts.now),
        source_health: BTreeMap::new(),
    }
}
