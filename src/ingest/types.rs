// src/ingest/types.rs
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// One market-analysis request: what to search for and where.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    keywords: Vec<String>,
    location: String,
    filters: SearchFilters,
}

impl Query {
    /// Build a query, trimming inputs. Blank keywords are dropped; at least one must remain.
    pub fn new<I, S>(keywords: I, location: &str) -> Result<Self, ValidationError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let keywords: Vec<String> = keywords
            .into_iter()
            .map(|k| k.as_ref().trim().to_string())
            .filter(|k| !k.is_empty())
            .collect();
        if keywords.is_empty() {
            return Err(ValidationError::EmptyKeywords);
        }
        let location = location.trim();
        if location.is_empty() {
            return Err(ValidationError::EmptyLocation);
        }
        Ok(Self {
            keywords,
            location: location.to_string(),
            filters: SearchFilters::default(),
        })
    }

    pub fn with_filters(mut self, filters: SearchFilters) -> Self {
        self.filters = filters;
        self
    }

    pub fn keywords(&self) -> &[String] {
        &self.keywords
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn filters(&self) -> &SearchFilters {
        &self.filters
    }

    /// Keywords joined with single spaces, as sent to search endpoints.
    pub fn search_terms(&self) -> String {
        self.keywords.join(" ")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DatePosted {
    #[serde(rename = "24h")]
    Past24Hours,
    #[serde(rename = "week")]
    PastWeek,
    #[serde(rename = "month")]
    PastMonth,
}

impl DatePosted {
    pub fn max_age(self) -> chrono::Duration {
        match self {
            DatePosted::Past24Hours => chrono::Duration::hours(24),
            DatePosted::PastWeek => chrono::Duration::days(7),
            DatePosted::PastMonth => chrono::Duration::days(30),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ExperienceLevel {
    Internship,
    EntryLevel,
    Associate,
    MidSenior,
    Director,
    Executive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum JobType {
    FullTime,
    PartTime,
    Contract,
    Temporary,
    Internship,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Workplace {
    OnSite,
    Remote,
    Hybrid,
}

/// Optional narrowing of a search. Adapters apply what their source supports.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SearchFilters {
    #[serde(default)]
    pub date_posted: Option<DatePosted>,
    #[serde(default)]
    pub experience: Vec<ExperienceLevel>,
    #[serde(default)]
    pub job_type: Vec<JobType>,
    #[serde(default)]
    pub workplace: Vec<Workplace>,
}

/// Source-specific bag of fields as returned by one adapter.
///
/// Field names and value formats differ per source; only the normalizer interprets them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawPosting {
    pub source_id: String,
    pub fields: serde_json::Map<String, serde_json::Value>,
}

impl RawPosting {
    pub fn new(source_id: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            fields: serde_json::Map::new(),
        }
    }

    /// Builder-style insert; `None` values are not stored.
    pub fn with<V: Into<serde_json::Value>>(mut self, key: &str, value: Option<V>) -> Self {
        if let Some(v) = value {
            self.fields.insert(key.to_string(), v.into());
        }
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FetchErrorKind {
    Timeout,
    Unavailable,
    RateLimited,
    Unknown,
}

impl FetchErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FetchErrorKind::Timeout => "timeout",
            FetchErrorKind::Unavailable => "unavailable",
            FetchErrorKind::RateLimited => "rateLimited",
            FetchErrorKind::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("source did not answer in time")]
    Timeout,
    #[error("source unavailable: {0}")]
    Unavailable(String),
    #[error("source rate limited the request: {0}")]
    RateLimited(String),
    #[error("source fetch failed: {0}")]
    Unknown(String),
}

impl FetchError {
    pub fn kind(&self) -> FetchErrorKind {
        match self {
            FetchError::Timeout => FetchErrorKind::Timeout,
            FetchError::Unavailable(_) => FetchErrorKind::Unavailable,
            FetchError::RateLimited(_) => FetchErrorKind::RateLimited,
            FetchError::Unknown(_) => FetchErrorKind::Unknown,
        }
    }

    /// Transient outages (5xx, refused or reset connections) get one more attempt.
    /// Rate limiting never does: retrying would only deepen the throttle.
    pub fn is_retryable(&self) -> bool {
        matches!(self, FetchError::Unavailable(_))
    }
}

/// Request-shape problems. Surfaced to the caller before any source is contacted.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("request body is not valid JSON: {0}")]
    MalformedBody(String),
    #[error("`keywords` is required")]
    MissingKeywords,
    #[error("`keywords` must be an array of strings")]
    KeywordsNotArray,
    #[error("`keywords` must contain at least one non-empty string")]
    EmptyKeywords,
    #[error("`keywords[{0}]` must be a string")]
    InvalidKeyword(usize),
    #[error("`location` is required")]
    MissingLocation,
    #[error("`location` must be a non-empty string")]
    EmptyLocation,
    #[error("invalid `filters`: {0}")]
    InvalidFilters(String),
}

/// Capability every job board implements. Adapters are stateless across calls.
#[async_trait::async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Stable identifier used in `sourceHealth` and on every produced `RawPosting`.
    fn id(&self) -> &str;

    /// Fetch raw postings. Must give up with `FetchError::Timeout` once `timeout` elapses.
    async fn fetch(&self, query: &Query, timeout: Duration) -> Result<Vec<RawPosting>, FetchError>;
}
