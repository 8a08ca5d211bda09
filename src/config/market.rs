// src/config/market.rs
use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use crate::aggregate::DEFAULT_TOP_N;
use crate::dedup::DEFAULT_WINDOW_DAYS;
use crate::ingest::providers::linkedin_guest;
use crate::normalize::skills::DEFAULT_SKILLS;

pub const ENV_CONFIG_PATH: &str = "MARKET_CONFIG_PATH";
pub const ENV_ADAPTER_TIMEOUT_MS: &str = "MARKET_ADAPTER_TIMEOUT_MS";
pub const ENV_GLOBAL_TIMEOUT_MS: &str = "MARKET_GLOBAL_TIMEOUT_MS";
pub const ENV_MAX_IN_FLIGHT: &str = "MARKET_MAX_IN_FLIGHT";

/// Upper bounds for duration-like knobs.
pub const MAX_CLOCK_SKEW_SECS: i64 = 86_400;
pub const MAX_WINDOW_DAYS: i64 = 3_650;

const DEFAULT_TOML_PATH: &str = "config/market.toml";
const DEFAULT_JSON_PATH: &str = "config/market.json";
const DEFAULT_RSS_URL: &str = "https://weworkremotely.com/remote-jobs.rss";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineCfg {
    pub adapter_timeout_ms: u64,
    pub global_timeout_ms: u64,
    pub max_in_flight: usize,
    pub retry_backoff_ms: u64,
}

impl Default for PipelineCfg {
    fn default() -> Self {
        Self {
            adapter_timeout_ms: 8_000,
            global_timeout_ms: 15_000,
            max_in_flight: 4,
            retry_backoff_ms: 300,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizeCfg {
    pub clock_skew_secs: i64,
    pub skills: Vec<String>,
}

impl Default for NormalizeCfg {
    fn default() -> Self {
        Self {
            clock_skew_secs: 300,
            skills: DEFAULT_SKILLS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupCfg {
    pub window_days: i64,
}

impl Default for DedupCfg {
    fn default() -> Self {
        Self {
            window_days: DEFAULT_WINDOW_DAYS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregateCfg {
    pub top_n: usize,
}

impl Default for AggregateCfg {
    fn default() -> Self {
        Self { top_n: DEFAULT_TOP_N }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    LinkedinGuest,
    RssBoard,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceCfg {
    pub kind: SourceKind,
    pub id: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,
    #[serde(default = "default_page_delay_ms")]
    pub page_delay_ms: u64,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub keyword_filter: bool,
}

fn default_max_pages() -> u32 {
    3
}
fn default_page_delay_ms() -> u64 {
    500
}
fn default_enabled() -> bool {
    true
}

impl SourceCfg {
    pub fn new(kind: SourceKind, id: &str, url: Option<&str>) -> Self {
        Self {
            kind,
            id: id.to_string(),
            url: url.map(str::to_string),
            max_pages: default_max_pages(),
            page_delay_ms: default_page_delay_ms(),
            enabled: true,
            keyword_filter: false,
        }
    }
}

/// Service configuration. Every section is optional in the file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketConfig {
    pub pipeline: PipelineCfg,
    pub normalize: NormalizeCfg,
    pub dedup: DedupCfg,
    pub aggregate: AggregateCfg,
    pub sources: Vec<SourceCfg>,
}

impl Default for MarketConfig {
    fn default() -> Self {
        let mut rss = SourceCfg::new(SourceKind::RssBoard, "weworkremotely", Some(DEFAULT_RSS_URL));
        rss.keyword_filter = true;
        Self {
            pipeline: PipelineCfg::default(),
            normalize: NormalizeCfg::default(),
            dedup: DedupCfg::default(),
            aggregate: AggregateCfg::default(),
            sources: vec![
                SourceCfg::new(SourceKind::LinkedinGuest, "linkedin", Some(linkedin_guest::DEFAULT_URL)),
                rss,
            ],
        }
    }
}

impl MarketConfig {
    pub fn enabled_sources(&self) -> impl Iterator<Item = &SourceCfg> {
        self.sources.iter().filter(|s| s.enabled)
    }

    /// Clamp out-of-range numbers and reject configurations that cannot run.
    pub fn validate(mut self) -> Result<Self> {
        let defaults = PipelineCfg::default();
        let p = &mut self.pipeline;
        p.max_in_flight = p.max_in_flight.max(1);
        if p.adapter_timeout_ms == 0 {
            p.adapter_timeout_ms = defaults.adapter_timeout_ms;
        }
        if p.global_timeout_ms == 0 {
            p.global_timeout_ms = defaults.global_timeout_ms;
        }
        if p.adapter_timeout_ms > p.global_timeout_ms {
            tracing::warn!(
                adapter_timeout_ms = p.adapter_timeout_ms,
                global_timeout_ms = p.global_timeout_ms,
                "adapter timeout exceeds global timeout; the global deadline wins"
            );
        }
        self.normalize.clock_skew_secs = self.normalize.clock_skew_secs.clamp(0, MAX_CLOCK_SKEW_SECS);
        self.dedup.window_days = self.dedup.window_days.clamp(0, MAX_WINDOW_DAYS);

        let mut seen = HashSet::new();
        for s in &mut self.sources {
            s.id = s.id.trim().to_string();
            if s.id.is_empty() {
                bail!("source id must not be empty");
            }
            if !seen.insert(s.id.clone()) {
                bail!("duplicate source id `{}`", s.id);
            }
            s.max_pages = s.max_pages.max(1);
            if s.kind == SourceKind::RssBoard && s.url.as_deref().map_or(true, |u| u.trim().is_empty()) {
                bail!("rss_board source `{}` needs a url", s.id);
            }
        }
        Ok(self)
    }

    /// Apply `MARKET_*` environment overrides on top of file values.
    /// Unparseable values are logged and ignored.
    pub fn apply_env_overrides(mut self) -> Self {
        if let Some(v) = env_number::<u64>(ENV_ADAPTER_TIMEOUT_MS) {
            self.pipeline.adapter_timeout_ms = v;
        }
        if let Some(v) = env_number::<u64>(ENV_GLOBAL_TIMEOUT_MS) {
            self.pipeline.global_timeout_ms = v;
        }
        if let Some(v) = env_number::<usize>(ENV_MAX_IN_FLIGHT) {
            self.pipeline.max_in_flight = v;
        }
        self
    }
}

fn env_number<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse::<T>() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring invalid numeric override");
            None
        }
    }
}

/// Load configuration from an explicit path. TOML or JSON by extension.
pub fn load_from(path: &Path) -> Result<MarketConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("reading market config from {}", path.display()))?;
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    parse_config(&content, &ext)
        .with_context(|| format!("parsing market config {}", path.display()))?
        .apply_env_overrides()
        .validate()
}

/// Resolution order:
/// 1) $MARKET_CONFIG_PATH
/// 2) config/market.toml
/// 3) config/market.json
/// 4) built-in defaults
pub fn load_default() -> Result<MarketConfig> {
    if let Ok(p) = std::env::var(ENV_CONFIG_PATH) {
        let pb = PathBuf::from(p);
        if pb.exists() {
            return load_from(&pb);
        }
        return Err(anyhow!("{ENV_CONFIG_PATH} points to non-existent path"));
    }
    for candidate in [DEFAULT_TOML_PATH, DEFAULT_JSON_PATH] {
        let pb = PathBuf::from(candidate);
        if pb.exists() {
            return load_from(&pb);
        }
    }
    MarketConfig::default().apply_env_overrides().validate()
}

fn parse_config(s: &str, hint_ext: &str) -> Result<MarketConfig> {
    match hint_ext {
        "toml" => Ok(toml::from_str(s)?),
        "json" => Ok(serde_json::from_str(s)?),
        _ => {
            if let Ok(v) = serde_json::from_str(s) {
                return Ok(v);
            }
            toml::from_str(s).map_err(|e| anyhow!("unsupported market config format: {e}"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toml_sections_are_optional() {
        let cfg = parse_config("[pipeline]\nmax_in_flight = 2\n", "toml").unwrap();
        assert_eq!(cfg.pipeline.max_in_flight, 2);
        assert_eq!(cfg.pipeline.adapter_timeout_ms, 8_000);
        assert_eq!(cfg.aggregate.top_n, DEFAULT_TOP_N);
        assert_eq!(cfg.sources.len(), 2);
    }

    #[test]
    fn sources_take_defaults() {
        let s = r#"
[[sources]]
kind = "rss_board"
id = "board"
url = "https://board.example/feed.rss"
"#;
        let cfg = parse_config(s, "toml").unwrap().validate().unwrap();
        assert_eq!(cfg.sources.len(), 1);
        let src = &cfg.sources[0];
        assert_eq!(src.kind, SourceKind::RssBoard);
        assert_eq!(src.max_pages, 3);
        assert_eq!(src.page_delay_ms, 500);
        assert!(src.enabled);
        assert!(!src.keyword_filter);
    }

    #[test]
    fn duplicate_ids_and_missing_rss_url_are_rejected() {
        let mut cfg = MarketConfig::default();
        cfg.sources.push(SourceCfg::new(SourceKind::LinkedinGuest, " linkedin ", None));
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("duplicate source id"));

        let cfg = MarketConfig {
            sources: vec![SourceCfg::new(SourceKind::RssBoard, "board", None)],
            ..MarketConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn json_is_accepted_without_extension_hint() {
        let cfg = parse_config(r#"{"dedup": {"window_days": 7}}"#, "").unwrap();
        assert_eq!(cfg.dedup.window_days, 7);
    }

    #[test]
    fn out_of_range_numbers_are_clamped() {
        let mut cfg = MarketConfig::default();
        cfg.pipeline.max_in_flight = 0;
        cfg.pipeline.global_timeout_ms = 0;
        cfg.dedup.window_days = -3;
        let cfg = cfg.validate().unwrap();
        assert_eq!(cfg.pipeline.max_in_flight, 1);
        assert_eq!(cfg.pipeline.global_timeout_ms, 15_000);
        assert_eq!(cfg.dedup.window_days, 0);

        let mut cfg = MarketConfig::default();
        cfg.normalize.clock_skew_secs = i64::MAX;
        cfg.dedup.window_days = i64::MAX;
        let cfg = cfg.validate().unwrap();
        assert_eq!(cfg.normalize.clock_skew_secs, MAX_CLOCK_SKEW_SECS);
        assert_eq!(cfg.dedup.window_days, MAX_WINDOW_DAYS);
    }
}
