// src/ingest/mod.rs
//! Source side of the pipeline: the adapter contract, shared HTTP plumbing
//! and the concrete job-board adapters.

pub mod http;
pub mod providers;
pub mod types;

use anyhow::{anyhow, Result};
use metrics::{describe_counter, describe_histogram};
use once_cell::sync::OnceCell;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{SourceCfg, SourceKind};
use crate::ingest::providers::{linkedin_guest, LinkedInGuestAdapter, RssBoardAdapter};
use crate::ingest::types::SourceAdapter;

/// One-time metrics registration (so series show up on /metrics).
pub fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("market_runs_total", "Market-analysis runs started.");
        describe_counter!(
            "market_source_fetch_total",
            "Adapter fetch outcomes by source and outcome."
        );
        describe_histogram!(
            "market_source_latency_ms",
            "Adapter latency in milliseconds, retries included."
        );
        describe_counter!(
            "market_postings_dropped_total",
            "Raw postings dropped by normalization."
        );
        describe_counter!(
            "market_dedup_removed_total",
            "Postings collapsed into another by deduplication."
        );
        describe_counter!(
            "market_adapter_items_skipped_total",
            "Items an adapter could not read from its source document."
        );
        describe_histogram!("market_adapter_parse_ms", "Adapter parse time in milliseconds.");
        describe_histogram!("market_run_duration_ms", "End-to-end run duration in milliseconds.");
    });
}

/// Instantiate the enabled sources in configuration order.
pub fn build_adapters(sources: &[SourceCfg]) -> Result<Vec<Arc<dyn SourceAdapter>>> {
    let mut out: Vec<Arc<dyn SourceAdapter>> = Vec::new();
    for s in sources.iter().filter(|s| s.enabled) {
        let adapter: Arc<dyn SourceAdapter> = match s.kind {
            SourceKind::LinkedinGuest => Arc::new(LinkedInGuestAdapter::from_url(
                &s.id,
                s.url.as_deref().unwrap_or(linkedin_guest::DEFAULT_URL),
                s.max_pages,
                Duration::from_millis(s.page_delay_ms),
            )?),
            SourceKind::RssBoard => {
                let url = s
                    .url
                    .as_deref()
                    .ok_or_else(|| anyhow!("rss_board source `{}` needs a url", s.id))?;
                Arc::new(RssBoardAdapter::from_url(&s.id, url)?.with_keyword_filter(s.keyword_filter))
            }
        };
        tracing::info!(target: "ingest", source = %s.id, kind = ?s.kind, "source adapter ready");
        out.push(adapter);
    }
    Ok(out)
}
