// src/orchestrator.rs
//! One market-analysis run: fan out to every source adapter with bounded
//! parallelism, then normalize, dedupe and aggregate what came back.
//!
//! Run states advance `Idle → Fetching → Normalizing → Deduplicating →
//! Aggregating → Done`. Each adapter owns one result slot, written once when
//! its task settles; slots are read only after every task settled or the
//! global deadline fired. A failing source never fails the run.

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use metrics::{counter, histogram};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;

use crate::aggregate::{aggregate, AggregateOptions, MarketAnalysis, SourceHealth, SourceStatus};
use crate::config::market::{MAX_CLOCK_SKEW_SECS, MAX_WINDOW_DAYS};
use crate::config::MarketConfig;
use crate::dedup::{dedupe, DedupPolicy};
use crate::ingest::types::{FetchError, FetchErrorKind, Query, RawPosting, SourceAdapter};
use crate::ingest::{build_adapters, ensure_metrics_described};
use crate::normalize::{normalize_all, NormalizeContext, SkillMatcher};

/// Slack on top of the adapter budget before the hard cutoff fires, so an
/// adapter stopping at its own deadline can still hand back partial results.
pub const ADAPTER_GRACE: Duration = Duration::from_millis(250);

/// Unexpected failure inside the processing stages. Source failures never become this.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PipelineError {
    #[error("{stage} stage failed: {message}")]
    Stage { stage: &'static str, message: String },
}

#[derive(Debug, Clone)]
pub struct RunPolicy {
    pub adapter_timeout: Duration,
    pub global_timeout: Duration,
    pub max_in_flight: usize,
    pub retry_backoff: Duration,
    pub clock_skew: chrono::Duration,
    pub dedup: DedupPolicy,
    pub top_n: usize,
    pub skills: Arc<SkillMatcher>,
}

impl Default for RunPolicy {
    fn default() -> Self {
        Self::from_config(&MarketConfig::default())
    }
}

impl RunPolicy {
    pub fn from_config(cfg: &MarketConfig) -> Self {
        Self {
            adapter_timeout: Duration::from_millis(cfg.pipeline.adapter_timeout_ms),
            global_timeout: Duration::from_millis(cfg.pipeline.global_timeout_ms),
            max_in_flight: cfg.pipeline.max_in_flight.max(1),
            retry_backoff: Duration::from_millis(cfg.pipeline.retry_backoff_ms),
            clock_skew: chrono::Duration::seconds(cfg.normalize.clock_skew_secs.clamp(0, MAX_CLOCK_SKEW_SECS)),
            dedup: DedupPolicy {
                window: chrono::Duration::days(cfg.dedup.window_days.clamp(0, MAX_WINDOW_DAYS)),
            },
            top_n: cfg.aggregate.top_n,
            skills: Arc::new(SkillMatcher::new(&cfg.normalize.skills)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Fetching,
    Normalizing,
    Deduplicating,
    Aggregating,
    Done,
}

/// Records the state sequence a run went through.
#[derive(Debug, Clone)]
pub struct RunTracker {
    history: Vec<RunState>,
}

impl Default for RunTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl RunTracker {
    pub fn new() -> Self {
        Self {
            history: vec![RunState::Idle],
        }
    }

    pub fn current(&self) -> RunState {
        self.history.last().copied().unwrap_or(RunState::Idle)
    }

    pub fn advance(&mut self, next: RunState) {
        tracing::debug!(target: "pipeline", from = ?self.current(), to = ?next, "run state");
        self.history.push(next);
    }

    pub fn history(&self) -> &[RunState] {
        &self.history
    }
}

/// Final per-adapter sub-state of the fetching phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterState {
    Pending,
    Succeeded(usize),
    Failed(FetchErrorKind),
    TimedOut,
}

#[derive(Debug, Clone)]
pub struct RunOutput {
    pub analysis: MarketAnalysis,
    pub adapter_states: BTreeMap<String, AdapterState>,
    pub run_states: Vec<RunState>,
}

/// Result of the processing stages, before source health is attached.
#[derive(Debug, Clone)]
pub struct ProcessedRun {
    pub analysis: MarketAnalysis,
    pub dropped: BTreeMap<String, usize>,
    pub dedup_removed: usize,
}

struct AdapterOutcome {
    result: Result<Vec<RawPosting>, FetchError>,
    attempts: u32,
    latency: Duration,
}

pub struct Orchestrator {
    adapters: Vec<Arc<dyn SourceAdapter>>,
    policy: RunPolicy,
}

impl Orchestrator {
    /// Adapter ids must be unique; they key `sourceHealth`.
    pub fn new(adapters: Vec<Arc<dyn SourceAdapter>>, policy: RunPolicy) -> Result<Self> {
        let mut seen = HashSet::new();
        for a in &adapters {
            if !seen.insert(a.id().to_string()) {
                bail!("duplicate source adapter id `{}`", a.id());
            }
        }
        Ok(Self { adapters, policy })
    }

    pub fn from_config(cfg: &MarketConfig) -> Result<Self> {
        let adapters = build_adapters(&cfg.sources)?;
        Self::new(adapters, RunPolicy::from_config(cfg))
    }

    pub fn source_ids(&self) -> Vec<&str> {
        self.adapters.iter().map(|a| a.id()).collect()
    }

    pub fn policy(&self) -> &RunPolicy {
        &self.policy
    }

    pub async fn run(&self, query: &Query) -> Result<MarketAnalysis, PipelineError> {
        self.run_at(query, Utc::now()).await.map(|out| out.analysis)
    }

    /// Run against an explicit "now"; every relative date in this run resolves against it.
    pub async fn run_at(&self, query: &Query, now: DateTime<Utc>) -> Result<RunOutput, PipelineError> {
        ensure_metrics_described();
        counter!("market_runs_total").increment(1);
        let started = Instant::now();
        let mut tracker = RunTracker::new();

        tracker.advance(RunState::Fetching);
        let (slots, deadline_hit) = self.fan_out(query).await;
        let run_elapsed = started.elapsed();

        let mut raw: Vec<RawPosting> = Vec::new();
        for (adapter, slot) in self.adapters.iter().zip(&slots) {
            if let Some(AdapterOutcome { result: Ok(items), .. }) = slot {
                raw.extend(items.iter().cloned().map(|mut r| {
                    r.source_id = adapter.id().to_string();
                    r
                }));
            }
        }

        let policy = self.policy.clone();
        let (processed, mut tracker) = tokio::task::spawn_blocking(move || {
            let processed = process(&raw, &policy, now, &mut tracker);
            (processed, tracker)
        })
        .await
        .map_err(|e| {
            tracing::error!(target: "pipeline", error = %e, "processing task failed");
            PipelineError::Stage {
                stage: "processing",
                message: e.to_string(),
            }
        })?;

        let mut analysis = processed.analysis;
        let mut adapter_states = BTreeMap::new();
        for (adapter, slot) in self.adapters.iter().zip(slots) {
            let id = adapter.id().to_string();
            let dropped_count = processed.dropped.get(&id).copied().unwrap_or(0);
            let (health, state) = source_health(slot, deadline_hit, run_elapsed, dropped_count);
            counter!("market_source_fetch_total", "source" => id.clone(), "outcome" => health.status.as_str())
                .increment(1);
            histogram!("market_source_latency_ms", "source" => id.clone()).record(health.latency_ms as f64);
            adapter_states.insert(id.clone(), state);
            analysis.source_health.insert(id, health);
        }
        tracker.advance(RunState::Done);

        let elapsed_ms = started.elapsed().as_millis() as u64;
        histogram!("market_run_duration_ms").record(elapsed_ms as f64);
        let succeeded = analysis.source_health.values().filter(|h| h.succeeded).count();
        tracing::info!(
            target: "pipeline",
            keywords = %query.search_terms(),
            location = %query.location(),
            total = analysis.total_postings,
            unique = analysis.unique_postings,
            sources_ok = succeeded,
            sources_failed = analysis.source_health.len() - succeeded,
            elapsed_ms,
            "market analysis finished"
        );

        Ok(RunOutput {
            analysis,
            adapter_states,
            run_states: tracker.history().to_vec(),
        })
    }

    /// One slot per adapter, in adapter order. `None` means the task never
    /// settled: cut off by the global deadline (second value `true`) or panicked.
    async fn fan_out(&self, query: &Query) -> (Vec<Option<AdapterOutcome>>, bool) {
        let semaphore = Arc::new(Semaphore::new(self.policy.max_in_flight.max(1)));
        let mut set = JoinSet::new();
        for (idx, adapter) in self.adapters.iter().enumerate() {
            let adapter = Arc::clone(adapter);
            let semaphore = Arc::clone(&semaphore);
            let query = query.clone();
            let timeout = self.policy.adapter_timeout;
            let backoff = self.policy.retry_backoff;
            set.spawn(async move {
                // The semaphore is never closed, so acquisition cannot fail.
                let _permit = semaphore.acquire_owned().await.ok();
                (idx, fetch_with_retry(adapter.as_ref(), &query, timeout, backoff).await)
            });
        }

        let mut slots: Vec<Option<AdapterOutcome>> = (0..self.adapters.len()).map(|_| None).collect();
        let deadline = Instant::now() + self.policy.global_timeout;
        let mut deadline_hit = false;
        loop {
            match tokio::time::timeout_at(deadline, set.join_next()).await {
                Ok(Some(Ok((idx, outcome)))) => slots[idx] = Some(outcome),
                Ok(Some(Err(e))) => {
                    tracing::error!(target: "ingest", error = %e, "adapter task failed");
                }
                Ok(None) => break,
                Err(_) => {
                    tracing::warn!(
                        target: "ingest",
                        pending = set.len(),
                        timeout_ms = self.policy.global_timeout.as_millis() as u64,
                        "global timeout reached, abandoning pending sources"
                    );
                    deadline_hit = true;
                    set.abort_all();
                    break;
                }
            }
        }
        (slots, deadline_hit)
    }
}

async fn fetch_with_retry(
    adapter: &dyn SourceAdapter,
    query: &Query,
    timeout: Duration,
    backoff: Duration,
) -> AdapterOutcome {
    let t0 = Instant::now();
    let mut attempts = 0u32;
    let result = loop {
        attempts += 1;
        let attempt_t0 = Instant::now();
        let res = match tokio::time::timeout(timeout + ADAPTER_GRACE, adapter.fetch(query, timeout)).await {
            Ok(r) => r,
            Err(_) => Err(FetchError::Timeout),
        };
        let latency_ms = attempt_t0.elapsed().as_millis() as u64;
        match res {
            Ok(items) => {
                tracing::debug!(target: "ingest", source = adapter.id(), attempt = attempts, latency_ms, postings = items.len(), "fetch ok");
                break Ok(items);
            }
            Err(e) if e.is_retryable() && attempts == 1 => {
                tracing::warn!(target: "ingest", source = adapter.id(), attempt = attempts, latency_ms, error_kind = e.kind().as_str(), error = %e, "fetch failed, retrying");
                tokio::time::sleep(backoff).await;
            }
            Err(e) => {
                tracing::warn!(target: "ingest", source = adapter.id(), attempt = attempts, latency_ms, error_kind = e.kind().as_str(), error = %e, "fetch failed");
                break Err(e);
            }
        }
    };
    AdapterOutcome {
        result,
        attempts,
        latency: t0.elapsed(),
    }
}

fn source_health(
    slot: Option<AdapterOutcome>,
    deadline_hit: bool,
    run_elapsed: Duration,
    dropped_count: usize,
) -> (SourceHealth, AdapterState) {
    match slot {
        Some(AdapterOutcome {
            result: Ok(items),
            attempts,
            latency,
        }) => (
            SourceHealth {
                succeeded: true,
                status: SourceStatus::Succeeded,
                posting_count: items.len(),
                error_kind: None,
                latency_ms: latency.as_millis() as u64,
                attempts,
                dropped_count,
                message: None,
            },
            AdapterState::Succeeded(items.len()),
        ),
        Some(AdapterOutcome {
            result: Err(e),
            attempts,
            latency,
        }) => {
            let kind = e.kind();
            let state = match kind {
                FetchErrorKind::Timeout => AdapterState::TimedOut,
                other => AdapterState::Failed(other),
            };
            (
                SourceHealth {
                    succeeded: false,
                    status: SourceStatus::from_error(kind),
                    posting_count: 0,
                    error_kind: Some(kind),
                    latency_ms: latency.as_millis() as u64,
                    attempts,
                    dropped_count,
                    message: Some(e.to_string()),
                },
                state,
            )
        }
        None if deadline_hit => (
            SourceHealth {
                succeeded: false,
                status: SourceStatus::TimedOut,
                posting_count: 0,
                error_kind: Some(FetchErrorKind::Timeout),
                latency_ms: run_elapsed.as_millis() as u64,
                attempts: 0,
                dropped_count,
                message: Some("global timeout reached before the source answered".to_string()),
            },
            AdapterState::TimedOut,
        ),
        None => (
            SourceHealth {
                succeeded: false,
                status: SourceStatus::Unknown,
                posting_count: 0,
                error_kind: Some(FetchErrorKind::Unknown),
                latency_ms: run_elapsed.as_millis() as u64,
                attempts: 0,
                dropped_count,
                message: Some("adapter task aborted".to_string()),
            },
            AdapterState::Failed(FetchErrorKind::Unknown),
        ),
    }
}

/// Normalize, dedupe and aggregate. Pure given `raw` and `now`.
/// `total_postings` counts postings that survived normalization, before dedup.
pub fn process(raw: &[RawPosting], policy: &RunPolicy, now: DateTime<Utc>, tracker: &mut RunTracker) -> ProcessedRun {
    tracker.advance(RunState::Normalizing);
    let ctx = NormalizeContext {
        now,
        clock_skew: policy.clock_skew,
        skills: &policy.skills,
    };
    let report = normalize_all(raw, &ctx);
    let dropped_total = report.dropped_total();
    if dropped_total > 0 {
        tracing::warn!(target: "pipeline", dropped = dropped_total, raw = raw.len(), "postings dropped during normalization");
        counter!("market_postings_dropped_total").increment(dropped_total as u64);
    }

    tracker.advance(RunState::Deduplicating);
    let unique = dedupe(&report.postings, &policy.dedup);
    let dedup_removed = report.postings.len() - unique.len();
    if dedup_removed > 0 {
        counter!("market_dedup_removed_total").increment(dedup_removed as u64);
    }

    tracker.advance(RunState::Aggregating);
    let mut analysis = aggregate(
        &unique,
        &AggregateOptions {
            now,
            top_n: policy.top_n,
        },
    );
    analysis.total_postings = report.postings.len();

    ProcessedRun {
        analysis,
        dropped: report.dropped,
        dedup_removed,
    }
}
