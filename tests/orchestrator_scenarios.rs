// tests/orchestrator_scenarios.rs
//
// Fan-out behaviour against in-process mock sources: per-source timeouts,
// retry policy, the global deadline and the in-flight bound.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use job_market_analyzer::aggregate::SourceStatus;
use job_market_analyzer::ingest::types::{FetchError, FetchErrorKind, Query, RawPosting, SourceAdapter};
use job_market_analyzer::orchestrator::{AdapterState, Orchestrator, RunPolicy};

#[derive(Clone)]
enum Behaviour {
    Postings(usize),
    Sleep(Duration),
    Fail(FetchError),
    /// Fail with the given error on the first call, then return postings.
    FailOnce(FetchError, usize),
    /// Spend the whole budget handed to `fetch`, then return what was gathered.
    UseBudget(usize),
}

struct Mock {
    id: &'static str,
    behaviour: Behaviour,
    calls: Arc<AtomicUsize>,
    delay: Duration,
    gauge: Option<Arc<(AtomicUsize, AtomicUsize)>>,
}

impl Mock {
    fn new(id: &'static str, behaviour: Behaviour) -> Self {
        Self {
            id,
            behaviour,
            calls: Arc::new(AtomicUsize::new(0)),
            delay: Duration::ZERO,
            gauge: None,
        }
    }
}

fn postings(source: &str, n: usize) -> Vec<RawPosting> {
    (0..n)
        .map(|i| {
            RawPosting::new(source)
                .with("title", Some(format!("Engineer {i}")))
                .with("company", Some("Beta"))
                .with("location", Some("Remote"))
                .with("salary", Some("$100,000 - $120,000"))
                .with("date_posted", Some("1 day ago"))
        })
        .collect()
}

#[async_trait]
impl SourceAdapter for Mock {
    fn id(&self) -> &str {
        self.id
    }

    async fn fetch(&self, _query: &Query, timeout: Duration) -> Result<Vec<RawPosting>, FetchError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(g) = &self.gauge {
            let now = g.0.fetch_add(1, Ordering::SeqCst) + 1;
            g.1.fetch_max(now, Ordering::SeqCst);
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if let Some(g) = &self.gauge {
            g.0.fetch_sub(1, Ordering::SeqCst);
        }
        match &self.behaviour {
            Behaviour::Postings(n) => Ok(postings(self.id, *n)),
            Behaviour::Sleep(d) => {
                tokio::time::sleep(*d).await;
                Ok(postings(self.id, 1))
            }
            Behaviour::Fail(e) => Err(e.clone()),
            Behaviour::FailOnce(e, _) if call == 0 => Err(e.clone()),
            Behaviour::FailOnce(_, n) => Ok(postings(self.id, *n)),
            Behaviour::UseBudget(n) => {
                tokio::time::sleep(timeout).await;
                Ok(postings(self.id, *n))
            }
        }
    }
}

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 0).unwrap()
}

fn query() -> Query {
    Query::new(["engineer"], "Remote").unwrap()
}

fn fast_policy() -> RunPolicy {
    RunPolicy {
        adapter_timeout: Duration::from_millis(100),
        global_timeout: Duration::from_secs(5),
        retry_backoff: Duration::from_millis(10),
        ..RunPolicy::default()
    }
}

fn arc(m: Mock) -> Arc<dyn SourceAdapter> {
    Arc::new(m)
}

#[tokio::test]
async fn timeout_success_and_rate_limit_are_isolated() {
    let orch = Orchestrator::new(
        vec![
            arc(Mock::new("a", Behaviour::Sleep(Duration::from_secs(3)))),
            arc(Mock::new("b", Behaviour::Postings(5))),
            arc(Mock::new("c", Behaviour::Fail(FetchError::RateLimited("429".into())))),
        ],
        fast_policy(),
    )
    .unwrap();

    let out = orch.run_at(&query(), now()).await.unwrap();
    let health = &out.analysis.source_health;
    assert_eq!(health.len(), 3);

    assert_eq!(health["a"].status, SourceStatus::TimedOut);
    assert_eq!(health["a"].error_kind, Some(FetchErrorKind::Timeout));
    assert!(!health["a"].succeeded);

    assert_eq!(health["b"].status, SourceStatus::Succeeded);
    assert_eq!(health["b"].posting_count, 5);
    assert!(health["b"].error_kind.is_none());

    assert_eq!(health["c"].status, SourceStatus::RateLimited);
    assert_eq!(health["c"].error_kind, Some(FetchErrorKind::RateLimited));

    assert_eq!(out.adapter_states["a"], AdapterState::TimedOut);
    assert_eq!(out.adapter_states["b"], AdapterState::Succeeded(5));
    assert_eq!(out.adapter_states["c"], AdapterState::Failed(FetchErrorKind::RateLimited));

    assert_eq!(out.analysis.total_postings, 5);
    assert_eq!(out.analysis.unique_postings, 5);
    assert_eq!(out.analysis.salary_stats.median, Some(110_000.0));
}

#[tokio::test]
async fn partial_results_returned_at_the_adapter_deadline_are_kept() {
    let orch = Orchestrator::new(vec![arc(Mock::new("slow_pages", Behaviour::UseBudget(3)))], fast_policy()).unwrap();

    let out = orch.run_at(&query(), now()).await.unwrap();
    let health = &out.analysis.source_health["slow_pages"];
    assert_eq!(health.status, SourceStatus::Succeeded);
    assert_eq!(health.posting_count, 3);
    assert_eq!(health.attempts, 1);
    assert_eq!(out.adapter_states["slow_pages"], AdapterState::Succeeded(3));
}

#[tokio::test]
async fn unavailable_gets_exactly_one_retry() {
    let flaky = Mock::new("flaky", Behaviour::FailOnce(FetchError::Unavailable("503".into()), 2));
    let flaky_calls = Arc::clone(&flaky.calls);
    let down = Mock::new("down", Behaviour::Fail(FetchError::Unavailable("503".into())));
    let down_calls = Arc::clone(&down.calls);

    let orch = Orchestrator::new(vec![arc(flaky), arc(down)], fast_policy()).unwrap();
    let out = orch.run_at(&query(), now()).await.unwrap();

    assert_eq!(flaky_calls.load(Ordering::SeqCst), 2);
    assert_eq!(out.analysis.source_health["flaky"].attempts, 2);
    assert!(out.analysis.source_health["flaky"].succeeded);
    assert_eq!(out.analysis.source_health["flaky"].posting_count, 2);

    assert_eq!(down_calls.load(Ordering::SeqCst), 2);
    assert_eq!(out.analysis.source_health["down"].status, SourceStatus::Unavailable);
    assert_eq!(out.analysis.source_health["down"].attempts, 2);
}

#[tokio::test]
async fn rate_limited_and_unknown_are_not_retried() {
    let limited = Mock::new("limited", Behaviour::Fail(FetchError::RateLimited("429".into())));
    let limited_calls = Arc::clone(&limited.calls);
    let weird = Mock::new("weird", Behaviour::Fail(FetchError::Unknown("418".into())));
    let weird_calls = Arc::clone(&weird.calls);

    let orch = Orchestrator::new(vec![arc(limited), arc(weird)], fast_policy()).unwrap();
    let out = orch.run_at(&query(), now()).await.unwrap();

    assert_eq!(limited_calls.load(Ordering::SeqCst), 1);
    assert_eq!(weird_calls.load(Ordering::SeqCst), 1);
    assert_eq!(out.analysis.source_health["weird"].status, SourceStatus::Unknown);
    assert!(out.analysis.source_health["weird"].message.is_some());
}

#[tokio::test]
async fn global_deadline_cuts_off_slow_sources() {
    let policy = RunPolicy {
        adapter_timeout: Duration::from_secs(30),
        global_timeout: Duration::from_millis(150),
        ..fast_policy()
    };
    let orch = Orchestrator::new(
        vec![
            arc(Mock::new("slow", Behaviour::Sleep(Duration::from_secs(10)))),
            arc(Mock::new("fast", Behaviour::Postings(3))),
        ],
        policy,
    )
    .unwrap();

    let t0 = Instant::now();
    let out = orch.run_at(&query(), now()).await.unwrap();
    assert!(t0.elapsed() < Duration::from_secs(5), "run must not wait for the slow source");

    let slow = &out.analysis.source_health["slow"];
    assert_eq!(slow.status, SourceStatus::TimedOut);
    assert_eq!(slow.error_kind, Some(FetchErrorKind::Timeout));
    assert_eq!(slow.attempts, 0);
    assert_eq!(out.analysis.source_health["fast"].posting_count, 3);
    assert_eq!(out.analysis.total_postings, 3);
}

#[tokio::test]
async fn in_flight_sources_never_exceed_the_bound() {
    let gauge = Arc::new((AtomicUsize::new(0), AtomicUsize::new(0)));
    let ids = ["s1", "s2", "s3", "s4", "s5", "s6"];
    let adapters: Vec<Arc<dyn SourceAdapter>> = ids
        .iter()
        .map(|&id| {
            let mut m = Mock::new(id, Behaviour::Postings(1));
            m.delay = Duration::from_millis(30);
            m.gauge = Some(Arc::clone(&gauge));
            arc(m)
        })
        .collect();
    let policy = RunPolicy {
        max_in_flight: 2,
        ..fast_policy()
    };
    let orch = Orchestrator::new(adapters, policy).unwrap();
    let out = orch.run_at(&query(), now()).await.unwrap();

    assert!(gauge.1.load(Ordering::SeqCst) <= 2);
    assert!(gauge.1.load(Ordering::SeqCst) >= 1);
    assert_eq!(out.analysis.source_health.len(), 6);
    assert!(out.analysis.source_health.values().all(|h| h.succeeded));
}

#[tokio::test]
async fn all_sources_failing_is_an_empty_analysis_not_an_error() {
    let orch = Orchestrator::new(
        vec![
            arc(Mock::new("a", Behaviour::Fail(FetchError::Unavailable("down".into())))),
            arc(Mock::new("b", Behaviour::Fail(FetchError::RateLimited("429".into())))),
        ],
        fast_policy(),
    )
    .unwrap();

    let analysis = orch.run(&query()).await.unwrap();
    assert_eq!(analysis.total_postings, 0);
    assert_eq!(analysis.unique_postings, 0);
    assert!(analysis.top_companies.is_empty());
    assert!(analysis.top_skills.is_empty());
    assert_eq!(analysis.salary_stats.median, None);
    assert_eq!(analysis.source_health.len(), 2);
    assert!(analysis.source_health.values().all(|h| !h.succeeded));
}

#[tokio::test]
async fn dropped_items_are_reported_per_source() {
    struct Sloppy;

    #[async_trait]
    impl SourceAdapter for Sloppy {
        fn id(&self) -> &str {
            "sloppy"
        }

        async fn fetch(&self, _q: &Query, _t: Duration) -> Result<Vec<RawPosting>, FetchError> {
            let mut items = postings("sloppy", 2);
            items.push(RawPosting::new("sloppy").with("title", Some("No company")));
            Ok(items)
        }
    }

    let sloppy: Arc<dyn SourceAdapter> = Arc::new(Sloppy);
    let orch = Orchestrator::new(vec![sloppy], fast_policy()).unwrap();
    let out = orch.run_at(&query(), now()).await.unwrap();
    let h = &out.analysis.source_health["sloppy"];
    assert_eq!(h.posting_count, 3);
    assert_eq!(h.dropped_count, 1);
    assert_eq!(out.analysis.total_postings, 2);
}
