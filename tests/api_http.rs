// tests/api_http.rs
//
// HTTP-level tests for the public API Router without opening sockets.
// We exercise the router directly via tower::ServiceExt::oneshot.
//
// Covered:
// - GET /health
// - GET /api/sources
// - POST /api/market-analysis (validation failures, success envelope)

use async_trait::async_trait;
use serde_json::json;
use serde_json::Value as Json;
use shuttle_axum::axum::{
    body::{self, Body},
    http::{Request, StatusCode},
    Router,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt as _; // for `oneshot`

use job_market_analyzer::api::{self, AppState};
use job_market_analyzer::ingest::types::{FetchError, Query, RawPosting, SourceAdapter};
use job_market_analyzer::orchestrator::{Orchestrator, RunPolicy};

const BODY_LIMIT: usize = 1024 * 1024; // 1MB, safe for tests

/// Counts calls; answers with two postings or a rate-limit error.
struct CountingSource {
    id: &'static str,
    calls: Arc<AtomicUsize>,
    rate_limited: bool,
}

#[async_trait]
impl SourceAdapter for CountingSource {
    fn id(&self) -> &str {
        self.id
    }

    async fn fetch(&self, _query: &Query, _timeout: Duration) -> Result<Vec<RawPosting>, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.rate_limited {
            return Err(FetchError::RateLimited("429 Too Many Requests".into()));
        }
        Ok(vec![
            RawPosting::new(self.id)
                .with("title", Some("Senior Rust Engineer"))
                .with("company", Some("Acme Corp"))
                .with("location", Some("Remote"))
                .with("salary", Some("$140,000 - $160,000"))
                .with("date_posted", Some("2 days ago")),
            RawPosting::new(self.id)
                .with("title", Some("Platform Engineer"))
                .with("company", Some("Globex"))
                .with("location", Some("Berlin"))
                .with("description", Some("Kubernetes and Terraform")),
        ])
    }
}

/// Router with one healthy and one throttled source, plus the shared call counter.
fn test_router() -> (Router, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let adapters: Vec<Arc<dyn SourceAdapter>> = vec![
        Arc::new(CountingSource {
            id: "board",
            calls: Arc::clone(&calls),
            rate_limited: false,
        }),
        Arc::new(CountingSource {
            id: "throttled",
            calls: Arc::clone(&calls),
            rate_limited: true,
        }),
    ];
    let orch = Orchestrator::new(adapters, RunPolicy::default()).expect("orchestrator");
    (api::router(AppState::new(orch)), calls)
}

async fn post_json(app: Router, payload: &str) -> (StatusCode, Json) {
    let req = Request::builder()
        .method("POST")
        .uri("/api/market-analysis")
        .header("content-type", "application/json")
        .body(Body::from(payload.to_string()))
        .expect("build POST /api/market-analysis");
    let resp = app.oneshot(req).await.expect("oneshot /api/market-analysis");
    let status = resp.status();
    let bytes = body::to_bytes(resp.into_body(), BODY_LIMIT)
        .await
        .expect("read json")
        .to_vec();
    let v: Json = serde_json::from_slice(&bytes).expect("parse json");
    (status, v)
}

#[tokio::test]
async fn api_health_returns_200_and_ok_body() {
    let (app, _) = test_router();

    let req = Request::builder()
        .method("GET")
        .uri("/health")
        .body(Body::empty())
        .expect("build GET /health");

    let resp = app.oneshot(req).await.expect("oneshot /health");
    assert_eq!(resp.status(), StatusCode::OK, "health should be 200");

    let bytes = body::to_bytes(resp.into_body(), BODY_LIMIT)
        .await
        .expect("read body")
        .to_vec();
    let body = String::from_utf8(bytes).expect("utf8");
    assert_eq!(body.trim(), "OK", "health body should be 'OK'");
}

#[tokio::test]
async fn api_sources_lists_adapter_ids() {
    let (app, _) = test_router();
    let req = Request::builder()
        .uri("/api/sources")
        .body(Body::empty())
        .expect("build GET /api/sources");
    let resp = app.oneshot(req).await.expect("oneshot /api/sources");
    assert_eq!(resp.status(), StatusCode::OK);
    let bytes = body::to_bytes(resp.into_body(), BODY_LIMIT).await.expect("read");
    let v: Json = serde_json::from_slice(&bytes).expect("json");
    assert_eq!(v, json!({ "sources": ["board", "throttled"] }));
}

#[tokio::test]
async fn missing_location_is_400_and_no_source_is_called() {
    let (app, calls) = test_router();
    let (status, v) = post_json(app, r#"{"keywords": ["rust"]}"#).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(v["error"].as_str().unwrap_or_default().contains("location"));
    assert_eq!(calls.load(Ordering::SeqCst), 0, "pipeline must not run");
}

#[tokio::test]
async fn malformed_keywords_are_400() {
    for payload in [
        r#"{"location": "Berlin"}"#,
        r#"{"keywords": "rust", "location": "Berlin"}"#,
        r#"{"keywords": [], "location": "Berlin"}"#,
        r#"{"keywords": ["rust"], "location": ""}"#,
        r#"{"keywords": ["rust"], "location": "Berlin", "filters": {"workplace": ["moon"]}}"#,
        r#"not json at all"#,
    ] {
        let (app, calls) = test_router();
        let (status, v) = post_json(app, payload).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "payload: {payload}");
        assert!(v["error"].is_string(), "payload: {payload}");
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}

#[tokio::test]
async fn success_envelope_carries_analysis_and_source_health() {
    let (app, calls) = test_router();
    let (status, v) = post_json(
        app,
        &json!({ "keywords": ["rust", "platform"], "location": "Remote" }).to_string(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(v["success"], true);

    let data = &v["data"];
    assert_eq!(data["totalPostings"], 2);
    assert_eq!(data["uniquePostings"], 2);
    assert_eq!(data["salaryStats"]["median"], 150000.0);
    assert_eq!(data["salaryStats"]["sampleSize"], 1);
    assert_eq!(data["topCompanies"][0]["name"], "Acme Corp");
    assert!(data["topSkills"].as_array().is_some_and(|s| !s.is_empty()));

    let board = &data["sourceHealth"]["board"];
    assert_eq!(board["succeeded"], true);
    assert_eq!(board["postingCount"], 2);
    assert!(board["latencyMs"].is_u64());
    assert!(board.get("errorKind").is_none());

    let throttled = &data["sourceHealth"]["throttled"];
    assert_eq!(throttled["succeeded"], false);
    assert_eq!(throttled["errorKind"], "rateLimited");
    assert_eq!(throttled["status"], "rateLimited");
}
