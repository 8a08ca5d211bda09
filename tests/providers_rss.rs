// tests/providers_rss.rs
use chrono::{Duration, TimeZone, Utc};
use job_market_analyzer::ingest::providers::RssBoardAdapter;
use job_market_analyzer::ingest::types::{FetchErrorKind, Query, SourceAdapter};
use job_market_analyzer::normalize::{normalize_all, NormalizeContext, SkillMatcher};

const FEED: &str = include_str!("fixtures/board_rss.xml");

#[test]
fn feed_items_are_split_into_company_and_role() {
    let feed = RssBoardAdapter::parse_feed("board", FEED).unwrap();
    assert_eq!(feed.items.len(), 3);
    assert_eq!(feed.skipped, 1);

    let first = &feed.items[0].fields;
    assert_eq!(first["company"], "Acme Corp");
    assert_eq!(first["title"], "Senior Rust Engineer");
    assert_eq!(first["location"], "Anywhere in the World");
    assert_eq!(first["link"], "https://board.example/remote-jobs/acme-corp-senior-rust-engineer");

    // No "Company:" prefix, so no company field at all.
    assert!(feed.items[2].fields.get("company").is_none());
}

#[test]
fn items_without_company_are_dropped_by_the_normalizer() {
    let feed = RssBoardAdapter::parse_feed("board", FEED).unwrap();
    let skills = SkillMatcher::default();
    let ctx = NormalizeContext {
        now: Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 0).unwrap(),
        clock_skew: Duration::minutes(5),
        skills: &skills,
    };
    let report = normalize_all(&feed.items, &ctx);
    assert_eq!(report.postings.len(), 2);
    assert_eq!(report.dropped.get("board"), Some(&1));

    let acme = &report.postings[0];
    assert_eq!(acme.posted_at, Utc.with_ymd_and_hms(2026, 3, 7, 9, 15, 0).unwrap());
    for skill in ["rust", "backend", "postgresql", "kafka"] {
        assert!(acme.skills.contains(skill), "missing {skill}");
    }
    let description = acme.description.as_deref().unwrap_or_default();
    assert!(!description.contains("<p>"));
}

#[tokio::test]
async fn keyword_filter_narrows_feed_locally() {
    let q = Query::new(["python"], "Remote").unwrap();
    let out = RssBoardAdapter::from_fixture_str("board", FEED)
        .with_keyword_filter(true)
        .fetch(&q, std::time::Duration::from_secs(1))
        .await
        .unwrap();
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].fields["company"], "Umbrella");
}

#[tokio::test]
async fn broken_document_is_reported_not_panicked() {
    let q = Query::new(["rust"], "Remote").unwrap();
    let err = RssBoardAdapter::from_fixture_str("board", "<html><body>maintenance</body>")
        .fetch(&q, std::time::Duration::from_secs(1))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), FetchErrorKind::Unknown);
}
