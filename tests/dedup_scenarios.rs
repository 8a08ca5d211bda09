// tests/dedup_scenarios.rs
use chrono::{DateTime, Duration, TimeZone, Utc};
use job_market_analyzer::dedup::{dedupe, dedupe_groups, DedupPolicy};
use job_market_analyzer::ingest::types::RawPosting;
use job_market_analyzer::normalize::{normalize_all, NormalizeContext, Posting, SkillMatcher};

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 0).unwrap()
}

fn normalized(raw: &[RawPosting]) -> Vec<Posting> {
    let skills = SkillMatcher::default();
    let ctx = NormalizeContext {
        now: now(),
        clock_skew: Duration::minutes(5),
        skills: &skills,
    };
    normalize_all(raw, &ctx).postings
}

#[test]
fn cross_posted_job_keeps_the_salaried_record() {
    let raw = vec![
        RawPosting::new("a")
            .with("title", Some("Senior Backend Engineer"))
            .with("company", Some("Acme Corp"))
            .with("location", Some("Remote"))
            .with("date_posted", Some("2 days ago")),
        RawPosting::new("b")
            .with("title", Some("Senior backend engineer"))
            .with("company", Some("Acme Corp"))
            .with("location", Some("Remote - US"))
            .with("date_posted", Some("3 days ago"))
            .with("salary", Some("$140,000 - $160,000")),
    ];
    let postings = normalized(&raw);
    assert_eq!(postings.len(), 2);

    let out = dedupe(&postings, &DedupPolicy::default());
    assert_eq!(out.len(), 1);
    let kept = &out[0];
    assert_eq!(kept.source_id, "b");
    assert_eq!(kept.salary_min, Some(140_000.0));
    assert_eq!(kept.salary_max, Some(160_000.0));
    assert_eq!(kept.currency.as_deref(), Some("USD"));
    assert_eq!(kept.posted_at, now() - Duration::days(3));

    let groups = dedupe_groups(&postings, &DedupPolicy::default());
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].size(), 2);
}

#[test]
fn different_cities_or_companies_stay_apart() {
    let raw = vec![
        RawPosting::new("a")
            .with("title", Some("Data Engineer"))
            .with("company", Some("Hooli"))
            .with("location", Some("Munich")),
        RawPosting::new("b")
            .with("title", Some("Data Engineer"))
            .with("company", Some("Hooli"))
            .with("location", Some("Berlin")),
        RawPosting::new("b")
            .with("title", Some("Data Engineer"))
            .with("company", Some("Pied Piper"))
            .with("location", Some("Munich")),
    ];
    let out = dedupe(&normalized(&raw), &DedupPolicy::default());
    assert_eq!(out.len(), 3);
}

#[test]
fn window_is_configurable() {
    let raw = vec![
        RawPosting::new("a")
            .with("title", Some("Dev"))
            .with("company", Some("Acme"))
            .with("location", Some("Remote"))
            .with("date_posted", Some("1 day ago")),
        RawPosting::new("b")
            .with("title", Some("Dev"))
            .with("company", Some("Acme"))
            .with("location", Some("Remote"))
            .with("date_posted", Some("5 days ago")),
    ];
    let postings = normalized(&raw);
    assert_eq!(dedupe(&postings, &DedupPolicy::default()).len(), 1);
    let strict = DedupPolicy {
        window: Duration::days(2),
    };
    assert_eq!(dedupe(&postings, &strict).len(), 2);
}
