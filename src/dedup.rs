// src/dedup.rs
//! Cross-source duplicate collapsing.
//!
//! Two postings are the same listing when their canonical title and company
//! match, their locations are equal or one's tokens contain the other's
//! ("Remote" vs "Remote - US"), and they were posted within the policy window.
//! Matching is closed transitively and re-applied to the chosen
//! representatives until nothing merges, so `dedupe` is idempotent.

use chrono::Duration;
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};

use crate::normalize::{canonical_text, Posting};

pub const DEFAULT_WINDOW_DAYS: i64 = 14;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DedupPolicy {
    pub window: Duration,
}

impl Default for DedupPolicy {
    fn default() -> Self {
        Self {
            window: Duration::days(DEFAULT_WINDOW_DAYS),
        }
    }
}

/// Postings judged to be one real-world listing. `members` is in input order
/// and includes the representative.
#[derive(Debug, Clone, PartialEq)]
pub struct DedupGroup {
    pub representative: Posting,
    pub members: Vec<Posting>,
}

impl DedupGroup {
    pub fn size(&self) -> usize {
        self.members.len()
    }
}

struct Keyed {
    bucket: (String, String),
    location: String,
    location_tokens: BTreeSet<String>,
}

impl Keyed {
    fn of(p: &Posting) -> Self {
        let location = canonical_text(&p.location);
        Self {
            bucket: (canonical_text(&p.title), canonical_text(&p.company)),
            location_tokens: location.split(' ').filter(|t| !t.is_empty()).map(str::to_string).collect(),
            location,
        }
    }
}

fn locations_match(a: &Keyed, b: &Keyed) -> bool {
    if a.location == b.location {
        return true;
    }
    if a.location_tokens.is_empty() || b.location_tokens.is_empty() {
        return false;
    }
    a.location_tokens.is_subset(&b.location_tokens) || b.location_tokens.is_subset(&a.location_tokens)
}

fn within_window(a: &Posting, b: &Posting, policy: &DedupPolicy) -> bool {
    (a.posted_at - b.posted_at).abs() <= policy.window
}

/// Pairwise duplicate rule.
pub fn is_duplicate(a: &Posting, b: &Posting, policy: &DedupPolicy) -> bool {
    let (ka, kb) = (Keyed::of(a), Keyed::of(b));
    ka.bucket == kb.bucket && locations_match(&ka, &kb) && within_window(a, b, policy)
}

/// Total order, best first: salary completeness, recency, description length,
/// then smallest source id and id.
pub fn compare_quality(a: &Posting, b: &Posting) -> Ordering {
    b.salary_completeness()
        .cmp(&a.salary_completeness())
        .then_with(|| b.posted_at.cmp(&a.posted_at))
        .then_with(|| description_len(b).cmp(&description_len(a)))
        .then_with(|| a.source_id.cmp(&b.source_id))
        .then_with(|| a.id.cmp(&b.id))
}

fn description_len(p: &Posting) -> usize {
    p.description.as_deref().map_or(0, |d| d.chars().count())
}

struct DisjointSet {
    parent: Vec<usize>,
}

impl DisjointSet {
    fn new(n: usize) -> Self {
        Self { parent: (0..n).collect() }
    }

    fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    /// Returns true when two distinct sets were joined.
    fn union(&mut self, a: usize, b: usize) -> bool {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra == rb {
            return false;
        }
        // Lower index as root keeps group order tied to first appearance.
        let (root, child) = if ra < rb { (ra, rb) } else { (rb, ra) };
        self.parent[child] = root;
        true
    }
}

/// Indices (into `items`) grouped by the duplicate rule, groups ordered by their first index.
fn cluster(items: &[&Posting], policy: &DedupPolicy) -> Vec<Vec<usize>> {
    let keyed: Vec<Keyed> = items.iter().map(|p| Keyed::of(p)).collect();
    let mut buckets: HashMap<&(String, String), Vec<usize>> = HashMap::new();
    for (i, k) in keyed.iter().enumerate() {
        buckets.entry(&k.bucket).or_default().push(i);
    }

    let mut sets = DisjointSet::new(items.len());
    for idxs in buckets.values() {
        for (n, &i) in idxs.iter().enumerate() {
            for &j in &idxs[n + 1..] {
                if locations_match(&keyed[i], &keyed[j]) && within_window(items[i], items[j], policy) {
                    sets.union(i, j);
                }
            }
        }
    }

    let mut groups: Vec<Vec<usize>> = Vec::new();
    let mut slot_of_root: HashMap<usize, usize> = HashMap::new();
    for i in 0..items.len() {
        let root = sets.find(i);
        let slot = *slot_of_root.entry(root).or_insert_with(|| {
            groups.push(Vec::new());
            groups.len() - 1
        });
        groups[slot].push(i);
    }
    groups
}

fn representative(members: &[&Posting]) -> usize {
    members
        .iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| compare_quality(a, b))
        .map(|(i, _)| i)
        .unwrap_or(0)
}

/// Group duplicates and pick one representative per group.
pub fn dedupe_groups(postings: &[Posting], policy: &DedupPolicy) -> Vec<DedupGroup> {
    // Each group: member indices into `postings`, ascending.
    let mut groups: Vec<Vec<usize>> = (0..postings.len()).map(|i| vec![i]).collect();

    loop {
        let reps: Vec<&Posting> = groups
            .iter()
            .map(|g| {
                let members: Vec<&Posting> = g.iter().map(|&i| &postings[i]).collect();
                members[representative(&members)]
            })
            .collect();
        let merged = cluster(&reps, policy);
        if merged.len() == groups.len() {
            break;
        }
        groups = merged
            .into_iter()
            .map(|rep_idxs| {
                let mut members: Vec<usize> =
                    rep_idxs.iter().flat_map(|&g| groups[g].iter().copied()).collect();
                members.sort_unstable();
                members
            })
            .collect();
    }

    groups
        .into_iter()
        .map(|g| {
            let members: Vec<Posting> = g.iter().map(|&i| postings[i].clone()).collect();
            let refs: Vec<&Posting> = members.iter().collect();
            let rep = representative(&refs);
            DedupGroup {
                representative: members[rep].clone(),
                members,
            }
        })
        .collect()
}

/// One representative per duplicate group, in first-seen order.
pub fn dedupe(postings: &[Posting], policy: &DedupPolicy) -> Vec<Posting> {
    dedupe_groups(postings, policy)
        .into_iter()
        .map(|g| g.representative)
        .collect()
}
