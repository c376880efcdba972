//! Ranked fuzzy search over an indexer snapshot.

pub mod score;

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};

use serde::Serialize;

use crate::indexer::{Entry, Snapshot};
use score::{score_field, Query, WEIGHT_NAME, WEIGHT_PATH, WEIGHT_SHORT};

#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub path: String,
    pub name: String,
    pub short: String,
    #[serde(rename = "isDir")]
    pub is_dir: bool,
    pub score: i64,
}

pub struct SearchOutput {
    pub results: Vec<SearchResult>,
    pub opened: Vec<SearchResult>,
}

struct HeapItem {
    score: i64,
    index: usize,
}

impl PartialEq for HeapItem {
    fn eq(&self, other: &Self) -> bool {
        self.score == other.score && self.index == other.index
    }
}
impl Eq for HeapItem {}

impl Ord for HeapItem {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; reverse the ordering so the *weakest*
        // entry sits at the top and a pop() evicts it in O(log n).
        other.score.cmp(&self.score).then(other.index.cmp(&self.index))
    }
}
impl PartialOrd for HeapItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Run a search over `snapshot`. Never fails; an empty snapshot yields empty
/// vectors.
pub fn search(
    snapshot: &Snapshot,
    query_raw: &str,
    limit: i64,
    opened: &HashSet<String>,
) -> SearchOutput {
    let limit = if limit <= 0 { 100 } else { limit as usize };
    let query = Query::compile(query_raw);

    if query.is_empty() {
        return empty_query_fast_path(snapshot, limit, opened);
    }

    let mut heap: BinaryHeap<HeapItem> = BinaryHeap::with_capacity(limit + 1);
    let mut scores: Vec<Option<i64>> = vec![None; snapshot.entries.len()];

    for (i, entry) in snapshot.entries.iter().enumerate() {
        let best = best_score(entry, &query);
        scores[i] = best;
        if let Some(s) = best {
            if heap.len() < limit {
                heap.push(HeapItem { score: s, index: i });
            } else if let Some(top) = heap.peek() {
                if s > top.score {
                    heap.pop();
                    heap.push(HeapItem { score: s, index: i });
                }
            }
        }
    }

    let mut ranked: Vec<HeapItem> = heap.into_vec();
    ranked.sort_by(|a, b| b.score.cmp(&a.score).then(a.index.cmp(&b.index)));

    let tenth_score = ranked.get(9).map(|h| h.score).unwrap_or(0);

    let results: Vec<SearchResult> = ranked
        .iter()
        .map(|h| to_result(&snapshot.entries[h.index], h.score))
        .collect();

    let mut opened_results = Vec::new();
    for (i, entry) in snapshot.entries.iter().enumerate() {
        if !opened.contains(&entry.path) {
            continue;
        }
        if let Some(s) = scores[i] {
            if s >= tenth_score {
                opened_results.push(to_result(entry, s));
            }
        }
    }

    SearchOutput {
        results,
        opened: opened_results,
    }
}

fn best_score(entry: &Entry, query: &Query) -> Option<i64> {
    let mut best: Option<i64> = None;
    let mut consider = |field_score: Option<i64>, weight: i64| {
        if let Some(s) = field_score {
            let total = s + weight;
            best = Some(best.map_or(total, |b| b.max(total)));
        }
    };

    consider(score_field(&entry.name, query, true), WEIGHT_NAME);
    consider(score_field(&entry.short, query, false), WEIGHT_SHORT);
    consider(score_field(&entry.path, query, false), WEIGHT_PATH);
    best
}

fn to_result(entry: &Entry, score: i64) -> SearchResult {
    SearchResult {
        path: entry.path.clone(),
        name: entry.name.clone(),
        short: entry.short.clone(),
        is_dir: entry.is_dir,
        score,
    }
}

fn empty_query_fast_path(snapshot: &Snapshot, limit: usize, opened: &HashSet<String>) -> SearchOutput {
    let results: Vec<SearchResult> = snapshot
        .entries
        .iter()
        .take(limit)
        .map(|e| to_result(e, 0))
        .collect();
    let opened_results: Vec<SearchResult> = snapshot
        .entries
        .iter()
        .filter(|e| opened.contains(&e.path))
        .map(|e| to_result(e, 0))
        .collect();
    SearchOutput {
        results,
        opened: opened_results,
    }
}
