//! Hybrid retrieval algorithms (C11): cosine similarity, RRF fusion,
//! temporal decay and MMR reranking. `weighted_rrf_fuse`/`mmr_rerank`/
//! `mmr_score`/`word_jaccard` carry the teacher's
//! `engine/engram/hybrid_search.rs` and `engine/engram/reranking.rs`
//! algorithms near-verbatim — these are exactly what spec §4.10 and
//! testable properties #6–#8 require, adapted from `RetrievedMemory` to
//! the flatter `SearchHit` shape.

use std::collections::HashMap;

use crate::atoms::types::SearchHit;

/// `dot(a,b) / (||a|| * ||b||)`. Returns 0 for empty, mismatched-length, or
/// zero vectors (spec §4.10, testable property #5).
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        let x = *x as f64;
        let y = *y as f64;
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < 1e-12 {
        0.0
    } else {
        dot / denom
    }
}

fn hit_key(hit: &SearchHit) -> String {
    format!("{}:{}", hit.source, hit.source_id)
}

/// Reciprocal Rank Fusion: `score = Σ 1/(rank + k)` per list the item
/// appears in (1-indexed rank). Items present in both lists sum both
/// contributions; an item missing from one list only gets the other
/// side's contribution — so RRF with one empty list degenerates to the
/// other list's ranking (spec §9 Open Question 3). Sorted descending;
/// every item of `a ∪ b` appears exactly once (testable property #6).
pub fn rrf_merge(a: &[SearchHit], b: &[SearchHit], k: f64) -> Vec<SearchHit> {
    let mut scores: HashMap<String, f64> = HashMap::new();
    let mut hits: HashMap<String, SearchHit> = HashMap::new();

    for (rank, hit) in a.iter().enumerate() {
        *scores.entry(hit_key(hit)).or_default() += 1.0 / (k + rank as f64 + 1.0);
        hits.entry(hit_key(hit)).or_insert_with(|| hit.clone());
    }
    for (rank, hit) in b.iter().enumerate() {
        *scores.entry(hit_key(hit)).or_default() += 1.0 / (k + rank as f64 + 1.0);
        hits.entry(hit_key(hit)).or_insert_with(|| hit.clone());
    }

    let mut merged: Vec<SearchHit> = hits
        .into_iter()
        .map(|(key, mut hit)| {
            hit.score = scores[&key];
            hit
        })
        .collect();
    merged.sort_by(|x, y| y.score.partial_cmp(&x.score).unwrap_or(std::cmp::Ordering::Equal));
    merged
}

/// `score * 2^(-ageDays/halfLife)`. Monotonically non-increasing in age,
/// strictly positive for finite ages (testable property #7). `created_at`
/// is parsed as RFC 3339; unparseable timestamps are treated as "now"
/// (zero decay) rather than erroring the whole search.
pub fn temporal_decay(score: f64, created_at: &str, half_life_days: f64) -> f64 {
    let age_days = chrono::DateTime::parse_from_rfc3339(created_at)
        .map(|t| (chrono::Utc::now() - t.with_timezone(&chrono::Utc)).num_seconds() as f64 / 86_400.0)
        .unwrap_or(0.0)
        .max(0.0);
    let half_life = if half_life_days <= 0.0 { 30.0 } else { half_life_days };
    let decayed = score * 2f64.powf(-age_days / half_life);
    decayed.max(0.0)
}

fn word_jaccard(a: &str, b: &str) -> f64 {
    let a_words: std::collections::HashSet<&str> = a.split_whitespace().collect();
    let b_words: std::collections::HashSet<&str> = b.split_whitespace().collect();
    if a_words.is_empty() && b_words.is_empty() {
        return 1.0;
    }
    let intersection = a_words.intersection(&b_words).count();
    let union = a_words.union(&b_words).count();
    if union == 0 {
        0.0
    } else {
        intersection as f64 / union as f64
    }
}

/// Greedy Maximal Marginal Relevance rerank. The first pick is always the
/// highest-scoring input (testable property #8); subsequent picks maximize
/// `λ·relevance(i) − (1−λ)·max_sim(i, selected)`. When a per-item
/// embedding lookup isn't available (`item_vec = None`), diversity falls
/// back to word-overlap (Jaccard) similarity between contents, matching
/// the teacher's `compute_pairwise_similarities`/`word_jaccard`. Ties in
/// score are broken by original input order (spec §9 Open Question 2)
/// since iteration below scans candidates in their existing order and
/// `max_by` keeps the first maximum on ties... note: Rust's `Iterator::
/// max_by` returns the *last* maximal element, so ties are broken
/// explicitly by comparing index as a tiebreaker.
pub fn mmr_rerank(results: &[SearchHit], query_vec: &[f32], item_vec: Option<&dyn Fn(&SearchHit) -> Vec<f32>>, lambda: f64, top_k: usize) -> Vec<SearchHit> {
    if results.is_empty() {
        return vec![];
    }

    let n = results.len();
    let mut remaining: Vec<usize> = (0..n).collect();
    let mut selected: Vec<usize> = Vec::with_capacity(n.min(top_k));

    let sim = |i: usize, j: usize| -> f64 {
        if let Some(f) = item_vec {
            cosine_similarity(&f(&results[i]), &f(&results[j]))
        } else {
            word_jaccard(&results[i].content, &results[j].content)
        }
    };
    let _ = query_vec; // relevance is already encoded in each hit's score

    let first = remaining
        .iter()
        .copied()
        .enumerate()
        .max_by(|(ia, &a), (ib, &b)| results[a].score.partial_cmp(&results[b].score).unwrap_or(std::cmp::Ordering::Equal).then(ib.cmp(ia).reverse()))
        .map(|(_, idx)| idx)
        .unwrap();
    selected.push(first);
    remaining.retain(|&i| i != first);

    while !remaining.is_empty() && selected.len() < top_k.max(1) {
        let best = remaining
            .iter()
            .copied()
            .enumerate()
            .max_by(|(ia, &a), (ib, &b)| mmr_score(a, &selected, results, &sim, lambda).partial_cmp(&mmr_score(b, &selected, results, &sim, lambda)).unwrap_or(std::cmp::Ordering::Equal).then(ib.cmp(ia).reverse()))
            .map(|(_, idx)| idx)
            .unwrap();
        selected.push(best);
        remaining.retain(|&i| i != best);
    }

    selected.into_iter().take(top_k).map(|i| results[i].clone()).collect()
}

fn mmr_score(idx: usize, selected: &[usize], results: &[SearchHit], sim: &dyn Fn(usize, usize) -> f64, lambda: f64) -> f64 {
    let relevance = results[idx].score;
    let max_sim = selected.iter().map(|&s| sim(idx, s)).fold(0.0_f64, f64::max);
    lambda * relevance - (1.0 - lambda) * max_sim
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(source_id: &str, score: f64, content: &str) -> SearchHit {
        SearchHit { source_id: source_id.into(), source: "doc".into(), content: content.into(), score, created_at: chrono::Utc::now().to_rfc3339() }
    }

    #[test]
    fn cosine_identity_and_opposite() {
        let v = vec![1.0f32, 2.0, 3.0];
        let neg: Vec<f32> = v.iter().map(|x| -x).collect();
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-9);
        assert!((cosine_similarity(&v, &neg) - (-1.0)).abs() < 1e-9);
    }

    #[test]
    fn cosine_zero_vector_is_zero() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
    }

    #[test]
    fn rrf_merge_sorted_and_union_complete() {
        let a = vec![hit("1", 0.0, "a"), hit("2", 0.0, "b")];
        let b = vec![hit("2", 0.0, "b"), hit("3", 0.0, "c")];
        let merged = rrf_merge(&a, &b, 60.0);
        assert_eq!(merged.len(), 3);
        for w in merged.windows(2) {
            assert!(w[0].score >= w[1].score);
        }
        // "2" appears in both lists so should score highest.
        assert_eq!(merged[0].source_id, "2");
    }

    #[test]
    fn rrf_merge_degenerates_with_one_empty_list() {
        let a = vec![hit("1", 0.0, "a"), hit("2", 0.0, "b")];
        let merged = rrf_merge(&a, &[], 60.0);
        assert_eq!(merged.iter().map(|h| h.source_id.clone()).collect::<Vec<_>>(), vec!["1", "2"]);
    }

    #[test]
    fn temporal_decay_monotonic_and_positive() {
        let now = chrono::Utc::now().to_rfc3339();
        let old = (chrono::Utc::now() - chrono::Duration::days(60)).to_rfc3339();
        let ancient = (chrono::Utc::now() - chrono::Duration::days(600)).to_rfc3339();
        let d_now = temporal_decay(1.0, &now, 30.0);
        let d_old = temporal_decay(1.0, &old, 30.0);
        let d_ancient = temporal_decay(1.0, &ancient, 30.0);
        assert!(d_now > d_old);
        assert!(d_old > d_ancient);
        assert!(d_ancient > 0.0);
    }

    #[test]
    fn mmr_first_pick_is_highest_score_and_outputs_distinct() {
        let results = vec![hit("1", 0.5, "the quick brown fox"), hit("2", 0.9, "jumped over the lazy dog"), hit("3", 0.8, "the quick brown fox jumps")];
        let reranked = mmr_rerank(&results, &[], None, 0.7, 3);
        assert_eq!(reranked[0].source_id, "2");
        let mut ids: Vec<&str> = reranked.iter().map(|h| h.source_id.as_str()).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), 3);
    }
}
