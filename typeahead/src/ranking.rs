//! Tiered relevance scoring for type-ahead suggestions.
//!
//! Higher tiers always dominate lower ones:
//!
//! | tier      | score                                   |
//! |-----------|-----------------------------------------|
//! | exact     | 100                                     |
//! | prefix    | 90, minus 0.1 per extra char (max -10)  |
//! | substring | 70, minus 0.1 per extra char (max -10)  |
//! | per-word  | 30 / 20 per query word, averaged        |
//! | overlap   | at most 1 (optional, approximate)       |
//!
//! A score of 0 excludes the candidate. Scoring depends only on the
//! `(query, text)` pair.

use std::cmp::Ordering;

use rayon::prelude::*;
use tokio_util::sync::CancellationToken;

use crate::interface::{CandidateItem, DisplayFn, SearchTextFn};

pub const EXACT_SCORE: f64 = 100.0;
pub const PREFIX_SCORE: f64 = 90.0;
pub const SUBSTRING_SCORE: f64 = 70.0;
/// Per query word that prefixes a candidate word
pub const WORD_PREFIX_SCORE: f64 = 30.0;
/// Per query word found inside a candidate word
pub const WORD_SUBSTRING_SCORE: f64 = 20.0;

/// Penalty per character the candidate is longer than the query.
const LENGTH_PENALTY_PER_CHAR: f64 = 0.1;
/// Cap on the length penalty so tiers never overlap.
const LENGTH_PENALTY_MAX: f64 = 10.0;

const OVERLAP_TIER_MAX: f64 = 1.0;
const OVERLAP_MIN_RATIO: f64 = 0.75;
const OVERLAP_MIN_QUERY_CHARS: usize = 3;
/// Longer candidates are truncated before the overlap DP.
const OVERLAP_MAX_TARGET_CHARS: usize = 256;

/// Trim and lowercase. The cache key and every comparison go through this.
pub fn normalize(text: &str) -> String {
    text.trim().to_lowercase()
}

/// Split on anything that isn't alphanumeric.
pub(crate) fn tokenize_words(text: &str) -> Vec<&str> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect()
}

/// Score a candidate with the default four tiers (no overlap fallback).
pub fn score(query: &str, candidate_text: &str) -> f64 {
    RelevanceScorer::default().score(query, candidate_text)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelevanceScorer {
    /// Enables the character-overlap tier below the word tier
    pub fuzzy_fallback: bool,
}

impl RelevanceScorer {
    pub fn new(fuzzy_fallback: bool) -> Self {
        Self { fuzzy_fallback }
    }

    pub fn score(&self, query: &str, candidate_text: &str) -> f64 {
        let query = normalize(query);
        let target = normalize(candidate_text);
        if query.is_empty() || target.is_empty() {
            return 0.0;
        }

        if target == query {
            return EXACT_SCORE;
        }

        let extra_chars = target.chars().count().saturating_sub(query.chars().count());
        let penalty = (extra_chars as f64 * LENGTH_PENALTY_PER_CHAR).min(LENGTH_PENALTY_MAX);

        if target.starts_with(&query) {
            return PREFIX_SCORE - penalty;
        }
        if target.contains(&query) {
            return SUBSTRING_SCORE - penalty;
        }

        let word_score = word_tier_score(&query, &target);
        if word_score > 0.0 {
            return word_score;
        }

        if self.fuzzy_fallback {
            if let Some(ratio) = character_overlap(&query, &target) {
                return OVERLAP_TIER_MAX * ratio;
            }
        }

        0.0
    }
}

/// Average per-word credit: 30 if some candidate word starts with the query
/// word, 20 if one merely contains it, 0 otherwise.
fn word_tier_score(query: &str, target: &str) -> f64 {
    let query_words = tokenize_words(query);
    if query_words.is_empty() {
        return 0.0;
    }
    let target_words = tokenize_words(target);

    let total: f64 = query_words
        .iter()
        .map(|qw| {
            if target_words.iter().any(|tw| tw.starts_with(qw)) {
                WORD_PREFIX_SCORE
            } else if target_words.iter().any(|tw| tw.contains(qw)) {
                WORD_SUBSTRING_SCORE
            } else {
                0.0
            }
        })
        .sum();

    total / query_words.len() as f64
}

/// Fraction of query characters that appear in order in the target
/// (longest common subsequence / query length). Whitespace is ignored; the
/// first characters must agree. Returns `None` below the overlap threshold.
fn character_overlap(query: &str, target: &str) -> Option<f64> {
    let q_chars: Vec<char> = query.chars().filter(|c| !c.is_whitespace()).collect();
    let t_chars: Vec<char> = target
        .chars()
        .filter(|c| !c.is_whitespace())
        .take(OVERLAP_MAX_TARGET_CHARS)
        .collect();

    if q_chars.len() < OVERLAP_MIN_QUERY_CHARS || t_chars.is_empty() {
        return None;
    }
    if q_chars[0] != t_chars[0] {
        return None;
    }

    let mut prev = vec![0usize; t_chars.len() + 1];
    let mut curr = vec![0usize; t_chars.len() + 1];
    for &qc in &q_chars {
        for (j, &tc) in t_chars.iter().enumerate() {
            curr[j + 1] = if qc == tc {
                prev[j] + 1
            } else {
                prev[j + 1].max(curr[j])
            };
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    let ratio = prev[t_chars.len()] as f64 / q_chars.len() as f64;
    if ratio >= OVERLAP_MIN_RATIO {
        Some(ratio)
    } else {
        None
    }
}

/// Total order for ranked suggestions: score descending, then shorter
/// display text, then lexical display text.
pub fn compare_ranked<T>(a: &CandidateItem<T>, b: &CandidateItem<T>) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| a.display.chars().count().cmp(&b.display.chars().count()))
        .then_with(|| a.display.cmp(&b.display))
}

/// Score, filter, de-duplicate and sort provider results.
///
/// Runs the scoring in parallel and stops early (returning what was scored so
/// far) once `cancel` fires; a cancelled result is discarded by the caller
/// anyway. Duplicated payloads keep their best-ranked occurrence.
pub fn rank_candidates<T>(
    scorer: &RelevanceScorer,
    query: &str,
    items: Vec<T>,
    display: &DisplayFn<T>,
    search_text: &SearchTextFn<T>,
    limit: usize,
    cancel: &CancellationToken,
) -> Vec<CandidateItem<T>>
where
    T: PartialEq + Send,
{
    let indexed: Vec<(usize, T)> = items.into_iter().enumerate().collect();

    let mut scored: Vec<(usize, CandidateItem<T>)> = indexed
        .into_par_iter()
        .take_any_while(|_| !cancel.is_cancelled())
        .filter_map(|(index, item)| {
            let score = scorer.score(query, &search_text(&item));
            if score <= 0.0 {
                return None;
            }
            let display_text = display(&item);
            Some((index, CandidateItem::new(item, display_text, score)))
        })
        .collect();

    // par_iter doesn't preserve order; the index keeps equal rows stable
    scored.sort_unstable_by(|(ia, a), (ib, b)| compare_ranked(a, b).then_with(|| ia.cmp(ib)));

    let mut ranked: Vec<CandidateItem<T>> = Vec::with_capacity(limit.min(scored.len()));
    for (_, candidate) in scored {
        if ranked.len() >= limit {
            break;
        }
        if ranked.iter().any(|kept| kept.payload == candidate.payload) {
            continue;
        }
        ranked.push(candidate);
    }
    ranked
}
