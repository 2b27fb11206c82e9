use super::hash;
use super::normalize;
use super::similarity::similarity;
use super::store::EntryStore;
use crate::error::TmResult;
use crate::model::entry::{MatchCandidate, TmEntry};

/// Hard cap on fuzzy results, independent of the candidate bound.
pub const MAX_RESULTS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchOptions {
    pub min_confidence: f64,
    pub max_candidates: usize,
    pub case_sensitive: bool,
}

impl Default for MatchOptions {
    fn default() -> Self {
        Self {
            min_confidence: 0.7,
            max_candidates: 50,
            case_sensitive: false,
        }
    }
}

/// Exact lookup by raw text: normalizes, hashes and queries the store.
pub fn exact_match(
    store: &EntryStore,
    original: &str,
    target_lang: &str,
) -> TmResult<Option<TmEntry>> {
    let trimmed = original.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }

    let h = hash::source_hash(trimmed, store.case_sensitive());
    store.find_by_hash_and_language(&h, target_lang)
}

/// Relevance prefilter, then edit-distance scoring of the survivors. The query
/// is scored with its whitespace collapsed.
pub fn find_matches(
    store: &EntryStore,
    source_text: &str,
    target_lang: &str,
    opts: MatchOptions,
) -> TmResult<Vec<MatchCandidate>> {
    let query = normalize::normalize_with(source_text, true);
    if query.is_empty() {
        return Ok(Vec::new());
    }

    let ids = store.search_candidates(&query, target_lang, opts.max_candidates)?;
    if ids.is_empty() {
        return Ok(Vec::new());
    }

    let candidates = store
        .fetch_by_ids(&ids)?
        .into_iter()
        .filter_map(|entry| {
            let score = similarity(&query, &entry.source_text, opts.case_sensitive);
            (score >= opts.min_confidence).then_some(MatchCandidate {
                entry,
                similarity: score,
            })
        })
        .collect();

    let ranked = rank(candidates);
    tracing::debug!(
        target_lang,
        candidates = ids.len(),
        returned = ranked.len(),
        "fuzzy_match"
    );
    Ok(ranked)
}

/// Orders by similarity, then quality (absent = 0), then usage, all descending,
/// and keeps the first `MAX_RESULTS`.
pub fn rank(mut candidates: Vec<MatchCandidate>) -> Vec<MatchCandidate> {
    candidates.sort_by(|a, b| {
        b.similarity
            .total_cmp(&a.similarity)
            .then_with(|| a.entry.rank_cmp(&b.entry))
    });
    candidates.truncate(MAX_RESULTS);
    candidates
}
