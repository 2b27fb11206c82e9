use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use lru::LruCache;
use serde::Serialize;

use super::matcher::MatchOptions;
use super::normalize;
use crate::model::entry::MatchCandidate;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct MatchKey {
    text: String,
    language: String,
    min_confidence_bits: u64,
    max_candidates: usize,
    case_sensitive: bool,
}

impl MatchKey {
    fn new(text: &str, language: &str, opts: &MatchOptions) -> Self {
        Self {
            text: normalize::normalize_with(text, opts.case_sensitive),
            language: language.to_string(),
            min_confidence_bits: opts.min_confidence.to_bits(),
            max_candidates: opts.max_candidates,
            case_sensitive: opts.case_sensitive,
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

/// Bounded LRU of fuzzy-match results. Writers must call one of the
/// invalidation hooks for every language they mutate.
///
/// Readers take a [`generation`](Self::generation) before querying the store
/// and hand it back to [`put`](Self::put); results computed across an
/// invalidation are dropped instead of cached.
pub struct MatchCache {
    inner: Option<Mutex<LruCache<MatchKey, Vec<MatchCandidate>>>>,
    generation: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl std::fmt::Debug for MatchCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MatchCache")
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl MatchCache {
    /// A capacity of zero disables caching.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: NonZeroUsize::new(capacity).map(|c| Mutex::new(LruCache::new(c))),
            generation: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> Option<MutexGuard<'_, LruCache<MatchKey, Vec<MatchCandidate>>>> {
        self.inner
            .as_ref()
            .map(|m| m.lock().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn get(&self, text: &str, language: &str, opts: &MatchOptions) -> Option<Vec<MatchCandidate>> {
        let mut cache = self.lock()?;
        let found = cache.get(&MatchKey::new(text, language, opts)).cloned();

        let counter = if found.is_some() { &self.hits } else { &self.misses };
        counter.fetch_add(1, Ordering::Relaxed);
        found
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Caches `results` unless an invalidation happened since `generation` was taken.
    pub fn put(
        &self,
        text: &str,
        language: &str,
        opts: &MatchOptions,
        generation: u64,
        results: Vec<MatchCandidate>,
    ) {
        let Some(mut cache) = self.lock() else {
            return;
        };
        if self.generation.load(Ordering::Acquire) != generation {
            tracing::debug!(language, "match cache put skipped, results predate a write");
            return;
        }
        cache.put(MatchKey::new(text, language, opts), results);
    }

    /// Drops every cached result for `language`.
    pub fn invalidate_language(&self, language: &str) {
        let Some(mut cache) = self.lock() else {
            return;
        };
        self.generation.fetch_add(1, Ordering::AcqRel);

        let stale: Vec<MatchKey> = cache
            .iter()
            .filter(|(k, _)| k.language == language)
            .map(|(k, _)| k.clone())
            .collect();
        for key in &stale {
            cache.pop(key);
        }

        if !stale.is_empty() {
            tracing::debug!(language, dropped = stale.len(), "match cache invalidated");
        }
    }

    pub fn clear(&self) {
        if let Some(mut cache) = self.lock() {
            self.generation.fetch_add(1, Ordering::AcqRel);
            cache.clear();
        }
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.lock().map_or(0, |c| c.len()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts() -> MatchOptions {
        MatchOptions::default()
    }

    #[test]
    fn stores_and_counts_hits() {
        let cache = MatchCache::new(4);
        assert!(cache.get("hello", "fr", &opts()).is_none());

        cache.put("hello", "fr", &opts(), cache.generation(), Vec::new());
        assert_eq!(cache.get("hello", "fr", &opts()), Some(Vec::new()));

        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses, stats.entries), (1, 1, 1));
    }

    #[test]
    fn options_are_part_of_the_key() {
        let cache = MatchCache::new(4);
        cache.put("hello", "fr", &opts(), cache.generation(), Vec::new());

        let stricter = MatchOptions {
            min_confidence: 0.95,
            ..opts()
        };
        assert!(cache.get("hello", "fr", &stricter).is_none());
    }

    #[test]
    fn invalidation_is_per_language() {
        let cache = MatchCache::new(8);
        cache.put("a", "fr", &opts(), cache.generation(), Vec::new());
        cache.put("b", "fr", &opts(), cache.generation(), Vec::new());
        cache.put("a", "de", &opts(), cache.generation(), Vec::new());

        cache.invalidate_language("fr");
        assert!(cache.get("a", "fr", &opts()).is_none());
        assert!(cache.get("a", "de", &opts()).is_some());

        cache.clear();
        assert_eq!(cache.stats().entries, 0);
    }

    #[test]
    fn results_taken_before_an_invalidation_are_not_cached() {
        let cache = MatchCache::new(4);
        let before = cache.generation();

        cache.invalidate_language("de");
        cache.put("hello", "fr", &opts(), before, Vec::new());
        assert!(cache.get("hello", "fr", &opts()).is_none());

        let before = cache.generation();
        cache.clear();
        cache.put("hello", "fr", &opts(), before, Vec::new());
        assert_eq!(cache.stats().entries, 0);

        cache.put("hello", "fr", &opts(), cache.generation(), Vec::new());
        assert_eq!(cache.stats().entries, 1);
    }

    #[test]
    fn key_ignores_spacing_and_case_unless_sensitive() {
        let cache = MatchCache::new(4);
        cache.put("Open  the gate ", "fr", &opts(), cache.generation(), Vec::new());
        assert!(cache.get("open the gate", "fr", &opts()).is_some());

        let sensitive = MatchOptions {
            case_sensitive: true,
            ..opts()
        };
        cache.put("Open  the gate", "fr", &sensitive, cache.generation(), Vec::new());
        assert!(cache.get("Open the gate", "fr", &sensitive).is_some());
        assert!(cache.get("open the gate", "fr", &sensitive).is_none());
    }

    #[test]
    fn bounded_by_capacity() {
        let cache = MatchCache::new(2);
        for t in ["a", "b", "c"] {
            cache.put(t, "fr", &opts(), cache.generation(), Vec::new());
        }
        assert_eq!(cache.stats().entries, 2);
        assert!(cache.get("a", "fr", &opts()).is_none());
    }

    #[test]
    fn zero_capacity_disables() {
        let cache = MatchCache::new(0);
        cache.put("a", "fr", &opts(), cache.generation(), Vec::new());
        assert!(cache.get("a", "fr", &opts()).is_none());
        assert_eq!(cache.stats(), CacheStats::default());
    }
}
