use std::path::Path;

use serde::Serialize;

use super::cache::{CacheStats, MatchCache};
use super::legacy;
use super::matcher::{self, MatchOptions};
use super::merge::{self, MergeReport};
use super::retention::{self, CleanupPreview, RetentionPolicy};
use super::store::EntryStore;
use crate::error::TmResult;
use crate::model::entry::{EntryPatch, MatchCandidate, NewTmEntry, TmEntry, TmStats};
use crate::model::query::{Direction, EntryFilter, OrderBy, Ordering, Pagination};
use crate::settings::TmSettings;

const EXPORT_PAGE: usize = 500;

/// Best available reuse for a source string.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Suggestion {
    Exact { entry: TmEntry },
    Fuzzy { candidate: MatchCandidate },
}

/// Translation memory engine.
///
/// Owns the entry store (with its relevance index) and the fuzzy-match cache.
/// Every mutating call invalidates the cache for the languages it touched.
#[derive(Debug)]
pub struct TranslationMemory {
    store: EntryStore,
    cache: MatchCache,
    settings: TmSettings,
}

impl TranslationMemory {
    pub fn open(settings: TmSettings) -> TmResult<Self> {
        let store = EntryStore::open(&settings)?;
        tracing::info!(path = %settings.database_path.display(), "translation memory opened");
        Ok(Self::with_store(store, settings))
    }

    pub fn in_memory(settings: TmSettings) -> TmResult<Self> {
        let store = EntryStore::in_memory(&settings)?;
        Ok(Self::with_store(store, settings))
    }

    pub fn with_store(store: EntryStore, settings: TmSettings) -> Self {
        Self {
            cache: MatchCache::new(settings.cache_capacity),
            store,
            settings,
        }
    }

    pub fn settings(&self) -> &TmSettings {
        &self.settings
    }

    pub fn store(&self) -> &EntryStore {
        &self.store
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn default_match_options(&self) -> MatchOptions {
        MatchOptions {
            min_confidence: self.settings.default_min_confidence,
            max_candidates: self.settings.default_max_candidates,
            case_sensitive: self.settings.case_sensitive,
        }
    }

    /// Best row for the key; a hit counts as one use.
    pub fn find_exact_match(
        &self,
        source_hash: &str,
        target_language_id: &str,
    ) -> TmResult<Option<TmEntry>> {
        let hit = self
            .store
            .find_by_hash_and_language(source_hash, target_language_id)?;
        tracing::info!(
            hash = source_hash,
            language = target_language_id,
            hit = hit.is_some(),
            "lookup"
        );
        Ok(hit)
    }

    /// Exact lookup by raw text, hashed with the configured case handling.
    pub fn find_exact_text(&self, text: &str, target_language_id: &str) -> TmResult<Option<TmEntry>> {
        let hit = matcher::exact_match(&self.store, text, target_language_id)?;
        tracing::info!(language = target_language_id, hit = hit.is_some(), "lookup");
        Ok(hit)
    }

    /// Up to `MAX_RESULTS` fuzzy candidates at or above `min_confidence`. No side effects.
    pub fn find_matches(
        &self,
        source_text: &str,
        target_language_id: &str,
        min_confidence: f64,
        max_candidates: usize,
    ) -> TmResult<Vec<MatchCandidate>> {
        let opts = MatchOptions {
            min_confidence,
            max_candidates,
            case_sensitive: self.settings.case_sensitive,
        };
        self.find_matches_with(source_text, target_language_id, opts)
    }

    pub fn find_matches_with(
        &self,
        source_text: &str,
        target_language_id: &str,
        opts: MatchOptions,
    ) -> TmResult<Vec<MatchCandidate>> {
        let generation = self.cache.generation();
        if let Some(cached) = self.cache.get(source_text, target_language_id, &opts) {
            return Ok(cached);
        }

        let found = matcher::find_matches(&self.store, source_text, target_language_id, opts)?;
        self.cache
            .put(source_text, target_language_id, &opts, generation, found.clone());
        Ok(found)
    }

    /// Exact match first, then the best fuzzy candidate under the default
    /// options. Storage failures are logged and read as "no match".
    pub fn suggest(&self, text: &str, target_language_id: &str) -> Option<Suggestion> {
        match self.find_exact_text(text, target_language_id) {
            Ok(Some(entry)) => return Some(Suggestion::Exact { entry }),
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(error = %e, language = target_language_id, "exact lookup failed");
            }
        }

        match self.find_matches_with(text, target_language_id, self.default_match_options()) {
            Ok(found) => found
                .into_iter()
                .next()
                .map(|candidate| Suggestion::Fuzzy { candidate }),
            Err(e) => {
                tracing::warn!(error = %e, language = target_language_id, "fuzzy lookup failed");
                None
            }
        }
    }

    pub fn get(&self, id: &str) -> TmResult<Option<TmEntry>> {
        self.store.get_by_id(id)
    }

    pub fn query(
        &self,
        filter: &EntryFilter,
        page: Pagination,
        ordering: Ordering,
    ) -> TmResult<Vec<TmEntry>> {
        self.store.query(filter, page, ordering)
    }

    pub fn count(&self, filter: &EntryFilter) -> TmResult<usize> {
        self.store.count(filter)
    }

    pub fn stats(&self) -> TmResult<TmStats> {
        self.store.stats()
    }

    /// Atomic merge of `entries`; returns how many were processed.
    pub fn upsert_batch(&self, entries: Vec<NewTmEntry>) -> TmResult<usize> {
        Ok(self.merge_batch(entries)?.processed)
    }

    pub fn merge_batch(&self, entries: Vec<NewTmEntry>) -> TmResult<MergeReport> {
        let result = merge::upsert_batch(&self.store, entries);
        match &result {
            Ok(report) => {
                for lang in &report.languages {
                    self.cache.invalidate_language(lang);
                }
            }
            Err(e) => tracing::error!(error = %e, "merge failed; batch not stored"),
        }
        result
    }

    /// Single-entry write through the merge path, so the soft key stays unique.
    pub fn upsert(&self, entry: NewTmEntry) -> TmResult<MergeReport> {
        self.merge_batch(vec![entry])
    }

    pub fn update(&self, id: &str, patch: &EntryPatch) -> TmResult<Option<TmEntry>> {
        let updated = self.store.update_by_id(id, patch)?;
        if let Some(e) = &updated {
            self.cache.invalidate_language(&e.target_language_id);
        }
        Ok(updated)
    }

    pub fn delete_by_id(&self, id: &str) -> TmResult<bool> {
        let deleted = self.store.delete_by_id(id)?;
        if let Some(e) = &deleted {
            self.cache.invalidate_language(&e.target_language_id);
        }
        Ok(deleted.is_some())
    }

    /// Removes every entry for a language that is leaving the system.
    pub fn delete_by_language(&self, target_language_id: &str) -> TmResult<usize> {
        let deleted = self.store.delete_by_language(target_language_id)?;
        self.cache.invalidate_language(target_language_id);
        tracing::info!(language = target_language_id, deleted, "purge_language");
        Ok(deleted)
    }

    pub fn count_cleanup_candidates(&self, max_quality: f64, unused_days: i64) -> TmResult<CleanupPreview> {
        retention::count_cleanup_candidates(&self.store, RetentionPolicy::new(max_quality, unused_days))
    }

    pub fn delete_by_quality_and_age(&self, max_quality: f64, unused_days: i64) -> TmResult<usize> {
        let deleted = retention::delete_by_quality_and_age(
            &self.store,
            RetentionPolicy::new(max_quality, unused_days),
        )?;
        if deleted > 0 {
            self.cache.clear();
        }
        Ok(deleted)
    }

    pub fn rebuild_index(&self) -> TmResult<usize> {
        let indexed = self.store.rebuild_index()?;
        self.cache.clear();
        tracing::info!(indexed, "index_rebuild");
        Ok(indexed)
    }

    pub fn compact_duplicates(&self) -> TmResult<usize> {
        let removed = merge::compact_duplicates(&self.store)?;
        if removed > 0 {
            self.cache.clear();
        }
        Ok(removed)
    }

    /// Merges a legacy JSON memory file into the store. Returns rows processed.
    pub fn import_legacy(&self, path: &Path) -> TmResult<usize> {
        let entries = legacy::into_new_entries(legacy::load(path)?);
        if entries.is_empty() {
            return Ok(0);
        }

        let report = self.merge_batch(entries)?;
        tracing::info!(
            path = %path.display(),
            inserted = report.inserted,
            updated = report.updated,
            "legacy import"
        );
        Ok(report.processed)
    }

    /// Writes the store (optionally one language) as a legacy JSON memory file.
    pub fn export_legacy(
        &self,
        path: &Path,
        source_lang: &str,
        target_language_id: Option<&str>,
    ) -> TmResult<usize> {
        let filter = EntryFilter {
            target_language_id: target_language_id.map(str::to_string),
            ..EntryFilter::default()
        };
        let ordering = Ordering::new(OrderBy::CreatedAt, Direction::Asc);

        let mut rows = Vec::new();
        loop {
            let page = self
                .store
                .query(&filter, Pagination::new(rows.len(), EXPORT_PAGE), ordering)?;
            let done = page.len() < EXPORT_PAGE;
            rows.extend(page);
            if done {
                break;
            }
        }

        let out = legacy::from_tm_entries(&rows, source_lang);
        let written = legacy::save(path, &out)?;
        tracing::info!(path = %path.display(), entries = written, "legacy export");
        Ok(written)
    }
}
