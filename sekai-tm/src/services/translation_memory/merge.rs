//! Batch merge: one transaction that reads existing rows for every soft key
//! in the batch, updates matches in place and inserts the rest.

use std::collections::{BTreeSet, HashMap};

use rusqlite::params;
use serde::Serialize;

use super::hash;
use super::store::{self, EntryStore};
use crate::error::{StorageContext, TmError, TmResult};
use crate::model::entry::{is_valid_quality, EntryKey, NewTmEntry, TmEntry};

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct MergeReport {
    pub processed: usize,
    pub inserted: usize,
    pub updated: usize,

    /// Languages touched by the batch, for cache invalidation.
    pub languages: BTreeSet<String>,
}

pub fn upsert_batch(store: &EntryStore, entries: Vec<NewTmEntry>) -> TmResult<MergeReport> {
    if entries.is_empty() {
        return Ok(MergeReport::default());
    }

    let mut entries = entries;
    for (i, e) in entries.iter_mut().enumerate() {
        validate(i, e)?;
        ensure_hash(e, store.case_sensitive());
    }

    let keys: Vec<EntryKey> = entries
        .iter()
        .map(NewTmEntry::key)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    let report = store.database().write("upsert_batch", |tx| {
        let mut existing = store::find_by_keys_in(tx, &keys, store.max_query_params())?;
        let mut report = MergeReport::default();
        let at = store::now();

        for new in entries {
            let key = new.key();
            report.languages.insert(new.target_language_id.clone());

            match existing.get_mut(&key) {
                Some(current) => {
                    merge_into(current, new, at);
                    store::update_row(tx, current).storage("upsert_batch", &current.id)?;
                    store.index().index_entry(tx, current)?;
                    report.updated += 1;
                }
                None => {
                    let entry = TmEntry::create(new, at);
                    store::insert_row(tx, &entry).storage("upsert_batch", &key.to_string())?;
                    store.index().index_entry(tx, &entry)?;
                    existing.insert(key, entry);
                    report.inserted += 1;
                }
            }
            report.processed += 1;
        }

        Ok(report)
    })?;

    tracing::info!(
        processed = report.processed,
        inserted = report.inserted,
        updated = report.updated,
        "merge"
    );
    Ok(report)
}

/// Repeat translation of a known key: identity and `created_at` stay, the
/// translation is replaced, quality keeps the maximum, usage goes up by one.
fn merge_into(current: &mut TmEntry, new: NewTmEntry, at: chrono::DateTime<chrono::Utc>) {
    current.source_text = new.source_text;
    current.translated_text = new.translated_text;
    current.quality_score = match (current.quality_score, new.quality_score) {
        (None, None) => None,
        (a, b) => Some(a.unwrap_or(0.0).max(b.unwrap_or(0.0))),
    };
    current.usage_count += 1;
    current.updated_at = at;
    current.last_used_at = at;
}

fn validate(i: usize, e: &NewTmEntry) -> TmResult<()> {
    if e.source_text.trim().is_empty() {
        return Err(TmError::InvalidInput(format!("entry {i}: empty source_text")));
    }
    if e.target_language_id.trim().is_empty() {
        return Err(TmError::InvalidInput(format!(
            "entry {i}: empty target_language_id"
        )));
    }
    if let Some(q) = e.quality_score.filter(|q| !is_valid_quality(*q)) {
        return Err(TmError::InvalidInput(format!(
            "entry {i}: quality_score {q} outside [0, 1]"
        )));
    }
    Ok(())
}

fn ensure_hash(e: &mut NewTmEntry, case_sensitive: bool) {
    if e.source_hash.is_empty() {
        e.source_hash = hash::source_hash(&e.source_text, case_sensitive);
    }
}

/// Collapses rows sharing a soft key into the best one (quality, then usage,
/// then oldest), folding the others' usage into it. Returns rows removed.
pub fn compact_duplicates(store: &EntryStore) -> TmResult<usize> {
    let removed = store.database().write("compact_duplicates", |tx| {
        let sql = format!(
            "SELECT {} FROM tm_entries
             WHERE (source_hash, target_language_id) IN (
                 SELECT source_hash, target_language_id FROM tm_entries
                 GROUP BY source_hash, target_language_id
                 HAVING COUNT(*) > 1
             )",
            store::ENTRY_COLUMNS
        );
        let rows = store::collect_entries(tx, "compact_duplicates", "duplicates", &sql, &[])?;

        let mut groups: HashMap<EntryKey, Vec<TmEntry>> = HashMap::new();
        for e in rows {
            groups.entry(e.key()).or_default().push(e);
        }

        let at = store::now();
        let mut removed = 0usize;

        for (_key, mut group) in groups {
            group.sort_by(|a, b| a.rank_cmp(b).then_with(|| a.created_at.cmp(&b.created_at)));

            let rest = group.split_off(1);
            let Some(mut keeper) = group.pop() else {
                continue;
            };

            for dup in rest {
                keeper.usage_count += dup.usage_count;
                keeper.last_used_at = keeper.last_used_at.max(dup.last_used_at);
                store.index().remove_entry(tx, &dup.id)?;
                tx.execute("DELETE FROM tm_entries WHERE id = ?1", params![dup.id])
                    .storage("compact_duplicates", &dup.id)?;
                removed += 1;
            }

            keeper.updated_at = at;
            store::update_row(tx, &keeper).storage("compact_duplicates", &keeper.id)?;
        }

        Ok(removed)
    })?;

    tracing::info!(removed, "compact_duplicates");
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::entry::EntryPatch;
    use crate::model::query::EntryFilter;
    use crate::settings::TmSettings;

    fn store() -> EntryStore {
        EntryStore::in_memory(&TmSettings::default()).unwrap()
    }

    fn all(store: &EntryStore) -> Vec<TmEntry> {
        store
            .query(&EntryFilter::default(), Default::default(), Default::default())
            .unwrap()
    }

    #[test]
    fn repeat_upsert_updates_in_place() {
        let s = store();
        let e = NewTmEntry::new("Open the gate", "fr", "Ouvrez la porte").with_quality(0.8);

        let first = upsert_batch(&s, vec![e.clone()]).unwrap();
        assert_eq!((first.inserted, first.updated), (1, 0));
        let before = all(&s).remove(0);

        let second = upsert_batch(&s, vec![e]).unwrap();
        assert_eq!((second.inserted, second.updated, second.processed), (0, 1, 1));

        let rows = all(&s);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, before.id);
        assert_eq!(rows[0].created_at, before.created_at);
        assert_eq!(rows[0].usage_count, before.usage_count + 1);
    }

    #[test]
    fn merge_keeps_highest_quality_and_latest_text() {
        let s = store();
        upsert_batch(&s, vec![NewTmEntry::new("Hi", "es", "Hola").with_quality(0.9)]).unwrap();
        upsert_batch(&s, vec![NewTmEntry::new("hi", "es", "Buenas").with_quality(0.4)]).unwrap();

        let rows = all(&s);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].translated_text, "Buenas");
        assert_eq!(rows[0].quality_score, Some(0.9));
    }

    #[test]
    fn missing_quality_on_both_sides_stays_missing() {
        let s = store();
        upsert_batch(&s, vec![NewTmEntry::new("Hi", "es", "Hola")]).unwrap();
        upsert_batch(&s, vec![NewTmEntry::new("Hi", "es", "Hola")]).unwrap();
        assert_eq!(all(&s)[0].quality_score, None);
    }

    #[test]
    fn duplicates_within_one_batch_collapse() {
        let s = store();
        let report = upsert_batch(
            &s,
            vec![
                NewTmEntry::new("Yes", "de", "Ja"),
                NewTmEntry::new("yes", "de", "Jawohl"),
                NewTmEntry::new("Yes", "fr", "Oui"),
            ],
        )
        .unwrap();

        assert_eq!((report.processed, report.inserted, report.updated), (3, 2, 1));
        assert_eq!(report.languages.len(), 2);
        assert_eq!(all(&s).len(), 2);
    }

    #[test]
    fn merge_resolves_to_best_existing_duplicate() {
        let s = store();
        let low = TmEntry::create(NewTmEntry::new("Yes", "de", "ja").with_quality(0.2), store::now());
        let high = TmEntry::create(NewTmEntry::new("Yes", "de", "Ja").with_quality(0.7), store::now());
        s.insert(&low).unwrap();
        s.insert(&high).unwrap();

        upsert_batch(&s, vec![NewTmEntry::new("Yes", "de", "Ja!")]).unwrap();

        assert_eq!(s.get_by_id(&high.id).unwrap().unwrap().translated_text, "Ja!");
        assert_eq!(s.get_by_id(&low.id).unwrap().unwrap().translated_text, "ja");
    }

    #[test]
    fn invalid_entry_rejects_whole_batch() {
        let s = store();
        let err = upsert_batch(
            &s,
            vec![NewTmEntry::new("Fine", "fr", "Bien"), NewTmEntry::new("  ", "fr", "x")],
        )
        .unwrap_err();

        assert!(matches!(err, TmError::InvalidInput(_)));
        assert!(all(&s).is_empty());
    }

    #[test]
    fn storage_failure_leaves_no_partial_writes() {
        let s = store();
        let taken = TmEntry::create(NewTmEntry::new("Taken", "fr", "Pris"), store::now());
        s.insert(&taken).unwrap();
        s.database()
            .write("test", |tx| {
                tx.execute_batch(
                    "CREATE TRIGGER reject_boom BEFORE INSERT ON tm_entries
                     WHEN new.source_text = 'boom'
                     BEGIN SELECT RAISE(ABORT, 'boom'); END;",
                )
                .storage("test", "trigger")
            })
            .unwrap();

        let res = upsert_batch(
            &s,
            vec![
                NewTmEntry::new("Taken", "fr", "Occupé"),
                NewTmEntry::new("first", "fr", "premier"),
                NewTmEntry::new("boom", "fr", "x"),
            ],
        );
        assert!(res.is_err());

        let rows = all(&s);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].translated_text, "Pris");
        assert_eq!(rows[0].usage_count, 0);
    }

    #[test]
    fn merged_rows_are_searchable_by_new_text() {
        let s = store();
        upsert_batch(&s, vec![NewTmEntry::new("The  Harbor", "ja", "港")]).unwrap();
        upsert_batch(&s, vec![NewTmEntry::new("the harbor", "ja", "港湾")]).unwrap();

        let ids = s.search_candidates("harbor", "ja", 5).unwrap();
        assert_eq!(ids.len(), 1);
    }

    #[test]
    fn compaction_keeps_best_row_and_sums_usage() {
        let s = store();
        let a = TmEntry::create(NewTmEntry::new("Run", "fr", "Cours").with_quality(0.4), store::now());
        let b = TmEntry::create(NewTmEntry::new("run", "fr", "Courez").with_quality(0.8), store::now());
        let other = TmEntry::create(NewTmEntry::new("Walk", "fr", "Marche"), store::now());
        for e in [&a, &b, &other] {
            s.insert(e).unwrap();
        }
        s.update_by_id(&a.id, &EntryPatch { usage_count: Some(3), ..Default::default() })
            .unwrap();
        s.update_by_id(&b.id, &EntryPatch { usage_count: Some(2), ..Default::default() })
            .unwrap();

        assert_eq!(compact_duplicates(&s).unwrap(), 1);

        let rows = all(&s);
        assert_eq!(rows.len(), 2);
        let kept = s.get_by_id(&b.id).unwrap().unwrap();
        assert_eq!(kept.usage_count, 5);
        assert!(s.get_by_id(&a.id).unwrap().is_none());
        assert_eq!(compact_duplicates(&s).unwrap(), 0);
    }

    #[test]
    fn out_of_range_quality_rejects_whole_batch() {
        let s = store();
        for bad in [5.0, -3.0, f64::NAN, f64::INFINITY] {
            let err = upsert_batch(
                &s,
                vec![
                    NewTmEntry::new("Fine", "fr", "Bien").with_quality(0.5),
                    NewTmEntry::new("Odd", "fr", "Bizarre").with_quality(bad),
                ],
            )
            .unwrap_err();
            assert!(matches!(err, TmError::InvalidInput(_)), "{bad}: {err}");
        }
        assert!(all(&s).is_empty());

        upsert_batch(&s, vec![NewTmEntry::new("Edge", "fr", "Bord").with_quality(1.0)]).unwrap();
        assert_eq!(all(&s)[0].quality_score, Some(1.0));
    }

    #[test]
    fn case_sensitive_store_keys_on_exact_case() {
        let settings = TmSettings {
            case_sensitive: true,
            ..TmSettings::default()
        };
        let s = EntryStore::in_memory(&settings).unwrap();

        upsert_batch(&s, vec![NewTmEntry::new("Hello", "fr", "Bonjour")]).unwrap();
        let report = upsert_batch(&s, vec![NewTmEntry::new("HELLO", "fr", "BONJOUR")]).unwrap();

        assert_eq!((report.inserted, report.updated), (1, 0));
        assert_eq!(all(&s).len(), 2);
        assert_eq!(all(&s)[0].source_hash.len(), 64);
        assert!(s
            .find_by_hash_and_language(&hash::source_hash("Hello", true), "fr")
            .unwrap()
            .is_some());
    }

    #[test]
    fn large_batches_merge_at_high_parameter_limits() {
        for max_query_params in [900, 2100, 32766] {
            let settings = TmSettings {
                max_query_params,
                ..TmSettings::default()
            };
            let s = EntryStore::in_memory(&settings).unwrap();
            let batch: Vec<NewTmEntry> = (0..3000)
                .map(|i| NewTmEntry::new(format!("line {i}"), "fr", format!("ligne {i}")))
                .collect();

            let first = upsert_batch(&s, batch.clone()).unwrap();
            assert_eq!(first.inserted, 3000, "max_query_params = {max_query_params}");

            let again = upsert_batch(&s, batch).unwrap();
            assert_eq!(
                (again.inserted, again.updated),
                (0, 3000),
                "max_query_params = {max_query_params}"
            );
        }
    }
}
