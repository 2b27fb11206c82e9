use std::collections::HashMap;

use chrono::{DateTime, SubsecRound, Utc};
use rusqlite::{params, params_from_iter, types::Value, Connection, OptionalExtension, Row};

use super::db::Database;
use super::hash;
use super::index::RelevanceIndex;
use crate::error::{StorageContext, TmError, TmResult};
use crate::model::entry::{is_valid_quality, EntryKey, EntryPatch, LanguageCount, TmEntry, TmStats};
use crate::model::query::{EntryFilter, Ordering, Pagination};
use crate::settings::TmSettings;

pub(crate) const ENTRY_COLUMNS: &str = "id, source_text, source_hash, target_language_id, \
     translated_text, quality_score, usage_count, created_at, updated_at, last_used_at";

/// Current time at the storage resolution (milliseconds).
pub(crate) fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}

/// Persisted table of entries plus the relevance index that mirrors it.
#[derive(Debug)]
pub struct EntryStore {
    db: Database,
    index: RelevanceIndex,
    max_query_params: usize,
    case_sensitive: bool,
}

impl EntryStore {
    pub fn open(settings: &TmSettings) -> TmResult<Self> {
        let db = Database::open(&settings.database_path, settings.busy_timeout_ms)?;
        Ok(Self::with_database(db, settings))
    }

    pub fn in_memory(settings: &TmSettings) -> TmResult<Self> {
        Ok(Self::with_database(Database::open_in_memory()?, settings))
    }

    pub fn with_database(db: Database, settings: &TmSettings) -> Self {
        Self {
            db,
            index: RelevanceIndex::from_settings(settings),
            max_query_params: settings.max_query_params.max(2),
            case_sensitive: settings.case_sensitive,
        }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn index(&self) -> &RelevanceIndex {
        &self.index
    }

    pub(crate) fn max_query_params(&self) -> usize {
        self.max_query_params
    }

    pub(crate) fn case_sensitive(&self) -> bool {
        self.case_sensitive
    }

    pub fn get_by_id(&self, id: &str) -> TmResult<Option<TmEntry>> {
        self.db.read(|conn| get_in(conn, id))
    }

    /// Raw insert of a fully formed row. Does not deduplicate on the soft key.
    /// A blank `source_hash` is derived with the store's case handling; the
    /// row as stored is returned.
    pub fn insert(&self, entry: &TmEntry) -> TmResult<TmEntry> {
        let mut entry = entry.clone();
        if entry.source_hash.is_empty() {
            entry.source_hash = hash::source_hash(&entry.source_text, self.case_sensitive);
        }

        self.db.write("insert", |tx| {
            insert_row(tx, &entry).storage("insert", &entry.id)?;
            self.index.index_entry(tx, &entry)
        })?;
        Ok(entry)
    }

    /// Applies `patch`; returns the updated row, or `None` if `id` does not exist.
    pub fn update_by_id(&self, id: &str, patch: &EntryPatch) -> TmResult<Option<TmEntry>> {
        if let Some(q) = patch.quality_score.filter(|q| !is_valid_quality(*q)) {
            return Err(TmError::InvalidInput(format!("quality_score {q} outside [0, 1]")));
        }

        self.db.write("update_by_id", |tx| {
            let Some(mut entry) = get_in(tx, id)? else {
                return Ok(None);
            };

            let reindex = match &patch.source_text {
                Some(text) if *text != entry.source_text => {
                    entry.source_text = text.clone();
                    entry.source_hash = hash::source_hash(text, self.case_sensitive);
                    true
                }
                _ => false,
            };
            if let Some(t) = &patch.translated_text {
                entry.translated_text = t.clone();
            }
            if let Some(q) = patch.quality_score {
                entry.quality_score = Some(q);
            }
            if let Some(u) = patch.usage_count {
                entry.usage_count = u;
            }
            if let Some(at) = patch.last_used_at {
                entry.last_used_at = at.trunc_subsecs(3);
            }
            entry.updated_at = now();

            update_row(tx, &entry).storage("update_by_id", id)?;
            if reindex {
                self.index.index_entry(tx, &entry)?;
            }
            Ok(Some(entry))
        })
    }

    /// Returns the deleted row, or `None` if `id` does not exist.
    pub fn delete_by_id(&self, id: &str) -> TmResult<Option<TmEntry>> {
        self.db.write("delete_by_id", |tx| {
            let Some(entry) = get_in(tx, id)? else {
                return Ok(None);
            };
            self.index.remove_entry(tx, id)?;
            tx.execute("DELETE FROM tm_entries WHERE id = ?1", params![id])
                .storage("delete_by_id", id)?;
            Ok(Some(entry))
        })
    }

    pub fn delete_by_language(&self, language_id: &str) -> TmResult<usize> {
        self.db.write("delete_by_language", |tx| {
            let lang = [Value::Text(language_id.to_string())];
            self.index
                .remove_matching(tx, "target_language_id = ?1", &lang, language_id)?;
            tx.execute(
                "DELETE FROM tm_entries WHERE target_language_id = ?1",
                params![language_id],
            )
            .storage("delete_by_language", language_id)
        })
    }

    pub fn query(
        &self,
        filter: &EntryFilter,
        page: Pagination,
        ordering: Ordering,
    ) -> TmResult<Vec<TmEntry>> {
        let (where_clause, mut values) = filter_clause(filter);
        let sql = format!(
            "SELECT {ENTRY_COLUMNS} FROM tm_entries WHERE {where_clause} ORDER BY {} LIMIT ? OFFSET ?",
            ordering.sql()
        );
        values.push(Value::Integer(i64::try_from(page.limit).unwrap_or(i64::MAX)));
        values.push(Value::Integer(i64::try_from(page.offset).unwrap_or(i64::MAX)));

        self.db.read(|conn| collect_entries(conn, "query", "filter", &sql, &values))
    }

    pub fn count(&self, filter: &EntryFilter) -> TmResult<usize> {
        let (where_clause, values) = filter_clause(filter);
        let sql = format!("SELECT COUNT(*) FROM tm_entries WHERE {where_clause}");

        self.db.read(|conn| {
            let n: i64 = conn
                .query_row(&sql, params_from_iter(values.iter()), |row| row.get(0))
                .storage("count", "filter")?;
            Ok(usize::try_from(n).unwrap_or(0))
        })
    }

    /// Exact-match read. Picks the best row for the key and records the use
    /// (usage count + 1, `last_used_at` refreshed) in the same transaction.
    pub fn find_by_hash_and_language(
        &self,
        source_hash: &str,
        language_id: &str,
    ) -> TmResult<Option<TmEntry>> {
        self.db.write("find_by_hash_and_language", |tx| {
            let sql = format!(
                "SELECT {ENTRY_COLUMNS} FROM tm_entries
                 WHERE source_hash = ?1 AND target_language_id = ?2
                 ORDER BY COALESCE(quality_score, 0) DESC, usage_count DESC, created_at ASC
                 LIMIT 1"
            );
            let found = tx
                .query_row(&sql, params![source_hash, language_id], row_to_entry)
                .optional()
                .storage("find_by_hash_and_language", source_hash)?;

            let Some(mut entry) = found else {
                return Ok(None);
            };

            let at = now();
            tx.execute(
                "UPDATE tm_entries SET usage_count = usage_count + 1, last_used_at = ?1 WHERE id = ?2",
                params![at.timestamp_millis(), entry.id],
            )
            .storage("find_by_hash_and_language", &entry.id)?;

            entry.usage_count += 1;
            entry.last_used_at = at;
            Ok(Some(entry))
        })
    }

    /// Rows for the given ids, in no particular order. Missing ids are skipped.
    pub fn fetch_by_ids(&self, ids: &[String]) -> TmResult<Vec<TmEntry>> {
        self.db
            .read(|conn| fetch_by_ids_in(conn, ids, self.max_query_params))
    }

    pub fn search_candidates(
        &self,
        query_text: &str,
        language_id: &str,
        max_candidates: usize,
    ) -> TmResult<Vec<String>> {
        self.db.read(|conn| {
            self.index
                .search_candidates(conn, query_text, language_id, max_candidates)
        })
    }

    pub fn stats(&self) -> TmResult<TmStats> {
        self.db.read(|conn| {
            let (total, usage): (i64, i64) = conn
                .query_row(
                    "SELECT COUNT(*), COALESCE(SUM(usage_count), 0) FROM tm_entries",
                    [],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .storage("stats", "totals")?;

            let mut stmt = conn
                .prepare(
                    "SELECT target_language_id, COUNT(*) FROM tm_entries
                     GROUP BY target_language_id ORDER BY target_language_id",
                )
                .storage("stats", "languages")?;
            let rows = stmt
                .query_map([], |row| {
                    Ok(LanguageCount {
                        target_language_id: row.get(0)?,
                        entries: non_negative(row.get(1)?),
                    })
                })
                .storage("stats", "languages")?;

            let mut languages = Vec::new();
            for row in rows {
                languages.push(row.storage("stats", "languages")?);
            }

            Ok(TmStats {
                total_entries: non_negative(total),
                total_usage: non_negative(usage),
                languages,
            })
        })
    }

    pub fn rebuild_index(&self) -> TmResult<usize> {
        self.db.write("rebuild_index", |tx| self.index.rebuild(tx))
    }
}

fn non_negative(v: i64) -> u64 {
    u64::try_from(v).unwrap_or(0)
}

fn millis(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let ms: i64 = row.get(idx)?;
    DateTime::from_timestamp_millis(ms).ok_or(rusqlite::Error::IntegralValueOutOfRange(idx, ms))
}

pub(crate) fn row_to_entry(row: &Row<'_>) -> rusqlite::Result<TmEntry> {
    Ok(TmEntry {
        id: row.get(0)?,
        source_text: row.get(1)?,
        source_hash: row.get(2)?,
        target_language_id: row.get(3)?,
        translated_text: row.get(4)?,
        quality_score: row.get(5)?,
        usage_count: non_negative(row.get(6)?),
        created_at: millis(row, 7)?,
        updated_at: millis(row, 8)?,
        last_used_at: millis(row, 9)?,
    })
}

pub(crate) fn get_in(conn: &Connection, id: &str) -> TmResult<Option<TmEntry>> {
    let sql = format!("SELECT {ENTRY_COLUMNS} FROM tm_entries WHERE id = ?1");
    conn.query_row(&sql, params![id], row_to_entry)
        .optional()
        .storage("get_by_id", id)
}

pub(crate) fn insert_row(conn: &Connection, e: &TmEntry) -> rusqlite::Result<usize> {
    conn.execute(
        "INSERT INTO tm_entries (id, source_text, source_hash, target_language_id, \
         translated_text, quality_score, usage_count, created_at, updated_at, last_used_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            e.id,
            e.source_text,
            e.source_hash,
            e.target_language_id,
            e.translated_text,
            e.quality_score,
            i64::try_from(e.usage_count).unwrap_or(i64::MAX),
            e.created_at.timestamp_millis(),
            e.updated_at.timestamp_millis(),
            e.last_used_at.timestamp_millis(),
        ],
    )
}

/// Writes every mutable column. `id`, `target_language_id` and `created_at` are left alone.
pub(crate) fn update_row(conn: &Connection, e: &TmEntry) -> rusqlite::Result<usize> {
    conn.execute(
        "UPDATE tm_entries SET source_text = ?1, source_hash = ?2, translated_text = ?3, \
         quality_score = ?4, usage_count = ?5, updated_at = ?6, last_used_at = ?7 \
         WHERE id = ?8",
        params![
            e.source_text,
            e.source_hash,
            e.translated_text,
            e.quality_score,
            i64::try_from(e.usage_count).unwrap_or(i64::MAX),
            e.updated_at.timestamp_millis(),
            e.last_used_at.timestamp_millis(),
            e.id,
        ],
    )
}

pub(crate) fn collect_entries(
    conn: &Connection,
    op: &'static str,
    key: &str,
    sql: &str,
    values: &[Value],
) -> TmResult<Vec<TmEntry>> {
    let mut stmt = conn.prepare(sql).storage(op, key)?;
    let rows = stmt
        .query_map(params_from_iter(values.iter()), row_to_entry)
        .storage(op, key)?;

    let mut out = Vec::new();
    for row in rows {
        out.push(row.storage(op, key)?);
    }
    Ok(out)
}

pub(crate) fn fetch_by_ids_in(
    conn: &Connection,
    ids: &[String],
    max_params: usize,
) -> TmResult<Vec<TmEntry>> {
    let mut out = Vec::with_capacity(ids.len());

    for chunk in ids.chunks(max_params.max(1)) {
        let placeholders = vec!["?"; chunk.len()].join(", ");
        let sql = format!("SELECT {ENTRY_COLUMNS} FROM tm_entries WHERE id IN ({placeholders})");
        let values: Vec<Value> = chunk.iter().cloned().map(Value::Text).collect();
        out.extend(collect_entries(conn, "fetch_by_ids", &chunk[0], &sql, &values)?);
    }

    Ok(out)
}

/// Every row whose soft key is in `keys`, keyed and resolved to the best row
/// per key. Chunked so that no statement binds more than `max_params` values;
/// keys are matched as row values so statement depth stays flat.
pub(crate) fn find_by_keys_in(
    conn: &Connection,
    keys: &[EntryKey],
    max_params: usize,
) -> TmResult<HashMap<EntryKey, TmEntry>> {
    let mut best: HashMap<EntryKey, TmEntry> = HashMap::with_capacity(keys.len());

    for chunk in keys.chunks((max_params / 2).max(1)) {
        let rows = vec!["(?, ?)"; chunk.len()].join(", ");
        let sql = format!(
            "SELECT {ENTRY_COLUMNS} FROM tm_entries \
             WHERE (source_hash, target_language_id) IN (VALUES {rows})"
        );
        let values: Vec<Value> = chunk
            .iter()
            .flat_map(|k| {
                [
                    Value::Text(k.source_hash.clone()),
                    Value::Text(k.target_language_id.clone()),
                ]
            })
            .collect();

        let first = chunk[0].to_string();
        for entry in collect_entries(conn, "find_by_keys", &first, &sql, &values)? {
            match best.get_mut(&entry.key()) {
                Some(current) if entry.rank_cmp(current).is_lt() => *current = entry,
                Some(_) => {}
                None => {
                    best.insert(entry.key(), entry);
                }
            }
        }
    }

    Ok(best)
}

fn filter_clause(filter: &EntryFilter) -> (String, Vec<Value>) {
    let mut clauses: Vec<&str> = Vec::new();
    let mut values: Vec<Value> = Vec::new();

    if let Some(lang) = &filter.target_language_id {
        clauses.push("target_language_id = ?");
        values.push(Value::Text(lang.clone()));
    }
    if let Some(min) = filter.min_quality {
        clauses.push("COALESCE(quality_score, 0) >= ?");
        values.push(Value::Real(min));
    }
    if let Some(max) = filter.max_quality {
        clauses.push("COALESCE(quality_score, 0) <= ?");
        values.push(Value::Real(max));
    }
    if let Some(text) = filter.text.as_deref().filter(|t| !t.is_empty()) {
        clauses.push("(instr(source_text, ?) > 0 OR instr(translated_text, ?) > 0)");
        values.push(Value::Text(text.to_string()));
        values.push(Value::Text(text.to_string()));
    }

    if clauses.is_empty() {
        ("1".to_string(), values)
    } else {
        (clauses.join(" AND "), values)
    }
}
