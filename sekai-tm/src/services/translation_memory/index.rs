use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;
use rusqlite::{params, params_from_iter, types::Value, Connection, OptionalExtension};

use super::normalize;
use crate::error::{StorageContext, TmError, TmResult};
use crate::model::entry::TmEntry;
use crate::settings::TmSettings;

fn word_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[\p{L}\p{N}_]+").expect("static token pattern"))
}

/// FTS5-backed inverted index over entry source text, ranked with BM25.
///
/// Stateless apart from its query-shaping limits: every call takes the
/// connection (or open transaction) of the operation it belongs to, so index
/// writes commit or roll back together with the row they describe.
#[derive(Debug, Clone)]
pub struct RelevanceIndex {
    min_token_len: usize,
    max_query_tokens: usize,
}

impl Default for RelevanceIndex {
    fn default() -> Self {
        Self::new(3, 5)
    }
}

impl RelevanceIndex {
    pub fn new(min_token_len: usize, max_query_tokens: usize) -> Self {
        Self {
            min_token_len,
            max_query_tokens: max_query_tokens.max(1),
        }
    }

    pub fn from_settings(settings: &TmSettings) -> Self {
        Self::new(settings.min_token_len, settings.max_query_tokens)
    }

    /// Adds or replaces the index row for a stored entry.
    pub fn index_entry(&self, conn: &Connection, entry: &TmEntry) -> TmResult<()> {
        let rowid: Option<i64> = conn
            .query_row(
                "SELECT rowid FROM tm_entries WHERE id = ?1",
                params![entry.id],
                |row| row.get(0),
            )
            .optional()
            .storage("index_entry", &entry.id)?;

        let Some(rowid) = rowid else {
            return Err(TmError::InvalidInput(format!(
                "cannot index entry {} before it is stored",
                entry.id
            )));
        };

        conn.execute("DELETE FROM tm_fts WHERE rowid = ?1", params![rowid])
            .storage("index_entry", &entry.id)?;
        conn.execute(
            "INSERT INTO tm_fts(rowid, source_text) VALUES (?1, ?2)",
            params![rowid, entry.source_text],
        )
        .storage("index_entry", &entry.id)?;

        Ok(())
    }

    /// Must run before the entry row itself is deleted.
    pub fn remove_entry(&self, conn: &Connection, entry_id: &str) -> TmResult<()> {
        conn.execute(
            "DELETE FROM tm_fts WHERE rowid IN (SELECT rowid FROM tm_entries WHERE id = ?1)",
            params![entry_id],
        )
        .storage("remove_entry", entry_id)?;
        Ok(())
    }

    /// Removes index rows for every entry matching `where_clause` on `tm_entries`.
    /// `key` names the selection in errors.
    pub(crate) fn remove_matching(
        &self,
        conn: &Connection,
        where_clause: &str,
        values: &[Value],
        key: &str,
    ) -> TmResult<usize> {
        let sql = format!(
            "DELETE FROM tm_fts WHERE rowid IN (SELECT rowid FROM tm_entries WHERE {where_clause})"
        );
        conn.execute(&sql, params_from_iter(values.iter()))
            .storage("remove_matching", key)
    }

    /// Repopulates the whole index from `tm_entries`.
    pub fn rebuild(&self, conn: &Connection) -> TmResult<usize> {
        conn.execute("DELETE FROM tm_fts", [])
            .storage("rebuild_index", "tm_fts")?;
        conn.execute(
            "INSERT INTO tm_fts(rowid, source_text) SELECT rowid, source_text FROM tm_entries",
            [],
        )
        .storage("rebuild_index", "tm_fts")
    }

    /// Query tokens that survive the length filter, deduplicated, in order, capped.
    pub fn significant_tokens(&self, text: &str) -> Vec<String> {
        let norm = normalize::normalize(text);
        let mut seen = HashSet::new();

        word_re()
            .find_iter(&norm)
            .map(|m| m.as_str())
            .filter(|t| t.chars().count() >= self.min_token_len)
            .filter(|t| seen.insert(*t))
            .take(self.max_query_tokens)
            .map(str::to_string)
            .collect()
    }

    /// FTS5 MATCH expression: quoted significant tokens joined with OR. Falls
    /// back to the raw text as a single phrase when no token is long enough.
    pub fn match_expression(&self, text: &str) -> Option<String> {
        let mut tokens = self.significant_tokens(text);

        if tokens.is_empty() {
            let raw = text.trim();
            if raw.is_empty() {
                return None;
            }
            tokens.push(raw.to_string());
        }

        Some(
            tokens
                .iter()
                .map(|t| format!("\"{}\"", t.replace('"', "\"\"")))
                .collect::<Vec<_>>()
                .join(" OR "),
        )
    }

    /// Entry ids in `language_id` ordered by descending BM25 relevance.
    pub fn search_candidates(
        &self,
        conn: &Connection,
        query_text: &str,
        language_id: &str,
        max_candidates: usize,
    ) -> TmResult<Vec<String>> {
        let Some(expr) = self.match_expression(query_text) else {
            return Ok(Vec::new());
        };
        if max_candidates == 0 {
            return Ok(Vec::new());
        }

        let mut stmt = conn
            .prepare_cached(
                "SELECT e.id
                 FROM tm_fts
                 JOIN tm_entries e ON e.rowid = tm_fts.rowid
                 WHERE tm_fts MATCH ?1 AND e.target_language_id = ?2
                 ORDER BY bm25(tm_fts)
                 LIMIT ?3",
            )
            .storage("search_candidates", language_id)?;

        let limit = i64::try_from(max_candidates).unwrap_or(i64::MAX);
        let rows = stmt
            .query_map(params![expr, language_id, limit], |row| row.get::<_, String>(0))
            .storage("search_candidates", language_id)?;

        let mut ids = Vec::new();
        for row in rows {
            ids.push(row.storage("search_candidates", language_id)?);
        }
        Ok(ids)
    }
}
