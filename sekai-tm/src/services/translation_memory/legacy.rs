//! The JSON translation memory file used before the SQLite store:
//! a pretty-printed array in `translation_memory.json`.

use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use super::{hash, normalize};
use crate::error::{TmError, TmResult};
use crate::model::entry::{NewTmEntry, TmEntry};

pub const LEGACY_FILE: &str = "translation_memory.json";

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct LegacyEntry {
    pub source_lang: String,
    pub target_lang: String,

    pub original: String,
    pub translation: String,

    #[serde(default)]
    pub normalized: String,

    #[serde(default)]
    pub hash: String,
}

/// Reads and cleans a legacy file. A missing file is an empty memory.
pub fn load(path: &Path) -> TmResult<Vec<LegacyEntry>> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let data = fs::read_to_string(path).map_err(|e| TmError::io(path, e))?;
    let mut entries: Vec<LegacyEntry> = serde_json::from_str(&data)?;

    let mut migrated = 0usize;
    for e in entries.iter_mut() {
        if ensure_norm_hash(e) {
            migrated += 1;
        }
    }

    let (mut deduped, removed) = dedup(entries);
    sort_entries(&mut deduped);

    tracing::debug!(
        path = %path.display(),
        entries = deduped.len(),
        migrated,
        removed,
        "legacy memory loaded"
    );
    Ok(deduped)
}

/// Writes `entries` deduplicated and sorted; returns how many were written.
pub fn save(path: &Path, entries: &[LegacyEntry]) -> TmResult<usize> {
    let mut v: Vec<LegacyEntry> = entries.to_vec();

    for e in v.iter_mut() {
        ensure_norm_hash(e);
    }

    let (mut v, _removed) = dedup(v);
    sort_entries(&mut v);

    let json = serde_json::to_string_pretty(&v)?;

    write_atomic(path, json.as_bytes())?;
    Ok(v.len())
}

/// Rows with an empty translation are not worth merging. The hash is left
/// empty so the merge derives it with the store's own case handling.
pub fn into_new_entries(entries: Vec<LegacyEntry>) -> Vec<NewTmEntry> {
    entries
        .into_iter()
        .filter(|e| !e.translation.trim().is_empty())
        .map(|e| NewTmEntry {
            source_text: e.original,
            source_hash: String::new(),
            target_language_id: e.target_lang,
            translated_text: e.translation,
            quality_score: None,
        })
        .collect()
}

pub fn from_tm_entries(entries: &[TmEntry], source_lang: &str) -> Vec<LegacyEntry> {
    entries
        .iter()
        .map(|e| {
            let normalized = normalize::normalize(&e.source_text);
            LegacyEntry {
                source_lang: source_lang.to_string(),
                target_lang: e.target_language_id.clone(),
                original: e.source_text.clone(),
                translation: e.translated_text.clone(),
                hash: hash::hash_norm(&normalized),
                normalized,
            }
        })
        .collect()
}

/// Recomputes the normalized form and hash with the current normalizer.
/// Returns true if either changed.
fn ensure_norm_hash(e: &mut LegacyEntry) -> bool {
    let norm = normalize::normalize(&e.original);
    let h = hash::hash_norm(&norm);

    let changed = e.normalized != norm || e.hash != h;
    e.normalized = norm;
    e.hash = h;
    changed
}

fn dedup(entries: Vec<LegacyEntry>) -> (Vec<LegacyEntry>, usize) {
    let mut map: HashMap<(String, String, String), LegacyEntry> = HashMap::new();
    let mut removed = 0usize;

    for e in entries {
        let key = (e.source_lang.clone(), e.target_lang.clone(), e.hash.clone());

        match map.get_mut(&key) {
            None => {
                map.insert(key, e);
            }
            Some(existing) => {
                if pick_better(existing, &e) {
                    *existing = e;
                }
                removed += 1;
            }
        }
    }

    (map.into_values().collect(), removed)
}

/// Non-empty beats empty; otherwise the longer translation wins.
fn pick_better(current: &LegacyEntry, candidate: &LegacyEntry) -> bool {
    let cur_empty = current.translation.trim().is_empty();
    let cand_empty = candidate.translation.trim().is_empty();

    if cur_empty && !cand_empty {
        return true;
    }
    if !cur_empty && cand_empty {
        return false;
    }

    candidate.translation.len() > current.translation.len()
}

fn sort_entries(entries: &mut [LegacyEntry]) {
    entries.sort_by(|a, b| {
        (
            a.source_lang.as_str(),
            a.target_lang.as_str(),
            a.hash.as_str(),
            a.original.as_str(),
            a.translation.as_str(),
        )
            .cmp(&(
                b.source_lang.as_str(),
                b.target_lang.as_str(),
                b.hash.as_str(),
                b.original.as_str(),
                b.translation.as_str(),
            ))
    });
}

fn write_atomic(path: &Path, bytes: &[u8]) -> TmResult<()> {
    let tmp = tmp_path(path);

    if let Some(parent) = tmp.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| TmError::io(parent, e))?;
    }

    fs::write(&tmp, bytes).map_err(|e| TmError::io(&tmp, e))?;

    // rename fails on Windows when the target exists
    if path.exists() {
        fs::remove_file(path).map_err(|e| TmError::io(path, e))?;
    }

    fs::rename(&tmp, path).map_err(|e| TmError::io(path, e))?;

    Ok(())
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut p = path.to_path_buf();
    let file_name = match path.file_name().and_then(|s| s.to_str()) {
        Some(n) => n.to_string(),
        None => "tm".to_string(),
    };
    p.set_file_name(format!("{file_name}.tmp"));
    p
}
