use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A stored translation.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct TmEntry {
    pub id: String,

    pub source_text: String,
    pub source_hash: String,
    pub target_language_id: String,

    pub translated_text: String,

    #[serde(default)]
    pub quality_score: Option<f64>,

    #[serde(default)]
    pub usage_count: u64,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_used_at: DateTime<Utc>,
}

/// Soft identity of an entry: rows sharing a key are treated as the same translation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntryKey {
    pub source_hash: String,
    pub target_language_id: String,
}

/// A translation proposed for storage. `source_hash` may be left empty and is
/// derived from `source_text` on write.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct NewTmEntry {
    pub source_text: String,

    #[serde(default)]
    pub source_hash: String,

    pub target_language_id: String,
    pub translated_text: String,

    #[serde(default)]
    pub quality_score: Option<f64>,
}

/// An entry paired with its similarity to a fuzzy query.
#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct MatchCandidate {
    pub entry: TmEntry,
    pub similarity: f64,
}

/// Partial update applied by `EntryStore::update_by_id`. Identity fields are not patchable.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
#[serde(default)]
pub struct EntryPatch {
    pub source_text: Option<String>,
    pub translated_text: Option<String>,
    pub quality_score: Option<f64>,
    pub usage_count: Option<u64>,
    pub last_used_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub struct LanguageCount {
    pub target_language_id: String,
    pub entries: u64,
}

#[derive(Debug, Serialize, Clone, Default, PartialEq, Eq)]
pub struct TmStats {
    pub total_entries: u64,
    pub total_usage: u64,
    pub languages: Vec<LanguageCount>,
}

/// Quality scores live in `[0.0, 1.0]`; NaN and infinities are rejected.
pub fn is_valid_quality(q: f64) -> bool {
    (0.0..=1.0).contains(&q)
}

impl TmEntry {
    /// Materializes a new row with a fresh id and all timestamps set to `now`.
    pub fn create(new: NewTmEntry, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            source_text: new.source_text,
            source_hash: new.source_hash,
            target_language_id: new.target_language_id,
            translated_text: new.translated_text,
            quality_score: new.quality_score,
            usage_count: 0,
            created_at: now,
            updated_at: now,
            last_used_at: now,
        }
    }

    /// Quality with absence treated as zero.
    pub fn quality(&self) -> f64 {
        self.quality_score.unwrap_or(0.0)
    }

    pub fn key(&self) -> EntryKey {
        EntryKey::new(&self.source_hash, &self.target_language_id)
    }

    /// Best-first ordering among rows sharing a key: quality desc, then usage desc.
    pub fn rank_cmp(&self, other: &TmEntry) -> Ordering {
        other
            .quality()
            .total_cmp(&self.quality())
            .then_with(|| other.usage_count.cmp(&self.usage_count))
    }
}

impl EntryKey {
    pub fn new(source_hash: &str, target_language_id: &str) -> Self {
        Self {
            source_hash: source_hash.to_string(),
            target_language_id: target_language_id.to_string(),
        }
    }
}

impl std::fmt::Display for EntryKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.target_language_id, self.source_hash)
    }
}

impl NewTmEntry {
    /// Builds an entry with a blank hash; the store derives it on write using
    /// its own case handling.
    pub fn new(
        source_text: impl Into<String>,
        target_language_id: impl Into<String>,
        translated_text: impl Into<String>,
    ) -> Self {
        Self {
            source_text: source_text.into(),
            source_hash: String::new(),
            target_language_id: target_language_id.into(),
            translated_text: translated_text.into(),
            quality_score: None,
        }
    }

    pub fn with_quality(mut self, quality: f64) -> Self {
        self.quality_score = Some(quality);
        self
    }

    pub fn with_hash(mut self, source_hash: impl Into<String>) -> Self {
        self.source_hash = source_hash.into();
        self
    }

    pub fn key(&self) -> EntryKey {
        EntryKey::new(&self.source_hash, &self.target_language_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(quality: Option<f64>, usage: u64) -> TmEntry {
        let mut e = TmEntry::create(NewTmEntry::new("a", "fr", "b"), Utc::now());
        e.quality_score = quality;
        e.usage_count = usage;
        e
    }

    #[test]
    fn rank_prefers_quality_then_usage() {
        let mut rows = vec![
            entry(Some(0.3), 50),
            entry(None, 99),
            entry(Some(0.9), 1),
            entry(Some(0.9), 4),
        ];
        rows.sort_by(|a, b| a.rank_cmp(b));

        assert_eq!(rows[0].usage_count, 4);
        assert_eq!(rows[1].usage_count, 1);
        assert_eq!(rows[2].quality_score, Some(0.3));
        assert_eq!(rows[3].quality_score, None);
    }

    #[test]
    fn new_entry_leaves_hash_to_the_store() {
        let e = NewTmEntry::new("Open the Gate", "fr", "x");
        assert!(e.source_hash.is_empty());

        let keyed = e.with_hash("h1");
        assert_eq!(keyed.key(), EntryKey::new("h1", "fr"));
    }
}
