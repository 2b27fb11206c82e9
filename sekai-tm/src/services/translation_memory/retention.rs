use chrono::{DateTime, Duration, Utc};
use rusqlite::{params_from_iter, types::Value};
use serde::{Deserialize, Serialize};

use super::store::{self, EntryStore};
use crate::error::{StorageContext, TmResult};

/// Deletion rule: quality below `max_quality`, and, when `unused_days > 0`,
/// not used for more than `unused_days` days.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetentionPolicy {
    pub max_quality: f64,
    pub unused_days: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CleanupPreview {
    pub will_be_deleted: usize,
    /// Rows matching the quality rule alone.
    pub low_quality_only: usize,
    /// Rows matching the age rule alone; zero when the age filter is disabled.
    pub unused_only: usize,
    pub age_filter_disabled: bool,
}

impl RetentionPolicy {
    pub fn new(max_quality: f64, unused_days: i64) -> Self {
        Self {
            max_quality,
            unused_days,
        }
    }

    pub fn age_filter_enabled(&self) -> bool {
        self.unused_days > 0
    }

    /// Epoch millis before which an entry counts as unused. Windows too large
    /// to represent leave nothing old enough.
    fn cutoff(&self, now: DateTime<Utc>) -> Option<i64> {
        self.age_filter_enabled().then(|| {
            Duration::try_days(self.unused_days)
                .and_then(|window| now.checked_sub_signed(window))
                .map_or(i64::MIN, |t| t.timestamp_millis())
        })
    }

    /// The eligibility predicate shared by preview and delete, with its bound values.
    fn predicate(&self, now: DateTime<Utc>) -> Predicate {
        let mut values = vec![Value::Real(self.max_quality)];
        let age = match self.cutoff(now) {
            Some(cutoff) => {
                values.push(Value::Integer(cutoff));
                "last_used_at < ?2"
            }
            None => "1",
        };

        Predicate {
            quality: "COALESCE(quality_score, 0) < ?1",
            age,
            values,
        }
    }
}

struct Predicate {
    quality: &'static str,
    age: &'static str,
    values: Vec<Value>,
}

impl Predicate {
    fn eligible(&self) -> String {
        format!("{} AND {}", self.quality, self.age)
    }
}

pub fn count_cleanup_candidates(
    store: &EntryStore,
    policy: RetentionPolicy,
) -> TmResult<CleanupPreview> {
    let p = policy.predicate(store::now());
    let sql = format!(
        "SELECT
             COALESCE(SUM(CASE WHEN {eligible} THEN 1 ELSE 0 END), 0),
             COALESCE(SUM(CASE WHEN {quality} THEN 1 ELSE 0 END), 0),
             COALESCE(SUM(CASE WHEN {age} THEN 1 ELSE 0 END), 0)
         FROM tm_entries",
        eligible = p.eligible(),
        quality = p.quality,
        age = p.age,
    );

    let (will, low, unused): (i64, i64, i64) = store.database().read(|conn| {
        conn.query_row(&sql, params_from_iter(p.values.iter()), |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?))
        })
        .storage("count_cleanup_candidates", "policy")
    })?;

    let enabled = policy.age_filter_enabled();
    Ok(CleanupPreview {
        will_be_deleted: usize::try_from(will).unwrap_or(0),
        low_quality_only: usize::try_from(low).unwrap_or(0),
        unused_only: if enabled { usize::try_from(unused).unwrap_or(0) } else { 0 },
        age_filter_disabled: !enabled,
    })
}

pub fn delete_by_quality_and_age(store: &EntryStore, policy: RetentionPolicy) -> TmResult<usize> {
    let p = policy.predicate(store::now());
    let eligible = p.eligible();

    let deleted = store.database().write("delete_by_quality_and_age", |tx| {
        store.index().remove_matching(tx, &eligible, &p.values, "policy")?;
        tx.execute(
            &format!("DELETE FROM tm_entries WHERE {eligible}"),
            params_from_iter(p.values.iter()),
        )
        .storage("delete_by_quality_and_age", "policy")
    })?;

    tracing::info!(
        deleted,
        max_quality = policy.max_quality,
        unused_days = policy.unused_days,
        "cleanup"
    );
    Ok(deleted)
}
