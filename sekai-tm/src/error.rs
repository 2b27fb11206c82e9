use std::path::PathBuf;

use rusqlite::ErrorCode;
use thiserror::Error;

/// Errors surfaced by the translation memory engine.
///
/// "Not found" is never an error: lookups return `Ok(None)`.
#[derive(Error, Debug)]
pub enum TmError {
    #[error("storage failure in {op} ({key}): {source}")]
    Storage {
        op: &'static str,
        key: String,
        source: rusqlite::Error,
    },

    #[error("conflicting write in {op} ({key}): {source}")]
    Conflict {
        op: &'static str,
        key: String,
        source: rusqlite::Error,
    },

    #[error("lock poisoned: {0}")]
    Lock(String),

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

pub type TmResult<T> = Result<T, TmError>;

impl TmError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, TmError::Conflict { .. })
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        TmError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Attaches the operation name and key to a raw SQLite failure.
pub trait StorageContext<T> {
    fn storage(self, op: &'static str, key: &str) -> TmResult<T>;
}

impl<T> StorageContext<T> for rusqlite::Result<T> {
    fn storage(self, op: &'static str, key: &str) -> TmResult<T> {
        self.map_err(|source| {
            let key = key.to_string();
            if is_constraint_violation(&source) {
                TmError::Conflict { op, key, source }
            } else {
                TmError::Storage { op, key, source }
            }
        })
    }
}

fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_context_keeps_operation_and_key() {
        let raw: rusqlite::Result<()> = Err(rusqlite::Error::QueryReturnedNoRows);
        let err = raw.storage("get_by_id", "abc").unwrap_err();

        assert!(!err.is_conflict());
        let msg = err.to_string();
        assert!(msg.contains("get_by_id"));
        assert!(msg.contains("abc"));
    }

    #[test]
    fn constraint_violation_becomes_conflict() {
        let failure = rusqlite::ffi::Error {
            code: ErrorCode::ConstraintViolation,
            extended_code: 1555,
        };
        let raw: rusqlite::Result<()> = Err(rusqlite::Error::SqliteFailure(failure, None));

        assert!(raw.storage("insert", "id-1").unwrap_err().is_conflict());
    }
}
