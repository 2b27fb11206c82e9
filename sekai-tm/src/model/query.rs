use serde::{Deserialize, Serialize};

/// Row filter for `EntryStore::query` and `EntryStore::count`. Unset fields match everything.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
#[serde(default)]
pub struct EntryFilter {
    pub target_language_id: Option<String>,
    pub min_quality: Option<f64>,
    pub max_quality: Option<f64>,

    /// Substring of either the source or the translated text.
    pub text: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(default)]
pub struct Pagination {
    pub offset: usize,
    pub limit: usize,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            offset: 0,
            limit: 100,
        }
    }
}

impl Pagination {
    pub fn new(offset: usize, limit: usize) -> Self {
        Self { offset, limit }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum OrderBy {
    CreatedAt,
    #[default]
    UpdatedAt,
    LastUsedAt,
    Quality,
    Usage,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Asc,
    #[default]
    Desc,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(default)]
pub struct Ordering {
    pub by: OrderBy,
    pub direction: Direction,
}

impl Ordering {
    pub fn new(by: OrderBy, direction: Direction) -> Self {
        Self { by, direction }
    }

    pub(crate) fn sql(&self) -> String {
        let column = match self.by {
            OrderBy::CreatedAt => "created_at",
            OrderBy::UpdatedAt => "updated_at",
            OrderBy::LastUsedAt => "last_used_at",
            OrderBy::Quality => "COALESCE(quality_score, 0)",
            OrderBy::Usage => "usage_count",
        };
        let dir = match self.direction {
            Direction::Asc => "ASC",
            Direction::Desc => "DESC",
        };
        format!("{column} {dir}, id ASC")
    }
}
