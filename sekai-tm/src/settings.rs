use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

const CONFIG_FILE: &str = "sekai-tm";
const ENV_PREFIX: &str = "SEKAI_TM";

/// Runtime settings for the translation memory engine.
///
/// Every field has a default, so a partial file or a handful of
/// `SEKAI_TM_*` environment variables is enough.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TmSettings {
    pub database_path: PathBuf,

    /// Query tokens shorter than this (in chars) are dropped before the index search.
    pub min_token_len: usize,
    pub max_query_tokens: usize,

    /// Upper bound on bound parameters per statement; batched reads are chunked to fit.
    pub max_query_params: usize,

    /// Number of fuzzy-match results kept in memory. Zero disables the cache.
    pub cache_capacity: usize,

    pub case_sensitive: bool,
    pub default_min_confidence: f64,
    pub default_max_candidates: usize,
    pub busy_timeout_ms: u64,
}

impl Default for TmSettings {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("translation_memory.db"),
            min_token_len: 3,
            max_query_tokens: 5,
            max_query_params: 900,
            cache_capacity: 256,
            case_sensitive: false,
            default_min_confidence: 0.7,
            default_max_candidates: 50,
            busy_timeout_ms: 5000,
        }
    }
}

impl TmSettings {
    /// Defaults, then `sekai-tm.{toml,json,...}` in the working directory if present,
    /// then `SEKAI_TM_*` environment variables.
    pub fn load() -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(config::File::with_name(CONFIG_FILE).required(false))
            .add_source(config::Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()?
            .try_deserialize()
    }

    /// Defaults overlaid with a single explicit file.
    pub fn load_from(path: &Path) -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(config::File::from(path))
            .build()?
            .try_deserialize()
    }

    pub fn with_database_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.database_path = path.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn defaults_match_documented_values() {
        let s = TmSettings::default();
        assert_eq!(s.min_token_len, 3);
        assert_eq!(s.max_query_tokens, 5);
        assert_eq!(s.default_max_candidates, 50);
        assert!((s.default_min_confidence - 0.7).abs() < f64::EPSILON);
        assert!(!s.case_sensitive);
    }

    #[test]
    fn partial_file_keeps_remaining_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("tm.toml");
        fs::write(&path, "cache_capacity = 8\ndatabase_path = \"data/tm.db\"\n").unwrap();

        let s = TmSettings::load_from(&path).unwrap();
        assert_eq!(s.cache_capacity, 8);
        assert_eq!(s.database_path, PathBuf::from("data/tm.db"));
        assert_eq!(s.max_query_params, 900);
    }
}
