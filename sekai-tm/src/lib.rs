//! Translation memory engine: exact and fuzzy reuse of prior translations
//! backed by SQLite with an FTS5 relevance index.

pub mod error;
pub mod model;
pub mod protocol;
pub mod services;
pub mod settings;

pub use error::{TmError, TmResult};
pub use model::entry::{MatchCandidate, NewTmEntry, TmEntry};
pub use services::translation_memory::TranslationMemory;
pub use settings::TmSettings;
