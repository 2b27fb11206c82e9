pub mod cache;
pub mod db;
pub mod engine;
pub mod hash;
pub mod index;
pub mod legacy;
pub mod matcher;
pub mod merge;
pub mod normalize;
pub mod retention;
pub mod similarity;
pub mod store;

pub use engine::{Suggestion, TranslationMemory};
pub use index::RelevanceIndex;
pub use matcher::{MatchOptions, MAX_RESULTS};
pub use merge::MergeReport;
pub use retention::{CleanupPreview, RetentionPolicy};
pub use store::EntryStore;
