#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Ping,
    Hash,
    Exact,
    Match,
    Suggest,
    Upsert,
    CleanupPreview,
    Cleanup,
    DeleteLanguage,
    Delete,
    Get,
    Query,
    Stats,
    RebuildIndex,
    Compact,
    ImportLegacy,
    ExportLegacy,
    Unknown,
}

impl From<&str> for Command {
    fn from(s: &str) -> Self {
        match s {
            "ping" => Command::Ping,
            "tm.hash" => Command::Hash,
            "tm.exact" => Command::Exact,
            "tm.match" => Command::Match,
            "tm.suggest" => Command::Suggest,
            "tm.upsert" => Command::Upsert,
            "tm.cleanup.preview" => Command::CleanupPreview,
            "tm.cleanup" => Command::Cleanup,
            "tm.delete_language" => Command::DeleteLanguage,
            "tm.delete" => Command::Delete,
            "tm.get" => Command::Get,
            "tm.query" => Command::Query,
            "tm.stats" => Command::Stats,
            "tm.rebuild_index" => Command::RebuildIndex,
            "tm.compact" => Command::Compact,
            "tm.import_legacy" => Command::ImportLegacy,
            "tm.export_legacy" => Command::ExportLegacy,
            _ => Command::Unknown,
        }
    }
}
