use std::fs;

use sekai_tm::services::translation_memory::legacy::{self, LegacyEntry};
use sekai_tm::{TmSettings, TranslationMemory};
use serde_json::json;
use tempfile::TempDir;

#[test]
fn imports_legacy_file_and_exports_it_back() {
    let dir = TempDir::new().unwrap();
    let src = dir.path().join(legacy::LEGACY_FILE);
    let raw = json!([
        { "source_lang": "ja", "target_lang": "pt-BR", "original": "こんにちは",
          "translation": "Olá", "normalized": "", "hash": "" },
        { "source_lang": "ja", "target_lang": "pt-BR", "original": "さようなら",
          "translation": "Tchau", "normalized": "さようなら", "hash": "outdated" },
        { "source_lang": "ja", "target_lang": "en", "original": "はい",
          "translation": "", "normalized": "", "hash": "" }
    ]);
    fs::write(&src, serde_json::to_string_pretty(&raw).unwrap()).unwrap();

    let tm = TranslationMemory::in_memory(TmSettings::default()).unwrap();
    assert_eq!(tm.import_legacy(&src).unwrap(), 2);
    assert_eq!(
        tm.find_exact_text("こんにちは", "pt-BR").unwrap().unwrap().translated_text,
        "Olá"
    );

    // importing the same file again merges instead of duplicating
    assert_eq!(tm.import_legacy(&src).unwrap(), 2);
    assert_eq!(tm.stats().unwrap().total_entries, 2);

    let out = dir.path().join("export").join("tm.json");
    assert_eq!(tm.export_legacy(&out, "ja", Some("pt-BR")).unwrap(), 2);

    let back: Vec<LegacyEntry> = serde_json::from_str(&fs::read_to_string(&out).unwrap()).unwrap();
    assert_eq!(back.len(), 2);
    assert!(back.iter().all(|e| e.source_lang == "ja" && e.target_lang == "pt-BR"));
}

#[test]
fn missing_legacy_file_imports_nothing() {
    let dir = TempDir::new().unwrap();
    let tm = TranslationMemory::in_memory(TmSettings::default()).unwrap();
    assert_eq!(tm.import_legacy(&dir.path().join("absent.json")).unwrap(), 0);
}
