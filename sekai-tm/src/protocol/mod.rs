//! JSON-lines request handling: one `{id, cmd, payload}` object in, one
//! `{id, status, payload | message}` object out.

use std::path::PathBuf;

use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::TmResult;
use crate::model::entry::NewTmEntry;
use crate::model::query::{EntryFilter, Ordering, Pagination};
use crate::services::translation_memory::{hash, legacy, TranslationMemory};

mod command;
pub use command::Command;

fn get_cmd(req: &Value) -> &str {
    req.get("cmd").and_then(|v| v.as_str()).unwrap_or("")
}

fn get_id(req: &Value) -> Value {
    req.get("id").cloned().unwrap_or(Value::Null)
}

fn get_payload(req: &Value) -> &Value {
    static EMPTY: Value = Value::Null;
    req.get("payload").unwrap_or(&EMPTY)
}

fn get_str<'a>(payload: &'a Value, field: &str) -> &'a str {
    payload.get(field).and_then(|v| v.as_str()).unwrap_or("")
}

fn require_str<'a>(payload: &'a Value, field: &str) -> Result<&'a str, String> {
    let v = get_str(payload, field);
    if v.is_empty() {
        Err(format!("payload.{field} is required"))
    } else {
        Ok(v)
    }
}

fn ok(id: Value, payload: Value) -> String {
    json!({
        "id": id,
        "status": "ok",
        "payload": payload
    })
    .to_string()
}

fn err(id: Value, message: impl Into<String>) -> String {
    json!({
        "id": id,
        "status": "error",
        "message": message.into()
    })
    .to_string()
}

fn respond<T: serde::Serialize>(id: Value, res: TmResult<T>, wrap: impl FnOnce(Value) -> Value) -> String {
    match res.and_then(|v| Ok(serde_json::to_value(v)?)) {
        Ok(v) => ok(id, wrap(v)),
        Err(e) => err(id, e.to_string()),
    }
}

#[derive(Debug, Deserialize)]
struct MatchRequest {
    text: String,
    target_language_id: String,
    #[serde(default)]
    min_confidence: Option<f64>,
    #[serde(default)]
    max_candidates: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct RetentionRequest {
    max_quality: f64,
    #[serde(default)]
    unused_days: i64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct QueryRequest {
    filter: EntryFilter,
    page: Pagination,
    ordering: Ordering,
}

fn parse<T: for<'de> Deserialize<'de>>(payload: &Value, what: &str) -> Result<T, String> {
    serde_json::from_value(payload.clone()).map_err(|e| format!("invalid {what}: {e}"))
}

fn parse_entries_from_payload(payload: &Value) -> Result<Vec<NewTmEntry>, String> {
    let arr = payload
        .get("entries")
        .and_then(|v| v.as_array())
        .ok_or_else(|| "payload.entries must be an array".to_string())?;

    let mut entries: Vec<NewTmEntry> = Vec::with_capacity(arr.len());

    for (i, v) in arr.iter().cloned().enumerate() {
        match serde_json::from_value::<NewTmEntry>(v) {
            Ok(e) => entries.push(e),
            Err(e) => return Err(format!("invalid entry at index {}: {}", i, e)),
        }
    }

    Ok(entries)
}

pub fn handle(tm: &TranslationMemory, input: &str) -> String {
    let req: Value = match serde_json::from_str(input) {
        Ok(v) => v,
        Err(_) => {
            return json!({
                "status": "error",
                "message": "invalid json"
            })
            .to_string();
        }
    };

    let id = get_id(&req);
    let payload = get_payload(&req);

    match Command::from(get_cmd(&req)) {
        Command::Ping => ok(id, json!({ "message": "sekai-tm alive" })),

        Command::Hash => {
            let h = hash::source_hash(get_str(payload, "text"), tm.settings().case_sensitive);
            ok(id, json!({ "hash": h }))
        }

        Command::Exact => {
            let lang = match require_str(payload, "target_language_id") {
                Ok(v) => v,
                Err(e) => return err(id, e),
            };
            let res = match (get_str(payload, "source_hash"), get_str(payload, "text")) {
                ("", "") => return err(id, "payload.source_hash or payload.text is required"),
                ("", text) => tm.find_exact_text(text, lang),
                (h, _) => tm.find_exact_match(h, lang),
            };
            respond(id, res, |entry| json!({ "entry": entry }))
        }

        Command::Match => {
            let req: MatchRequest = match parse(payload, "match request") {
                Ok(v) => v,
                Err(e) => return err(id, e),
            };
            let defaults = tm.default_match_options();
            let res = tm.find_matches(
                &req.text,
                &req.target_language_id,
                req.min_confidence.unwrap_or(defaults.min_confidence),
                req.max_candidates.unwrap_or(defaults.max_candidates),
            );
            respond(id, res, |matches| json!({ "matches": matches }))
        }

        Command::Suggest => {
            let text = get_str(payload, "text");
            let lang = match require_str(payload, "target_language_id") {
                Ok(v) => v,
                Err(e) => return err(id, e),
            };
            let suggestion = tm.suggest(text, lang);
            ok(id, json!({ "suggestion": suggestion }))
        }

        Command::Upsert => {
            let entries = match parse_entries_from_payload(payload) {
                Ok(v) => v,
                Err(e) => return err(id, e),
            };
            respond(id, tm.merge_batch(entries), |report| json!({ "report": report }))
        }

        Command::CleanupPreview => {
            let req: RetentionRequest = match parse(payload, "retention request") {
                Ok(v) => v,
                Err(e) => return err(id, e),
            };
            let res = tm.count_cleanup_candidates(req.max_quality, req.unused_days);
            respond(id, res, |preview| json!({ "preview": preview }))
        }

        Command::Cleanup => {
            let req: RetentionRequest = match parse(payload, "retention request") {
                Ok(v) => v,
                Err(e) => return err(id, e),
            };
            let res = tm.delete_by_quality_and_age(req.max_quality, req.unused_days);
            respond(id, res, |deleted| json!({ "deleted": deleted }))
        }

        Command::DeleteLanguage => {
            let lang = match require_str(payload, "target_language_id") {
                Ok(v) => v,
                Err(e) => return err(id, e),
            };
            respond(id, tm.delete_by_language(lang), |deleted| json!({ "deleted": deleted }))
        }

        Command::Delete => {
            let entry_id = match require_str(payload, "id") {
                Ok(v) => v,
                Err(e) => return err(id, e),
            };
            respond(id, tm.delete_by_id(entry_id), |deleted| json!({ "deleted": deleted }))
        }

        Command::Get => {
            let entry_id = match require_str(payload, "id") {
                Ok(v) => v,
                Err(e) => return err(id, e),
            };
            respond(id, tm.get(entry_id), |entry| json!({ "entry": entry }))
        }

        Command::Query => {
            let req: QueryRequest = if payload.is_null() {
                QueryRequest::default()
            } else {
                match parse(payload, "query request") {
                    Ok(v) => v,
                    Err(e) => return err(id, e),
                }
            };
            let total = match tm.count(&req.filter) {
                Ok(n) => n,
                Err(e) => return err(id, e.to_string()),
            };
            respond(id, tm.query(&req.filter, req.page, req.ordering), |entries| {
                json!({ "entries": entries, "total": total })
            })
        }

        Command::Stats => respond(id, tm.stats(), |stats| {
            json!({ "stats": stats, "cache": tm.cache_stats() })
        }),

        Command::RebuildIndex => respond(id, tm.rebuild_index(), |indexed| json!({ "indexed": indexed })),

        Command::Compact => respond(id, tm.compact_duplicates(), |removed| json!({ "removed": removed })),

        Command::ImportLegacy => {
            let path = match get_str(payload, "path") {
                "" => PathBuf::from(legacy::LEGACY_FILE),
                p => PathBuf::from(p),
            };
            respond(id, tm.import_legacy(&path), |imported| json!({ "imported": imported }))
        }

        Command::ExportLegacy => {
            let path = match require_str(payload, "path") {
                Ok(v) => PathBuf::from(v),
                Err(e) => return err(id, e),
            };
            let source_lang = get_str(payload, "source_lang");
            let lang = Some(get_str(payload, "target_language_id")).filter(|l| !l.is_empty());
            respond(id, tm.export_legacy(&path, source_lang, lang), |exported| {
                json!({ "exported": exported })
            })
        }

        Command::Unknown => err(id, "unknown command"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::TmSettings;

    fn call(tm: &TranslationMemory, req: Value) -> Value {
        serde_json::from_str(&handle(tm, &req.to_string())).unwrap()
    }

    fn engine() -> TranslationMemory {
        TranslationMemory::in_memory(TmSettings::default()).unwrap()
    }

    #[test]
    fn invalid_json_and_unknown_command() {
        let tm = engine();
        let bad: Value = serde_json::from_str(&handle(&tm, "{nope")).unwrap();
        assert_eq!(bad["status"], "error");

        let res = call(&tm, json!({ "id": 7, "cmd": "tm.fly" }));
        assert_eq!(res["id"], 7);
        assert_eq!(res["message"], "unknown command");
    }

    #[test]
    fn upsert_then_exact_and_match() {
        let tm = engine();
        let res = call(
            &tm,
            json!({
                "id": 1,
                "cmd": "tm.upsert",
                "payload": { "entries": [
                    { "source_text": "Open the gate", "target_language_id": "fr",
                      "translated_text": "Ouvrez la porte", "quality_score": 0.9 }
                ]}
            }),
        );
        assert_eq!(res["status"], "ok");
        assert_eq!(res["payload"]["report"]["inserted"], 1);

        let hashed = call(
            &tm,
            json!({ "id": 9, "cmd": "tm.hash", "payload": { "text": "open the  GATE" } }),
        );
        let hash = hashed["payload"]["hash"].clone();
        let exact = call(
            &tm,
            json!({ "id": 2, "cmd": "tm.exact",
                    "payload": { "source_hash": hash, "target_language_id": "fr" } }),
        );
        assert_eq!(exact["payload"]["entry"]["translated_text"], "Ouvrez la porte");

        let fuzzy = call(
            &tm,
            json!({ "id": 3, "cmd": "tm.match",
                    "payload": { "text": "Open the gates", "target_language_id": "fr" } }),
        );
        assert_eq!(fuzzy["payload"]["matches"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn missing_fields_are_reported() {
        let tm = engine();
        let res = call(&tm, json!({ "id": 1, "cmd": "tm.exact", "payload": { "text": "x" } }));
        assert_eq!(res["message"], "payload.target_language_id is required");

        let res = call(&tm, json!({ "id": 2, "cmd": "tm.upsert", "payload": {} }));
        assert_eq!(res["message"], "payload.entries must be an array");
    }

    #[test]
    fn cleanup_preview_and_stats() {
        let tm = engine();
        tm.upsert(NewTmEntry::new("Hello", "de", "Hallo").with_quality(0.1)).unwrap();

        let preview = call(
            &tm,
            json!({ "id": 1, "cmd": "tm.cleanup.preview",
                    "payload": { "max_quality": 0.5, "unused_days": 0 } }),
        );
        assert_eq!(preview["payload"]["preview"]["will_be_deleted"], 1);
        assert_eq!(preview["payload"]["preview"]["age_filter_disabled"], true);

        let stats = call(&tm, json!({ "id": 2, "cmd": "tm.stats" }));
        assert_eq!(stats["payload"]["stats"]["total_entries"], 1);

        let query = call(&tm, json!({ "id": 3, "cmd": "tm.query" }));
        assert_eq!(query["payload"]["total"], 1);
    }
}
