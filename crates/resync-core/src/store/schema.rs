//! 永続ドキュメントのレイアウトとバージョンアップ
//!
//! ```json
//! { "schema_version": 2, "artifacts": [...], "sync_queue": [...], "dead_letters": [...] }
//! ```
//!
//! アップグレードは保存されたバージョンに足りないものを足すだけで、
//! 既存のレコードは書き換えない。

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::domain::{ArtifactRecord, DeadLetterRecord, QueuedRequestRecord, StoreError};

pub const CURRENT_VERSION: u64 = 2;

const VERSION_KEY: &str = "schema_version";

#[derive(Debug, Default, Serialize, Deserialize)]
pub(crate) struct StoreDocument {
    pub(crate) schema_version: u64,
    pub(crate) artifacts: Vec<ArtifactRecord>,
    pub(crate) sync_queue: Vec<QueuedRequestRecord>,
    pub(crate) dead_letters: Vec<DeadLetterRecord>,
}

/// 読み込んだドキュメントを `CURRENT_VERSION` に上げた結果
#[derive(Debug)]
pub(crate) struct Migrated {
    pub(crate) document: StoreDocument,
    /// 保存先にあったバージョン（新規またはバージョンなしは 0）
    pub(crate) from_version: u64,
    /// 書き戻しが必要なら true
    pub(crate) upgraded: bool,
}

pub(crate) fn migrate(loaded: Option<Value>) -> Result<Migrated, StoreError> {
    let mut map = match loaded {
        None => Map::new(),
        Some(Value::Object(map)) => map,
        Some(other) => {
            return Err(StoreError::Corrupt(format!(
                "expected a JSON object, found {}",
                value_kind(&other)
            )));
        }
    };

    let from_version = match map.get(VERSION_KEY) {
        None => 0,
        Some(value) => value.as_u64().ok_or_else(|| {
            StoreError::Corrupt(format!("schema_version is not an integer: {value}"))
        })?,
    };

    if from_version > CURRENT_VERSION {
        return Err(StoreError::UnsupportedSchema {
            found: from_version,
            supported: CURRENT_VERSION,
        });
    }

    if from_version < 1 {
        map.entry("artifacts").or_insert_with(|| json!([]));
        map.entry("sync_queue").or_insert_with(|| json!([]));
    }
    if from_version < 2 {
        map.entry("dead_letters").or_insert_with(|| json!([]));
    }
    map.insert(VERSION_KEY.to_string(), json!(CURRENT_VERSION));

    let document: StoreDocument = serde_json::from_value(Value::Object(map))
        .map_err(|e| StoreError::Corrupt(e.to_string()))?;

    Ok(Migrated {
        document,
        from_version,
        upgraded: from_version < CURRENT_VERSION,
    })
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn fresh_store_starts_at_current_version() {
        let migrated = migrate(None).unwrap();

        assert_eq!(migrated.from_version, 0);
        assert!(migrated.upgraded);
        assert_eq!(migrated.document.schema_version, CURRENT_VERSION);
        assert!(migrated.document.artifacts.is_empty());
    }

    #[test]
    fn version_one_only_gains_dead_letters() {
        let loaded = json!({
            "schema_version": 1,
            "artifacts": [{
                "id": "01HZY5J8W5ZQ4V6N1T5K2M3P4Q",
                "kind": "image",
                "prompt_text": "P",
                "status": "completed",
                "payload": {"kind": "image", "mime_type": "image/jpeg", "data_base64": "AAAA"},
                "created_at": "2024-01-01T12:00:00Z"
            }],
            "sync_queue": []
        });

        let migrated = migrate(Some(loaded)).unwrap();

        assert_eq!(migrated.from_version, 1);
        assert!(migrated.upgraded);
        assert_eq!(migrated.document.artifacts.len(), 1);
        assert!(migrated.document.dead_letters.is_empty());
    }

    #[test]
    fn current_version_is_not_rewritten() {
        let loaded = json!({
            "schema_version": 2,
            "artifacts": [],
            "sync_queue": [],
            "dead_letters": []
        });

        assert!(!migrate(Some(loaded)).unwrap().upgraded);
    }

    #[test]
    fn newer_version_is_rejected() {
        let err = migrate(Some(json!({"schema_version": 7}))).unwrap_err();
        assert_eq!(
            err,
            StoreError::UnsupportedSchema {
                found: 7,
                supported: CURRENT_VERSION
            }
        );
    }

    #[rstest]
    #[case::array(json!([]))]
    #[case::string_version(json!({"schema_version": "two"}))]
    #[case::bad_records(json!({"schema_version": 2, "artifacts": [{"id": 1}]}))]
    fn malformed_documents_are_corrupt(#[case] loaded: Value) {
        assert!(matches!(migrate(Some(loaded)), Err(StoreError::Corrupt(_))));
    }
}
