//! JSON output for keys and diffs.
//!
//! Values that are valid UTF-8 print as strings. Anything else prints as
//! base64 under a separate field so binary data is never mangled.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use keysync_engine::{KeysDiff, RangeKey};
use serde_json::{json, Map, Value};

fn insert_value(object: &mut Map<String, Value>, field: &str, bytes: &[u8]) {
    match std::str::from_utf8(bytes) {
        Ok(text) => object.insert(field.to_string(), Value::from(text)),
        Err(_) => object.insert(format!("{field}Base64"), Value::from(STANDARD.encode(bytes))),
    };
}

pub fn range_key(key: &RangeKey) -> Value {
    let mut object = Map::new();
    object.insert("key".into(), Value::from(key.key.as_str()));
    insert_value(&mut object, "value", &key.value);
    object.insert("version".into(), key.version.into());
    object.insert("createRevision".into(), key.create_revision.into());
    object.insert("modRevision".into(), key.mod_revision.into());
    object.insert("lease".into(), key.lease.into());
    Value::Object(object)
}

pub fn diff(diff: &KeysDiff) -> Value {
    let upserts: Vec<Value> = diff
        .upserts
        .iter()
        .map(|(suffix, value)| {
            let mut object = Map::new();
            object.insert("suffix".into(), Value::from(suffix.as_str()));
            insert_value(&mut object, "value", value);
            Value::Object(object)
        })
        .collect();
    json!({ "upserts": upserts, "deletions": diff.deletions })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_and_binary_values() {
        let mut key = RangeKey::detached("/app/a", "héllo");
        key.version = 2;
        assert_eq!(
            range_key(&key),
            json!({
                "key": "/app/a",
                "value": "héllo",
                "version": 2,
                "createRevision": 0,
                "modRevision": 0,
                "lease": 0,
            })
        );

        let binary = range_key(&RangeKey::detached("/app/b", [0xff_u8, 0x00]));
        assert_eq!(binary["valueBase64"], "/wA=");
        assert!(binary.get("value").is_none());
    }

    #[test]
    fn diff_layout() {
        let mut changes = KeysDiff::new();
        changes.upserts.insert("b".into(), b"2".to_vec());
        changes.upserts.insert("a".into(), vec![0xfe]);
        changes.deletions.insert("z".into());

        assert_eq!(
            diff(&changes),
            json!({
                "upserts": [
                    { "suffix": "a", "valueBase64": "/g==" },
                    { "suffix": "b", "value": "2" },
                ],
                "deletions": ["z"],
            })
        );
    }
}
