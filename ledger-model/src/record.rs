//! Accessors over raw JSON records.

use ledger_types::Timestamp;
use serde_json::Value;

/// Returns a record's identity as a string. Numeric ids are stringified so
/// `1` and `"1"` refer to the same record.
pub fn record_id(record: &Value, id_field: &str) -> Option<String> {
    match record.get(id_field)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Reads a record's modification time.
///
/// Accepts epoch milliseconds (number or numeric string) and RFC 3339 strings.
pub fn last_modified(record: &Value, field: &str) -> Option<Timestamp> {
    match record.get(field)? {
        Value::Number(n) => n.as_u64().map(Timestamp::from_millis),
        Value::String(s) => s
            .parse::<u64>()
            .map(Timestamp::from_millis)
            .ok()
            .or_else(|| Timestamp::parse_rfc3339(s).ok()),
        _ => None,
    }
}

fn canonical(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => "null".into(),
        // 50 and 50.0 are the same amount
        Some(Value::Number(n)) => n.as_f64().map_or_else(|| n.to_string(), |f| f.to_string()),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

/// Composite key used to recognise the same record pushed from two devices.
pub fn dedup_key(record: &Value, fields: &[String]) -> String {
    if fields.is_empty() {
        return record.to_string();
    }
    fields
        .iter()
        .map(|f| canonical(record.get(f)))
        .collect::<Vec<_>>()
        .join("|")
}
