//! Minimal shape validation.
//!
//! Invalid records are dropped from a payload rather than failing the whole
//! document; callers log how many were dropped.

use crate::record::record_id;
use crate::{CollectionSchema, ModelError, ModelResult};
use serde_json::Value;
use std::fmt;

/// Why a record was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordRejection {
    NotAnObject,
    MissingId { field: String },
    NotPositive { field: String },
    EmptyField { field: String },
}

impl fmt::Display for RecordRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotAnObject => f.write_str("record is not an object"),
            Self::MissingId { field } => write!(f, "missing identity field {field:?}"),
            Self::NotPositive { field } => write!(f, "field {field:?} is not a positive number"),
            Self::EmptyField { field } => write!(f, "field {field:?} is empty"),
        }
    }
}

fn positive(value: Option<&Value>) -> bool {
    let n = match value {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    n.is_some_and(|n| n.is_finite() && n > 0.0)
}

/// Checks one record against the schema.
pub fn validate_record(schema: &CollectionSchema, record: &Value) -> Result<(), RecordRejection> {
    if !record.is_object() {
        return Err(RecordRejection::NotAnObject);
    }
    if record_id(record, &schema.id_field).is_none() {
        return Err(RecordRejection::MissingId {
            field: schema.id_field.clone(),
        });
    }
    if let Some(field) = schema
        .positive_fields
        .iter()
        .find(|f| !positive(record.get(f.as_str())))
    {
        return Err(RecordRejection::NotPositive {
            field: field.clone(),
        });
    }
    if let Some(field) = schema.non_empty_fields.iter().find(|f| {
        !record
            .get(f.as_str())
            .and_then(Value::as_str)
            .is_some_and(|s| !s.trim().is_empty())
    }) {
        return Err(RecordRejection::EmptyField {
            field: field.clone(),
        });
    }
    Ok(())
}

/// The records of a payload that passed validation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidatedPayload {
    pub records: Vec<Value>,
    pub dropped: Vec<(usize, RecordRejection)>,
}

impl ValidatedPayload {
    /// The surviving records as a JSON array.
    pub fn into_value(self) -> Value {
        Value::Array(self.records)
    }
}

/// Validates every record of a collection payload, keeping the valid ones in
/// their original order.
pub fn validate_payload(schema: &CollectionSchema, payload: &Value) -> ModelResult<ValidatedPayload> {
    let items = payload.as_array().ok_or_else(|| ModelError::NotAnArray {
        key: schema.key.clone(),
    })?;

    let mut out = ValidatedPayload::default();
    for (index, record) in items.iter().enumerate() {
        match validate_record(schema, record) {
            Ok(()) => out.records.push(record.clone()),
            Err(rejection) => out.dropped.push((index, rejection)),
        }
    }
    Ok(out)
}
