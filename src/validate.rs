use serde_json::{Number, Value};

use crate::error::ShelfError;
use crate::model::{CollectionSpec, FieldKind, FieldSpec, Presence, Record, ID_FIELD};

/// Turn URL-encoded pairs into a body, converting values to their field's kind
/// where the text parses. Unknown keys are dropped; later duplicates win.
pub fn coerce_form(spec: &CollectionSpec, pairs: Vec<(String, String)>) -> Record {
    let mut body = Record::new();
    for (key, raw) in pairs {
        let Some(field) = spec.field(&key) else { continue };
        body.insert(key, coerce_text(field.kind, raw));
    }
    body
}

fn coerce_text(kind: FieldKind, raw: String) -> Value {
    match kind {
        FieldKind::Integer => match raw.trim().parse::<i64>() {
            Ok(n) => Value::from(n),
            Err(_) => Value::String(raw),
        },
        FieldKind::Number => match raw.trim().parse::<f64>().ok().and_then(Number::from_f64) {
            Some(n) => Value::Number(n),
            None => Value::String(raw),
        },
        FieldKind::Boolean => match raw.trim() {
            "true" => Value::Bool(true),
            "false" => Value::Bool(false),
            _ => Value::String(raw),
        },
        FieldKind::Text | FieldKind::Any => Value::String(raw),
    }
}

/// Falsy in the sense of the `non_empty` presence rule.
pub fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::String(s) => s.is_empty(),
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::Array(_) | Value::Object(_) => false,
    }
}

fn invalid(field: &FieldSpec) -> ShelfError {
    let rule = match (field.min, field.max) {
        (Some(min), Some(max)) => format!("must be an integer between {} and {}", min, max),
        (Some(min), None) => format!("must be an integer of at least {}", min),
        (None, Some(max)) => format!("must be an integer of at most {}", max),
        (None, None) => format!("must be {}", field.kind.describe()),
    };
    ShelfError::Validation(format!("Invalid parameter: {} ({}).", field.name, rule))
}

fn as_integer(value: &Value) -> Option<i64> {
    if let Some(n) = value.as_i64() {
        return Some(n);
    }
    let f = value.as_f64()?;
    if f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64 {
        Some(f as i64)
    } else {
        None
    }
}

/// Check one non-null value against its field's kind and range.
pub fn check_value(field: &FieldSpec, value: &Value) -> Result<(), ShelfError> {
    if field.has_range() {
        let n = as_integer(value).ok_or_else(|| invalid(field))?;
        let low = field.min.map_or(true, |min| n >= min);
        let high = field.max.map_or(true, |max| n <= max);
        return if low && high { Ok(()) } else { Err(invalid(field)) };
    }

    let ok = match field.kind {
        FieldKind::Text => value.is_string(),
        FieldKind::Integer => as_integer(value).is_some(),
        FieldKind::Number => value.is_number(),
        FieldKind::Boolean => value.is_boolean(),
        FieldKind::Any => !value.is_array() && !value.is_object(),
    };
    if ok {
        Ok(())
    } else {
        Err(invalid(field))
    }
}

/// Validate a create body in schema order. The first violation is reported.
/// Returns the record's fields in schema order; optional absent fields are null.
pub fn validate_create(spec: &CollectionSpec, body: &Record) -> Result<Record, ShelfError> {
    let mut record = Record::new();

    for field in &spec.fields {
        let supplied = body.get(&field.name).filter(|v| match field.presence {
            Presence::Present => !v.is_null(),
            Presence::NonEmpty => !is_empty_value(v),
            Presence::Nullable => true,
        });

        match supplied {
            Some(Value::Null) => {
                record.insert(field.name.clone(), Value::Null);
            }
            Some(value) => {
                check_value(field, value)?;
                record.insert(field.name.clone(), value.clone());
            }
            None if field.required => {
                let msg = spec.messages.missing.replace("{field}", &field.name);
                return Err(ShelfError::Validation(msg));
            }
            None => {
                record.insert(field.name.clone(), Value::Null);
            }
        }
    }
    Ok(record)
}

/// Validate a partial update. Every schema field present in the body is an
/// update, including empty strings, 0 and false. `null` is only accepted for
/// optional or nullable fields. The identity field is never part of the result.
pub fn validate_update(spec: &CollectionSpec, body: &Record) -> Result<Vec<(String, Value)>, ShelfError> {
    let mut changes = Vec::new();

    for field in spec.fields.iter().filter(|f| f.name != ID_FIELD) {
        let Some(value) = body.get(&field.name) else { continue };
        if value.is_null() {
            if !field.accepts_null() {
                return Err(invalid(field));
            }
        } else {
            check_value(field, value)?;
        }
        changes.push((field.name.clone(), value.clone()));
    }
    Ok(changes)
}
