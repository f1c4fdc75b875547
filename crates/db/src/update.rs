//! Filter matching and update application shared by all stores.
//!
//! Supported update shapes:
//!
//! | Form                               | Effect                                   |
//! |------------------------------------|------------------------------------------|
//! | `{"field": v}`                     | overwrite `field`                        |
//! | `{"$set": {"field": v}}`           | overwrite `field`                        |
//! | `{"$push": {"field": v}}`          | append `v` to the array at `field`       |
//! | `{"$push": {"field": [a, b]}}`     | append `a` then `b` (element-wise)       |
//! | `{"$push": {"field": {"$each": [a, b], "$sort": {"key": 1}}}}` | append, then sort the whole array by `key` (`-1` descending) |
//!
//! `$push` creates the array when the field is absent. Plain keys and
//! operators cannot be mixed in one update, and `_id` is immutable.

use std::cmp::Ordering;

use serde_json::Value;

use crate::store::{Document, StoreError, ID_FIELD};

/// Whether every top-level key of `filter` is present in `doc` with an
/// equal value. An empty filter matches everything.
pub fn matches(doc: &Document, filter: &Document) -> bool {
    filter
        .iter()
        .all(|(key, expected)| doc.get(key) == Some(expected))
}

/// Apply `update` to `doc` in place.
///
/// On error `doc` may be partially updated; callers apply updates to a copy.
pub fn apply_update(doc: &mut Document, update: &Document) -> Result<(), StoreError> {
    let operators = update.keys().filter(|key| key.starts_with('$')).count();
    if operators != 0 && operators != update.len() {
        return Err(StoreError::InvalidUpdate(
            "cannot mix update operators with plain fields".to_string(),
        ));
    }

    if operators == 0 {
        return set_fields(doc, update);
    }

    for (operator, fields) in update {
        let fields = fields.as_object().ok_or_else(|| {
            StoreError::InvalidUpdate(format!("{operator} expects an object of fields"))
        })?;
        match operator.as_str() {
            "$set" => set_fields(doc, fields)?,
            "$push" => push_fields(doc, fields)?,
            other => {
                return Err(StoreError::InvalidUpdate(format!(
                    "unsupported operator {other}"
                )))
            }
        }
    }
    Ok(())
}

fn set_fields(doc: &mut Document, fields: &Document) -> Result<(), StoreError> {
    for (field, value) in fields {
        guard_id(field)?;
        doc.insert(field.clone(), value.clone());
    }
    Ok(())
}

fn push_fields(doc: &mut Document, fields: &Document) -> Result<(), StoreError> {
    for (field, value) in fields {
        guard_id(field)?;
        let (values, sort) = match value {
            Value::Object(modifiers) if modifiers.contains_key("$each") => {
                push_modifiers(field, modifiers)?
            }
            Value::Array(values) => (values.as_slice(), None),
            single => (std::slice::from_ref(single), None),
        };

        let target = doc
            .entry(field.clone())
            .or_insert_with(|| Value::Array(Vec::new()));
        let Value::Array(items) = target else {
            return Err(StoreError::InvalidUpdate(format!(
                "cannot $push onto non-array field {field}"
            )));
        };
        items.extend(values.iter().cloned());
        if let Some(sort) = sort {
            items.sort_by(|a, b| sort.compare(a, b));
        }
    }
    Ok(())
}

/// `$sort` modifier of a `$push`: one key and a direction.
struct SortKey<'a> {
    key: &'a str,
    descending: bool,
}

impl SortKey<'_> {
    /// Numbers and strings order naturally; elements missing the key go last.
    fn compare(&self, a: &Value, b: &Value) -> Ordering {
        let ordering = match (a.get(self.key), b.get(self.key)) {
            (Some(Value::Number(x)), Some(Value::Number(y))) => x
                .as_f64()
                .partial_cmp(&y.as_f64())
                .unwrap_or(Ordering::Equal),
            (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
            (Some(_), None) => return Ordering::Less,
            (None, Some(_)) => return Ordering::Greater,
            _ => Ordering::Equal,
        };
        if self.descending {
            ordering.reverse()
        } else {
            ordering
        }
    }
}

fn push_modifiers<'a>(
    field: &str,
    modifiers: &'a Document,
) -> Result<(&'a [Value], Option<SortKey<'a>>), StoreError> {
    let mut values: &[Value] = &[];
    let mut sort = None;
    for (modifier, arg) in modifiers {
        match modifier.as_str() {
            "$each" => {
                values = arg.as_array().map(Vec::as_slice).ok_or_else(|| {
                    StoreError::InvalidUpdate(format!("$each on {field} expects an array"))
                })?;
            }
            "$sort" => sort = Some(sort_key(field, arg)?),
            other => {
                return Err(StoreError::InvalidUpdate(format!(
                    "unsupported $push modifier {other}"
                )))
            }
        }
    }
    Ok((values, sort))
}

fn sort_key<'a>(field: &str, arg: &'a Value) -> Result<SortKey<'a>, StoreError> {
    let invalid = || StoreError::InvalidUpdate(format!("$sort on {field} expects {{\"key\": 1 | -1}}"));
    let (key, direction) = arg
        .as_object()
        .filter(|spec| spec.len() == 1)
        .and_then(|spec| spec.iter().next())
        .ok_or_else(invalid)?;
    match direction.as_i64() {
        Some(1) => Ok(SortKey { key, descending: false }),
        Some(-1) => Ok(SortKey { key, descending: true }),
        _ => Err(invalid()),
    }
}

fn guard_id(field: &str) -> Result<(), StoreError> {
    if field == ID_FIELD {
        return Err(StoreError::InvalidUpdate(format!("{ID_FIELD} is immutable")));
    }
    Ok(())
}
