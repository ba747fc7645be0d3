use serde_json::{Map, Value};

/// How one field of a partial-update body was supplied.
#[derive(Debug, Clone, PartialEq)]
pub enum Field<T> {
    Omitted,
    Null,
    Value(T),
}

impl<T> Field<T> {
    /// For columns that cannot be cleared: `null` is rejected.
    pub fn required(self, name: &str) -> Result<Option<T>, String> {
        match self {
            Field::Omitted => Ok(None),
            Field::Null => Err(format!("{name} must not be null")),
            Field::Value(value) => Ok(Some(value)),
        }
    }

    /// For nullable columns: outer `None` leaves the column alone, `Some(None)` clears it.
    pub fn nullable(self) -> Option<Option<T>> {
        match self {
            Field::Omitted => None,
            Field::Null => Some(None),
            Field::Value(value) => Some(Some(value)),
        }
    }
}

pub fn classify_string(body: &Map<String, Value>, key: &str) -> Result<Field<String>, String> {
    match body.get(key) {
        None => Ok(Field::Omitted),
        Some(Value::Null) => Ok(Field::Null),
        Some(Value::String(s)) => Ok(Field::Value(s.to_owned())),
        Some(other) => Err(format!("{key}: expected string or null, got {other}")),
    }
}

pub fn classify_bool(body: &Map<String, Value>, key: &str) -> Result<Field<bool>, String> {
    match body.get(key) {
        None => Ok(Field::Omitted),
        Some(Value::Null) => Ok(Field::Null),
        Some(Value::Bool(b)) => Ok(Field::Value(*b)),
        Some(other) => Err(format!("{key}: expected boolean or null, got {other}")),
    }
}

pub fn classify_string_list(
    body: &Map<String, Value>,
    key: &str,
) -> Result<Field<Vec<String>>, String> {
    match body.get(key) {
        None => Ok(Field::Omitted),
        Some(Value::Null) => Ok(Field::Null),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| match item {
                Value::String(s) => Ok(s.to_owned()),
                other => Err(format!("{key}: expected an array of strings, got {other}")),
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Field::Value),
        Some(other) => Err(format!("{key}: expected an array of strings, got {other}")),
    }
}
