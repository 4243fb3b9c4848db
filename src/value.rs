//! Column values and materialized result rows.

use std::collections::HashMap;

use rusqlite::types::ValueRef;
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};

/// A value read from a result column.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl Value {
    /// Best-effort integer coercion, following SQLite's own rules: reals
    /// truncate, text contributes its leading numeric prefix, everything
    /// else is zero.
    pub fn to_i64(&self) -> i64 {
        match self {
            Value::Null => 0,
            Value::Integer(v) => *v,
            Value::Real(v) => *v as i64,
            Value::Text(s) => numeric_prefix(s).map_or(0, |n| n.as_i64()),
            Value::Blob(b) => numeric_prefix(&String::from_utf8_lossy(b)).map_or(0, |n| n.as_i64()),
        }
    }

    /// Best-effort floating point coercion.
    pub fn to_f64(&self) -> f64 {
        match self {
            Value::Null => 0.0,
            Value::Integer(v) => *v as f64,
            Value::Real(v) => *v,
            Value::Text(s) => numeric_prefix(s).map_or(0.0, |n| n.as_f64()),
            Value::Blob(b) => {
                numeric_prefix(&String::from_utf8_lossy(b)).map_or(0.0, |n| n.as_f64())
            }
        }
    }

    /// Textual form of the value; NULL becomes the empty string.
    pub fn to_text(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Integer(v) => v.to_string(),
            Value::Real(v) => format!("{v:?}"),
            Value::Text(s) => s.clone(),
            Value::Blob(b) => String::from_utf8_lossy(b).into_owned(),
        }
    }
}

impl From<ValueRef<'_>> for Value {
    fn from(value: ValueRef<'_>) -> Self {
        match value {
            ValueRef::Null => Value::Null,
            ValueRef::Integer(v) => Value::Integer(v),
            ValueRef::Real(v) => Value::Real(v),
            ValueRef::Text(t) => Value::Text(String::from_utf8_lossy(t).into_owned()),
            ValueRef::Blob(b) => Value::Blob(b.to_vec()),
        }
    }
}

enum Numeric {
    Int(i64),
    Float(f64),
}

impl Numeric {
    fn as_i64(&self) -> i64 {
        match self {
            Numeric::Int(v) => *v,
            Numeric::Float(v) => *v as i64,
        }
    }

    fn as_f64(&self) -> f64 {
        match self {
            Numeric::Int(v) => *v as f64,
            Numeric::Float(v) => *v,
        }
    }
}

/// Parses the longest numeric prefix of `s` ("42abc" -> 42, " 3.5x" -> 3.5).
fn numeric_prefix(s: &str) -> Option<Numeric> {
    let s = s.trim_start();
    let bytes = s.as_bytes();
    let mut end = 0;
    if matches!(bytes.first(), Some(b'+' | b'-')) {
        end += 1;
    }
    let digits_start = end;
    while end < bytes.len() && bytes[end].is_ascii_digit() {
        end += 1;
    }
    let int_end = end;
    let mut is_float = false;
    if end < bytes.len() && bytes[end] == b'.' {
        let mut frac = end + 1;
        while frac < bytes.len() && bytes[frac].is_ascii_digit() {
            frac += 1;
        }
        if frac > end + 1 || int_end > digits_start {
            is_float = frac > end + 1;
            end = frac;
        }
    }
    if end == digits_start || (end == digits_start + 1 && bytes[digits_start] == b'.') {
        return None;
    }
    if end < bytes.len() && matches!(bytes[end], b'e' | b'E') {
        let mut exp = end + 1;
        if matches!(bytes.get(exp), Some(b'+' | b'-')) {
            exp += 1;
        }
        let exp_digits = exp;
        while exp < bytes.len() && bytes[exp].is_ascii_digit() {
            exp += 1;
        }
        if exp > exp_digits {
            is_float = true;
            end = exp;
        }
    }
    let text = &s[..end];
    if !is_float {
        if let Ok(v) = text.parse::<i64>() {
            return Some(Numeric::Int(v));
        }
    }
    text.parse::<f64>().ok().map(Numeric::Float)
}

/// One materialized result row: column names paired with their values, in
/// the column order of the statement.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ResultRow {
    columns: Vec<String>,
    values: Vec<Value>,
}

impl ResultRow {
    pub(crate) fn new(columns: Vec<String>, values: Vec<Value>) -> Self {
        debug_assert_eq!(columns.len(), values.len());
        Self { columns, values }
    }

    /// Value of the named column. With duplicate names the last one wins,
    /// as it would in a plain map.
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns
            .iter()
            .rposition(|c| c == column)
            .map(|i| &self.values[i])
    }

    /// Value at a column position.
    pub fn get_index(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.columns.iter().map(String::as_str).zip(self.values.iter())
    }

    /// Converts the row into an unordered column-name map.
    pub fn into_map(self) -> HashMap<String, Value> {
        self.columns.into_iter().zip(self.values).collect()
    }
}

impl Serialize for ResultRow {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.values.len()))?;
        for (column, value) in self.iter() {
            map.serialize_entry(column, value)?;
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_coercion_follows_numeric_prefix() {
        assert_eq!(Value::Text("42".into()).to_i64(), 42);
        assert_eq!(Value::Text(" 17 apples".into()).to_i64(), 17);
        assert_eq!(Value::Text("3.9".into()).to_i64(), 3);
        assert_eq!(Value::Text("abc".into()).to_i64(), 0);
        assert_eq!(Value::Real(-2.7).to_i64(), -2);
        assert_eq!(Value::Null.to_i64(), 0);
    }

    #[test]
    fn float_coercion() {
        assert_eq!(Value::Integer(5).to_f64(), 5.0);
        assert_eq!(Value::Text("2.5e2xyz".into()).to_f64(), 250.0);
        assert_eq!(Value::Text(".5".into()).to_f64(), 0.5);
        assert_eq!(Value::Text("-".into()).to_f64(), 0.0);
        assert_eq!(Value::Blob(b"1.25".to_vec()).to_f64(), 1.25);
    }

    #[test]
    fn text_coercion() {
        assert_eq!(Value::Null.to_text(), "");
        assert_eq!(Value::Integer(-9).to_text(), "-9");
        assert_eq!(Value::Real(1.0).to_text(), "1.0");
        assert_eq!(Value::Blob(b"hi".to_vec()).to_text(), "hi");
    }

    #[test]
    fn values_serialize_untagged() {
        let row = ResultRow::new(
            vec!["n".into(), "i".into(), "b".into()],
            vec![Value::Null, Value::Integer(3), Value::Blob(vec![1, 2])],
        );
        let json = serde_json::to_value(&row).unwrap();
        assert_eq!(json, serde_json::json!({ "n": null, "i": 3, "b": [1, 2] }));
    }

    #[test]
    fn row_lookup_by_name_and_position() {
        let row = ResultRow::new(
            vec!["id".into(), "name".into()],
            vec![Value::Integer(1), Value::Text("alice".into())],
        );
        assert_eq!(row.get("name"), Some(&Value::Text("alice".into())));
        assert_eq!(row.get_index(0), Some(&Value::Integer(1)));
        assert!(row.get("missing").is_none());
        assert_eq!(row.len(), 2);
        let map = row.into_map();
        assert_eq!(map["id"], Value::Integer(1));
    }
}
