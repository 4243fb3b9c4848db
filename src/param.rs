//! Statement parameters and their binding.
//!
//! A [`Parameter`] is a closed tagged value. Anything outside the known tags
//! goes through [`Parameter::text_of`], which keeps the lossy "use the
//! textual form" fallback visible at the call site.

use std::fmt::Display;

use chrono::{DateTime, Utc};
use rusqlite::types::{ToSql, ToSqlOutput, Value as SqlValue};
use rusqlite::Statement;

use crate::error::{DbError, DbResult};

/// A value bound to a `?` placeholder.
#[derive(Debug, Clone, PartialEq)]
pub enum Parameter {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
    /// Bound as REAL seconds since the Unix epoch.
    Date(DateTime<Utc>),
    /// Textual form of a value with no dedicated tag.
    Other(String),
}

impl Parameter {
    /// Fallback for values without a dedicated tag: binds their `Display`
    /// form as text. Never fails.
    pub fn text_of(value: impl Display) -> Self {
        Parameter::Other(value.to_string())
    }

    fn to_sql_value(&self) -> SqlValue {
        match self {
            Parameter::Null => SqlValue::Null,
            Parameter::Integer(v) => SqlValue::Integer(*v),
            Parameter::Real(v) => SqlValue::Real(*v),
            Parameter::Text(s) | Parameter::Other(s) => SqlValue::Text(s.clone()),
            Parameter::Blob(b) => SqlValue::Blob(b.clone()),
            Parameter::Date(d) => SqlValue::Real(unix_seconds(d)),
        }
    }
}

fn unix_seconds(date: &DateTime<Utc>) -> f64 {
    date.timestamp() as f64 + f64::from(date.timestamp_subsec_nanos()) / 1e9
}

impl ToSql for Parameter {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Parameter::Text(s) | Parameter::Other(s) => ToSqlOutput::from(s.as_str()),
            Parameter::Blob(b) => ToSqlOutput::from(b.as_slice()),
            other => ToSqlOutput::Owned(other.to_sql_value()),
        })
    }
}

/// Binds `params` positionally (1-indexed, left to right).
///
/// The count must match the statement's placeholders exactly; a mismatch is
/// rejected before any slot is touched.
pub(crate) fn bind_all(stmt: &mut Statement<'_>, params: &[Parameter]) -> DbResult<()> {
    let expected = stmt.parameter_count();
    if expected != params.len() {
        return Err(DbError::param_count(expected, params.len()));
    }
    for (i, param) in params.iter().enumerate() {
        stmt.raw_bind_parameter(i + 1, param)
            .map_err(|e| DbError::bind(&e))?;
    }
    Ok(())
}

macro_rules! int_param {
    ($($t:ty),*) => {
        $(impl From<$t> for Parameter {
            fn from(v: $t) -> Self {
                Parameter::Integer(i64::from(v))
            }
        })*
    };
}

int_param!(i8, i16, i32, i64, u8, u16, u32);

impl From<f32> for Parameter {
    fn from(v: f32) -> Self {
        Parameter::Real(f64::from(v))
    }
}

impl From<f64> for Parameter {
    fn from(v: f64) -> Self {
        Parameter::Real(v)
    }
}

impl From<bool> for Parameter {
    fn from(v: bool) -> Self {
        Parameter::Integer(i64::from(v))
    }
}

impl From<&str> for Parameter {
    fn from(v: &str) -> Self {
        Parameter::Text(v.to_string())
    }
}

impl From<String> for Parameter {
    fn from(v: String) -> Self {
        Parameter::Text(v)
    }
}

impl From<&[u8]> for Parameter {
    fn from(v: &[u8]) -> Self {
        Parameter::Blob(v.to_vec())
    }
}

impl From<Vec<u8>> for Parameter {
    fn from(v: Vec<u8>) -> Self {
        Parameter::Blob(v)
    }
}

impl From<DateTime<Utc>> for Parameter {
    fn from(v: DateTime<Utc>) -> Self {
        Parameter::Date(v)
    }
}

impl<T: Into<Parameter>> From<Option<T>> for Parameter {
    fn from(v: Option<T>) -> Self {
        v.map_or(Parameter::Null, Into::into)
    }
}

/// Builds a `Vec<Parameter>` from heterogeneous values.
///
/// Usage: `params!["alice", 30, None::<i64>]`
#[macro_export]
macro_rules! params {
    () => {
        ::std::vec::Vec::<$crate::Parameter>::new()
    };
    ($($val:expr),+ $(,)?) => {
        ::std::vec![$($crate::Parameter::from($val)),+]
    };
}
