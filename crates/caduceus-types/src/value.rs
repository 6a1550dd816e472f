//! Scalar attribute values and the record/filter/patch maps built from them.
//!
//! The external command layer speaks in attribute maps: a create supplies a
//! full record, an update supplies an equality filter plus a patch, a read
//! supplies an optional filter. [`ScalarValue`] is the typed currency for
//! all three, covering every column type the schema declares.

use std::collections::BTreeMap;

use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};

/// A single typed attribute value.
///
/// Ordering is derived so merged federated result sets can be sorted
/// client-side: values of the same type compare naturally, and `Null`
/// sorts before everything else.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ScalarValue {
    /// SQL NULL.
    Null,
    /// A 64-bit integer (all identifiers, counts, room totals).
    Int(i64),
    /// A text value.
    Text(String),
    /// A calendar date (date of birth, appointment date).
    Date(NaiveDate),
    /// A time of day (appointment time).
    Time(NaiveTime),
}

impl ScalarValue {
    /// Human-readable name of this value's type, for error messages.
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Int(_) => "integer",
            Self::Text(_) => "text",
            Self::Date(_) => "date",
            Self::Time(_) => "time",
        }
    }

    /// The integer payload, if this is an `Int`.
    pub const fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// The text payload, if this is a `Text`.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Whether this value is SQL NULL.
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

impl From<i64> for ScalarValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<&str> for ScalarValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_owned())
    }
}

impl From<String> for ScalarValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<NaiveDate> for ScalarValue {
    fn from(v: NaiveDate) -> Self {
        Self::Date(v)
    }
}

impl From<NaiveTime> for ScalarValue {
    fn from(v: NaiveTime) -> Self {
        Self::Time(v)
    }
}

/// A full record: attribute name to value, in stable attribute order.
pub type Record = BTreeMap<String, ScalarValue>;

/// An equality filter: every entry must match for a row to be selected.
pub type Filter = BTreeMap<String, ScalarValue>;

/// A patch: attribute name to replacement value.
pub type Patch = BTreeMap<String, ScalarValue>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_sorts_first() {
        let mut values = vec![
            ScalarValue::Int(3),
            ScalarValue::Null,
            ScalarValue::Int(1),
        ];
        values.sort();
        assert_eq!(
            values,
            vec![
                ScalarValue::Null,
                ScalarValue::Int(1),
                ScalarValue::Int(3),
            ]
        );
    }

    #[test]
    fn text_sorts_lexicographically() {
        let mut values = vec![ScalarValue::from("Radiology"), ScalarValue::from("Oncology")];
        values.sort();
        assert_eq!(values.first().and_then(|v| v.as_text().map(str::to_owned)), Some("Oncology".to_owned()));
    }

    #[test]
    fn serde_roundtrip() {
        let value = ScalarValue::Date(
            NaiveDate::from_ymd_opt(2024, 3, 15).unwrap_or_default(),
        );
        let json = serde_json::to_string(&value).ok();
        assert!(json.is_some());
        let restored: Result<ScalarValue, _> =
            serde_json::from_str(json.as_deref().unwrap_or(""));
        assert_eq!(restored.ok(), Some(value));
    }

    #[test]
    fn type_names_are_stable() {
        assert_eq!(ScalarValue::Int(1).type_name(), "integer");
        assert_eq!(ScalarValue::Null.type_name(), "null");
        assert_eq!(ScalarValue::from("x").type_name(), "text");
    }
}
