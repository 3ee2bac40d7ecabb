//! Values kept by providers in their scratch state.

use serde::{Deserialize, Serialize};
use crate::commons::error::Error;
use crate::commons::EngineResult;


//------------ Scalar --------------------------------------------------------

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Scalar {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}


//------------ StoredValue ---------------------------------------------------

/// A value in a provider's scratch state.
///
/// Only scalars, lists of values and null can be stored. Anything else is
/// rejected when it enters the store.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(untagged)]
pub enum StoredValue {
    #[default]
    Null,
    Scalar(Scalar),
    List(Vec<StoredValue>),
}

impl StoredValue {
    /// Converts arbitrary JSON into a stored value.
    ///
    /// Fails if the JSON contains an object anywhere, or a number that
    /// does not fit a 64 bit integer or float.
    pub fn from_json(json: &serde_json::Value) -> EngineResult<Self> {
        use serde_json::Value;

        match json {
            Value::Null => Ok(StoredValue::Null),
            Value::Bool(b) => Ok(StoredValue::from(*b)),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(StoredValue::from(i))
                }
                else if let Some(f) = n.as_f64() {
                    Ok(StoredValue::from(f))
                }
                else {
                    Err(Error::invalid_value(format!("number out of range: {n}")))
                }
            }
            Value::String(s) => Ok(StoredValue::from(s.as_str())),
            Value::Array(items) => {
                items
                    .iter()
                    .map(Self::from_json)
                    .collect::<EngineResult<Vec<_>>>()
                    .map(StoredValue::List)
            }
            Value::Object(_) => {
                Err(Error::invalid_value("objects cannot be stored"))
            }
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, StoredValue::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            StoredValue::Scalar(Scalar::Bool(b)) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            StoredValue::Scalar(Scalar::Int(i)) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            StoredValue::Scalar(Scalar::Float(f)) => Some(*f),
            StoredValue::Scalar(Scalar::Int(i)) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            StoredValue::Scalar(Scalar::Str(s)) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[StoredValue]> {
        match self {
            StoredValue::List(items) => Some(items),
            _ => None,
        }
    }
}

impl From<bool> for StoredValue {
    fn from(b: bool) -> Self {
        StoredValue::Scalar(Scalar::Bool(b))
    }
}

impl From<i64> for StoredValue {
    fn from(i: i64) -> Self {
        StoredValue::Scalar(Scalar::Int(i))
    }
}

impl From<f64> for StoredValue {
    fn from(f: f64) -> Self {
        StoredValue::Scalar(Scalar::Float(f))
    }
}

impl From<&str> for StoredValue {
    fn from(s: &str) -> Self {
        StoredValue::Scalar(Scalar::Str(s.to_string()))
    }
}

impl From<String> for StoredValue {
    fn from(s: String) -> Self {
        StoredValue::Scalar(Scalar::Str(s))
    }
}

impl<T: Into<StoredValue>> From<Vec<T>> for StoredValue {
    fn from(items: Vec<T>) -> Self {
        StoredValue::List(items.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<StoredValue>> From<Option<T>> for StoredValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or_default()
    }
}


//============ Tests =========================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn accepts_scalars_and_lists() {
        let value = StoredValue::from_json(
            &json!([1, 2.5, "three", true, null, [4]])
        ).unwrap();
        let list = value.as_list().unwrap();
        assert_eq!(list[0].as_i64(), Some(1));
        assert_eq!(list[1].as_f64(), Some(2.5));
        assert_eq!(list[2].as_str(), Some("three"));
        assert_eq!(list[3].as_bool(), Some(true));
        assert!(list[4].is_null());
        assert_eq!(list[5], StoredValue::from(vec![4i64]));
    }

    #[test]
    fn rejects_objects() {
        assert!(StoredValue::from_json(&json!({"a": 1})).is_err());
        assert!(StoredValue::from_json(&json!([1, {"a": 1}])).is_err());
    }

    #[test]
    fn keeps_shape_through_serialization() {
        let value = StoredValue::from(vec![
            StoredValue::from("enrolled"), StoredValue::from(7i64),
        ]);
        let json = serde_json::to_string(&value).unwrap();
        assert_eq!(json, r#"["enrolled",7]"#);
        let back: StoredValue = serde_json::from_str(&json).unwrap();
        assert_eq!(back, value);
    }
}
