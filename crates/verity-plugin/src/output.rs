//! Algorithm output values and their JSON form

use serde_json::{Map, Number, Value};

/// Value produced by an algorithm.
///
/// Richer than JSON: floats may be non-finite or single precision and map
/// keys need not be strings. [`OutputValue::into_json`] makes it portable.
#[derive(Debug, Clone, PartialEq)]
pub enum OutputValue {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Float32(f32),
    Text(String),
    List(Vec<OutputValue>),
    Map(Vec<(OutputKey, OutputValue)>),
}

/// Key of an [`OutputValue::Map`]
#[derive(Debug, Clone, PartialEq)]
pub enum OutputKey {
    Text(String),
    Int(i64),
    Bool(bool),
}

impl std::fmt::Display for OutputKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputKey::Text(s) => write!(f, "{}", s),
            OutputKey::Int(i) => write!(f, "{}", i),
            OutputKey::Bool(b) => write!(f, "{}", if *b { "True" } else { "False" }),
        }
    }
}

impl OutputValue {
    /// Build a map from string keys
    pub fn map<K, I>(entries: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, OutputValue)>,
    {
        OutputValue::Map(
            entries
                .into_iter()
                .map(|(k, v)| (OutputKey::Text(k.into()), v))
                .collect(),
        )
    }

    /// Convert to JSON. Non-finite floats become null, single precision
    /// floats are widened and map keys are stringified.
    pub fn into_json(self) -> Value {
        match self {
            OutputValue::Null => Value::Null,
            OutputValue::Bool(b) => Value::Bool(b),
            OutputValue::Int(i) => Value::Number(i.into()),
            OutputValue::UInt(u) => Value::Number(u.into()),
            OutputValue::Float(f) => float(f),
            OutputValue::Float32(f) => float(f64::from(f)),
            OutputValue::Text(s) => Value::String(s),
            OutputValue::List(items) => {
                Value::Array(items.into_iter().map(OutputValue::into_json).collect())
            }
            OutputValue::Map(entries) => {
                let mut map = Map::new();
                for (key, value) in entries {
                    map.insert(key.to_string(), value.into_json());
                }
                Value::Object(map)
            }
        }
    }
}

fn float(f: f64) -> Value {
    Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null)
}

impl From<Value> for OutputValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => OutputValue::Null,
            Value::Bool(b) => OutputValue::Bool(b),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    OutputValue::Int(i)
                } else if let Some(u) = n.as_u64() {
                    OutputValue::UInt(u)
                } else {
                    OutputValue::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            Value::String(s) => OutputValue::Text(s),
            Value::Array(items) => OutputValue::List(items.into_iter().map(Into::into).collect()),
            Value::Object(map) => OutputValue::map(map.into_iter().map(|(k, v)| (k, v.into()))),
        }
    }
}

impl From<f64> for OutputValue {
    fn from(f: f64) -> Self {
        OutputValue::Float(f)
    }
}

impl From<f32> for OutputValue {
    fn from(f: f32) -> Self {
        OutputValue::Float32(f)
    }
}

impl From<i64> for OutputValue {
    fn from(i: i64) -> Self {
        OutputValue::Int(i)
    }
}

impl From<&str> for OutputValue {
    fn from(s: &str) -> Self {
        OutputValue::Text(s.to_string())
    }
}

impl From<String> for OutputValue {
    fn from(s: String) -> Self {
        OutputValue::Text(s)
    }
}

impl<T: Into<OutputValue>> From<Vec<T>> for OutputValue {
    fn from(items: Vec<T>) -> Self {
        OutputValue::List(items.into_iter().map(Into::into).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_non_portable_numbers() {
        let value = OutputValue::map([
            ("nan", OutputValue::Float(f64::NAN)),
            ("inf", OutputValue::Float(f64::INFINITY)),
            ("half", OutputValue::Float32(0.5)),
            ("big", OutputValue::UInt(u64::MAX)),
        ]);
        assert_eq!(
            value.into_json(),
            json!({"nan": null, "inf": null, "half": 0.5, "big": u64::MAX})
        );
    }

    #[test]
    fn test_keys_are_stringified() {
        let value = OutputValue::Map(vec![
            (OutputKey::Int(0), "zero".into()),
            (OutputKey::Bool(true), OutputValue::List(vec![1i64.into()])),
        ]);
        assert_eq!(value.into_json(), json!({"0": "zero", "True": [1]}));
    }

    #[test]
    fn test_from_json_is_lossless_for_json() {
        let original = json!({"a": [1, -2, 2.5, "x", null, true], "b": {"c": {}}});
        assert_eq!(OutputValue::from(original.clone()).into_json(), original);
    }
}
