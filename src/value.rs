//! The dynamically-typed payload sum.
//!
//! Node payloads are never generic over a schema tied to a column type;
//! EdgeFlow messages carry a self-describing tree of values instead,
//! closer to `serde_json::Value` but with an explicit byte-string arm for
//! raw buffers (serial/I²C/SPI frames, file chunks) that JSON has no
//! native representation for.

use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// A node-to-node message payload. Nested arbitrarily, as requires.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Bytes(#[serde(with = "bytes_as_array")] Vec<u8>),
    Str(String),
    Array(Vec<Value>),
    Object(IndexMap<String, Value>),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Int(_) | Value::Float(_) => "number",
            Value::Bytes(_) => "buffer",
            Value::Str(_) => "string",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// "empty" per router `empty`/`nempty` rule kinds: null,
    /// empty string, empty sequence or empty mapping.
    pub fn is_empty_value(&self) -> bool {
        match self {
            Value::Null => true,
            Value::Str(s) => s.is_empty(),
            Value::Array(a) => a.is_empty(),
            Value::Object(o) => o.is_empty(),
            _ => false,
        }
    }

    /// Stringifies the value the way the router's `eq`/`cont`/`regex` rule
    /// kinds need: numbers without trailing `.0` noise,
    /// booleans as `true`/`false`, containers via their JSON rendering.
    pub fn stringify(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Bool(b) => b.to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => {
                if f.fract() == 0.0 && f.is_finite() {
                    format!("{f:.0}")
                } else {
                    f.to_string()
                }
            }
            Value::Bytes(b) => String::from_utf8_lossy(b).into_owned(),
            Value::Str(s) => s.clone(),
            Value::Array(_) | Value::Object(_) => {
                serde_json::to_string(self).unwrap_or_default()
            }
        }
    }

    /// Numeric coercion used by `lt`/`lte`/`gt`/`gte`/`btwn`.
    /// Returns `None` when the value cannot be coerced, which the caller
    /// must treat as "no match", never as an error.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Value::Str(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        }
    }

    /// Boolean coercion used by the `true`/`false` rule kinds.
    pub fn as_bool_like(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            Value::Str(s) => match s.as_str() {
                "true" | "1" => Some(true),
                "false" | "0" | "" => Some(false),
                _ => None,
            },
            Value::Int(i) => Some(*i != 0),
            _ => None,
        }
    }

    /// Resolves a dotted path through an object/array tree. `"a.b.0.c"` walks object key
    /// `a`, object key `b`, array index `0`, object key `c`.
    pub fn get_path(&self, path: &str) -> Option<&Value> {
        let mut cur = self;
        if path.is_empty() {
            return Some(cur);
        }
        for segment in path.split('.') {
            cur = match cur {
                Value::Object(map) => map.get(segment)?,
                Value::Array(arr) => arr.get(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(cur)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.stringify())
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Value::Bytes(b)
    }
}

mod bytes_as_array {
    //! `Vec<u8>` has no canonical JSON form; this picks one stable
    //! representation (a plain JSON array of byte values) rather than
    //! guessing an encoding.
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.collect_seq(bytes.iter().copied())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        Vec::<u8>::deserialize(d)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stringify_matches_router_expectations() {
        assert_eq!(Value::Int(10).stringify(), "10");
        assert_eq!(Value::Float(10.0).stringify(), "10");
        assert_eq!(Value::Bool(true).stringify(), "true");
        assert_eq!(Value::Null.stringify(), "");
    }

    #[test]
    fn numeric_coercion_rejects_non_numeric_strings() {
        assert_eq!(Value::from("7").as_f64(), Some(7.0));
        assert_eq!(Value::from("abc").as_f64(), None);
        assert_eq!(Value::Array(vec![]).as_f64(), None);
    }

    #[test]
    fn empty_semantics_cover_every_container() {
        assert!(Value::Null.is_empty_value());
        assert!(Value::Str(String::new()).is_empty_value());
        assert!(Value::Array(vec![]).is_empty_value());
        assert!(Value::Object(IndexMap::new()).is_empty_value());
        assert!(!Value::Int(0).is_empty_value());
    }

    #[test]
    fn dotted_path_walks_objects_and_arrays() {
        let mut inner = IndexMap::new();
        inner.insert("c".to_string(), Value::Int(42));
        let mut obj = IndexMap::new();
        obj.insert(
            "a".to_string(),
            Value::Array(vec![Value::Object(inner)]),
        );
        let root = Value::Object(obj);
        assert_eq!(root.get_path("a.0.c"), Some(&Value::Int(42)));
        assert_eq!(root.get_path("a.1.c"), None);
    }
}
