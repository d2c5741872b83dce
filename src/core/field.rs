//! Field values and the ordered field mapping carried by a record
//!
//! Values are a closed set of shapes the fast JSON writer knows how to
//! render; anything else enters as [`FieldValue::Raw`] and forces the
//! fallback writer for that record.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// A single typed field value.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Null,
    Bool(bool),
    Int(i64),
    Uint(u64),
    Float(f64),
    Str(String),
    /// Rendered as ISO-8601 UTC with millisecond precision.
    Time(DateTime<Utc>),
    /// Rendered as fractional milliseconds.
    Duration(Duration),
    Addr(SocketAddr),
    Path(PathBuf),
    List(Vec<FieldValue>),
    Map(Vec<(String, FieldValue)>),
    Error(ErrorInfo),
    /// Arbitrary serializable value; requires the fallback writer.
    Raw(serde_json::Value),
}

/// Captured view of a `std::error::Error`: concrete type name, message,
/// and the flattened source chain.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorInfo {
    pub kind: String,
    pub message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub chain: Vec<String>,
}

impl ErrorInfo {
    pub fn from_error<E: std::error::Error + ?Sized>(err: &E) -> Self {
        let mut chain = Vec::new();
        let mut source = err.source();
        while let Some(s) = source {
            chain.push(s.to_string());
            source = s.source();
        }
        Self {
            kind: std::any::type_name::<E>().to_string(),
            message: err.to_string(),
            chain,
        }
    }

    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            chain: Vec::new(),
        }
    }
}

impl FieldValue {
    /// True when this value (recursively) contains no [`FieldValue::Raw`],
    /// so the fast writer can render it.
    pub fn fast_safe(&self) -> bool {
        match self {
            FieldValue::Raw(_) => false,
            FieldValue::List(items) => items.iter().all(FieldValue::fast_safe),
            FieldValue::Map(entries) => entries.iter().all(|(_, v)| v.fast_safe()),
            _ => true,
        }
    }
}

impl Serialize for FieldValue {
    fn serialize<S: Serializer>(&self, ser: S) -> Result<S::Ok, S::Error> {
        match self {
            FieldValue::Null => ser.serialize_unit(),
            FieldValue::Bool(b) => ser.serialize_bool(*b),
            FieldValue::Int(i) => ser.serialize_i64(*i),
            FieldValue::Uint(u) => ser.serialize_u64(*u),
            FieldValue::Float(f) => ser.serialize_f64(*f),
            FieldValue::Str(s) => ser.serialize_str(s),
            FieldValue::Time(t) => {
                ser.serialize_str(&t.to_rfc3339_opts(SecondsFormat::Millis, true))
            }
            FieldValue::Duration(d) => ser.serialize_f64(d.as_secs_f64() * 1000.0),
            FieldValue::Addr(a) => ser.serialize_str(&a.to_string()),
            FieldValue::Path(p) => ser.serialize_str(&p.to_string_lossy()),
            FieldValue::List(items) => {
                let mut seq = ser.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            FieldValue::Map(entries) => {
                let mut map = ser.serialize_map(Some(entries.len()))?;
                for (k, v) in entries {
                    map.serialize_entry(k, v)?;
                }
                map.end()
            }
            FieldValue::Error(info) => info.serialize(ser),
            FieldValue::Raw(value) => value.serialize(ser),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::Str(s.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        FieldValue::Str(s)
    }
}

impl From<i32> for FieldValue {
    fn from(i: i32) -> Self {
        FieldValue::Int(i64::from(i))
    }
}

impl From<i64> for FieldValue {
    fn from(i: i64) -> Self {
        FieldValue::Int(i)
    }
}

impl From<u64> for FieldValue {
    fn from(u: u64) -> Self {
        FieldValue::Uint(u)
    }
}

impl From<f64> for FieldValue {
    fn from(f: f64) -> Self {
        FieldValue::Float(f)
    }
}

impl From<bool> for FieldValue {
    fn from(b: bool) -> Self {
        FieldValue::Bool(b)
    }
}

impl From<DateTime<Utc>> for FieldValue {
    fn from(t: DateTime<Utc>) -> Self {
        FieldValue::Time(t)
    }
}

impl From<Duration> for FieldValue {
    fn from(d: Duration) -> Self {
        FieldValue::Duration(d)
    }
}

impl From<SocketAddr> for FieldValue {
    fn from(a: SocketAddr) -> Self {
        FieldValue::Addr(a)
    }
}

impl From<PathBuf> for FieldValue {
    fn from(p: PathBuf) -> Self {
        FieldValue::Path(p)
    }
}

impl From<serde_json::Value> for FieldValue {
    fn from(v: serde_json::Value) -> Self {
        FieldValue::Raw(v)
    }
}

/// Ordered field mapping; insertion order is preserved so the encoded
/// record reads in the order fields were added.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldMap {
    entries: Vec<(String, FieldValue)>,
}

impl FieldMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: FieldValue) {
        self.entries.push((key.into(), value));
    }

    /// Insert or overwrite in place, keeping the original position so
    /// repeated keys cannot produce duplicate JSON members.
    pub fn set(&mut self, key: impl Into<String>, value: FieldValue) {
        let key = key.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&FieldValue> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.iter().any(|(k, _)| k == key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &(String, FieldValue)> {
        self.entries.iter()
    }

    /// True when every value can be rendered by the fast writer.
    pub fn fast_safe(&self) -> bool {
        self.entries.iter().all(|(_, v)| v.fast_safe())
    }
}

impl Serialize for FieldMap {
    fn serialize<S: Serializer>(&self, ser: S) -> Result<S::Ok, S::Error> {
        let mut map = ser.serialize_map(Some(self.entries.len()))?;
        for (k, v) in &self.entries {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

impl FromIterator<(String, FieldValue)> for FieldMap {
    fn from_iter<I: IntoIterator<Item = (String, FieldValue)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_map_preserves_order() {
        let mut map = FieldMap::new();
        map.insert("z", FieldValue::Int(1));
        map.insert("a", FieldValue::Int(2));
        let keys: Vec<_> = map.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["z", "a"]);
    }

    #[test]
    fn test_fast_safe_detection() {
        let mut map = FieldMap::new();
        map.insert("n", FieldValue::Int(1));
        map.insert("s", FieldValue::Str("x".into()));
        assert!(map.fast_safe());

        map.insert("raw", FieldValue::Raw(serde_json::json!({"a": 1})));
        assert!(!map.fast_safe());
    }

    #[test]
    fn test_nested_raw_detected() {
        let inner = FieldValue::List(vec![FieldValue::Raw(serde_json::Value::Null)]);
        assert!(!inner.fast_safe());
        let nested = FieldValue::Map(vec![("k".to_string(), inner)]);
        assert!(!nested.fast_safe());
    }

    #[test]
    fn test_error_info_chain() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "inner");
        let info = ErrorInfo::from_error(&io);
        assert_eq!(info.message, "inner");
        assert!(info.kind.contains("Error"));
    }

    #[test]
    fn test_serde_shapes() {
        let mut map = FieldMap::new();
        map.insert("d", FieldValue::Duration(Duration::from_millis(1500)));
        map.insert("p", FieldValue::Path(PathBuf::from("/var/log/app.log")));
        let json = serde_json::to_string(&map).unwrap();
        assert!(json.contains("\"d\":1500"));
        assert!(json.contains("/var/log/app.log"));
    }
}
