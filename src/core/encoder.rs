//! Record encoding
//!
//! A finalized record is wrapped in an [`Envelope`] that caches its encoded
//! form, so a record fanned out to several sinks is encoded exactly once.
//! The fast writer is a hand-rolled compact JSON emitter over the closed
//! set of field shapes; the fallback writer is `serde_json`. The adaptive
//! policy downgrades per record when an arbitrary [`FieldValue::Raw`] value
//! is present.

use crate::core::error::{LogError, Result};
use crate::core::field::{ErrorInfo, FieldMap, FieldValue};
use crate::core::level::Level;
use chrono::SecondsFormat;
use std::fmt;
use std::sync::OnceLock;

/// How records are turned into JSON lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EncodePolicy {
    /// Fast writer only; records it cannot render are dropped with a
    /// diagnostic.
    AlwaysFast,
    /// `serde_json` for every record.
    AlwaysFallback,
    /// Fast writer when every field is a well-known shape, `serde_json`
    /// otherwise.
    #[default]
    Adaptive,
}

impl EncodePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            EncodePolicy::AlwaysFast => "fast",
            EncodePolicy::AlwaysFallback => "fallback",
            EncodePolicy::Adaptive => "adaptive",
        }
    }
}

impl fmt::Display for EncodePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for EncodePolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "fast" => Ok(EncodePolicy::AlwaysFast),
            "fallback" => Ok(EncodePolicy::AlwaysFallback),
            "adaptive" => Ok(EncodePolicy::Adaptive),
            _ => Err(format!("Invalid encode policy: '{}'", s)),
        }
    }
}

/// A finalized record plus its lazily-computed, cached encoding.
///
/// Shared between sinks as `Arc<Envelope>`; the first sink to ask pays for
/// the encode, every later sink reads the cache.
#[derive(Debug)]
pub struct Envelope {
    name: String,
    level: Level,
    fields: FieldMap,
    policy: EncodePolicy,
    cache: OnceLock<std::result::Result<Box<str>, String>>,
}

impl Envelope {
    pub fn new(name: String, level: Level, fields: FieldMap, policy: EncodePolicy) -> Self {
        Self {
            name,
            level,
            fields,
            policy,
            cache: OnceLock::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn level(&self) -> Level {
        self.level
    }

    pub fn fields(&self) -> &FieldMap {
        &self.fields
    }

    /// The encoded JSON line (no trailing newline). Cached on first use.
    pub fn encoded(&self) -> Result<&str> {
        let cached = self.cache.get_or_init(|| match encode(&self.fields, self.policy) {
            Ok(s) => Ok(s.into_boxed_str()),
            Err(e) => Err(e.to_string()),
        });
        match cached {
            Ok(s) => Ok(s),
            Err(msg) => Err(LogError::encoding(self.policy.as_str(), msg.clone())),
        }
    }

    /// UTF-8 bytes of the encoded line.
    pub fn encoded_bytes(&self) -> Result<&[u8]> {
        self.encoded().map(str::as_bytes)
    }
}

fn encode(fields: &FieldMap, policy: EncodePolicy) -> Result<String> {
    match policy {
        EncodePolicy::AlwaysFallback => Ok(serde_json::to_string(fields)?),
        EncodePolicy::AlwaysFast => {
            if fields.fast_safe() {
                Ok(fast_encode(fields))
            } else {
                Err(LogError::encoding(
                    "fast",
                    "record carries a value outside the well-known shapes",
                ))
            }
        }
        EncodePolicy::Adaptive => {
            if fields.fast_safe() {
                Ok(fast_encode(fields))
            } else {
                Ok(serde_json::to_string(fields)?)
            }
        }
    }
}

/// Compact JSON over the closed field shapes. Callers must have checked
/// `fast_safe()`; a `Raw` value reaching here is emitted as null.
fn fast_encode(fields: &FieldMap) -> String {
    let mut out = String::with_capacity(128 + fields.len() * 24);
    out.push('{');
    let mut first = true;
    for (key, value) in fields.iter() {
        if !first {
            out.push(',');
        }
        first = false;
        write_str(&mut out, key);
        out.push(':');
        write_value(&mut out, value);
    }
    out.push('}');
    out
}

fn write_value(out: &mut String, value: &FieldValue) {
    match value {
        FieldValue::Null => out.push_str("null"),
        FieldValue::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        FieldValue::Int(i) => {
            use std::fmt::Write;
            let _ = write!(out, "{}", i);
        }
        FieldValue::Uint(u) => {
            use std::fmt::Write;
            let _ = write!(out, "{}", u);
        }
        FieldValue::Float(f) => write_f64(out, *f),
        FieldValue::Str(s) => write_str(out, s),
        FieldValue::Time(t) => write_str(out, &t.to_rfc3339_opts(SecondsFormat::Millis, true)),
        FieldValue::Duration(d) => write_f64(out, d.as_secs_f64() * 1000.0),
        FieldValue::Addr(a) => write_str(out, &a.to_string()),
        FieldValue::Path(p) => write_str(out, &p.to_string_lossy()),
        FieldValue::List(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_value(out, item);
            }
            out.push(']');
        }
        FieldValue::Map(entries) => {
            out.push('{');
            for (i, (k, v)) in entries.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_str(out, k);
                out.push(':');
                write_value(out, v);
            }
            out.push('}');
        }
        FieldValue::Error(info) => write_error(out, info),
        FieldValue::Raw(_) => out.push_str("null"),
    }
}

fn write_error(out: &mut String, info: &ErrorInfo) {
    out.push_str("{\"kind\":");
    write_str(out, &info.kind);
    out.push_str(",\"message\":");
    write_str(out, &info.message);
    if !info.chain.is_empty() {
        out.push_str(",\"chain\":[");
        for (i, cause) in info.chain.iter().enumerate() {
            if i > 0 {
                out.push(',');
            }
            write_str(out, cause);
        }
        out.push(']');
    }
    out.push('}');
}

/// JSON string escaping matching `serde_json`'s compact output.
fn write_str(out: &mut String, s: &str) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\u{08}' => out.push_str("\\b"),
            '\u{0c}' => out.push_str("\\f"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => {
                out.push_str(&format!("\\u{:04x}", c as u32));
            }
            c => out.push(c),
        }
    }
    out.push('"');
}

fn write_f64(out: &mut String, f: f64) {
    use std::fmt::Write;
    if f.is_finite() {
        // Debug formatting keeps the decimal point, like the fallback.
        let _ = write!(out, "{:?}", f);
    } else {
        out.push_str("null");
    }
}
