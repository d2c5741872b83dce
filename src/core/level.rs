//! Log level definitions and the error-escalation policy

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Severity of a log record, ordered by numeric value.
///
/// The numeric values are the ones written into encoded records, so they
/// stay stable across releases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[derive(Default)]
pub enum Level {
    Trace = 10,
    Debug = 20,
    #[default]
    Info = 30,
    Warn = 40,
    Error = 50,
    Fatal = 60,
}

impl Level {
    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Trace => "trace",
            Level::Debug => "debug",
            Level::Info => "info",
            Level::Warn => "warn",
            Level::Error => "error",
            Level::Fatal => "fatal",
        }
    }

    /// Numeric value written into encoded records.
    pub fn value(&self) -> i64 {
        *self as i64
    }

    /// Records at or above `Error` are duplicated to the severe channel.
    pub fn is_severe(&self) -> bool {
        *self >= Level::Error
    }

    fn from_value(v: i64) -> Option<Self> {
        match v {
            10 => Some(Level::Trace),
            20 => Some(Level::Debug),
            30 => Some(Level::Info),
            40 => Some(Level::Warn),
            50 => Some(Level::Error),
            60 => Some(Level::Fatal),
            _ => None,
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Level {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Ok(v) = s.parse::<i64>() {
            return Level::from_value(v).ok_or_else(|| format!("Invalid log level: '{}'", s));
        }
        match s.to_lowercase().as_str() {
            "trace" => Ok(Level::Trace),
            "debug" => Ok(Level::Debug),
            "info" => Ok(Level::Info),
            "warn" | "warning" => Ok(Level::Warn),
            "error" => Ok(Level::Error),
            "fatal" => Ok(Level::Fatal),
            _ => Err(format!("Invalid log level: '{}'", s)),
        }
    }
}

/// Policy for promoting a record's level when an error value is attached.
///
/// A generic error raises the record to [`Level::Error`]; an error whose
/// kind matches any entry in `fatal_kinds` (substring match against the
/// captured type name) raises it to [`Level::Fatal`]. Escalation never
/// lowers a level, and is a no-op when disabled.
#[derive(Debug, Clone)]
pub struct EscalationPolicy {
    pub enabled: bool,
    /// Error-kind substrings treated as unrecoverable.
    pub fatal_kinds: Vec<String>,
}

impl Default for EscalationPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            fatal_kinds: vec!["PoisonError".to_string()],
        }
    }
}

impl EscalationPolicy {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            fatal_kinds: Vec::new(),
        }
    }

    /// Target level for an error of the given kind.
    pub fn level_for(&self, kind: &str) -> Level {
        if self.fatal_kinds.iter().any(|k| kind.contains(k.as_str())) {
            Level::Fatal
        } else {
            Level::Error
        }
    }

    /// Apply the policy: returns the (possibly promoted) level.
    pub fn escalate(&self, current: Level, kind: &str) -> Level {
        if !self.enabled {
            return current;
        }
        current.max(self.level_for(kind))
    }
}
