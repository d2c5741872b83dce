//! Fallback diagnostic channel
//!
//! A failure inside the logging engine cannot be reported through the
//! engine itself, so everything here goes straight to stderr. Verbose
//! output is gated once at startup by the `LOGSPOOL_DEBUG` environment
//! variable; genuine errors are always printed.

use std::sync::OnceLock;
use std::time::Instant;

static VERBOSE: OnceLock<bool> = OnceLock::new();
static STARTED: OnceLock<Instant> = OnceLock::new();

fn verbose() -> bool {
    *VERBOSE.get_or_init(|| std::env::var_os("LOGSPOOL_DEBUG").is_some())
}

fn prefix() -> String {
    let started = STARTED.get_or_init(Instant::now);
    format!("[logspool +{:.3}s]", started.elapsed().as_secs_f64())
}

/// Report a diagnostic message; printed only in verbose mode.
pub(crate) fn diag(msg: impl AsRef<str>) {
    if verbose() {
        eprintln!("{} {}", prefix(), msg.as_ref());
    }
}

/// Report an error; always printed.
pub(crate) fn diag_error(msg: impl AsRef<str>) {
    eprintln!("{} ERROR {}", prefix(), msg.as_ref());
}

/// Report an error with its source, always printed.
pub(crate) fn diag_failure(context: &str, err: &dyn std::fmt::Display) {
    eprintln!("{} ERROR {}: {}", prefix(), context, err);
}
