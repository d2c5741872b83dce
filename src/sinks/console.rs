//! Console sink
//!
//! Writes encoded lines to stdout or stderr. Output can be disabled for
//! the whole process with `LOGSPOOL_NO_CONSOLE`, checked once at startup;
//! test suites use this to keep captured output clean.

use crate::core::diag;
use crate::core::encoder::Envelope;
use std::io::Write;
use std::sync::Arc;
use std::sync::OnceLock;

static DISABLED: OnceLock<bool> = OnceLock::new();

fn disabled() -> bool {
    *DISABLED.get_or_init(|| std::env::var_os("LOGSPOOL_NO_CONSOLE").is_some())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleTarget {
    Stdout,
    Stderr,
}

#[derive(Debug, Clone, Copy)]
pub struct ConsoleSink {
    target: ConsoleTarget,
}

impl ConsoleSink {
    pub fn stdout() -> Self {
        Self {
            target: ConsoleTarget::Stdout,
        }
    }

    pub fn stderr() -> Self {
        Self {
            target: ConsoleTarget::Stderr,
        }
    }

    pub fn target(&self) -> ConsoleTarget {
        self.target
    }

    pub fn push(&self, envelope: &Arc<Envelope>) {
        if disabled() {
            return;
        }
        let line = match envelope.encoded() {
            Ok(line) => line,
            Err(e) => {
                diag::diag_failure("encoding record", &e);
                return;
            }
        };
        let result = match self.target {
            ConsoleTarget::Stdout => {
                let stdout = std::io::stdout();
                let mut lock = stdout.lock();
                writeln!(lock, "{}", line)
            }
            ConsoleTarget::Stderr => {
                let stderr = std::io::stderr();
                let mut lock = stderr.lock();
                writeln!(lock, "{}", line)
            }
        };
        if let Err(e) = result {
            diag::diag_failure("writing to console", &e);
        }
    }
}

impl std::fmt::Display for ConsoleSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.target {
            ConsoleTarget::Stdout => write!(f, "console(stdout)"),
            ConsoleTarget::Stderr => write!(f, "console(stderr)"),
        }
    }
}
